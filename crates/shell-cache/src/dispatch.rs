//! Named-event dispatch table for lifecycle and fetch handlers
//!
//! Handlers are registered per [`EventKind`] and return a boxed future. Work a
//! handler wants to keep running after it returns is handed to
//! [`ExtendableEvent::wait_until`]; the dispatcher settles that work before an
//! install or activate phase is reported complete.

use crate::error::{PolicyError, Result};
use crate::types::{AssetRequest, AssetResponse, ResponseSource};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
}

#[derive(Debug, Clone)]
pub enum Event {
    Install,
    Activate,
    Fetch(AssetRequest),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Install => EventKind::Install,
            Event::Activate => EventKind::Activate,
            Event::Fetch(_) => EventKind::Fetch,
        }
    }
}

/// What a handler decided
#[derive(Debug)]
pub enum Reply {
    /// Lifecycle handler finished its synchronous part
    Done,
    /// Fetch is not intercepted and goes to the network untouched
    PassThrough,
    Respond {
        response: AssetResponse,
        source: ResponseSource,
    },
}

/// Keeps background work of one event alive until it settles
#[derive(Clone, Default)]
pub struct ExtendableEvent {
    pending: Arc<Mutex<Vec<JoinHandle<Result<()>>>>>,
}

impl ExtendableEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` in the background and tie it to this event's lifetime
    pub fn wait_until<F>(&self, work: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let handle = tokio::spawn(work);
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Await every piece of extended work, including work added while settling.
    ///
    /// All work runs to completion; the first failure is returned.
    pub async fn settled(&self) -> Result<()> {
        let mut first_error = None;
        loop {
            let batch = std::mem::take(
                &mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner),
            );
            if batch.is_empty() {
                break;
            }
            for handle in batch {
                let outcome = match handle.await {
                    Ok(outcome) => outcome,
                    Err(join_err) => Err(PolicyError::Handler(join_err.to_string())),
                };
                if let Err(e) = outcome {
                    warn!(error = %e, "Extended event work failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

pub type HandlerFuture = BoxFuture<'static, Result<Reply>>;
pub type Handler = Arc<dyn Fn(Event, ExtendableEvent) -> HandlerFuture + Send + Sync>;

/// Result of dispatching one event
pub struct Dispatched {
    pub reply: Reply,
    /// Unsettled for fetch events; already settled for lifecycle events
    pub extension: ExtendableEvent,
}

#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: HashMap<EventKind, Vec<Handler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `kind`; handlers run in registration order
    pub fn on<F, Fut>(&mut self, kind: EventKind, handler: F)
    where
        F: Fn(Event, ExtendableEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |event: Event, extension: ExtendableEvent| {
            handler(event, extension).boxed()
        });
        self.handlers.entry(kind).or_default().push(handler);
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Run every handler for `event`.
    ///
    /// Install and activate are not complete until their extended work has
    /// settled. For fetch, the first handler that responds wins and its
    /// extended work is left running for the caller.
    pub async fn dispatch(&self, event: Event) -> Result<Dispatched> {
        let kind = event.kind();
        let extension = ExtendableEvent::new();
        let mut reply = match kind {
            EventKind::Fetch => Reply::PassThrough,
            EventKind::Install | EventKind::Activate => Reply::Done,
        };

        for handler in self.handlers.get(&kind).into_iter().flatten() {
            let outcome = handler(event.clone(), extension.clone()).await?;
            if matches!(outcome, Reply::Respond { .. }) {
                reply = outcome;
                break;
            }
        }

        if kind != EventKind::Fetch {
            extension.settled().await?;
        }

        Ok(Dispatched { reply, extension })
    }
}
