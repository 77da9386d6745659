//! Write-path events.
//!
//! After a create, update or delete has been confirmed by the backend, the
//! database publishes an [`Event`] to every listener subscribed to that
//! (kind, record type) pair. Dispatch is synchronous and runs in
//! subscription order. A listener that returns an error or panics is logged
//! and counted; the remaining listeners still run and the write result is
//! unaffected.
//!
//! ```rust,ignore
//! db.events().subscribe::<Setting, _>("audit", EventKind::Created, |event| {
//!     println!("{} created {}", event.model, event.record.id);
//!     Ok(())
//! });
//! ```

use crate::error::BoxError;
use crate::record::{timestamp_ms, Model, Stored};
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

/// Kind of write that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Record inserted.
    Created,
    /// Record updated.
    Updated,
    /// Record deleted.
    Deleted,
}

impl EventKind {
    /// Event name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Created => "EventCreated",
            Self::Updated => "EventUpdated",
            Self::Deleted => "EventDeleted",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A committed write.
#[derive(Debug, Clone)]
pub struct Event<T> {
    /// Event identity.
    pub id: Uuid,
    /// Write kind.
    pub kind: EventKind,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Record type name.
    pub model: &'static str,
    /// Identity that performed the write.
    pub actor: Option<Uuid>,
    /// The record as persisted.
    pub record: Stored<T>,
}

impl<T: Model> Event<T> {
    /// Creates an event for `record`.
    pub fn new(kind: EventKind, record: Stored<T>, actor: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            timestamp: timestamp_ms(),
            model: T::NAME,
            actor,
            record,
        }
    }
}

/// Identity of a subscribed listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerId(String);

impl ListenerId {
    /// The identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ListenerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ListenerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type ErasedListener = dyn Fn(&dyn Any) -> Result<(), BoxError> + Send + Sync;

struct Subscription {
    id: ListenerId,
    kind: EventKind,
    model: TypeId,
    callback: Arc<ErasedListener>,
}

/// Registry of listeners keyed by (listener id, event kind, record type).
#[derive(Default)]
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    published: AtomicU64,
    failures: AtomicU64,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .field("published", &self.published())
            .field("failures", &self.failures())
            .finish()
    }
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `listener` to `kind` events of `T`.
    ///
    /// Returns false, leaving the existing subscription in place, if `id` is
    /// already subscribed to this (kind, type).
    pub fn subscribe<T, F>(&self, id: impl Into<ListenerId>, kind: EventKind, listener: F) -> bool
    where
        T: Model,
        F: Fn(&Event<T>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let id = id.into();
        let model = TypeId::of::<T>();
        let mut subscriptions = self.subscriptions.write();

        if subscriptions
            .iter()
            .any(|s| s.id == id && s.kind == kind && s.model == model)
        {
            return false;
        }

        let callback: Arc<ErasedListener> = Arc::new(move |event: &dyn Any| {
            match event.downcast_ref::<Event<T>>() {
                Some(event) => listener(event),
                None => Ok(()),
            }
        });
        debug!(listener = %id, event = %kind, model = T::NAME, "listener subscribed");
        subscriptions.push(Subscription {
            id,
            kind,
            model,
            callback,
        });
        true
    }

    /// Removes a subscription. Returns false if it did not exist.
    pub fn unsubscribe<T: Model>(&self, id: impl Into<ListenerId>, kind: EventKind) -> bool {
        let id = id.into();
        let model = TypeId::of::<T>();
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| !(s.id == id && s.kind == kind && s.model == model));
        before != subscriptions.len()
    }

    /// Dispatches `event` to matching listeners in subscription order.
    ///
    /// Returns the number of listeners that completed without error.
    pub fn publish<T: Model>(&self, event: &Event<T>) -> usize {
        let model = TypeId::of::<T>();
        let targets: Vec<(ListenerId, Arc<ErasedListener>)> = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.kind == event.kind && s.model == model)
            .map(|s| (s.id.clone(), Arc::clone(&s.callback)))
            .collect();

        self.published.fetch_add(1, Ordering::Relaxed);
        let mut delivered = 0;

        for (id, callback) in targets {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(event as &dyn Any)));
            match outcome {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    error!(listener = %id, event = %event.kind, model = event.model, error = %e, "listener failed");
                }
                Err(payload) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "(non-string panic)".to_string());
                    error!(listener = %id, event = %event.kind, model = event.model, panic = %message, "listener panicked");
                }
            }
        }
        delivered
    }

    /// Number of subscriptions.
    pub fn listener_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Number of events dispatched.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Number of listener invocations that failed.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}
