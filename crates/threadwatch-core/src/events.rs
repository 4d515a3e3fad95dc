//! Shared event-listener infrastructure.
//!
//! Every component that dispatches callbacks (the Watcher's New/Updated/Read
//! events, the BatchProcessor's progress/error callbacks, the Refresher's
//! `onUpdate`) is built on this small listener registry instead of each
//! crate inventing its own callback storage.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Trait implemented by every event type dispatched through a
/// [`ListenerSet`].
pub trait Event: Send + Sync + fmt::Debug {
    /// Machine-readable event kind, e.g. `"notification_new"`.
    fn kind(&self) -> &'static str;

    /// When this event was produced.
    fn timestamp(&self) -> Instant;
}

/// Trait for a single listener.
pub trait Listener<E: Event>: Send + Sync {
    /// Invoked once per dispatched event.
    fn on_event(&self, event: &E);
}

type BoxedListener<E> = Arc<dyn Listener<E>>;

/// A collection of listeners for one event type.
///
/// Cloning a `ListenerSet` clones the `Arc`s, not the listeners — the same
/// underlying listener can be shared across components.
#[derive(Clone)]
pub struct ListenerSet<E: Event> {
    listeners: Vec<BoxedListener<E>>,
}

impl<E: Event> ListenerSet<E> {
    /// An empty listener set.
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    /// Registers a listener.
    pub fn add<L>(&mut self, listener: L)
    where
        L: Listener<E> + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    /// Dispatches `event` to every registered listener.
    ///
    /// A panicking listener is caught so the remaining listeners still
    /// run; with the `tracing` feature enabled the panic is logged as a
    /// warning.
    pub fn emit(&self, event: &E) {
        for listener in &self.listeners {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.on_event(event);
            }));

            if let Err(_payload) = result {
                #[cfg(feature = "tracing")]
                tracing::warn!(event_kind = event.kind(), "event listener panicked");
                #[cfg(not(feature = "tracing"))]
                let _ = _payload;
            }
        }
    }

    /// True if no listeners are registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }
}

impl<E: Event> Default for ListenerSet<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// A function-based [`Listener`].
pub struct FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    f: F,
    _marker: std::marker::PhantomData<E>,
}

impl<E, F> FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    /// Wraps a closure as a [`Listener`].
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<E, F> Listener<E> for FnListener<E, F>
where
    E: Event,
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        (self.f)(event)
    }
}
