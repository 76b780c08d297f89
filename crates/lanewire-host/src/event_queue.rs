//! Delivery of [`NetEvent`]s to the application.
//!
//! Events are queued on an unbounded channel and drained on the application's thread, either
//! one by one ([`EventQueue::recv`]) or by handing each to a listener ([`EventQueue::poll_events`]).
//! In unsynced mode a listener is invoked directly on the thread that produced the event, and
//! the listener has to cope with being called from the I/O and tick threads.

use std::{fmt, sync::Arc};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::error;

use crate::event_types::NetEvent;

/// Callback receiving events.
pub type EventListener = Arc<dyn Fn(NetEvent) + Send + Sync>;

/// Queue of pending events with an optional listener.
pub struct EventQueue {
    sender: Sender<NetEvent>,
    receiver: Receiver<NetEvent>,
    listener: Option<EventListener>,
    unsynced: bool,
}

impl fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueue")
            .field("pending", &self.receiver.len())
            .field("listener", &self.listener.is_some())
            .field("unsynced", &self.unsynced)
            .finish()
    }
}

impl EventQueue {
    /// Creates a queue. `unsynced` only takes effect once a listener is set.
    pub fn new(unsynced: bool) -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver, listener: None, unsynced }
    }

    /// Sets the listener used by [`EventQueue::poll_events`] and unsynced dispatch.
    pub fn set_listener(&mut self, listener: EventListener) {
        self.listener = Some(listener);
    }

    /// Reports an event.
    pub fn push(&self, event: NetEvent) {
        if self.unsynced {
            if let Some(listener) = &self.listener {
                listener(event);
                return;
            }
        }
        if let Err(error) = self.sender.send(event) {
            error!("event queue closed, dropping {:?}", error.0);
        }
    }

    /// Takes the next queued event, if any.
    pub fn recv(&self) -> Option<NetEvent> {
        self.receiver.try_recv().ok()
    }

    /// Hands every queued event to the listener. Returns how many were dispatched.
    ///
    /// Without a listener nothing is drained.
    pub fn poll_events(&self) -> usize {
        let Some(listener) = &self.listener else {
            return 0;
        };
        let mut count = 0;
        while let Ok(event) = self.receiver.try_recv() {
            listener(event);
            count += 1;
        }
        count
    }

    /// Returns a handle to the queue for consumers on other threads.
    pub fn receiver(&self) -> Receiver<NetEvent> {
        self.receiver.clone()
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Returns true if no event is queued.
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}
