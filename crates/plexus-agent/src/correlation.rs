//! Thread-id correlation for in-flight request/response calls.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::message::Message;

/// Concurrent map from thread id to a single-shot response slot.
///
/// A slot exists exactly while one caller is blocked in `request` for that
/// thread id: the request path inserts it, inbound routing drains it, and
/// the request's drop guard removes it on timeout or cancellation.
#[derive(Default)]
pub(crate) struct CorrelationTable {
    slots: Mutex<HashMap<String, oneshot::Sender<Message>>>,
}

impl CorrelationTable {
    /// Install a slot.  Thread ids are minted per request, so a live
    /// duplicate cannot occur; a stale sender would be dropped here.
    pub fn insert(&self, thread_id: String, slot: oneshot::Sender<Message>) {
        self.slots.lock().insert(thread_id, slot);
    }

    /// Atomically look up and remove the slot for a thread id.  `None`
    /// means the waiter is gone (timed out or cancelled) and the message
    /// falls through to handler routing.
    pub fn take(&self, thread_id: &str) -> Option<oneshot::Sender<Message>> {
        self.slots.lock().remove(thread_id)
    }

    pub fn remove(&self, thread_id: &str) {
        self.slots.lock().remove(thread_id);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }
}
