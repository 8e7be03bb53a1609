//! Pending-display queue
//!
//! An ordered, deduplicated list of eligible messages plus a parallel
//! tickle-priority list. Tickle-triggered messages (push-originated) sort
//! ahead of ambient content; the most recent tickle wins. All mutation
//! happens under one mutex which is never held across renderer calls.

use std::sync::Mutex;

use crate::types::message::Message;

#[derive(Default)]
struct QueueState {
    queue: Vec<Message>,
    tickle_ids: Vec<i64>,
    current: Option<Message>,
}

impl QueueState {
    /// Stable re-sort: tickle messages first, ordered by tickle-list
    /// position; non-tickle messages keep their prior relative order.
    fn resort(&mut self) {
        let tickle_ids = self.tickle_ids.clone();
        self.queue.sort_by_key(|m| {
            tickle_ids
                .iter()
                .position(|&t| t == m.id)
                .unwrap_or(usize::MAX)
        });
    }
}

#[derive(Default)]
pub struct PresentationQueue {
    state: Mutex<QueueState>,
}

impl PresentationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge messages and tickle ids into the pending queue.
    ///
    /// Returns whether presentation should be (re-)triggered: true when
    /// nothing is showing and the queue has content, or when something is
    /// showing but the head of queue is now a higher-priority tickle.
    pub fn enqueue(&self, messages: Vec<Message>, new_tickle_ids: &[i64]) -> bool {
        let mut state = self.state.lock().unwrap();

        if messages.is_empty() && state.queue.is_empty() {
            return false;
        }

        for message in messages {
            if state.queue.iter().any(|m| m.id == message.id) {
                continue;
            }
            state.queue.push(message);
        }

        for &tickle_id in new_tickle_ids {
            if state.tickle_ids.contains(&tickle_id) {
                continue;
            }
            // Most recent tickle takes priority.
            state.tickle_ids.insert(0, tickle_id);
            state.resort();
        }

        let head_id = state.queue.first().map(|m| m.id);

        let idle_with_content = state.current.is_none() && head_id.is_some();
        let displaced_by_tickle = match (&state.current, head_id) {
            (Some(current), Some(head)) => {
                current.id != head && state.tickle_ids.first() == Some(&head)
            }
            _ => false,
        };

        idle_with_content || displaced_by_tickle
    }

    /// Record a tickle id without touching the message list. Used on push
    /// open before the corresponding message has been fetched.
    pub fn register_tickle(&self, tickle_id: i64) {
        let mut state = self.state.lock().unwrap();
        if state.tickle_ids.contains(&tickle_id) {
            return;
        }
        state.tickle_ids.insert(0, tickle_id);
        state.resort();
    }

    pub fn pending_tickle_ids(&self) -> Vec<i64> {
        self.state.lock().unwrap().tickle_ids.clone()
    }

    /// Take the head of queue as the current message. Returns `None` (and
    /// leaves the queue untouched) when the queue is empty or display is
    /// paused; the head stays in the queue until closed.
    pub fn take_next(&self, paused: bool) -> Option<Message> {
        let mut state = self.state.lock().unwrap();

        if paused || state.queue.is_empty() {
            return None;
        }

        let head = state.queue[0].clone();
        state.current = Some(head.clone());
        Some(head)
    }

    /// Remove the current message from both lists. When the queue drains,
    /// the tickle list is cleared entirely so stale priority state cannot
    /// leak into the next batch. Returns the closed message id.
    pub fn close_current(&self) -> Option<i64> {
        let mut state = self.state.lock().unwrap();

        let closed = state.current.take()?;
        state.queue.retain(|m| m.id != closed.id);
        state.tickle_ids.retain(|&t| t != closed.id);

        if state.queue.is_empty() {
            state.tickle_ids.clear();
        }

        Some(closed.id)
    }

    /// Drop everything pending and the current pointer.
    pub fn cancel(&self) {
        let mut state = self.state.lock().unwrap();
        state.queue.clear();
        state.tickle_ids.clear();
        state.current = None;
    }

    pub fn current_id(&self) -> Option<i64> {
        self.state.lock().unwrap().current.as_ref().map(|m| m.id)
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().queue.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn queued_ids(&self) -> Vec<i64> {
        self.state.lock().unwrap().queue.iter().map(|m| m.id).collect()
    }
}
