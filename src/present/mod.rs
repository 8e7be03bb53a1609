//! Presentation layer
//!
//! Serializes hand-off of queued messages to the host's renderer. The
//! renderer contract is fire-and-forget; renderer-driven events (opened,
//! closed, action) come back through the manager.

pub mod queue;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::types::message::Message;
use queue::PresentationQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayMode {
    /// Present eligible messages as they become available.
    Automatic,
    /// Hold everything; pending content stays queued until resumed.
    Paused,
}

/// Host-side display surface. Each call is fire-and-forget; the renderer
/// reports opened/closed/action events back asynchronously.
pub trait Renderer: Send + Sync {
    fn prepare_surface(&self);
    fn show_content(&self, message_id: i64, content: &Value);
    fn teardown_surface(&self);
}

pub struct Presenter {
    queue: PresentationQueue,
    display_mode: Mutex<DisplayMode>,
    renderer: Arc<dyn Renderer>,
}

impl Presenter {
    pub fn new(renderer: Arc<dyn Renderer>, display_mode: DisplayMode) -> Self {
        Self {
            queue: PresentationQueue::new(),
            display_mode: Mutex::new(display_mode),
            renderer,
        }
    }

    pub fn display_mode(&self) -> DisplayMode {
        *self.display_mode.lock().unwrap()
    }

    /// Change display mode; unpausing resumes presentation from the queue.
    pub fn set_display_mode(&self, mode: DisplayMode) {
        let resumed = {
            let mut current = self.display_mode.lock().unwrap();
            let resumed = mode != *current && mode != DisplayMode::Paused;
            *current = mode;
            resumed
        };

        if resumed {
            self.present_from_queue();
        }
    }

    pub fn pending_tickle_ids(&self) -> Vec<i64> {
        self.queue.pending_tickle_ids()
    }

    /// Record a tickle id ahead of its message arriving in the store.
    pub fn register_tickle(&self, tickle_id: i64) {
        self.queue.register_tickle(tickle_id);
    }

    pub fn current_message_id(&self) -> Option<i64> {
        self.queue.current_id()
    }

    /// Merge messages and tickles into the queue and present when the queue
    /// decision says so.
    pub fn queue_for_presentation(&self, messages: Vec<Message>, new_tickle_ids: &[i64]) {
        if self.queue.enqueue(messages, new_tickle_ids) {
            self.present_from_queue();
        }
    }

    /// Hand the head of queue to the renderer. Tears the surface down when
    /// there is nothing to show or display is paused. The queue mutex is
    /// released before any renderer call.
    pub fn present_from_queue(&self) {
        let paused = self.display_mode() == DisplayMode::Paused;

        match self.queue.take_next(paused) {
            None => self.renderer.teardown_surface(),
            Some(message) => {
                debug!("Presenting message {}", message.id);
                self.renderer.prepare_surface();
                self.renderer.show_content(message.id, &message.content);
            }
        }
    }

    /// The renderer reported the current message closed. Removes it from the
    /// queue and presents the next one (or tears down). Returns the closed
    /// message id so the caller can clear its tickle notification.
    pub fn on_message_closed(&self) -> Option<i64> {
        let closed = self.queue.close_current();
        self.present_from_queue();
        closed
    }

    /// Drop the pending queue and tear down the display surface. Used on
    /// unrecoverable renderer failure. With `wait_for_cleanup` the teardown
    /// happens before returning; otherwise it is deferred to a task when a
    /// runtime is available.
    pub fn cancel(&self, wait_for_cleanup: bool) {
        self.queue.cancel();

        if wait_for_cleanup {
            self.renderer.teardown_surface();
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let renderer = self.renderer.clone();
                handle.spawn(async move {
                    renderer.teardown_surface();
                });
            }
            Err(_) => self.renderer.teardown_surface(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingRenderer;
    use super::*;
    use crate::types::message::{parse_timestamp, PresentRule};
    use serde_json::json;

    fn msg(id: i64) -> Message {
        Message {
            id,
            updated_at: parse_timestamp("2024-01-01T00:00:00Z").unwrap(),
            present_rule: PresentRule::Immediately,
            content: json!({"id": id}),
            data: None,
            badge_config: None,
            inbox_config: None,
            inbox_from: None,
            inbox_to: None,
            dismissed_at: None,
            read_at: None,
            sent_at: None,
            expires_at: None,
        }
    }

    #[test]
    fn presents_head_of_queue() {
        let renderer = Arc::new(RecordingRenderer::default());
        let presenter = Presenter::new(renderer.clone(), DisplayMode::Automatic);

        presenter.queue_for_presentation(vec![msg(1)], &[]);

        assert_eq!(renderer.calls(), vec!["prepare", "show:1"]);
        assert_eq!(presenter.current_message_id(), Some(1));
    }

    #[test]
    fn paused_mode_tears_down_instead_of_presenting() {
        let renderer = Arc::new(RecordingRenderer::default());
        let presenter = Presenter::new(renderer.clone(), DisplayMode::Paused);

        presenter.queue_for_presentation(vec![msg(1)], &[]);

        assert_eq!(renderer.calls(), vec!["teardown"]);
        assert!(presenter.current_message_id().is_none());
    }

    #[test]
    fn unpausing_resumes_presentation() {
        let renderer = Arc::new(RecordingRenderer::default());
        let presenter = Presenter::new(renderer.clone(), DisplayMode::Paused);
        presenter.queue_for_presentation(vec![msg(1)], &[]);

        presenter.set_display_mode(DisplayMode::Automatic);

        assert_eq!(renderer.calls(), vec!["teardown", "prepare", "show:1"]);
    }

    #[test]
    fn closing_presents_next_then_tears_down() {
        let renderer = Arc::new(RecordingRenderer::default());
        let presenter = Presenter::new(renderer.clone(), DisplayMode::Automatic);
        presenter.queue_for_presentation(vec![msg(1), msg(2)], &[]);

        assert_eq!(presenter.on_message_closed(), Some(1));
        assert_eq!(presenter.current_message_id(), Some(2));

        assert_eq!(presenter.on_message_closed(), Some(2));
        assert_eq!(
            renderer.calls(),
            vec!["prepare", "show:1", "prepare", "show:2", "teardown"]
        );
    }

    #[test]
    fn tickle_displaces_current_presentation() {
        let renderer = Arc::new(RecordingRenderer::default());
        let presenter = Presenter::new(renderer.clone(), DisplayMode::Automatic);
        presenter.queue_for_presentation(vec![msg(1)], &[]);

        presenter.queue_for_presentation(vec![msg(2)], &[2]);

        assert_eq!(presenter.current_message_id(), Some(2));
        assert_eq!(
            renderer.calls(),
            vec!["prepare", "show:1", "prepare", "show:2"]
        );
    }

    #[test]
    fn cancel_clears_queue_and_tears_down() {
        let renderer = Arc::new(RecordingRenderer::default());
        let presenter = Presenter::new(renderer.clone(), DisplayMode::Automatic);
        presenter.queue_for_presentation(vec![msg(1), msg(2)], &[]);

        presenter.cancel(true);

        assert!(presenter.current_message_id().is_none());
        assert_eq!(presenter.on_message_closed(), None);
        assert!(renderer.calls().contains(&"teardown".to_string()));
    }
}
