//! Priority-ordered playback queue with an interrupt stack.
//!
//! Higher-priority content interrupts lower-priority content; when the
//! interruption finishes, the interrupted content resumes from where it
//! left off. All state lives behind one `Mutex`; every public method takes
//! it exactly once and never calls another locking method while the guard
//! is held, so a push-server thread can safely call in without deadlocking
//! against the driver loop (see DESIGN.md for why this sidesteps the need
//! for a reentrant lock).

use std::time::Instant;

use log::{debug, info, warn};

use crate::content::{Content, Frame};
use crate::limits::QueueLimits;

/// Runtime state for whichever content is currently playing or queued.
#[derive(Debug)]
pub struct ContentState {
    content: Content,
    frame_index: usize,
    loop_count: u32,
    frame_start_time: Instant,
    paused: bool,
    paused_at: Option<Instant>,
    time_paused_ms: f64,
}

impl ContentState {
    fn new(content: Content) -> Self {
        Self {
            content,
            frame_index: 0,
            loop_count: 0,
            frame_start_time: Instant::now(),
            paused: false,
            paused_at: None,
            time_paused_ms: 0.0,
        }
    }

    pub fn content_id(&self) -> &str {
        &self.content.content_id
    }

    pub fn priority(&self) -> u8 {
        self.content.playback.priority
    }

    pub fn current_frame(&self) -> &Frame {
        &self.content.frames[self.frame_index]
    }

    fn is_complete(&self) -> bool {
        if self.paused {
            return false;
        }
        let playback = &self.content.playback;
        if self.frame_index + 1 >= self.content.frames.len() {
            if !playback.looped {
                return true;
            }
            if let Some(limit) = playback.loop_count {
                if self.loop_count >= limit {
                    return true;
                }
            }
        }
        false
    }

    /// Advance to the next frame if its duration has elapsed. Returns
    /// whether a frame advance occurred.
    fn advance_frame(&mut self) -> bool {
        if self.paused {
            return false;
        }
        let duration = self.current_frame().effective_duration();
        if duration == 0 {
            return false;
        }

        let elapsed_ms =
            self.frame_start_time.elapsed().as_millis() as f64 - self.time_paused_ms;
        if elapsed_ms < duration as f64 {
            return false;
        }

        self.frame_index += 1;
        if self.frame_index >= self.content.frames.len() {
            if self.content.playback.looped {
                self.frame_index = 0;
                self.loop_count += 1;
            } else {
                self.frame_index = self.content.frames.len() - 1;
            }
        }
        self.frame_start_time = Instant::now();
        self.time_paused_ms = 0.0;
        true
    }

    fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            self.paused_at = Some(Instant::now());
        }
    }

    fn resume(&mut self) {
        if self.paused {
            if let Some(at) = self.paused_at.take() {
                self.time_paused_ms += at.elapsed().as_millis() as f64;
            }
            self.paused = false;
        }
    }
}

struct QueueState {
    current: Option<ContentState>,
    queue: Vec<ContentState>,
    interrupted: Vec<ContentState>,
}

impl QueueState {
    fn new() -> Self {
        Self {
            current: None,
            queue: Vec::new(),
            interrupted: Vec::new(),
        }
    }

    /// Insert after the last entry whose priority is >= the new item's,
    /// preserving FIFO order within a priority level. Drops the new tail if
    /// the bound is exceeded.
    fn insert_into_queue(&mut self, state: ContentState, limits: &QueueLimits) {
        let priority = state.priority();
        let mut insert_idx = 0;
        for (i, queued) in self.queue.iter().enumerate() {
            if priority <= queued.priority() {
                insert_idx = i + 1;
            } else {
                break;
            }
        }
        self.queue.insert(insert_idx, state);

        if self.queue.len() > limits.max_queued_items {
            if let Some(dropped) = self.queue.pop() {
                warn!(
                    "queue overflow: dropped {} (priority {})",
                    dropped.content_id(),
                    dropped.priority()
                );
            }
        }
        info!(
            "queued content at position {insert_idx} ({} items)",
            self.queue.len()
        );
    }

    fn add_content(&mut self, content: Content, limits: &QueueLimits) {
        let priority = content.playback.priority;
        let new_state = ContentState::new(content);
        info!(
            "adding content {} with priority {priority}",
            new_state.content_id()
        );

        let Some(current) = self.current.as_mut() else {
            info!("started playing {} (queue was empty)", new_state.content_id());
            self.current = Some(new_state);
            return;
        };

        if priority > current.priority() {
            if current.content.playback.interruptible {
                info!(
                    "interrupting {} (priority {}) with {} (priority {priority})",
                    current.content_id(),
                    current.priority(),
                    new_state.content_id()
                );
                current.pause();
                let previous = self.current.take().expect("current checked above");
                self.interrupted.push(previous);
                if self.interrupted.len() > limits.max_interrupted_items {
                    let dropped = self.interrupted.remove(0);
                    warn!(
                        "interrupted stack overflow: dropped {}",
                        dropped.content_id()
                    );
                }
                self.current = Some(new_state);
            } else {
                warn!(
                    "cannot interrupt {} (marked as non-interruptible)",
                    current.content_id()
                );
                self.insert_into_queue(new_state, limits);
            }
        } else {
            self.insert_into_queue(new_state, limits);
        }
    }

    fn update(&mut self) -> Option<Frame> {
        let current = self.current.as_mut()?;

        if current.advance_frame() {
            debug!(
                "advanced to frame {} of {}",
                current.frame_index,
                current.content_id()
            );
        }

        if current.is_complete() {
            info!("content {} completed", current.content_id());
            if let Some(mut resumed) = self.interrupted.pop() {
                resumed.resume();
                info!("resumed interrupted content {}", resumed.content_id());
                self.current = Some(resumed);
            } else if !self.queue.is_empty() {
                let next = self.queue.remove(0);
                info!("started next queued content {}", next.content_id());
                self.current = Some(next);
            } else {
                self.current = None;
                info!("queue is empty");
                return None;
            }
        }

        self.current.as_ref().map(|s| s.current_frame().clone())
    }

    fn replace_if_same_id(&mut self, content: Content) -> bool {
        if let Some(current) = self.current.as_ref() {
            if current.content_id() == content.content_id {
                info!("replacing current content {}", content.content_id);
                let old_frame_idx = current.frame_index;
                let mut fresh = ContentState::new(content);
                if old_frame_idx < fresh.content.frames.len() {
                    fresh.frame_index = old_frame_idx;
                }
                self.current = Some(fresh);
                return true;
            }
        }

        for state in self.queue.iter_mut() {
            if state.content_id() == content.content_id {
                info!("replacing queued content {}", content.content_id);
                *state = ContentState::new(content);
                return true;
            }
        }

        for state in self.interrupted.iter_mut() {
            if state.content_id() == content.content_id {
                info!("replacing interrupted content {}", content.content_id);
                *state = ContentState::new(content);
                return true;
            }
        }

        false
    }

    fn clear(&mut self) {
        info!("clearing content queue");
        self.current = None;
        self.queue.clear();
        self.interrupted.clear();
    }

    fn set_playlist(&mut self, mut contents: Vec<Content>, limits: &QueueLimits) {
        if contents.is_empty() {
            self.clear();
            return;
        }

        let first = contents.remove(0);
        let preserved_frame_idx = self
            .current
            .as_ref()
            .filter(|c| c.content_id() == first.content_id)
            .map(|c| c.frame_index);

        self.queue.clear();
        self.interrupted.clear();

        let mut new_current = ContentState::new(first);
        if let Some(idx) = preserved_frame_idx {
            if idx < new_current.content.frames.len() {
                new_current.frame_index = idx;
            }
        }
        self.current = Some(new_current);

        for content in contents {
            let state = ContentState::new(content);
            self.queue.push(state);
        }
        if self.queue.len() > limits.max_queued_items {
            self.queue.truncate(limits.max_queued_items);
        }
    }
}

/// Thread-safe front end over `QueueState`. Every method locks exactly
/// once — see the module doc comment.
pub struct ContentQueue {
    state: std::sync::Mutex<QueueState>,
    limits: QueueLimits,
}

impl ContentQueue {
    pub fn new(limits: QueueLimits) -> Self {
        Self {
            state: std::sync::Mutex::new(QueueState::new()),
            limits,
        }
    }

    pub fn add_content(&self, content: Content) {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        state.add_content(content, &self.limits);
    }

    pub fn update(&self) -> Option<Frame> {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        state.update()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        state.clear();
    }

    pub fn has_content(&self) -> bool {
        let state = self.state.lock().expect("queue mutex poisoned");
        state.current.is_some()
    }

    pub fn get_current_id(&self) -> Option<String> {
        let state = self.state.lock().expect("queue mutex poisoned");
        state.current.as_ref().map(|c| c.content_id().to_string())
    }

    pub fn replace_if_same_id(&self, content: Content) -> bool {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        state.replace_if_same_id(content)
    }

    /// Convenience used by the driver loop: try an in-place replace, and
    /// fall back to normal admission if nothing matched.
    pub fn replace_or_add(&self, content: Content) {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        if !state.replace_if_same_id(content.clone()) {
            state.add_content(content, &self.limits);
        }
    }

    pub fn set_playlist(&self, contents: Vec<Content>) {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        state.set_playlist(contents, &self.limits);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::PlaybackMode;
    use base64::Engine;

    fn content(id: &str, priority: u8, interruptible: bool, n_frames: usize, dur: u32) -> Content {
        let frames = (0..n_frames)
            .map(|_| Frame {
                data_b64: base64::engine::general_purpose::STANDARD.encode([0u8]),
                width: 8,
                height: 1,
                duration_ms: Some(dur),
                metadata: None,
            })
            .collect();
        Content {
            content_id: id.to_string(),
            frames,
            playback: PlaybackMode {
                looped: false,
                loop_count: None,
                priority,
                interruptible,
                ..PlaybackMode::default()
            },
            metadata: None,
        }
    }

    fn looping_content(id: &str, n_frames: usize, loop_count: u32) -> Content {
        let mut c = content(id, 0, true, n_frames, 100);
        c.playback.looped = true;
        c.playback.loop_count = Some(loop_count);
        c
    }

    #[test]
    fn content_not_complete_before_loop_limit_reached_at_final_frame() {
        let mut state = ContentState::new(looping_content("c", 2, 2));
        state.frame_index = 1; // at the final frame
        state.loop_count = 0;
        assert!(!state.is_complete());
        state.loop_count = 1;
        assert!(!state.is_complete()); // still below the limit of 2
    }

    #[test]
    fn content_completes_at_loop_limit_only_on_final_frame() {
        let mut state = ContentState::new(looping_content("c", 2, 2));
        state.loop_count = 2; // at the limit...
        state.frame_index = 0; // ...but mid-loop, not the final frame
        assert!(!state.is_complete());

        state.frame_index = 1; // now at the final frame too
        assert!(state.is_complete());
    }

    #[test]
    fn first_admission_becomes_current() {
        let q = ContentQueue::new(QueueLimits::default());
        q.add_content(content("a", 0, true, 3, 100));
        assert_eq!(q.get_current_id(), Some("a".to_string()));
    }

    #[test]
    fn higher_priority_interrupts_interruptible_current() {
        let q = ContentQueue::new(QueueLimits::default());
        q.add_content(content("base", 0, true, 3, 100));
        q.add_content(content("notif", 10, true, 1, 50));
        assert_eq!(q.get_current_id(), Some("notif".to_string()));
    }

    #[test]
    fn non_interruptible_current_is_not_preempted() {
        let q = ContentQueue::new(QueueLimits::default());
        q.add_content(content("lock", 0, false, 3, 100));
        q.add_content(content("urgent", 99, true, 1, 50));
        assert_eq!(q.get_current_id(), Some("lock".to_string()));
    }

    #[test]
    fn same_or_lower_priority_queues_fifo() {
        let q = ContentQueue::new(QueueLimits::default());
        q.add_content(content("a", 0, true, 1, 0));
        q.add_content(content("b", 0, true, 1, 0));
        q.add_content(content("c", 0, true, 1, 0));
        assert_eq!(q.get_current_id(), Some("a".to_string()));
        q.clear();
        assert!(!q.has_content());
    }

    #[test]
    fn queue_overflow_drops_tail() {
        let limits = QueueLimits {
            max_queued_items: 1,
            ..QueueLimits::default()
        };
        let q = ContentQueue::new(limits);
        q.add_content(content("current", 5, true, 1, 0));
        q.add_content(content("q1", 0, true, 1, 0));
        q.add_content(content("q2", 0, true, 1, 0));
        // q1 should survive (inserted first), q2 dropped as overflow tail.
        let state = q.state.lock().unwrap();
        assert_eq!(state.queue.len(), 1);
        assert_eq!(state.queue[0].content_id(), "q1");
    }

    #[test]
    fn interrupted_overflow_drops_oldest() {
        let limits = QueueLimits {
            max_interrupted_items: 1,
            ..QueueLimits::default()
        };
        let q = ContentQueue::new(limits);
        q.add_content(content("base", 0, true, 1, 1_000_000));
        q.add_content(content("mid", 5, true, 1, 1_000_000));
        q.add_content(content("top", 10, true, 1, 1_000_000));
        let state = q.state.lock().unwrap();
        assert_eq!(state.interrupted.len(), 1);
        assert_eq!(state.interrupted[0].content_id(), "mid");
        assert_eq!(state.current.as_ref().unwrap().content_id(), "top");
    }

    #[test]
    fn replace_if_same_id_preserves_frame_index_on_current() {
        let q = ContentQueue::new(QueueLimits::default());
        q.add_content(content("clock", 0, true, 10, 0));
        {
            let mut state = q.state.lock().unwrap();
            state.current.as_mut().unwrap().frame_index = 3;
        }
        let replaced = q.replace_if_same_id(content("clock", 0, true, 10, 0));
        assert!(replaced);
        let state = q.state.lock().unwrap();
        assert_eq!(state.current.as_ref().unwrap().frame_index, 3);
    }

    #[test]
    fn replace_if_same_id_returns_false_when_absent() {
        let q = ContentQueue::new(QueueLimits::default());
        q.add_content(content("a", 0, true, 1, 0));
        assert!(!q.replace_if_same_id(content("b", 0, true, 1, 0)));
    }

    #[test]
    fn update_with_zero_duration_never_advances() {
        let q = ContentQueue::new(QueueLimits::default());
        q.add_content(content("static", 0, true, 3, 0));
        std::thread::sleep(std::time::Duration::from_millis(5));
        let f1 = q.update();
        let f2 = q.update();
        assert!(f1.is_some() && f2.is_some());
        let state = q.state.lock().unwrap();
        assert_eq!(state.current.as_ref().unwrap().frame_index, 0);
    }

    #[test]
    fn empty_queue_update_returns_none() {
        let q = ContentQueue::new(QueueLimits::default());
        assert_eq!(q.update().map(|_| ()), None);
    }

    #[test]
    fn set_playlist_with_empty_list_clears() {
        let q = ContentQueue::new(QueueLimits::default());
        q.add_content(content("a", 0, true, 1, 0));
        q.set_playlist(vec![]);
        assert!(!q.has_content());
    }
}
