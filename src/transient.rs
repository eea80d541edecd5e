// Transient objects
//
// Objects a recorded command buffer may still reference after their last
// user let go of them. The queue keeps them until `frames_in_flight` frame
// boundaries have passed, by which point the GPU is done with the frame that
// used them.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::uniform::{DescriptorSetView, UniformSet};

#[derive(Debug, Clone)]
pub enum Transient {
    UniformSet(Arc<UniformSet>),
    DescriptorSetView(Arc<DescriptorSetView>),
}

#[derive(Debug)]
pub struct TransientQueue {
    frames_in_flight: u64,
    frame: u64,
    // (frame at which the entry may be released, entry)
    entries: VecDeque<(u64, Transient)>,
}

impl TransientQueue {
    pub fn new(frames_in_flight: u32) -> Self {
        Self {
            frames_in_flight: u64::from(frames_in_flight.max(1)),
            frame: 0,
            entries: VecDeque::new(),
        }
    }

    pub fn push(&mut self, transient: Transient) {
        self.entries.push_back((self.frame + self.frames_in_flight, transient));
    }

    /// Mark a frame boundary and drop everything whose frames have retired.
    /// Returns how many entries were released.
    pub fn advance_frame(&mut self) -> usize {
        self.frame += 1;
        let mut released = 0;
        while let Some((retire_at, _)) = self.entries.front() {
            if *retire_at > self.frame {
                break;
            }
            self.entries.pop_front();
            released += 1;
        }
        if released > 0 {
            log::debug!("Released {} transient objects at frame {}", released, self.frame);
        }
        released
    }

    /// Drop everything regardless of age.
    pub fn flush_all(&mut self) -> usize {
        let released = self.entries.len();
        self.entries.clear();
        released
    }

    pub fn pending_count(&self) -> usize {
        self.entries.len()
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::UniformLayout;

    fn uniform_set() -> Arc<UniformSet> {
        Arc::new(UniformSet::new(UniformLayout::default()))
    }

    #[test]
    fn entries_survive_frames_in_flight() {
        let mut queue = TransientQueue::new(2);
        let set = uniform_set();
        queue.push(Transient::UniformSet(set.clone()));
        assert_eq!(Arc::strong_count(&set), 2);

        assert_eq!(queue.advance_frame(), 0);
        assert_eq!(Arc::strong_count(&set), 2);

        assert_eq!(queue.advance_frame(), 1);
        assert_eq!(Arc::strong_count(&set), 1);
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn release_is_in_push_order() {
        let mut queue = TransientQueue::new(1);
        queue.push(Transient::UniformSet(uniform_set()));
        queue.advance_frame();
        queue.push(Transient::UniformSet(uniform_set()));
        queue.push(Transient::UniformSet(uniform_set()));
        assert_eq!(queue.pending_count(), 2);
        assert_eq!(queue.advance_frame(), 2);
    }

    #[test]
    fn flush_drops_everything() {
        let mut queue = TransientQueue::new(3);
        queue.push(Transient::UniformSet(uniform_set()));
        queue.push(Transient::UniformSet(uniform_set()));
        assert_eq!(queue.flush_all(), 2);
        assert_eq!(queue.pending_count(), 0);
    }
}
