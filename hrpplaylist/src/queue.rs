//! The ordered playback queue.

use rand::seq::SliceRandom;

/// What happens when the cursor runs off either end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueMode {
    /// Stop after the last entry.
    #[default]
    Once,
    /// Wrap from the last entry back to the first.
    Repeat,
    /// Like `Once`, after an initial Fisher-Yates shuffle.
    Shuffle,
}

/// Ordered sequence with a cursor, driving the outer playback loop.
#[derive(Debug)]
pub struct PlaybackQueue<T> {
    items: Vec<T>,
    cursor: usize,
    finished: bool,
    mode: QueueMode,
}

impl<T> PlaybackQueue<T> {
    pub fn new(mut items: Vec<T>, mode: QueueMode) -> PlaybackQueue<T> {
        if mode == QueueMode::Shuffle {
            items.shuffle(&mut rand::rng());
        }
        let finished = items.is_empty();
        PlaybackQueue {
            items,
            cursor: 0,
            finished,
            mode,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn mode(&self) -> QueueMode {
        self.mode
    }

    /// Position the cursor (clamped to the queue).
    pub fn start_at(&mut self, index: usize) {
        if !self.items.is_empty() {
            self.cursor = index.min(self.items.len() - 1);
        }
    }

    pub fn current_mut(&mut self) -> Option<&mut T> {
        if self.finished {
            None
        } else {
            self.items.get_mut(self.cursor)
        }
    }

    pub fn items_mut(&mut self) -> &mut [T] {
        &mut self.items
    }

    /// Move forward; wraps under `Repeat`. Returns false once exhausted.
    pub fn advance(&mut self) -> bool {
        if self.finished {
            return false;
        }
        self.cursor += 1;
        if self.cursor >= self.items.len() {
            if self.mode == QueueMode::Repeat && !self.items.is_empty() {
                self.cursor = 0;
            } else {
                self.finished = true;
            }
        }
        !self.finished
    }

    /// Move backward, clamped at the first entry.
    pub fn retreat(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
        }
        self.finished = self.items.is_empty();
    }

    /// Reorder the remaining entries randomly and restart from the top.
    pub fn reshuffle(&mut self) {
        self.items.shuffle(&mut rand::rng());
        self.cursor = 0;
        self.finished = self.items.is_empty();
    }
}
