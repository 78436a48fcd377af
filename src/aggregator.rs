use crate::constants::{CHAT_WINDOW_CAPACITY, REPLY_DIRECTIVE, THRESHOLD_MAX, THRESHOLD_MIN};
use std::collections::VecDeque;

/// Accumulates chat traffic and decides when it is worth answering.
///
/// Only the prompt window keeps message text; pending triggers are a count, so
/// a disabled relay on a busy channel stays bounded in memory.
pub struct TriggerAggregator {
    window: VecDeque<String>,
    capacity: usize,
    pending: usize,
    threshold: usize,
    rng: fastrand::Rng,
}

impl TriggerAggregator {
    pub fn new(rng: fastrand::Rng) -> Self {
        Self::with_capacity(CHAT_WINDOW_CAPACITY, rng)
    }

    pub fn with_capacity(capacity: usize, mut rng: fastrand::Rng) -> Self {
        let threshold = rng.usize(THRESHOLD_MIN..=THRESHOLD_MAX);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            pending: 0,
            threshold,
            rng,
        }
    }

    /// Adds `line` to the prompt window and counts one pending trigger.
    pub fn observe(&mut self, line: String) {
        if self.capacity > 0 {
            if self.window.len() == self.capacity {
                self.window.pop_front();
            }
            self.window.push_back(line);
        }
        self.pending = self.pending.saturating_add(1);
    }

    pub fn should_respond(&self) -> bool {
        self.pending >= self.threshold && !self.window.is_empty()
    }

    pub fn build_prompt(&self) -> String {
        let history: Vec<&str> = self.window.iter().map(String::as_str).collect();
        format!("{}{}", REPLY_DIRECTIVE, history.join("\n"))
    }

    /// Clears pending triggers and draws a new threshold. The window is kept.
    pub fn flush(&mut self) {
        self.pending = 0;
        self.threshold = self.rng.usize(THRESHOLD_MIN..=THRESHOLD_MAX);
        tracing::debug!("[🎯] Triggers flushed, next threshold {}", self.threshold);
    }

    /// Flush plus an empty window, used on enable/disable/channel change/login.
    pub fn reset(&mut self) {
        self.window.clear();
        self.flush();
    }

    pub fn window(&self) -> impl Iterator<Item = &str> {
        self.window.iter().map(String::as_str)
    }

    pub fn pending_len(&self) -> usize {
        self.pending
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }
}
