//! Short-lived chat bubbles attached to an entity.
//!
//! Each entry carries its own expiry instant instead of a timer callback, so
//! expiry is a lazy sweep that can never outlive the entity owning it.

use crate::ChatLine;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub struct ChatEntry {
    pub text: String,
    pub expires_at: Instant,
}

impl ChatEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Bounded FIFO of chat entries. Pushing past capacity evicts the oldest.
#[derive(Debug, Clone)]
pub struct ChatOverlay {
    entries: VecDeque<ChatEntry>,
    capacity: usize,
    ttl: Duration,
}

impl ChatOverlay {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Adds a message that expires `ttl` after `now`.
    pub fn push(&mut self, text: impl Into<String>, now: Instant) {
        let expires_at = now + self.ttl;
        self.push_until(text, expires_at);
    }

    pub fn push_until(&mut self, text: impl Into<String>, expires_at: Instant) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(ChatEntry {
            text: text.into(),
            expires_at,
        });
    }

    /// Drops expired entries and returns how many were removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    /// Entries still alive at `now`, oldest first.
    pub fn visible(&self, now: Instant) -> impl Iterator<Item = &ChatEntry> + '_ {
        self.entries
            .iter()
            .filter(move |entry| !entry.is_expired(now))
    }

    /// Live entries with their remaining lifetime, for handing to a late joiner.
    pub fn lines(&self, now: Instant) -> Vec<ChatLine> {
        self.visible(now)
            .map(|entry| ChatLine {
                text: entry.text.clone(),
                remaining_ms: entry.expires_at.saturating_duration_since(now).as_millis() as u64,
            })
            .collect()
    }

    /// Restores entries received from the server, keeping their remaining lifetime.
    pub fn seed(&mut self, lines: &[ChatLine], now: Instant) {
        for line in lines {
            if line.remaining_ms == 0 {
                continue;
            }
            let remaining = Duration::from_millis(line.remaining_ms).min(self.ttl);
            self.push_until(line.text.clone(), now + remaining);
        }
    }

    pub fn newest(&self) -> Option<&ChatEntry> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
