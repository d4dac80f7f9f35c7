//! Client-side typing notifier.
//!
//! Turns raw keystrokes into a throttled stream of `is_typing` signals:
//! `Idle -> Typing` on the first keystroke, periodic refreshes while the
//! user keeps typing, and `Typing -> Idle` after a quiet period or when
//! the message is sent.

use std::time::{Duration, Instant};

pub const DEFAULT_IDLE_AFTER: Duration = Duration::from_secs(2);
pub const DEFAULT_REFRESH_EVERY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingState {
    Idle,
    Typing,
}

#[derive(Debug, Clone)]
pub struct TypingNotifier {
    state: TypingState,
    idle_after: Duration,
    refresh_every: Duration,
    last_keystroke: Option<Instant>,
    last_signal: Option<Instant>,
}

impl TypingNotifier {
    pub fn new(idle_after: Duration, refresh_every: Duration) -> Self {
        Self {
            state: TypingState::Idle,
            idle_after,
            refresh_every,
            last_keystroke: None,
            last_signal: None,
        }
    }

    pub fn state(&self) -> TypingState {
        self.state
    }

    /// Returns `Some(true)` when a typing signal should go out.
    pub fn on_keystroke(&mut self, now: Instant) -> Option<bool> {
        self.last_keystroke = Some(now);
        let due = match (self.state, self.last_signal) {
            (TypingState::Idle, _) | (_, None) => true,
            (TypingState::Typing, Some(sent)) => now.duration_since(sent) >= self.refresh_every,
        };
        self.state = TypingState::Typing;
        if due {
            self.last_signal = Some(now);
            Some(true)
        } else {
            None
        }
    }

    /// Returns `Some(false)` once the quiet period has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<bool> {
        match (self.state, self.last_keystroke) {
            (TypingState::Typing, Some(last)) if now.duration_since(last) >= self.idle_after => {
                self.go_idle();
                Some(false)
            }
            _ => None,
        }
    }

    /// Sending ends the burst immediately.
    pub fn on_send(&mut self, _now: Instant) -> Option<bool> {
        if self.state == TypingState::Typing {
            self.go_idle();
            Some(false)
        } else {
            None
        }
    }

    /// When `poll` should next be called, if a stop signal is pending.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.state, self.last_keystroke) {
            (TypingState::Typing, Some(last)) => Some(last + self.idle_after),
            _ => None,
        }
    }

    fn go_idle(&mut self) {
        self.state = TypingState::Idle;
        self.last_keystroke = None;
        self.last_signal = None;
    }
}

impl Default for TypingNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_AFTER, DEFAULT_REFRESH_EVERY)
    }
}
