use std::time::Duration;

use tokio::time::Instant;

use crate::config::{DEFAULT_TYPING_IDLE, DEFAULT_TYPING_INDICATOR_TTL, DEFAULT_TYPING_THROTTLE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingSignal {
    Started,
    Stopped,
}

impl TypingSignal {
    pub fn is_typing(self) -> bool {
        matches!(self, TypingSignal::Started)
    }
}

/// Rate-limits the local user's typing notifications.
///
/// `Started` goes out at most once per throttle window; `Stopped` goes out
/// once, either `idle` after the last keystroke or on blur.
#[derive(Debug)]
pub struct TypingThrottle {
    throttle: Duration,
    idle: Duration,
    last_sent: Option<Instant>,
    stop_at: Option<Instant>,
}

impl Default for TypingThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_TYPING_THROTTLE, DEFAULT_TYPING_IDLE)
    }
}

impl TypingThrottle {
    pub fn new(throttle: Duration, idle: Duration) -> Self {
        Self {
            throttle,
            idle,
            last_sent: None,
            stop_at: None,
        }
    }

    pub fn keystroke(&mut self, now: Instant) -> Option<TypingSignal> {
        self.stop_at = Some(now + self.idle);
        match self.last_sent {
            Some(sent) if now.saturating_duration_since(sent) <= self.throttle => None,
            _ => {
                self.last_sent = Some(now);
                Some(TypingSignal::Started)
            }
        }
    }

    /// When the pending `Stopped` signal is due, if any.
    pub fn stop_deadline(&self) -> Option<Instant> {
        self.stop_at
    }

    pub fn poll_stop(&mut self, now: Instant) -> Option<TypingSignal> {
        match self.stop_at {
            Some(deadline) if deadline <= now => Some(self.finish()),
            _ => None,
        }
    }

    /// Input lost focus; stops immediately if the user was typing.
    pub fn blur(&mut self) -> Option<TypingSignal> {
        if self.stop_at.is_some() {
            Some(self.finish())
        } else {
            None
        }
    }

    fn finish(&mut self) -> TypingSignal {
        self.stop_at = None;
        self.last_sent = None;
        TypingSignal::Stopped
    }
}

/// Transient "<user> is typing" label for other participants.
#[derive(Debug)]
pub struct TypingIndicator {
    current_user: String,
    ttl: Duration,
    shown: Option<(String, Instant)>,
}

impl TypingIndicator {
    pub fn new(current_user: impl Into<String>) -> Self {
        Self::with_ttl(current_user, DEFAULT_TYPING_INDICATOR_TTL)
    }

    pub fn with_ttl(current_user: impl Into<String>, ttl: Duration) -> Self {
        Self {
            current_user: current_user.into(),
            ttl,
            shown: None,
        }
    }

    /// Returns `true` if the visible label changed.
    pub fn show(&mut self, user: &str, now: Instant) -> bool {
        if user.is_empty() || user == self.current_user {
            return false;
        }
        let changed = self.shown.as_ref().map(|(name, _)| name != user).unwrap_or(true);
        self.shown = Some((user.to_string(), now + self.ttl));
        changed
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.shown.as_ref().map(|(_, until)| *until)
    }

    /// Clears the label once its time is up. Returns `true` if it was cleared.
    pub fn expire(&mut self, now: Instant) -> bool {
        let expired = self
            .expires_at()
            .map(|until| until <= now)
            .unwrap_or(false);
        if expired {
            self.shown = None;
        }
        expired
    }

    /// The label as it should read at `now`.
    pub fn current(&self, now: Instant) -> Option<String> {
        match &self.shown {
            Some((_, until)) if *until > now => self.label(),
            _ => None,
        }
    }

    pub fn label(&self) -> Option<String> {
        self.shown
            .as_ref()
            .map(|(user, _)| format!("{user} is typing…"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn started_at_most_once_per_window() {
        let start = Instant::now();
        let mut throttle = TypingThrottle::default();
        let mut sent = Vec::new();
        // A keystroke every 100ms for 3.2s.
        for step in 0..=32 {
            let now = start + ms(step * 100);
            if let Some(signal) = throttle.keystroke(now) {
                sent.push((step * 100, signal));
            }
        }
        assert_eq!(
            sent,
            vec![
                (0, TypingSignal::Started),
                (1600, TypingSignal::Started),
                (3200, TypingSignal::Started),
            ]
        );
    }

    #[test]
    fn stop_fires_once_after_idle() {
        let start = Instant::now();
        let mut throttle = TypingThrottle::default();
        throttle.keystroke(start);
        throttle.keystroke(start + ms(500));

        assert_eq!(throttle.stop_deadline(), Some(start + ms(2500)));
        assert_eq!(throttle.poll_stop(start + ms(2400)), None);
        assert_eq!(
            throttle.poll_stop(start + ms(2500)),
            Some(TypingSignal::Stopped)
        );
        assert_eq!(throttle.poll_stop(start + ms(5000)), None);
        assert_eq!(throttle.stop_deadline(), None);
    }

    #[test]
    fn blur_stops_immediately_and_only_when_typing() {
        let start = Instant::now();
        let mut throttle = TypingThrottle::default();
        assert_eq!(throttle.blur(), None);

        throttle.keystroke(start);
        assert_eq!(throttle.blur(), Some(TypingSignal::Stopped));
        assert_eq!(throttle.poll_stop(start + ms(3000)), None);

        // A new burst announces itself again right away.
        assert_eq!(
            throttle.keystroke(start + ms(100)),
            Some(TypingSignal::Started)
        );
    }

    #[test]
    fn indicator_ignores_self_and_expires() {
        let start = Instant::now();
        let mut indicator = TypingIndicator::new("ola");
        assert!(!indicator.show("ola", start));
        assert!(indicator.label().is_none());

        assert!(indicator.show("kasia", start));
        assert_eq!(indicator.label().as_deref(), Some("kasia is typing…"));
        assert!(!indicator.show("kasia", start + ms(1000)));
        assert_eq!(indicator.expires_at(), Some(start + ms(3500)));

        assert!(indicator.current(start + ms(3400)).is_some());
        assert!(indicator.current(start + ms(3500)).is_none());
        assert!(!indicator.expire(start + ms(3400)));
        assert!(indicator.expire(start + ms(3500)));
        assert!(indicator.label().is_none());
    }
}
