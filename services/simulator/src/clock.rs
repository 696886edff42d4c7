//! Wall-clock source.
//!
//! Every `ExpiredAt`, `Date` and `Time` value derives from a single clock
//! read; tests swap in a fixed clock for deterministic output.

use chrono::{DateTime, Utc};

/// Messages expire one minute after they are built.
const MESSAGE_TTL_MS: i64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clock {
    System,
    /// Frozen at a fixed millisecond timestamp.
    Fixed(i64),
}

impl Clock {
    pub fn system() -> Self {
        Clock::System
    }

    pub fn fixed(unix_ms: i64) -> Self {
        Clock::Fixed(unix_ms)
    }

    pub fn now_ms(&self) -> i64 {
        match self {
            Clock::System => Utc::now().timestamp_millis(),
            Clock::Fixed(ms) => *ms,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now(),
            Clock::Fixed(ms) => DateTime::<Utc>::from_timestamp_millis(*ms).unwrap_or_else(Utc::now),
        }
    }

    /// `ExpiredAt` for a message built right now.
    pub fn expired_at(&self) -> i64 {
        self.now_ms() + MESSAGE_TTL_MS
    }

    /// Date in the device's `dd MM yyyy` shape.
    pub fn date_string(&self) -> String {
        self.now().format("%d %m %Y").to_string()
    }

    /// Time in the device's `hh:mm:ss` shape.
    pub fn time_string(&self) -> String {
        self.now().format("%H:%M:%S").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_is_deterministic() {
        // 2025-05-05T22:30:25Z
        let clock = Clock::fixed(1_746_484_225_000);
        assert_eq!(clock.now_ms(), 1_746_484_225_000);
        assert_eq!(clock.expired_at(), 1_746_484_285_000);
        assert_eq!(clock.date_string(), "05 05 2025");
        assert_eq!(clock.time_string(), "22:30:25");
    }

    #[test]
    fn system_clock_moves_forward() {
        let clock = Clock::system();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
    }
}
