//! Cooldown arithmetic between a user's last placement and the next allowed one.

use std::{
    fmt,
    time::{Duration, SystemTime},
};

const SECS_PER_MINUTE: u64 = 60;
const SECS_PER_HOUR: u64 = 60 * SECS_PER_MINUTE;
const SECS_PER_DAY: u64 = 24 * SECS_PER_HOUR;

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Clock reading the operating system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Wall clock advanced by the Tokio timer, so a paused runtime also pauses it.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: SystemTime,
    anchor: tokio::time::Instant,
}

impl TokioClock {
    /// Anchor the clock to the current system time.
    pub fn new() -> Self {
        Self::starting_at(SystemTime::now())
    }

    /// Anchor the clock so that "now" reads `origin`.
    pub fn starting_at(origin: SystemTime) -> Self {
        Self {
            origin,
            anchor: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> SystemTime {
        self.origin + self.anchor.elapsed()
    }
}

/// Outcome of a cooldown computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cooldown {
    /// The user may place again.
    Ready,
    /// Time left until the user may place again.
    Remaining(TimeLeft),
}

/// Remaining cooldown decomposed for display. Fields are floored and never negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeLeft {
    pub days: u64,
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
    /// Exact remaining duration the fields were derived from.
    pub total: Duration,
}

impl TimeLeft {
    pub fn from_duration(total: Duration) -> Self {
        let secs = total.as_secs();
        Self {
            days: secs / SECS_PER_DAY,
            hours: (secs % SECS_PER_DAY) / SECS_PER_HOUR,
            minutes: (secs % SECS_PER_HOUR) / SECS_PER_MINUTE,
            seconds: secs % SECS_PER_MINUTE,
            total,
        }
    }
}

impl fmt::Display for TimeLeft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (amount, unit) in [
            (self.days, "day"),
            (self.hours, "hour"),
            (self.minutes, "minute"),
        ] {
            if amount > 0 {
                write!(f, "{amount} {unit}{} ", plural(amount))?;
            }
        }
        write!(
            f,
            "{} second{} until you can place a pixel.",
            self.seconds,
            plural(self.seconds)
        )
    }
}

fn plural(amount: u64) -> &'static str {
    if amount == 1 { "" } else { "s" }
}

/// Time left before a user whose last placement happened at `last` may place again.
///
/// A `now` earlier than `last` (clock skew between client and store) counts as no time
/// elapsed, so the result never exceeds `interval`.
pub fn remaining(last: SystemTime, interval: Duration, now: SystemTime) -> Cooldown {
    let elapsed = now.duration_since(last).unwrap_or(Duration::ZERO);
    if elapsed >= interval {
        Cooldown::Ready
    } else {
        Cooldown::Remaining(TimeLeft::from_duration(interval - elapsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(millis: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_millis(millis)
    }

    #[test]
    fn ready_once_interval_elapsed() {
        let interval = Duration::from_millis(1_000);
        assert_eq!(remaining(at(5_000), interval, at(6_000)), Cooldown::Ready);
        assert_eq!(remaining(at(5_000), interval, at(9_000)), Cooldown::Ready);
        assert!(matches!(
            remaining(at(5_000), interval, at(5_999)),
            Cooldown::Remaining(_)
        ));
    }

    #[test]
    fn decomposition_matches_remaining_seconds() {
        let interval = Duration::from_secs(2 * SECS_PER_DAY + 3 * SECS_PER_HOUR + 4 * 60 + 5);
        let now = at(10_000 + 500);
        let Cooldown::Remaining(left) = remaining(at(10_000), interval, now) else {
            panic!("expected remaining cooldown");
        };

        assert_eq!(left.total, interval - Duration::from_millis(500));
        assert_eq!((left.days, left.hours, left.minutes, left.seconds), (2, 3, 4, 4));
        let recomposed =
            left.days * SECS_PER_DAY + left.hours * SECS_PER_HOUR + left.minutes * 60 + left.seconds;
        assert_eq!(recomposed, left.total.as_secs());
    }

    #[test]
    fn clock_skew_never_exceeds_interval() {
        let interval = Duration::from_secs(600);
        let Cooldown::Remaining(left) = remaining(at(50_000), interval, at(10_000)) else {
            panic!("expected remaining cooldown");
        };
        assert_eq!(left.total, interval);
    }

    #[test]
    fn countdown_text_omits_zero_units() {
        let text = TimeLeft::from_duration(Duration::from_secs(65)).to_string();
        assert_eq!(text, "1 minute 5 seconds until you can place a pixel.");

        let text = TimeLeft::from_duration(Duration::from_secs(SECS_PER_DAY + 1)).to_string();
        assert_eq!(text, "1 day 1 second until you can place a pixel.");

        let text = TimeLeft::from_duration(Duration::from_millis(400)).to_string();
        assert_eq!(text, "0 seconds until you can place a pixel.");
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_clock_follows_paused_time() {
        let clock = TokioClock::starting_at(at(0));
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(clock.now(), at(1_500));
    }
}
