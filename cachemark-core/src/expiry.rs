use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::sync::Arc;

/// Source of the current instant. Injected so expiry can be tested.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Lifetime applied when no explicit delta is configured.
pub fn default_delta() -> Duration {
    Duration::weeks(1)
}

/// Computes the absolute expiry of freshly populated records.
///
/// Delta components combine additively. When every component is zero the
/// fallback delta applies; when the fallback has been removed the expiry is
/// the current instant itself, which makes every record stale on arrival.
///
/// # Examples
///
/// ```
/// use cachemark_core::ExpiryPolicy;
/// use chrono::{Duration, TimeZone, Utc};
///
/// let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
/// let policy = ExpiryPolicy::new().clock(move || now).minutes(5).seconds(30);
/// assert_eq!(policy.expires_at(), now + Duration::seconds(330));
///
/// let fallback = ExpiryPolicy::new().clock(move || now);
/// assert_eq!(fallback.expires_at(), now + Duration::weeks(1));
///
/// let immediate = ExpiryPolicy::new().clock(move || now).without_default_delta();
/// assert_eq!(immediate.expires_at(), now);
/// ```
#[derive(Clone)]
pub struct ExpiryPolicy {
    clock: Clock,
    weeks: i64,
    days: i64,
    hours: i64,
    minutes: i64,
    seconds: i64,
    default_delta: Option<Duration>,
}

impl ExpiryPolicy {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(Utc::now),
            weeks: 0,
            days: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
            default_delta: Some(default_delta()),
        }
    }

    /// Replaces the now-provider.
    pub fn clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn weeks(mut self, weeks: i64) -> Self {
        self.weeks = weeks;
        self
    }

    pub fn days(mut self, days: i64) -> Self {
        self.days = days;
        self
    }

    pub fn hours(mut self, hours: i64) -> Self {
        self.hours = hours;
        self
    }

    pub fn minutes(mut self, minutes: i64) -> Self {
        self.minutes = minutes;
        self
    }

    pub fn seconds(mut self, seconds: i64) -> Self {
        self.seconds = seconds;
        self
    }

    /// Overrides the lifetime used when no component is set.
    pub fn fallback(mut self, delta: Duration) -> Self {
        self.default_delta = Some(delta);
        self
    }

    /// Removes the fallback lifetime: with no component set, records expire immediately.
    pub fn without_default_delta(mut self) -> Self {
        self.default_delta = None;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// The explicitly configured delta, if any component is non-zero.
    pub fn delta(&self) -> Option<Duration> {
        let explicit = [self.weeks, self.days, self.hours, self.minutes, self.seconds]
            .iter()
            .any(|c| *c != 0);

        explicit.then(|| {
            [
                component(self.weeks, Duration::try_weeks),
                component(self.days, Duration::try_days),
                component(self.hours, Duration::try_hours),
                component(self.minutes, Duration::try_minutes),
                component(self.seconds, Duration::try_seconds),
            ]
            .into_iter()
            .fold(Duration::zero(), |total, part| {
                total.checked_add(&part).unwrap_or_else(|| saturated(part))
            })
        })
    }

    /// Expiry for a record populated at `now`.
    pub fn expires_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.delta().or(self.default_delta) {
            Some(delta) => now.checked_add_signed(delta).unwrap_or(if delta < Duration::zero() {
                DateTime::<Utc>::MIN_UTC
            } else {
                DateTime::<Utc>::MAX_UTC
            }),
            None => now,
        }
    }

    /// Expiry for a record populated right now.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_from(self.now())
    }
}

/// Out-of-range components clamp to the representable bounds.
fn component(value: i64, unit: fn(i64) -> Option<Duration>) -> Duration {
    unit(value).unwrap_or_else(|| saturated(Duration::seconds(value.signum())))
}

fn saturated(direction: Duration) -> Duration {
    if direction < Duration::zero() {
        Duration::MIN
    } else {
        Duration::MAX
    }
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExpiryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpiryPolicy")
            .field("weeks", &self.weeks)
            .field("days", &self.days)
            .field("hours", &self.hours)
            .field("minutes", &self.minutes)
            .field("seconds", &self.seconds)
            .field("default_delta", &self.default_delta)
            .finish_non_exhaustive()
    }
}
