use chrono::{DateTime, TimeZone, Utc};
use std::fmt;

/// Half-open collection window `[start_ms, end_ms)` in milliseconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeWindow {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeWindow {
    pub fn new(start_ms: i64, end_ms: i64) -> Self {
        debug_assert!(start_ms < end_ms, "window start must precede its end");
        Self { start_ms, end_ms }
    }

    pub fn start(&self) -> DateTime<Utc> {
        millis_to_datetime(self.start_ms)
    }

    pub fn end(&self) -> DateTime<Utc> {
        millis_to_datetime(self.end_ms)
    }

    pub fn duration_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start().to_rfc3339(),
            self.end().to_rfc3339()
        )
    }
}

pub(crate) fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Most recent multiple of `interval_minutes * 60` seconds at or before `now`.
///
/// This is a plain floor on the epoch-seconds value, independent of any timezone.
pub fn aligned_now(now: DateTime<Utc>, interval_minutes: u32) -> DateTime<Utc> {
    let interval_secs = i64::from(interval_minutes.max(1)) * 60;
    let aligned_secs = now.timestamp().div_euclid(interval_secs) * interval_secs;
    millis_to_datetime(aligned_secs * 1000)
}

/// Windows still to be collected between `last_collected` and the aligned `now`.
///
/// The result covers exactly `[last_collected, aligned_now)` with contiguous,
/// non-overlapping windows no longer than the interval. It is empty when
/// nothing has elapsed since the last collection or when the interval is zero.
pub fn plan_windows(
    last_collected: DateTime<Utc>,
    interval_minutes: u32,
    now: DateTime<Utc>,
) -> WindowPlan {
    if interval_minutes == 0 {
        return WindowPlan::empty();
    }

    let boundary = aligned_now(now, interval_minutes).timestamp_millis();
    WindowPlan {
        cursor: last_collected.timestamp_millis(),
        step_ms: i64::from(interval_minutes) * 60_000,
        boundary_ms: boundary,
    }
}

/// Lazy, finite sequence of [`TimeWindow`]s produced by [`plan_windows`].
///
/// Cloning restarts nothing: a clone continues from the same position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowPlan {
    cursor: i64,
    step_ms: i64,
    boundary_ms: i64,
}

impl WindowPlan {
    fn empty() -> Self {
        Self {
            cursor: 0,
            step_ms: 1,
            boundary_ms: 0,
        }
    }

    /// Exclusive end of the whole plan (the aligned "now").
    pub fn boundary(&self) -> DateTime<Utc> {
        millis_to_datetime(self.boundary_ms)
    }

    pub fn is_empty(&self) -> bool {
        self.cursor >= self.boundary_ms
    }
}

impl Iterator for WindowPlan {
    type Item = TimeWindow;

    fn next(&mut self) -> Option<TimeWindow> {
        if self.cursor >= self.boundary_ms {
            return None;
        }

        let end = self
            .cursor
            .saturating_add(self.step_ms)
            .min(self.boundary_ms);
        let window = TimeWindow::new(self.cursor, end);
        self.cursor = end;
        Some(window)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.is_empty() {
            return (0, Some(0));
        }
        let remaining = self.boundary_ms - self.cursor;
        let count = ((remaining + self.step_ms - 1) / self.step_ms) as usize;
        (count, Some(count))
    }
}

impl ExactSizeIterator for WindowPlan {}
