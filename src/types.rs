//! Shared value types: timestamps and half-open time windows
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>)
where
    T::Offset: Copy;

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    /// `None` for an impossible calendar date.
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Self)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    pub fn plus_minutes(&self, minutes: i64) -> Self {
        Self(self.0 + TimeDelta::minutes(minutes))
    }
    pub fn plus_days(&self, days: i64) -> Self {
        Self(self.0 + TimeDelta::days(days))
    }
    /// Whole minutes from `self` to `later`; negative when `later` is earlier.
    pub fn minutes_until(&self, later: &Self) -> i64 {
        (later.0 - self.0).num_minutes()
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T>
where
    T::Offset: Copy,
{
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl fmt::Display for TimeStamp<Utc> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// Half-open interval `[start, end)` a resource is held for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct TimeWindow {
    #[n(0)]
    pub start: TimeStamp<Utc>,
    #[n(1)]
    pub end: TimeStamp<Utc>,
}

impl TimeWindow {
    /// Builds a window, widening an inverted pair to an empty window at `start`.
    pub fn new(start: TimeStamp<Utc>, end: TimeStamp<Utc>) -> Self {
        let end = if end < start { start } else { end };
        Self { start, end }
    }

    /// Windows that merely touch (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, at: &TimeStamp<Utc>) -> bool {
        self.start <= *at && *at < self.end
    }

    pub fn duration_minutes(&self) -> i64 {
        self.start.minutes_until(&self.end)
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_encoding() {
        let original = TimeStamp::new();

        let encoding = minicbor::to_vec(original).unwrap();
        let decode: TimeStamp<Utc> = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn timestamps_order_chronologically() {
        let t0 = TimeStamp::new_with(2024, 3, 1, 8, 0, 0).unwrap();
        let later = t0.plus_minutes(1);

        assert!(t0 < later);
        assert_eq!(t0.max(later), later);
        assert_eq!(later.cmp(&t0), Ordering::Greater);
        assert_eq!(t0.partial_cmp(&t0), Some(Ordering::Equal));
    }

    #[test]
    fn impossible_dates_are_refused() {
        assert!(TimeStamp::new_with(2024, 2, 30, 8, 0, 0).is_none());
        assert!(TimeStamp::new_with(2023, 2, 29, 0, 0, 0).is_none());
        assert!(TimeStamp::new_with(2024, 2, 29, 0, 0, 0).is_some());
    }

    #[test]
    fn touching_windows_do_not_overlap() {
        let t0 = TimeStamp::new_with(2024, 3, 1, 8, 0, 0).unwrap();
        let a = TimeWindow::new(t0, t0.plus_minutes(120));
        let b = TimeWindow::new(t0.plus_minutes(120), t0.plus_minutes(180));
        let c = TimeWindow::new(t0.plus_minutes(60), t0.plus_minutes(180));

        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&a));
    }

    #[test]
    fn inverted_window_collapses() {
        let t0 = TimeStamp::new_with(2024, 3, 1, 8, 0, 0).unwrap();
        let w = TimeWindow::new(t0, t0.plus_minutes(-30));
        assert_eq!(w.duration_minutes(), 0);
    }
}
