use std::time::Duration;
use time::{OffsetDateTime, PrimitiveDateTime};

/// `at + delay`, clamped to the last representable instant.
pub fn saturating_after(at: OffsetDateTime, delay: Duration) -> OffsetDateTime {
    time::Duration::try_from(delay)
        .ok()
        .and_then(|d| at.checked_add(d))
        .unwrap_or_else(|| PrimitiveDateTime::MAX.assume_utc())
}

/// `at - window`, clamped to the first representable instant.
pub fn saturating_before(at: OffsetDateTime, window: Duration) -> OffsetDateTime {
    time::Duration::try_from(window)
        .ok()
        .and_then(|d| at.checked_sub(d))
        .unwrap_or_else(|| PrimitiveDateTime::MIN.assume_utc())
}

/// `YYYY-MM-DD` in UTC, the date format of sink data points.
pub fn sink_date(at: OffsetDateTime) -> String {
    let date = at.to_offset(time::UtcOffset::UTC).date();
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_month_and_day() {
        let at = OffsetDateTime::from_unix_timestamp(1_704_153_600).unwrap();
        assert_eq!(sink_date(at), "2024-01-02");
    }

    #[test]
    fn huge_offsets_clamp_instead_of_overflowing() {
        let now = OffsetDateTime::from_unix_timestamp(1_704_153_600).unwrap();
        assert_eq!(
            saturating_after(now, Duration::from_secs(2)),
            now + time::Duration::seconds(2)
        );
        assert_eq!(
            saturating_after(now, Duration::MAX),
            PrimitiveDateTime::MAX.assume_utc()
        );
        assert_eq!(
            saturating_before(now, Duration::from_secs(u64::MAX / 2)),
            PrimitiveDateTime::MIN.assume_utc()
        );
    }

    #[test]
    fn converts_to_utc_first() {
        let at = OffsetDateTime::from_unix_timestamp(1_704_153_600)
            .unwrap()
            .to_offset(time::UtcOffset::from_hms(-5, 0, 0).unwrap());
        assert_eq!(sink_date(at), "2024-01-02");
    }
}
