/*!
Conversions between stored unix seconds and `chrono` timestamps.
*/

use chrono::{DateTime, Utc};

use crate::error::table::TableError;

/// Convert unix seconds, as used by Census payloads and the ownership tables, to a UTC timestamp
pub fn from_unix_seconds(seconds: i64) -> Result<DateTime<Utc>, TableError> {
    DateTime::from_timestamp(seconds, 0).ok_or(TableError::InvalidTimestamp(seconds))
}

pub fn to_unix_seconds(timestamp: &DateTime<Utc>) -> i64 {
    timestamp.timestamp()
}

/// Decode an optional stored timestamp column
pub fn optional_from_unix_seconds(
    seconds: Option<i64>,
) -> Result<Option<DateTime<Utc>>, TableError> {
    seconds.map(from_unix_seconds).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_round_trip_census_timestamp() {
        let ts = from_unix_seconds(1_665_000_000).unwrap();
        assert_eq!(to_unix_seconds(&ts), 1_665_000_000);
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(from_unix_seconds(i64::MAX).is_err());
    }

    #[test]
    fn optional_none_stays_none() {
        assert!(optional_from_unix_seconds(None).unwrap().is_none());
    }
}
