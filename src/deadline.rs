//! Deadline record model: fixed wall-clock text format and zone handling.

use crate::error::DeadlineError;
use crate::store::RawDeadline;
use chrono::{DateTime, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use log::{debug, warn};

/// Text format shared by the store, user input, and "now" matching.
/// Minute granularity; there is no seconds field.
pub const TIME_FORMAT: &str = "%m/%d/%Y - %H:%M";

/// Parse `MM/DD/YYYY - HH:MM` (24-hour) into a zone-less reading.
pub fn parse_wall_clock(text: &str) -> Result<NaiveDateTime, DeadlineError> {
    let trimmed = text.trim();
    NaiveDateTime::parse_from_str(trimmed, TIME_FORMAT)
        .map_err(|e| DeadlineError::invalid_format(trimmed, e.to_string()))
}

pub fn format_instant<Z: TimeZone>(instant: &DateTime<Z>) -> String
where
    Z::Offset: std::fmt::Display,
{
    instant.format(TIME_FORMAT).to_string()
}

/// Resolve an IANA zone label. Labels are opaque identifiers, never offsets.
pub fn parse_zone(label: &str) -> Result<Tz, DeadlineError> {
    let trimmed = label.trim();
    trimmed
        .parse::<Tz>()
        .map_err(|_| DeadlineError::UnknownZone(trimmed.to_string()))
}

/// Pick the reference zone: explicit override, then host zone, then UTC.
pub fn resolve_local_zone(override_label: Option<&str>) -> Result<Tz, DeadlineError> {
    if let Some(label) = override_label {
        return parse_zone(label);
    }
    match iana_time_zone::get_timezone() {
        Ok(name) => match name.parse::<Tz>() {
            Ok(tz) => {
                debug!("zone.resolve host={}", name);
                Ok(tz)
            }
            Err(_) => {
                warn!("zone.resolve unknown host zone `{}`, falling back to UTC", name);
                Ok(Tz::UTC)
            }
        },
        Err(e) => {
            warn!("zone.resolve host zone unavailable ({}), falling back to UTC", e);
            Ok(Tz::UTC)
        }
    }
}

/// Interpret a wall-clock reading in `zone`.
///
/// Fall-back ambiguity resolves to the earlier instant; readings inside a
/// spring-forward gap do not exist and are rejected.
fn localize(naive: &NaiveDateTime, zone: Tz, input: &str) -> Result<DateTime<Tz>, DeadlineError> {
    zone.from_local_datetime(naive).earliest().ok_or_else(|| {
        DeadlineError::invalid_format(input, format!("time does not exist in {}", zone.name()))
    })
}

/// A single deadline.
///
/// `instant` is always expressed in the local zone chosen when the collection
/// was built; `source_zone` is the zone the deadline was authored in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlineRecord {
    instant: DateTime<Tz>,
    source_zone: Tz,
}

impl DeadlineRecord {
    pub fn from_wall_clock(
        text: &str,
        source_zone: Tz,
        local_zone: Tz,
    ) -> Result<Self, DeadlineError> {
        let naive = parse_wall_clock(text)?;
        let instant = if source_zone == local_zone {
            localize(&naive, local_zone, text.trim())?
        } else {
            localize(&naive, source_zone, text.trim())?.with_timezone(&local_zone)
        };
        Ok(Self {
            instant,
            source_zone,
        })
    }

    pub fn from_raw(raw: &RawDeadline, local_zone: Tz) -> Result<Self, DeadlineError> {
        let source_zone = parse_zone(&raw.tz)?;
        Self::from_wall_clock(&raw.date_time, source_zone, local_zone)
    }

    pub fn instant(&self) -> &DateTime<Tz> {
        &self.instant
    }

    pub fn source_zone(&self) -> Tz {
        self.source_zone
    }

    /// Instant rendered in the local zone; this is what "now" is matched against.
    pub fn formatted(&self) -> String {
        format_instant(&self.instant)
    }

    /// Re-render in the authoring zone so the persisted pair round-trips.
    pub fn to_raw(&self) -> RawDeadline {
        RawDeadline {
            date_time: format_instant(&self.instant.with_timezone(&self.source_zone)),
            tz: self.source_zone.name().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn parses_fixed_format() {
        let naive = parse_wall_clock(" 12/25/2024 - 09:00 ").unwrap();
        assert_eq!((naive.month(), naive.day(), naive.year()), (12, 25, 2024));
        assert_eq!((naive.hour(), naive.minute()), (9, 0));
    }

    #[test]
    fn rejects_other_formats() {
        for bad in ["2024-12-25 09:00", "12/25/2024 09:00", "13/01/2024 - 00:00", ""] {
            let err = parse_wall_clock(bad).unwrap_err();
            assert!(
                matches!(err, DeadlineError::InvalidDeadlineFormat { .. }),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn unknown_zone_is_typed() {
        let err = parse_zone("Not/AZone").unwrap_err();
        assert!(matches!(err, DeadlineError::UnknownZone(ref z) if z == "Not/AZone"));
        assert_eq!(parse_zone("UTC").unwrap(), Tz::UTC);
    }

    #[test]
    fn override_wins_over_host_zone() {
        assert_eq!(
            resolve_local_zone(Some("Europe/Berlin")).unwrap(),
            Tz::Europe__Berlin
        );
    }

    #[test]
    fn same_zone_keeps_wall_clock() {
        let rec = DeadlineRecord::from_wall_clock("12/25/2024 - 09:00", Tz::UTC, Tz::UTC).unwrap();
        assert_eq!(rec.formatted(), "12/25/2024 - 09:00");
        assert_eq!(rec.source_zone(), Tz::UTC);
    }

    #[test]
    fn foreign_zone_is_reexpressed_locally() {
        // 09:00 in New York (EST, UTC-5) is 14:00 UTC.
        let rec = DeadlineRecord::from_wall_clock(
            "12/25/2024 - 09:00",
            Tz::America__New_York,
            Tz::UTC,
        )
        .unwrap();
        assert_eq!(rec.formatted(), "12/25/2024 - 14:00");

        let raw = rec.to_raw();
        assert_eq!(raw.date_time, "12/25/2024 - 09:00");
        assert_eq!(raw.tz, "America/New_York");
    }

    #[test]
    fn ambiguous_reading_takes_earliest() {
        // 01:30 happens twice in New York on 11/03/2024; first pass is EDT (UTC-4).
        let rec = DeadlineRecord::from_wall_clock(
            "11/03/2024 - 01:30",
            Tz::America__New_York,
            Tz::UTC,
        )
        .unwrap();
        assert_eq!(rec.formatted(), "11/03/2024 - 05:30");
    }

    #[test]
    fn gap_reading_is_rejected() {
        // 02:30 is skipped in New York on 03/10/2024.
        let err = DeadlineRecord::from_wall_clock(
            "03/10/2024 - 02:30",
            Tz::America__New_York,
            Tz::America__New_York,
        )
        .unwrap_err();
        assert!(matches!(err, DeadlineError::InvalidDeadlineFormat { .. }));
    }

    #[test]
    fn from_raw_resolves_label() {
        let raw = RawDeadline {
            date_time: "01/01/2024 - 00:00".into(),
            tz: "UTC".into(),
        };
        let rec = DeadlineRecord::from_raw(&raw, Tz::Asia__Tokyo).unwrap();
        assert_eq!(rec.formatted(), "01/01/2024 - 09:00");
        assert_eq!(rec.to_raw(), raw);
    }
}
