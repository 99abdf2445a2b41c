//! Due-instant computation for delivery schedules.
//!
//! A schedule's next due instant is the first local wall-clock occurrence of
//! its delivery time strictly after the anchor (the last confirmed delivery,
//! or the schedule's creation before any delivery), stepped by its
//! frequency. All arithmetic uses the full IANA timezone rules, so a
//! schedule at local 08:00 keeps firing at local 08:00 across
//! daylight-saving transitions.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::ValidationError;
use crate::models::{Frequency, Schedule, TimeOfDay};

/// Parse and validate an IANA timezone name.
pub fn parse_timezone(name: &str) -> Result<Tz, ValidationError> {
    name.parse::<Tz>()
        .map_err(|_| ValidationError::UnknownTimezone(name.to_string()))
}

/// Compute the next due instant (UTC) for a schedule.
///
/// The anchor is `last_delivery_at` when present, otherwise `created_at`:
/// delivery is due once the wall clock passes the first occurrence of
/// `time_of_day` after the anchor. Recomputing from the anchor on every poll
/// is what makes delivery idempotent per window — a confirmed delivery moves
/// the anchor, which moves the due instant into the future.
pub fn next_due_instant(schedule: &Schedule) -> Result<DateTime<Utc>, ValidationError> {
    let tz = parse_timezone(&schedule.timezone)?;
    let anchor_ts = schedule.last_delivery_at.unwrap_or(schedule.created_at);
    let anchor = DateTime::from_timestamp(anchor_ts, 0)
        .unwrap_or_else(Utc::now)
        .with_timezone(&tz);

    let first_date = anchor.date_naive();
    let step_days: i64 = match schedule.frequency {
        Frequency::Daily | Frequency::TwiceDaily => 1,
        Frequency::Weekly => 7,
    };

    // Walk occurrences from the anchor's local date until one lands strictly
    // after the anchor. Two iterations suffice outside DST edge cases; the
    // bound of four covers a nonexistent local time pushed past midnight.
    let mut date = first_date;
    for _ in 0..4 {
        for occurrence in day_occurrences(date, schedule.time_of_day, schedule.frequency) {
            let local = resolve_local(&tz, occurrence);
            let utc = local.with_timezone(&Utc);
            if utc > anchor.with_timezone(&Utc) {
                return Ok(utc);
            }
        }
        date += Duration::days(step_days);
    }

    // Unreachable for any valid schedule; kept as a defensive fallback.
    Ok(anchor.with_timezone(&Utc) + Duration::days(step_days))
}

/// Whether a schedule is due at `now`.
pub fn is_due(schedule: &Schedule, now: DateTime<Utc>) -> Result<bool, ValidationError> {
    Ok(now >= next_due_instant(schedule)?)
}

/// The local occurrences of the delivery time within one date. TwiceDaily
/// adds a second occurrence twelve hours after the first.
fn day_occurrences(date: NaiveDate, tod: TimeOfDay, frequency: Frequency) -> Vec<NaiveDateTime> {
    let base = date
        .and_hms_opt(tod.hour as u32, tod.minute as u32, 0)
        .expect("validated time of day");
    match frequency {
        Frequency::TwiceDaily => vec![base, base + Duration::hours(12)],
        Frequency::Daily | Frequency::Weekly => vec![base],
    }
}

/// Map a naive local time into the zone. Ambiguous times (fall-back) take
/// the earlier instant; nonexistent times (spring-forward gap) shift forward
/// until they land on a valid local time.
fn resolve_local(tz: &Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    let mut candidate = naive;
    for _ in 0..4 {
        match tz.from_local_datetime(&candidate) {
            LocalResult::Single(dt) => return dt,
            LocalResult::Ambiguous(earlier, _) => return earlier,
            LocalResult::None => candidate += Duration::hours(1),
        }
    }
    // DST gaps are at most a few hours everywhere; fall back to UTC mapping.
    tz.from_utc_datetime(&naive)
}
