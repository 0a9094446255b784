use chrono::{DateTime, Duration, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::model::{SlotDuration, Span};

use super::EngineError;

/// Spacing between consecutive candidate starts, regardless of slot duration.
pub const GRID_STEP_MINUTES: i64 = 30;

/// The day's last bookable boundary: no slot may end after 23:30.
const LAST_START_HOUR: u32 = 23;
const LAST_START_MINUTE: u32 = 30;

/// Resolve a wall-clock time of `day` in `tz` to a UTC instant.
/// Ambiguous local times (DST fold) take the earlier mapping; nonexistent
/// local times (DST gap) are reported as `InvalidDate`.
pub(crate) fn local_instant(
    tz: Tz,
    day: NaiveDate,
    hour: u32,
    minute: u32,
) -> Result<DateTime<Utc>, EngineError> {
    let naive = day
        .and_hms_opt(hour, minute, 0)
        .ok_or(EngineError::InvalidDate)?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or(EngineError::InvalidDate)
}

/// `InvalidDate` when `day` is strictly before today in `tz`.
pub(crate) fn require_not_past(
    day: NaiveDate,
    now: DateTime<Utc>,
    tz: Tz,
) -> Result<(), EngineError> {
    if day < now.with_timezone(&tz).date_naive() {
        return Err(EngineError::InvalidDate);
    }
    Ok(())
}

/// The window `[day 00:00, next day 00:00)` in `tz`, as UTC instants.
pub(crate) fn day_window(day: NaiveDate, tz: Tz) -> Result<Span, EngineError> {
    let start = local_instant(tz, day, 0, 0)?;
    let next = day.succ_opt().ok_or(EngineError::InvalidDate)?;
    let end = local_instant(tz, next, 0, 0)?;
    Ok(Span::new(start, end))
}

/// Next 30-minute boundary strictly after `now` in `tz`. Rounds the minute up
/// unconditionally, so an instant already on a boundary advances a full step
/// (18:10 → 18:30, 18:30 → 19:00). `None` when rounding leaves the day.
fn next_boundary_after(now: DateTime<Utc>, tz: Tz) -> Result<Option<DateTime<Utc>>, EngineError> {
    let local = now.with_timezone(&tz);
    let minute = ((local.minute() / 30) + 1) * 30;
    let hour = local.hour() + minute / 60;
    let minute = minute % 60;
    if hour >= 24 {
        return Ok(None);
    }
    local_instant(tz, local.date_naive(), hour, minute).map(Some)
}

/// Enumerate candidate slot starts for `day` at 30-minute granularity.
///
/// The lower bound is start of day, lifted to the boundary strictly after
/// `now` when `day` is today. The upper bound keeps `start + duration` at or
/// before the day's 23:30. Output is strictly ascending with uniform spacing;
/// empty when the floor already exceeds the bound.
pub fn day_grid(
    day: NaiveDate,
    duration: SlotDuration,
    now: DateTime<Utc>,
    tz: Tz,
) -> Result<Vec<DateTime<Utc>>, EngineError> {
    require_not_past(day, now, tz)?;

    let last_end = local_instant(tz, day, LAST_START_HOUR, LAST_START_MINUTE)?;
    let today = now.with_timezone(&tz).date_naive();
    let mut cursor = if day == today {
        match next_boundary_after(now, tz)? {
            Some(floor) => floor,
            None => return Ok(Vec::new()),
        }
    } else {
        local_instant(tz, day, 0, 0)?
    };

    let length = duration.as_duration();
    let mut starts = Vec::new();
    while cursor + length <= last_end {
        starts.push(cursor);
        cursor = cursor + Duration::minutes(GRID_STEP_MINUTES);
    }
    Ok(starts)
}
