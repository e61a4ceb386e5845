//! Study-day boundaries for the daily reset hour.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Timelike, Utc};

/// End of the study day containing `now`: the next occurrence of
/// `daily_reset_hour` strictly after `now`, in `now`'s time zone.
///
/// Before the reset hour the study day is still "yesterday", so its end is
/// the reset hour today.
pub fn study_day_end<Tz: TimeZone>(now: &DateTime<Tz>, daily_reset_hour: u32) -> DateTime<Utc> {
    let hour = daily_reset_hour.min(23);
    let date = if now.hour() < hour {
        now.date_naive()
    } else {
        now.date_naive() + Duration::days(1)
    };

    date.and_hms_opt(hour, 0, 0)
        .and_then(|naive| now.timezone().from_local_datetime(&naive).earliest())
        .map(|end| end.with_timezone(&Utc))
        .unwrap_or_else(|| now.with_timezone(&Utc) + Duration::days(1))
}

/// The study day `at` belongs to, named by the date it starts on.
pub fn study_day<Tz: TimeZone>(at: &DateTime<Tz>, daily_reset_hour: u32) -> NaiveDate {
    if at.hour() < daily_reset_hour.min(23) {
        at.date_naive() - Duration::days(1)
    } else {
        at.date_naive()
    }
}
