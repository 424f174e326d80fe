use chrono::{Datelike, Duration, Local, NaiveDateTime, NaiveTime, Weekday};

/// Countdown to Friday 17:30, relative to `now` (local time).
pub(crate) fn happy_hour_reply(now: NaiveDateTime) -> String {
    let today = now.date();
    let days_ahead = (Weekday::Fri.num_days_from_monday() + 7
        - today.weekday().num_days_from_monday())
        % 7;
    let friday = today + Duration::days(i64::from(days_ahead));
    let start = NaiveTime::from_hms_opt(17, 30, 0).unwrap_or_default();
    let next = friday.and_time(start);

    if next <= now {
        return "It's Happy Hour time! Go have a drink :beer:".to_string();
    }

    let remaining = next - now;
    let days = remaining.num_days();
    let secs = remaining.num_seconds() - days * 86_400;
    let hours = secs / 3600;
    let minutes = (secs / 60) % 60;
    if days > 0 {
        format!("It's {days} days, {hours} hours and {minutes} minutes to Happy Hour :(")
    } else if hours > 0 {
        format!("It's {hours} hours and {minutes} minutes to Happy Hour!")
    } else if secs > 60 {
        format!("It's only another {minutes} minutes to Happy Hour :)")
    } else {
        format!("Oh boy, we're almost there! Give me a {secs} second countdown!")
    }
}

pub(crate) fn happy_hour_now() -> String {
    happy_hour_reply(Local::now().naive_local())
}
