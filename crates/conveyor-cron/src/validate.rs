//! Restricted cron grammar and timezone allow-list (spec.md §4.6, §6).
//!
//! Only the daily subset `"M H * * *"` is accepted — `M` a multiple of 5 in
//! `0..=59`, `H` in `0..=23` — so the dispatcher never has to reason about
//! general cron (day-of-month, day-of-week, step expressions).

/// Fixed set of timezones a schedule may run in (spec.md §6).
pub const TIMEZONE_ALLOWLIST: &[&str] = &[
    "UTC",
    "America/Los_Angeles",
    "America/Chicago",
    "America/New_York",
    "Europe/London",
    "Asia/Kolkata",
];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("cron expression must be the form \"M H * * *\" with minute a multiple of 5: {0}")]
    BadCron(String),
    #[error("timezone {0} is not in the allow-list")]
    BadTimezone(String),
}

/// Parses the restricted `"M H * * *"` form into `(minute, hour)`.
pub fn parse_daily(cron: &str) -> Result<(u32, u32), ValidationError> {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    let invalid = || ValidationError::BadCron(cron.to_string());

    let [minute, hour, dom, month, dow]: [&str; 5] = fields.try_into().map_err(|_| invalid())?;
    if dom != "*" || month != "*" || dow != "*" {
        return Err(invalid());
    }

    let minute: u32 = minute.parse().map_err(|_| invalid())?;
    let hour: u32 = hour.parse().map_err(|_| invalid())?;
    if minute > 59 || minute % 5 != 0 || hour > 23 {
        return Err(invalid());
    }
    Ok((minute, hour))
}

/// Full registration-time validation: cron grammar plus timezone allow-list
/// (spec.md §4.6 "A schedule is registered only if `cron` parses and
/// `timezone ∈ allow-list`").
pub fn validate(cron: &str, timezone: &str) -> Result<(u32, u32), ValidationError> {
    let parsed = parse_daily(cron)?;
    if !TIMEZONE_ALLOWLIST.contains(&timezone) {
        return Err(ValidationError::BadTimezone(timezone.to_string()));
    }
    Ok(parsed)
}
