//! Pure next-fire-time computation, kept separate from the dispatcher loop
//! so it can be tested without sleeping.

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// The next instant at or after `now` when `(hour, minute)` occurs in `tz`.
/// `now` is always excluded — a schedule never fires twice for the instant
/// it was last computed from.
pub fn next_fire_after(now: DateTime<Utc>, minute: u32, hour: u32, tz: Tz) -> DateTime<Utc> {
    let local_now = now.with_timezone(&tz);
    let today = local_now.date_naive();

    let candidate = fire_instant(today, minute, hour, tz);
    let candidate = if candidate > local_now {
        candidate
    } else {
        let tomorrow = today.succ_opt().expect("date in representable range");
        fire_instant(tomorrow, minute, hour, tz)
    };
    candidate.with_timezone(&Utc)
}

fn fire_instant(
    date: chrono::NaiveDate,
    minute: u32,
    hour: u32,
    tz: Tz,
) -> chrono::DateTime<Tz> {
    let naive = date
        .and_hms_opt(hour, minute, 0)
        .expect("hour/minute validated at registration");
    tz.from_local_datetime(&naive)
        .single()
        .unwrap_or_else(|| tz.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::Los_Angeles;
    use chrono_tz::Asia::Kolkata;
    use chrono_tz::UTC;

    #[test]
    fn fires_later_today_when_time_has_not_passed() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 3, 0, 0).unwrap();
        let next = next_fire_after(now, 30, 9, UTC);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 8, 1, 9, 30, 0).unwrap());
    }

    #[test]
    fn rolls_to_tomorrow_when_time_has_passed() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 10, 0, 0).unwrap();
        let next = next_fire_after(now, 30, 9, UTC);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 8, 2, 9, 30, 0).unwrap());
    }

    #[test]
    fn honours_non_utc_timezone() {
        // 09:00 IST is 03:30 UTC.
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();
        let next = next_fire_after(now, 0, 9, Kolkata);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 8, 1, 3, 30, 0).unwrap());
    }

    #[test]
    fn exact_boundary_rolls_to_next_day() {
        // `now` landing exactly on the fire instant must not refire immediately.
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 17, 0, 0).unwrap(); // 10:00 PDT
        let next = next_fire_after(now, 0, 10, Los_Angeles);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 8, 2, 17, 0, 0).unwrap());
    }
}
