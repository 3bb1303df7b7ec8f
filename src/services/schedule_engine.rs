//! Pure scheduling decisions: is a schedule due, and when does it run next.
//!
//! All timestamps here are server-local wall clock times. Nothing in this
//! module touches storage; the caller records `last_run_at` and guarantees
//! that a schedule has at most one execution in flight.

use crate::models::schedule::{BackupSchedule, Frequency};
use chrono::{Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, Timelike};

/// How far (in minutes) `now` may be from the scheduled time and still count.
pub const DUE_TOLERANCE_MINUTES: i64 = 5;

/// How many days ahead `next_run` searches. Covers any monthly day (1..=28).
const NEXT_RUN_HORIZON_DAYS: i64 = 62;

/// Longest clock jump (DST gap) skipped when placing a wall-clock time.
const MAX_GAP_MINUTES: i64 = 180;

/// Whether `schedule` is due at `now`.
pub fn due(schedule: &BackupSchedule, now: NaiveDateTime) -> bool {
    due_occurrence(schedule, now).is_some()
}

/// The scheduled occurrence `now` falls into, if any.
///
/// The tolerance is a true time delta at minute resolution, so a window
/// that straddles an hour or midnight still matches. The day constraint is
/// checked against the occurrence's own date.
pub fn due_occurrence(schedule: &BackupSchedule, now: NaiveDateTime) -> Option<NaiveDateTime> {
    if !schedule.enabled {
        return None;
    }
    let now = truncate_to_minute(now);
    let tolerance = Duration::minutes(DUE_TOLERANCE_MINUTES);

    [-1, 0, 1].into_iter().find_map(|offset| {
        let date = now.date() + Duration::days(offset);
        let occurrence = date.and_time(schedule.time_of_day);
        let delta = (now - occurrence).abs();
        (delta <= tolerance && day_matches(schedule, date)).then_some(occurrence)
    })
}

/// Whether a run recorded at `last_run` already covers `occurrence`.
pub fn already_ran(occurrence: NaiveDateTime, last_run: Option<NaiveDateTime>) -> bool {
    last_run.is_some_and(|last| last >= occurrence - Duration::minutes(DUE_TOLERANCE_MINUTES))
}

/// The first occurrence strictly after `now`. `None` iff the schedule is disabled.
pub fn next_run(schedule: &BackupSchedule, now: NaiveDateTime) -> Option<NaiveDateTime> {
    if !schedule.enabled {
        return None;
    }
    (0..=NEXT_RUN_HORIZON_DAYS)
        .map(|offset| now.date() + Duration::days(offset))
        .filter(|date| day_matches(schedule, *date))
        .map(|date| date.and_time(schedule.time_of_day))
        .find(|candidate| *candidate > now)
}

/// Place a wall-clock time on a time line through `resolve`.
///
/// An ambiguous time takes the earlier instant. A time that falls inside a
/// forward clock jump moves to the first minute after the jump.
pub fn resolve_local<T>(
    at: NaiveDateTime,
    resolve: impl Fn(&NaiveDateTime) -> LocalResult<T>,
) -> Option<T> {
    (0..=MAX_GAP_MINUTES).find_map(|shift| resolve(&(at + Duration::minutes(shift))).earliest())
}

fn day_matches(schedule: &BackupSchedule, date: NaiveDate) -> bool {
    match schedule.frequency {
        Frequency::Daily => true,
        Frequency::Weekly => schedule
            .day_of_week
            .is_some_and(|day| date.weekday().num_days_from_sunday() == day),
        Frequency::Monthly => schedule.day_of_month.is_some_and(|day| date.day() == day),
    }
}

fn truncate_to_minute(at: NaiveDateTime) -> NaiveDateTime {
    at.with_second(0)
        .and_then(|at| at.with_nanosecond(0))
        .unwrap_or(at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::schedule::{Destination, JobType};
    use chrono::{NaiveTime, Utc};
    use uuid::Uuid;

    fn schedule(frequency: Frequency, hh: u32, mm: u32) -> BackupSchedule {
        BackupSchedule {
            id: Uuid::new_v4(),
            name: "test".into(),
            account_id: Some(Uuid::new_v4()),
            is_system: false,
            job_type: JobType::Full,
            frequency,
            day_of_week: None,
            day_of_month: None,
            time_of_day: NaiveTime::from_hms_opt(hh, mm, 0).unwrap(),
            retention_days: 7,
            destination: Destination::Local,
            enabled: true,
            last_run_at: None,
            last_status: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    /// 2024-03-04 is a Monday; 2024-03-06 a Wednesday.
    fn at(day: u32, hh: u32, mm: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(hh, mm, 0)
            .unwrap()
    }

    #[test]
    fn daily_is_due_every_day_inside_window_only() {
        let mut s = schedule(Frequency::Daily, 2, 0);
        s.day_of_week = Some(3);
        s.day_of_month = Some(15);
        for day in 1..=31 {
            assert!(due(&s, at(day, 2, 0)), "day {day} at 02:00");
            assert!(due(&s, at(day, 2, 5)), "day {day} at 02:05");
            assert!(due(&s, at(day, 1, 55)), "day {day} at 01:55");
            assert!(!due(&s, at(day, 2, 6)), "day {day} at 02:06");
            assert!(!due(&s, at(day, 14, 0)), "day {day} at 14:00");
        }
    }

    #[test]
    fn weekly_scenario() {
        let mut s = schedule(Frequency::Weekly, 2, 0);
        s.day_of_week = Some(3);

        assert!(due(&s, at(6, 2, 3)), "Wed 02:03");
        assert!(!due(&s, at(6, 2, 10)), "Wed 02:10");
        assert!(!due(&s, at(7, 2, 0)), "Thu 02:00");
    }

    #[test]
    fn weekly_only_matches_its_weekday() {
        let mut s = schedule(Frequency::Weekly, 9, 30);
        s.day_of_week = Some(1);
        for day in 3..=9 {
            let now = at(day, 9, 30);
            let monday = now.date().weekday().num_days_from_sunday() == 1;
            assert_eq!(due(&s, now), monday, "{now}");
        }
    }

    #[test]
    fn monthly_matches_day_of_month() {
        let mut s = schedule(Frequency::Monthly, 3, 0);
        s.day_of_month = Some(15);
        assert!(due(&s, at(15, 3, 2)));
        assert!(!due(&s, at(14, 3, 2)));
        assert!(!due(&s, at(16, 3, 2)));
    }

    #[test]
    fn window_crosses_hour_and_midnight() {
        let s = schedule(Frequency::Daily, 0, 58);
        assert!(due(&s, at(6, 1, 2)));
        assert!(due(&s, at(6, 0, 55)));

        let late = schedule(Frequency::Daily, 23, 58);
        assert!(due(&late, at(7, 0, 2)));
        assert_eq!(due_occurrence(&late, at(7, 0, 2)), Some(at(6, 23, 58)));
    }

    #[test]
    fn weekly_day_is_checked_against_occurrence_date() {
        let mut s = schedule(Frequency::Weekly, 23, 58);
        s.day_of_week = Some(3);
        // Thu 00:01 still belongs to Wednesday's 23:58 run.
        assert!(due(&s, at(7, 0, 1)));
        // Wed 00:01 would belong to Tuesday's run.
        assert!(!due(&s, at(6, 0, 1)));
    }

    #[test]
    fn seconds_are_ignored() {
        let s = schedule(Frequency::Daily, 2, 0);
        let now = at(6, 2, 5).with_second(59).unwrap();
        assert!(due(&s, now));
    }

    #[test]
    fn disabled_is_never_due_and_has_no_next_run() {
        let mut s = schedule(Frequency::Daily, 2, 0);
        s.enabled = false;
        assert!(!due(&s, at(6, 2, 0)));
        assert_eq!(next_run(&s, at(6, 2, 0)), None);
    }

    #[test]
    fn next_run_is_strictly_in_the_future() {
        let daily = schedule(Frequency::Daily, 2, 0);
        assert_eq!(next_run(&daily, at(6, 1, 0)), Some(at(6, 2, 0)));
        assert_eq!(next_run(&daily, at(6, 2, 0)), Some(at(7, 2, 0)));
        assert_eq!(next_run(&daily, at(6, 3, 0)), Some(at(7, 2, 0)));

        let mut weekly = schedule(Frequency::Weekly, 2, 0);
        weekly.day_of_week = Some(3);
        assert_eq!(next_run(&weekly, at(6, 2, 0)), Some(at(13, 2, 0)));
        assert_eq!(next_run(&weekly, at(4, 12, 0)), Some(at(6, 2, 0)));

        let mut monthly = schedule(Frequency::Monthly, 2, 0);
        monthly.day_of_month = Some(1);
        let expected = NaiveDate::from_ymd_opt(2024, 4, 1)
            .unwrap()
            .and_hms_opt(2, 0, 0)
            .unwrap();
        assert_eq!(next_run(&monthly, at(1, 2, 0)), Some(expected));
    }

    #[test]
    fn next_run_over_many_instants() {
        let mut s = schedule(Frequency::Weekly, 17, 45);
        s.day_of_week = Some(0);
        let mut now = at(1, 0, 0);
        while now < at(31, 0, 0) {
            let next = next_run(&s, now).unwrap();
            assert!(next > now);
            assert!(next - now <= Duration::days(7));
            now += Duration::minutes(97);
        }
    }

    #[test]
    fn already_ran_covers_the_window() {
        let occurrence = at(6, 2, 0);
        assert!(!already_ran(occurrence, None));
        assert!(!already_ran(occurrence, Some(at(5, 2, 1))));
        assert!(already_ran(occurrence, Some(at(6, 1, 56))));
        assert!(already_ran(occurrence, Some(at(6, 2, 4))));
    }

    #[test]
    fn resolve_local_skips_forward_over_a_gap() {
        // Clocks jump from 02:00 to 03:00 on the 31st.
        let gap = |t: &NaiveDateTime| {
            if t.date() == at(31, 0, 0).date() && t.hour() == 2 {
                LocalResult::None
            } else {
                LocalResult::Single(*t)
            }
        };
        assert_eq!(resolve_local(at(31, 2, 30), gap), Some(at(31, 3, 0)));
        assert_eq!(resolve_local(at(30, 2, 30), gap), Some(at(30, 2, 30)));

        let ambiguous = |t: &NaiveDateTime| LocalResult::Ambiguous(*t, *t + Duration::hours(1));
        assert_eq!(resolve_local(at(27, 1, 30), ambiguous), Some(at(27, 1, 30)));
    }

    #[test]
    fn next_run_lands_after_a_gap_for_enabled_schedules() {
        let sched = schedule(Frequency::Daily, 2, 30);
        let next = next_run(&sched, at(30, 12, 0)).unwrap();
        assert_eq!(next, at(31, 2, 30));
        let placed = resolve_local(next, |t| {
            if t.hour() == 2 {
                LocalResult::None
            } else {
                LocalResult::Single(*t)
            }
        });
        assert_eq!(placed, Some(at(31, 3, 0)));
    }
}
