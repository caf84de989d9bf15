use chrono::{DateTime, Datelike, FixedOffset, TimeZone, Timelike, Utc};
use proptest::prelude::*;
use scriptd::triggers::{next_fire, CalendarSpec, Recurrence};

// Instants between 2000 and 2100, second precision.
fn instant_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (946_684_800i64..4_102_444_800i64).prop_map(|secs| Utc.timestamp_opt(secs, 0).unwrap())
}

// Whole-hour offsets from UTC-12 to UTC+14.
fn offset_strategy() -> impl Strategy<Value = FixedOffset> {
    (-12i32..=14).prop_map(|hours| FixedOffset::east_opt(hours * 3600).unwrap())
}

// Calendar rules built from single values or wildcards so the expected
// match is easy to check field by field.
fn calendar_strategy() -> impl Strategy<Value = (Option<u32>, Option<u32>, Option<u32>)> {
    (
        proptest::option::of(0u32..60),
        proptest::option::of(0u32..24),
        proptest::option::of(0u32..7),
    )
}

fn field(value: Option<u32>) -> String {
    value.map_or_else(|| "*".to_string(), |v| v.to_string())
}

proptest! {
    #[test]
    fn interval_is_exactly_one_period_later(
        after in instant_strategy(),
        secs in 1u64..=86_400,
    ) {
        let next = next_fire(&Recurrence::every(secs), after, FixedOffset::east_opt(0).unwrap()).unwrap();
        prop_assert_eq!((next - after).num_seconds(), secs as i64);
    }

    #[test]
    fn calendar_fire_is_after_aligned_and_matching(
        after in instant_strategy(),
        offset in offset_strategy(),
        (minute, hour, weekday) in calendar_strategy(),
    ) {
        let rule = Recurrence::Calendar {
            minute: field(minute),
            hour: field(hour),
            day_of_month: "*".to_string(),
            month: "*".to_string(),
            day_of_week: field(weekday),
        };
        let next = next_fire(&rule, after, offset).unwrap();

        prop_assert!(next > after);
        prop_assert!(next - after <= chrono::TimeDelta::days(8));
        prop_assert_eq!(next.second(), 0);
        prop_assert_eq!(next.nanosecond(), 0);

        let local = next.with_timezone(&offset);
        if let Some(m) = minute {
            prop_assert_eq!(local.minute(), m);
        }
        if let Some(h) = hour {
            prop_assert_eq!(local.hour(), h);
        }
        if let Some(d) = weekday {
            prop_assert_eq!(local.weekday().num_days_from_sunday(), d);
        }

        let spec = CalendarSpec::parse(
            &field(minute),
            &field(hour),
            "*",
            "*",
            &field(weekday),
        ).unwrap();
        prop_assert!(spec.matches(local));
    }

    #[test]
    fn calendar_fire_is_the_earliest_match(
        after in instant_strategy(),
        minute in proptest::option::of(0u32..60),
        hour in proptest::option::of(0u32..24),
    ) {
        let utc = FixedOffset::east_opt(0).unwrap();
        let rule = Recurrence::Calendar {
            minute: field(minute),
            hour: field(hour),
            day_of_month: "*".to_string(),
            month: "*".to_string(),
            day_of_week: "*".to_string(),
        };
        let spec = CalendarSpec::parse(&field(minute), &field(hour), "*", "*", "*").unwrap();
        let next = next_fire(&rule, after, utc).unwrap();

        // No minute boundary between `after` and `next` matches.
        let mut t = after
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap()
            + chrono::TimeDelta::minutes(1);
        let mut checked = 0;
        while t < next && checked < 2000 {
            prop_assert!(!spec.matches(t.with_timezone(&utc)), "earlier match at {}", t);
            t += chrono::TimeDelta::minutes(1);
            checked += 1;
        }
    }
}
