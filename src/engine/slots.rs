use std::collections::HashSet;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use ulid::Ulid;

use crate::model::*;

// ── Calendar Resolver ─────────────────────────────────────────────
//
// All instants are built from local calendar components. A slot's
// absolute start is day-midnight + minute-of-day; the reverse mapping
// floors an instant back to its date. No UTC string round-trips, so
// the professional's local day never drifts across DST or server
// timezone differences.

/// Absolute instant for (date, hour, minute) on the local calendar.
/// `None` when the components are not a valid wall-clock time.
pub fn local_instant(date: NaiveDate, hour: u32, minute: u32) -> Option<Ms> {
    date.and_hms_opt(hour, minute, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
}

/// The `[midnight, next-midnight)` span of `date`.
pub fn day_span(date: NaiveDate) -> Span {
    let start = date
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_utc()
        .timestamp_millis();
    Span::new(start, start + 24 * HOUR_MS)
}

/// The calendar day containing `at`.
pub fn calendar_day(at: Ms) -> Span {
    let date = DateTime::<Utc>::from_timestamp_millis(at)
        .expect("instant within calendar range")
        .date_naive();
    day_span(date)
}

/// Weekday index with 0 = Sunday, matching the stored rule convention.
pub fn weekday_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

pub fn slot_label(minute_of_day: u32) -> String {
    format!("{:02}:{:02}", minute_of_day / 60, minute_of_day % 60)
}

/// Compute the bookable "HH:MM" labels for one professional, category,
/// and date. Pure function of the partition snapshot and the arguments:
/// no side effects, idempotent, safe under concurrent readers.
///
/// Only CONFIRMED reservations occupy slots — open requests coexist
/// until confirmation resolves them.
pub fn compute_slots(
    state: &ProfessionalState,
    category_id: Ulid,
    date: NaiveDate,
    now: Ms,
) -> Vec<String> {
    let offered = state
        .offerings
        .get(&category_id)
        .is_some_and(|o| o.active);
    if !offered {
        return Vec::new();
    }
    let Some(rule) = state.active_rule(weekday_index(date)) else {
        return Vec::new();
    };

    let day = day_span(date);
    let occupied = occupied_starts(state, &day);

    let mut labels = Vec::new();
    let mut minute = rule.start_minute;
    while minute + 60 <= rule.end_minute {
        let instant = day.start + minute as Ms * MINUTE_MS;
        if !occupied.contains(&instant) && instant > now {
            labels.push(slot_label(minute));
        }
        minute += 60;
    }
    labels
}

/// Hourly slot starts covered by confirmed reservations whose slot
/// falls inside `day`, walking each reservation's duration.
fn occupied_starts(state: &ProfessionalState, day: &Span) -> HashSet<Ms> {
    let mut occupied = HashSet::new();
    for r in state.starting_within(day) {
        if !r.status.blocks_slots() {
            continue;
        }
        for step in 0..r.duration_hours {
            occupied.insert(r.time_slot + step as Ms * HOUR_MS);
        }
    }
    occupied
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2030-06-03 is a Monday; every instant is far in the future of the
    // fixed `now` used below, which keeps these tests wall-clock-free.
    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 6, 3).unwrap()
    }

    fn fixed_now() -> Ms {
        local_instant(NaiveDate::from_ymd_opt(2030, 6, 1).unwrap(), 12, 0).unwrap()
    }

    fn state_with_monday_rule() -> (ProfessionalState, Ulid) {
        let mut state = ProfessionalState::new(Ulid::new(), Ulid::new());
        let category = Ulid::new();
        state.rules = vec![WeeklyRule {
            weekday: 1, // Monday
            start_minute: 540,
            end_minute: 1020,
            active: true,
        }];
        state.offerings.insert(
            category,
            Offering {
                active: true,
                price_cents: 5_000,
            },
        );
        (state, category)
    }

    fn confirmed(state: &ProfessionalState, start: Ms, duration_hours: u8) -> Reservation {
        Reservation {
            id: Ulid::new(),
            professional_id: state.id,
            client_id: Ulid::new(),
            category_id: Ulid::new(),
            city_id: state.city_id,
            time_slot: start,
            duration_hours,
            expires_at: start + 24 * HOUR_MS,
            status: ReservationStatus::Confirmed,
            is_modified_by_pro: false,
            confirmed_at: Some(start - HOUR_MS),
            completed_at: None,
            cancelled_at: None,
        }
    }

    #[test]
    fn local_instant_is_component_built() {
        let date = NaiveDate::from_ymd_opt(2030, 6, 3).unwrap();
        let at = local_instant(date, 9, 0).unwrap();
        // Reversing the construction lands on the same date and minute.
        let day = calendar_day(at);
        assert_eq!(day, day_span(date));
        assert_eq!(at - day.start, 540 * MINUTE_MS);
        assert!(local_instant(date, 24, 0).is_none());
    }

    #[test]
    fn weekday_zero_is_sunday() {
        assert_eq!(
            weekday_index(NaiveDate::from_ymd_opt(2030, 6, 2).unwrap()),
            0
        );
        assert_eq!(weekday_index(monday()), 1);
    }

    #[test]
    fn slot_labels_are_zero_padded() {
        assert_eq!(slot_label(540), "09:00");
        assert_eq!(slot_label(570), "09:30");
        assert_eq!(slot_label(0), "00:00");
    }

    #[test]
    fn full_day_rule_yields_hourly_labels() {
        // Monday 09:00–17:00, no bookings: 8 slots 09:00..=16:00.
        let (state, category) = state_with_monday_rule();
        let slots = compute_slots(&state, category, monday(), fixed_now());
        assert_eq!(
            slots,
            vec!["09:00", "10:00", "11:00", "12:00", "13:00", "14:00", "15:00", "16:00"]
        );
    }

    #[test]
    fn confirmed_two_hour_booking_removes_both_slots() {
        let (mut state, category) = state_with_monday_rule();
        let ten = day_span(monday()).start + 10 * HOUR_MS;
        let r = confirmed(&state, ten, 2);
        state.insert_reservation(r);

        let slots = compute_slots(&state, category, monday(), fixed_now());
        assert_eq!(slots.len(), 6);
        assert!(!slots.contains(&"10:00".to_string()));
        assert!(!slots.contains(&"11:00".to_string()));
        assert!(slots.contains(&"09:00".to_string()));
        assert!(slots.contains(&"12:00".to_string()));
    }

    #[test]
    fn open_requests_do_not_block_slots() {
        let (mut state, category) = state_with_monday_rule();
        let ten = day_span(monday()).start + 10 * HOUR_MS;
        let mut r = confirmed(&state, ten, 1);
        r.status = ReservationStatus::Pending;
        r.confirmed_at = None;
        state.insert_reservation(r);

        let slots = compute_slots(&state, category, monday(), fixed_now());
        assert!(slots.contains(&"10:00".to_string()));
    }

    #[test]
    fn past_slots_are_suppressed() {
        let (state, category) = state_with_monday_rule();
        // Resolution time in the middle of the Monday window: 12:30.
        let now = day_span(monday()).start + 12 * HOUR_MS + 30 * MINUTE_MS;
        let slots = compute_slots(&state, category, monday(), now);
        assert_eq!(slots, vec!["13:00", "14:00", "15:00", "16:00"]);
    }

    #[test]
    fn missing_or_inactive_offering_is_empty_not_an_error() {
        let (mut state, category) = state_with_monday_rule();
        assert!(compute_slots(&state, Ulid::new(), monday(), fixed_now()).is_empty());

        state.offerings.get_mut(&category).unwrap().active = false;
        assert!(compute_slots(&state, category, monday(), fixed_now()).is_empty());
    }

    #[test]
    fn missing_or_inactive_rule_is_empty() {
        let (mut state, category) = state_with_monday_rule();
        // Tuesday has no rule at all.
        let tuesday = NaiveDate::from_ymd_opt(2030, 6, 4).unwrap();
        assert!(compute_slots(&state, category, tuesday, fixed_now()).is_empty());

        state.rules[0].active = false;
        assert!(compute_slots(&state, category, monday(), fixed_now()).is_empty());
    }

    #[test]
    fn partial_trailing_hour_is_not_emitted() {
        let (mut state, category) = state_with_monday_rule();
        state.rules[0].end_minute = 1050; // 17:30 — last full hour starts 16:00
        let slots = compute_slots(&state, category, monday(), fixed_now());
        assert_eq!(slots.last().unwrap(), "16:00");
        assert_eq!(slots.len(), 8);
    }

    #[test]
    fn idempotent_for_a_fixed_snapshot() {
        let (mut state, category) = state_with_monday_rule();
        let ten = day_span(monday()).start + 10 * HOUR_MS;
        let r = confirmed(&state, ten, 1);
        state.insert_reservation(r);

        let a = compute_slots(&state, category, monday(), fixed_now());
        let b = compute_slots(&state, category, monday(), fixed_now());
        assert_eq!(a, b);
    }

    #[test]
    fn previous_day_spillover_does_not_block() {
        // Slot-start day scoping: a confirmed booking starting Sunday
        // 23:00 with a long duration is not loaded for Monday.
        let (mut state, category) = state_with_monday_rule();
        let sunday_23 = day_span(monday()).start - HOUR_MS;
        let r = confirmed(&state, sunday_23, 8);
        state.insert_reservation(r);

        let slots = compute_slots(&state, category, monday(), fixed_now());
        assert_eq!(slots.len(), 8);
    }
}
