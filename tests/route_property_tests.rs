//! Property-based tests for route sequencing, trip windows and payment status
//!
//! The sequencer, the schedule overlap check and the payment status rule are all
//! pure functions. These tests check their invariants over generated itineraries,
//! windows and amounts rather than a handful of fixed cases.

use proptest::prelude::*;
use fleet_booking::{
    ItineraryError,
    fleet::{ResourceKind, Schedule},
    invoice::{PaymentStatus, payment_status},
    route::{Leg, RoutePoint, StopRole, sequence},
    types::{TimeStamp, TimeWindow},
};

// PROPERTY TEST STRATEGIES

fn base() -> TimeStamp<chrono::Utc> {
    TimeStamp::new_with(2024, 5, 2, 0, 0, 0).unwrap()
}

/// Strategy to generate a non-empty location name
fn location_strategy() -> impl Strategy<Value = String> {
    "[A-Z][a-z]{2,10}( [A-Z][a-z]{2,8})?"
}

/// Strategy to generate 2..=8 route points with non-decreasing times
fn itinerary_strategy() -> impl Strategy<Value = Vec<RoutePoint>> {
    prop::collection::vec((location_strategy(), 0i64..=240), 2..=8).prop_map(|hops| {
        let mut at = base();
        hops.into_iter()
            .map(|(location, gap)| {
                at = at.plus_minutes(gap);
                RoutePoint::new(location, at)
            })
            .collect()
    })
}

/// Strategy to generate a window starting within a day, up to 10 hours long
fn window_strategy() -> impl Strategy<Value = TimeWindow> {
    (0i64..1_440, 0i64..600).prop_map(|(start, length)| {
        let start = base().plus_minutes(start);
        TimeWindow::new(start, start.plus_minutes(length))
    })
}

proptest! {
    #[test]
    fn valid_itineraries_sequence_with_pickup_and_drop_off(points in itinerary_strategy()) {
        let plan = sequence(&points, None).unwrap();

        prop_assert_eq!(plan.stops.len(), points.len());
        prop_assert_eq!(plan.pickup().role, StopRole::Pickup);
        prop_assert_eq!(plan.drop_off().role, StopRole::DropOff);
        prop_assert_eq!(plan.waypoints().count(), points.len() - 2);
        prop_assert_eq!(plan.departure(), points[0].scheduled_at);
        prop_assert_eq!(plan.arrival(), points[points.len() - 1].scheduled_at);
    }

    #[test]
    fn sequencing_is_idempotent(points in itinerary_strategy()) {
        let first = sequence(&points, None).unwrap();
        let second = sequence(&points, None).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn leg_totals_are_sums(
        points in itinerary_strategy(),
        distances in prop::collection::vec(1u32..500, 7),
    ) {
        let legs: Vec<Leg> = distances
            .iter()
            .take(points.len() - 1)
            .map(|km| Leg::new(*km))
            .collect();
        let plan = sequence(&points, Some(&legs)).unwrap();

        let expected_km = legs.iter().map(|leg| leg.distance_km).sum::<u32>();
        let expected_minutes = points[0].scheduled_at.minutes_until(&points[points.len() - 1].scheduled_at);
        prop_assert_eq!(plan.total_distance_km, Some(expected_km));
        // legs without durations fall back to the timestamp gaps, which add up end to end
        prop_assert_eq!(plan.total_duration_minutes, Some(expected_minutes as u32));
    }

    #[test]
    fn wrong_leg_count_is_rejected(points in itinerary_strategy(), extra in 1usize..3) {
        let legs = vec![Leg::new(10); points.len() - 1 + extra];
        let err = sequence(&points, Some(&legs)).unwrap_err();
        prop_assert_eq!(
            err,
            ItineraryError::LegCountMismatch { expected: points.len() - 1, got: legs.len() }
        );
    }

    #[test]
    fn swapped_times_are_out_of_order(points in itinerary_strategy(), index in 1usize..8) {
        let index = index.min(points.len() - 1);
        let mut points = points;
        points[index].scheduled_at = points[index - 1].scheduled_at.plus_minutes(-1);

        let err = sequence(&points, None).unwrap_err();
        prop_assert_eq!(err, ItineraryError::OutOfOrder { index });
    }

    #[test]
    fn blank_location_is_rejected(points in itinerary_strategy(), index in 0usize..8) {
        let index = index.min(points.len() - 1);
        let mut points = points;
        points[index].location = "   ".into();

        let err = sequence(&points, None).unwrap_err();
        prop_assert_eq!(err, ItineraryError::EmptyLocation { index });
    }

    #[test]
    fn overlap_is_symmetric(a in window_strategy(), b in window_strategy()) {
        prop_assert_eq!(a.overlaps(&b), b.overlaps(&a));
    }

    #[test]
    fn touching_windows_do_not_overlap(a in window_strategy(), length in 1i64..600) {
        let next = TimeWindow::new(a.end, a.end.plus_minutes(length));
        prop_assert!(!a.overlaps(&next));
    }

    #[test]
    fn schedule_never_holds_overlapping_windows(
        windows in prop::collection::vec(window_strategy(), 1..20),
    ) {
        let mut schedule = Schedule::empty(ResourceKind::Vehicle, "vehicle_prop");
        for (i, window) in windows.iter().enumerate() {
            let accepted = schedule
                .reserve(&format!("assignment_{i}"), &format!("booking_{i}"), *window)
                .is_ok();
            prop_assert_eq!(accepted, schedule.entries.iter().any(|e| e.assignment_id == format!("assignment_{i}")));
        }

        for (i, left) in schedule.entries.iter().enumerate() {
            for right in schedule.entries.iter().skip(i + 1) {
                prop_assert!(!left.window.overlaps(&right.window));
            }
        }
    }

    #[test]
    fn settled_invoices_are_paid(
        total in 0u64..10_000_000,
        over in 0u64..1_000_000,
        due_in in -30i64..30,
    ) {
        let now = base();
        let due = Some(now.plus_days(due_in));
        prop_assert_eq!(payment_status(total + over, total, due, now), PaymentStatus::Paid);
    }

    #[test]
    fn payment_status_rule(
        total in 1u64..10_000_000,
        paid_share in 0u64..100,
        due_in in -30i64..30,
    ) {
        let now = base();
        let due = now.plus_days(due_in);
        let paid = total * paid_share / 100;
        let status = payment_status(paid, total, Some(due), now);

        let expected = if paid >= total {
            PaymentStatus::Paid
        } else if now > due {
            PaymentStatus::Overdue
        } else if paid == 0 {
            PaymentStatus::Pending
        } else {
            PaymentStatus::Partial
        };
        prop_assert_eq!(status, expected);
        // recomputing with the same inputs changes nothing
        prop_assert_eq!(payment_status(paid, total, Some(due), now), status);
    }
}
