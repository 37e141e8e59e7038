//! Route sequencing: validation and normalization of multi-stop itineraries
use crate::error::ItineraryError;
use crate::types::TimeStamp;
use chrono::Utc;

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct RoutePoint {
    #[n(0)]
    pub location: String,
    #[n(1)]
    pub scheduled_at: TimeStamp<Utc>,
}

impl RoutePoint {
    pub fn new(location: impl Into<String>, scheduled_at: TimeStamp<Utc>) -> Self {
        Self {
            location: location.into(),
            scheduled_at,
        }
    }
}

/// Estimate for the hop between two consecutive route points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Leg {
    #[n(0)]
    pub distance_km: u32,
    // falls back to the gap between the two point timestamps
    #[n(1)]
    pub duration_minutes: Option<u32>,
}

impl Leg {
    pub fn new(distance_km: u32) -> Self {
        Self {
            distance_km,
            duration_minutes: None,
        }
    }
    pub fn with_duration(distance_km: u32, duration_minutes: u32) -> Self {
        Self {
            distance_km,
            duration_minutes: Some(duration_minutes),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum StopRole {
    #[n(0)]
    Pickup,
    #[n(1)]
    Waypoint,
    #[n(2)]
    DropOff,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Stop {
    #[n(0)]
    pub role: StopRole,
    #[n(1)]
    pub point: RoutePoint,
}

/// A validated itinerary.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct RoutePlan {
    #[n(0)]
    pub stops: Vec<Stop>,
    #[n(1)]
    pub total_distance_km: Option<u32>,
    #[n(2)]
    pub total_duration_minutes: Option<u32>,
}

impl RoutePlan {
    pub fn pickup(&self) -> &Stop {
        &self.stops[0]
    }

    pub fn drop_off(&self) -> &Stop {
        &self.stops[self.stops.len() - 1]
    }

    pub fn waypoints(&self) -> impl Iterator<Item = &Stop> {
        self.stops
            .iter()
            .filter(|stop| stop.role == StopRole::Waypoint)
    }

    pub fn departure(&self) -> TimeStamp<Utc> {
        self.pickup().point.scheduled_at
    }

    pub fn arrival(&self) -> TimeStamp<Utc> {
        self.drop_off().point.scheduled_at
    }
}

/// Validate `points` (and optional per-leg estimates) into a [`RoutePlan`].
///
/// Pure: the same input always produces the same plan or the same error. Locations
/// are trimmed; timestamps must not decrease; with `legs` present there must be one
/// per hop and the totals are their sums, otherwise both totals stay `None`.
pub fn sequence(points: &[RoutePoint], legs: Option<&[Leg]>) -> Result<RoutePlan, ItineraryError> {
    if points.len() < 2 {
        return Err(ItineraryError::TooFewPoints(points.len()));
    }

    let last = points.len() - 1;
    let mut stops = Vec::with_capacity(points.len());
    for (index, point) in points.iter().enumerate() {
        let location = point.location.trim();
        if location.is_empty() {
            return Err(ItineraryError::EmptyLocation { index });
        }
        if index > 0 && point.scheduled_at < points[index - 1].scheduled_at {
            return Err(ItineraryError::OutOfOrder { index });
        }

        let role = match index {
            0 => StopRole::Pickup,
            i if i == last => StopRole::DropOff,
            _ => StopRole::Waypoint,
        };
        stops.push(Stop {
            role,
            point: RoutePoint::new(location, point.scheduled_at),
        });
    }

    let (total_distance_km, total_duration_minutes) = match legs {
        Some(legs) => {
            if legs.len() != last {
                return Err(ItineraryError::LegCountMismatch {
                    expected: last,
                    got: legs.len(),
                });
            }
            let distance = legs
                .iter()
                .try_fold(0u32, |total, leg| total.checked_add(leg.distance_km))
                .ok_or(ItineraryError::TotalsOverflow("distance"))?;
            let duration = legs
                .iter()
                .zip(points.windows(2))
                .try_fold(0u32, |total, (leg, hop)| {
                    let minutes = match leg.duration_minutes {
                        Some(minutes) => minutes,
                        None => u32::try_from(
                            hop[0].scheduled_at.minutes_until(&hop[1].scheduled_at),
                        )
                        .ok()?,
                    };
                    total.checked_add(minutes)
                })
                .ok_or(ItineraryError::TotalsOverflow("duration"))?;
            (Some(distance), Some(duration))
        }
        None => (None, None),
    };

    Ok(RoutePlan {
        stops,
        total_distance_km,
        total_duration_minutes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(hour: u32) -> TimeStamp<Utc> {
        TimeStamp::new_with(2024, 5, 2, hour, 0, 0).unwrap()
    }

    #[test]
    fn two_points_become_pickup_and_drop_off() {
        let plan = sequence(
            &[RoutePoint::new("Hanoi", t(6)), RoutePoint::new("Haiphong", t(8))],
            None,
        )
        .unwrap();

        assert_eq!(plan.pickup().role, StopRole::Pickup);
        assert_eq!(plan.drop_off().role, StopRole::DropOff);
        assert_eq!(plan.waypoints().count(), 0);
        assert_eq!(plan.total_distance_km, None);
        assert_eq!(plan.total_duration_minutes, None);
    }

    #[test]
    fn middle_points_are_waypoints_and_locations_trimmed() {
        let plan = sequence(
            &[
                RoutePoint::new(" Hanoi ", t(6)),
                RoutePoint::new("Hai Duong", t(7)),
                RoutePoint::new("Haiphong", t(8)),
            ],
            None,
        )
        .unwrap();

        assert_eq!(plan.waypoints().count(), 1);
        assert_eq!(plan.pickup().point.location, "Hanoi");
    }

    #[test]
    fn legs_fill_totals_with_timestamp_fallback() {
        let plan = sequence(
            &[
                RoutePoint::new("Hanoi", t(6)),
                RoutePoint::new("Hai Duong", t(7)),
                RoutePoint::new("Haiphong", t(9)),
            ],
            Some(&[Leg::with_duration(58, 75), Leg::new(45)]),
        )
        .unwrap();

        assert_eq!(plan.total_distance_km, Some(103));
        assert_eq!(plan.total_duration_minutes, Some(75 + 120));
    }

    #[test]
    fn rejects_single_point() {
        let err = sequence(&[RoutePoint::new("Hanoi", t(6))], None).unwrap_err();
        assert_eq!(err, ItineraryError::TooFewPoints(1));
    }

    #[test]
    fn rejects_decreasing_time() {
        let err = sequence(
            &[RoutePoint::new("Hanoi", t(8)), RoutePoint::new("Haiphong", t(6))],
            None,
        )
        .unwrap_err();
        assert_eq!(err, ItineraryError::OutOfOrder { index: 1 });
    }

    #[test]
    fn rejects_blank_location() {
        let err = sequence(
            &[RoutePoint::new("Hanoi", t(6)), RoutePoint::new("   ", t(8))],
            None,
        )
        .unwrap_err();
        assert_eq!(err, ItineraryError::EmptyLocation { index: 1 });
    }

    #[test]
    fn rejects_wrong_leg_count() {
        let err = sequence(
            &[RoutePoint::new("Hanoi", t(6)), RoutePoint::new("Haiphong", t(8))],
            Some(&[Leg::new(10), Leg::new(10)]),
        )
        .unwrap_err();
        assert_eq!(err, ItineraryError::LegCountMismatch { expected: 1, got: 2 });
    }

    #[test]
    fn rejects_totals_past_u32() {
        let points = [
            RoutePoint::new("Hanoi", t(6)),
            RoutePoint::new("Hai Duong", t(7)),
            RoutePoint::new("Haiphong", t(8)),
        ];

        let err = sequence(
            &points,
            Some(&[Leg::with_duration(1, 3_000_000_000), Leg::with_duration(1, 3_000_000_000)]),
        )
        .unwrap_err();
        assert_eq!(err, ItineraryError::TotalsOverflow("duration"));

        let err = sequence(&points, Some(&[Leg::new(3_000_000_000), Leg::new(3_000_000_000)]))
            .unwrap_err();
        assert_eq!(err, ItineraryError::TotalsOverflow("distance"));
    }
}
