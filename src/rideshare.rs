//! Ride sharing: a driver pool with atomic claims, pluggable matching, and a
//! trip state machine.
//!
//! Claiming a driver is the ride-matching face of the per-resource locking
//! doctrine: each driver's status flips `Available → Assigned` under that
//! driver's own map entry, so two concurrent requests can never both claim
//! the same driver. Matching proposes from a snapshot; the claim is what
//! decides, and a lost claim just moves on to the next candidate.

use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::cash::Money;
use crate::ids::{self, IdKind};

pub type DriverId = u64;
pub type TripId = u64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub x: f64,
    pub y: f64,
}

impl Location {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Location) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStatus {
    Available,
    Assigned(TripId),
    Offline,
}

#[derive(Debug, Clone)]
struct DriverEntry {
    name: String,
    location: Location,
    rating: f64,
    status: DriverStatus,
}

/// A matching candidate: the snapshot a [`MatchPolicy`] chooses from.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub driver: DriverId,
    pub location: Location,
    pub rating: f64,
}

/// Matching strategy seam.
pub trait MatchPolicy: Send + Sync {
    fn choose(&self, rider: &Location, candidates: &[Candidate]) -> Option<DriverId>;
}

/// Closest driver wins.
pub struct NearestDriver;

impl MatchPolicy for NearestDriver {
    fn choose(&self, rider: &Location, candidates: &[Candidate]) -> Option<DriverId> {
        candidates
            .iter()
            .min_by(|a, b| {
                a.location
                    .distance_to(rider)
                    .total_cmp(&b.location.distance_to(rider))
            })
            .map(|c| c.driver)
    }
}

/// Best-rated driver within a radius.
pub struct HighestRated {
    pub within_km: f64,
}

impl MatchPolicy for HighestRated {
    fn choose(&self, rider: &Location, candidates: &[Candidate]) -> Option<DriverId> {
        candidates
            .iter()
            .filter(|c| c.location.distance_to(rider) <= self.within_km)
            .max_by(|a, b| a.rating.total_cmp(&b.rating))
            .map(|c| c.driver)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RideError {
    // Invalid input.
    #[error("no driver {0}")]
    UnknownDriver(DriverId),
    #[error("no trip {0}")]
    UnknownTrip(TripId),

    // Business rules.
    #[error("no drivers available")]
    NoDriversAvailable,
    #[error("driver {0} is not available")]
    DriverNotAvailable(DriverId),
    #[error("invalid trip transition from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
    #[error("trip is already completed or cancelled")]
    TripAlreadyOver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelledBy {
    Rider,
    Driver,
}

/// Trip lifecycle, consuming transitions.
#[derive(Debug, Clone, PartialEq)]
pub enum Trip {
    Requested {
        id: TripId,
        rider: String,
        from: Location,
    },
    Assigned {
        id: TripId,
        rider: String,
        from: Location,
        driver: DriverId,
    },
    InProgress {
        id: TripId,
        rider: String,
        driver: DriverId,
    },
    Completed {
        id: TripId,
        driver: DriverId,
        fare: Money,
    },
    Cancelled {
        id: TripId,
        by: CancelledBy,
    },
}

impl Trip {
    pub fn id(&self) -> TripId {
        match self {
            Trip::Requested { id, .. }
            | Trip::Assigned { id, .. }
            | Trip::InProgress { id, .. }
            | Trip::Completed { id, .. }
            | Trip::Cancelled { id, .. } => *id,
        }
    }

    pub fn state_name(&self) -> &'static str {
        match self {
            Trip::Requested { .. } => "Requested",
            Trip::Assigned { .. } => "Assigned",
            Trip::InProgress { .. } => "InProgress",
            Trip::Completed { .. } => "Completed",
            Trip::Cancelled { .. } => "Cancelled",
        }
    }
}

/// Fare: `(base + km·per_km + min·per_minute) · surge`, computed in cents.
#[derive(Debug, Clone)]
pub struct FareTable {
    pub base: Money,
    pub per_km: Money,
    pub per_minute: Money,
    pub surge: f64,
}

impl FareTable {
    pub fn fare(&self, distance_km: f64, minutes: f64) -> Money {
        let raw = self.base.as_cents() as f64
            + self.per_km.as_cents() as f64 * distance_km
            + self.per_minute.as_cents() as f64 * minutes;
        Money::from_cents((raw * self.surge).round() as i64)
    }
}

impl Default for FareTable {
    fn default() -> Self {
        Self {
            base: Money::from_cents(250),
            per_km: Money::from_cents(120),
            per_minute: Money::from_cents(30),
            surge: 1.0,
        }
    }
}

pub struct DriverPool {
    drivers: DashMap<DriverId, DriverEntry>,
    fares: FareTable,
}

impl DriverPool {
    pub fn new(fares: FareTable) -> Arc<Self> {
        Arc::new(Self {
            drivers: DashMap::new(),
            fares,
        })
    }

    pub fn register_driver(
        &self,
        name: impl Into<String>,
        location: Location,
        rating: f64,
    ) -> DriverId {
        let id = ids::next(IdKind::Driver);
        self.drivers.insert(
            id,
            DriverEntry {
                name: name.into(),
                location,
                rating,
                status: DriverStatus::Available,
            },
        );
        id
    }

    pub fn set_location(&self, driver: DriverId, location: Location) -> Result<(), RideError> {
        let mut entry = self
            .drivers
            .get_mut(&driver)
            .ok_or(RideError::UnknownDriver(driver))?;
        entry.location = location;
        Ok(())
    }

    /// A driver may only go offline between trips.
    pub fn go_offline(&self, driver: DriverId) -> Result<(), RideError> {
        let mut entry = self
            .drivers
            .get_mut(&driver)
            .ok_or(RideError::UnknownDriver(driver))?;
        match entry.status {
            DriverStatus::Assigned(_) => Err(RideError::DriverNotAvailable(driver)),
            _ => {
                entry.status = DriverStatus::Offline;
                Ok(())
            }
        }
    }

    pub fn go_online(&self, driver: DriverId) -> Result<(), RideError> {
        let mut entry = self
            .drivers
            .get_mut(&driver)
            .ok_or(RideError::UnknownDriver(driver))?;
        if entry.status == DriverStatus::Offline {
            entry.status = DriverStatus::Available;
        }
        Ok(())
    }

    pub fn status(&self, driver: DriverId) -> Result<DriverStatus, RideError> {
        self.drivers
            .get(&driver)
            .map(|e| e.status)
            .ok_or(RideError::UnknownDriver(driver))
    }

    pub fn driver_name(&self, driver: DriverId) -> Result<String, RideError> {
        self.drivers
            .get(&driver)
            .map(|e| e.name.clone())
            .ok_or(RideError::UnknownDriver(driver))
    }

    fn candidates(&self) -> Vec<Candidate> {
        self.drivers
            .iter()
            .filter(|e| e.status == DriverStatus::Available)
            .map(|e| Candidate {
                driver: *e.key(),
                location: e.location,
                rating: e.rating,
            })
            .collect()
    }

    /// Flip `Available → Assigned` under the driver's entry lock. Fails if
    /// someone else claimed the driver since the snapshot.
    fn claim(&self, driver: DriverId, trip: TripId) -> bool {
        match self.drivers.get_mut(&driver) {
            Some(mut entry) if entry.status == DriverStatus::Available => {
                entry.status = DriverStatus::Assigned(trip);
                true
            }
            _ => false,
        }
    }

    fn free(&self, driver: DriverId) {
        if let Some(mut entry) = self.drivers.get_mut(&driver) {
            if matches!(entry.status, DriverStatus::Assigned(_)) {
                entry.status = DriverStatus::Available;
            }
        }
    }

    /// Request a ride. The policy proposes from a snapshot of available
    /// drivers; if the claim loses a race, the proposed driver is dropped
    /// from the snapshot and the policy tries again.
    pub fn request(
        &self,
        rider: impl Into<String>,
        from: Location,
        policy: &dyn MatchPolicy,
    ) -> Result<Trip, RideError> {
        let rider = rider.into();
        let trip_id = ids::next(IdKind::Trip);
        let mut candidates = self.candidates();

        while let Some(chosen) = policy.choose(&from, &candidates) {
            if self.claim(chosen, trip_id) {
                info!(trip = trip_id, driver = chosen, rider = %rider, "driver assigned");
                return Ok(Trip::Assigned {
                    id: trip_id,
                    rider,
                    from,
                    driver: chosen,
                });
            }
            candidates.retain(|c| c.driver != chosen);
        }
        Err(RideError::NoDriversAvailable)
    }

    pub fn start(&self, trip: Trip) -> Result<Trip, RideError> {
        match trip {
            Trip::Assigned {
                id, rider, driver, ..
            } => Ok(Trip::InProgress { id, rider, driver }),
            Trip::Completed { .. } | Trip::Cancelled { .. } => Err(RideError::TripAlreadyOver),
            other => Err(RideError::InvalidTransition {
                from: other.state_name(),
                to: "InProgress",
            }),
        }
    }

    /// Finish a trip: computes the fare and frees the driver.
    pub fn complete(
        &self,
        trip: Trip,
        distance_km: f64,
        minutes: f64,
    ) -> Result<Trip, RideError> {
        match trip {
            Trip::InProgress { id, driver, .. } => {
                let fare = self.fares.fare(distance_km, minutes);
                self.free(driver);
                info!(trip = id, driver, fare = %fare, "trip completed");
                Ok(Trip::Completed { id, driver, fare })
            }
            Trip::Completed { .. } | Trip::Cancelled { .. } => Err(RideError::TripAlreadyOver),
            other => Err(RideError::InvalidTransition {
                from: other.state_name(),
                to: "Completed",
            }),
        }
    }

    /// Cancel before or during the ride; frees the driver if one was
    /// assigned.
    pub fn cancel(&self, trip: Trip, by: CancelledBy) -> Result<Trip, RideError> {
        match trip {
            Trip::Requested { id, .. } => Ok(Trip::Cancelled { id, by }),
            Trip::Assigned { id, driver, .. } | Trip::InProgress { id, driver, .. } => {
                self.free(driver);
                Ok(Trip::Cancelled { id, by })
            }
            Trip::Completed { .. } | Trip::Cancelled { .. } => Err(RideError::TripAlreadyOver),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn pool() -> (Arc<DriverPool>, DriverId, DriverId, DriverId) {
        let pool = DriverPool::new(FareTable::default());
        let near = pool.register_driver("Near", Location::new(1.0, 1.0), 4.2);
        let far = pool.register_driver("Far", Location::new(10.0, 10.0), 4.9);
        let off = pool.register_driver("Off", Location::new(0.5, 0.5), 5.0);
        pool.go_offline(off).unwrap();
        (pool, near, far, off)
    }

    #[test]
    fn nearest_driver_wins() {
        let (pool, near, _, _) = pool();
        let trip = pool
            .request("rider-1", Location::new(0.0, 0.0), &NearestDriver)
            .unwrap();
        assert!(matches!(trip, Trip::Assigned { driver, .. } if driver == near));
        assert_eq!(pool.status(near).unwrap(), DriverStatus::Assigned(trip.id()));
    }

    #[test]
    fn highest_rated_respects_radius() {
        let (pool, near, far, _) = pool();
        // Far has the best rating but is outside 5 km.
        let trip = pool
            .request(
                "rider-1",
                Location::new(0.0, 0.0),
                &HighestRated { within_km: 5.0 },
            )
            .unwrap();
        assert!(matches!(trip, Trip::Assigned { driver, .. } if driver == near));

        // Widen the radius and Far wins.
        let trip = pool
            .request(
                "rider-2",
                Location::new(0.0, 0.0),
                &HighestRated { within_km: 50.0 },
            )
            .unwrap();
        assert!(matches!(trip, Trip::Assigned { driver, .. } if driver == far));
    }

    #[test]
    fn offline_drivers_are_never_matched() {
        let (pool, near, far, _) = pool();
        pool.go_offline(near).unwrap();
        pool.go_offline(far).unwrap();
        assert_eq!(
            pool.request("rider-1", Location::new(0.0, 0.0), &NearestDriver)
                .unwrap_err(),
            RideError::NoDriversAvailable
        );
    }

    #[test]
    fn full_trip_lifecycle_frees_the_driver() {
        let (pool, near, _, _) = pool();
        let trip = pool
            .request("rider-1", Location::new(0.0, 0.0), &NearestDriver)
            .unwrap();
        let trip = pool.start(trip).unwrap();
        let trip = pool.complete(trip, 10.0, 20.0).unwrap();

        // base 250 + 10*120 + 20*30 = 2050 cents.
        assert!(matches!(
            trip,
            Trip::Completed { fare, .. } if fare == Money::from_cents(2050)
        ));
        assert_eq!(pool.status(near).unwrap(), DriverStatus::Available);
    }

    #[test]
    fn surge_multiplies_the_fare() {
        let table = FareTable {
            surge: 1.5,
            ..FareTable::default()
        };
        assert_eq!(table.fare(10.0, 20.0), Money::from_cents(3075));
    }

    #[test]
    fn finished_trips_reject_transitions() {
        let (pool, _, _, _) = pool();
        let trip = pool
            .request("rider-1", Location::new(0.0, 0.0), &NearestDriver)
            .unwrap();
        let trip = pool.start(trip).unwrap();
        let done = pool.complete(trip, 1.0, 1.0).unwrap();

        assert_eq!(
            pool.start(done.clone()).unwrap_err(),
            RideError::TripAlreadyOver
        );
        assert_eq!(
            pool.cancel(done, CancelledBy::Rider).unwrap_err(),
            RideError::TripAlreadyOver
        );
    }

    #[test]
    fn cannot_start_an_unassigned_trip() {
        let (pool, _, _, _) = pool();
        let trip = Trip::Requested {
            id: 1,
            rider: "r".into(),
            from: Location::new(0.0, 0.0),
        };
        assert_eq!(
            pool.start(trip).unwrap_err(),
            RideError::InvalidTransition {
                from: "Requested",
                to: "InProgress"
            }
        );
    }

    #[test]
    fn cancel_frees_an_assigned_driver() {
        let (pool, near, _, _) = pool();
        let trip = pool
            .request("rider-1", Location::new(0.0, 0.0), &NearestDriver)
            .unwrap();
        let cancelled = pool.cancel(trip, CancelledBy::Rider).unwrap();
        assert!(matches!(
            cancelled,
            Trip::Cancelled {
                by: CancelledBy::Rider,
                ..
            }
        ));
        assert_eq!(pool.status(near).unwrap(), DriverStatus::Available);
    }

    #[test]
    fn offline_refused_mid_trip() {
        let (pool, near, _, _) = pool();
        let _trip = pool
            .request("rider-1", Location::new(0.0, 0.0), &NearestDriver)
            .unwrap();
        assert_eq!(
            pool.go_offline(near).unwrap_err(),
            RideError::DriverNotAvailable(near)
        );
    }

    #[test]
    fn concurrent_requests_never_double_claim() {
        let pool = DriverPool::new(FareTable::default());
        for i in 0..4 {
            pool.register_driver(format!("d{i}"), Location::new(i as f64, 0.0), 4.5);
        }

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    pool.request(format!("rider-{i}"), Location::new(0.0, 0.0), &NearestDriver)
                        .ok()
                })
            })
            .collect();

        let trips: Vec<Trip> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();

        // Four drivers, so exactly four assignments, all distinct.
        assert_eq!(trips.len(), 4);
        let mut drivers: Vec<DriverId> = trips
            .iter()
            .map(|t| match t {
                Trip::Assigned { driver, .. } => *driver,
                other => panic!("unexpected state {}", other.state_name()),
            })
            .collect();
        drivers.sort_unstable();
        drivers.dedup();
        assert_eq!(drivers.len(), 4);
    }
}
