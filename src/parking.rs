//! Parking lot with pluggable fee strategies.
//!
//! Allocation here is one critical section behind a single `Mutex<LotState>`,
//! deliberately unlike [`reserve`](crate::reserve)'s sharded map: a lot has a
//! few hundred spots and first-fit needs a consistent view of all of them, so
//! one short lock is the simpler correct choice. When N really is large and
//! operations touch one resource at a time, shard; when allocation scans the
//! whole structure anyway, one lock wins.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::info;

use crate::cash::Money;
use crate::ids::{self, IdKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VehicleKind {
    Motorcycle,
    Car,
    Bus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SpotSize {
    Small,
    Compact,
    Large,
}

impl VehicleKind {
    /// Which spot sizes this vehicle fits in. Bigger spots always accept
    /// smaller vehicles; buses need Large.
    pub fn fits(&self, size: SpotSize) -> bool {
        match self {
            VehicleKind::Motorcycle => true,
            VehicleKind::Car => matches!(size, SpotSize::Compact | SpotSize::Large),
            VehicleKind::Bus => matches!(size, SpotSize::Large),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vehicle {
    pub plate: String,
    pub kind: VehicleKind,
}

impl Vehicle {
    pub fn new(plate: impl Into<String>, kind: VehicleKind) -> Self {
        Self {
            plate: plate.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpotId {
    pub floor: u32,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub id: u64,
    pub vehicle: Vehicle,
    pub spot: SpotId,
    pub entered_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub ticket_id: u64,
    pub plate: String,
    pub parked_for: Duration,
    pub fee: Money,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParkingError {
    // Invalid input.
    #[error("no ticket {0}")]
    UnknownTicket(u64),

    // Business rules.
    #[error("no free spot fits a {0:?}")]
    LotFull(VehicleKind),
    #[error("vehicle {0} is already parked here")]
    AlreadyParked(String),
}

/// Fee strategy seam.
pub trait FeePolicy: Send + Sync {
    fn fee(&self, kind: VehicleKind, parked: Duration) -> Money;
}

fn started_hours(parked: Duration) -> i64 {
    // Any fraction of an hour bills as a full hour; zero duration is free.
    (parked.as_secs() as i64 + 3599) / 3600
}

/// Per-kind hourly rate, every started hour billed in full.
pub struct PerHour {
    pub motorcycle: Money,
    pub car: Money,
    pub bus: Money,
}

impl FeePolicy for PerHour {
    fn fee(&self, kind: VehicleKind, parked: Duration) -> Money {
        let rate = match kind {
            VehicleKind::Motorcycle => self.motorcycle,
            VehicleKind::Car => self.car,
            VehicleKind::Bus => self.bus,
        };
        rate * started_hours(parked)
    }
}

/// Flat fee covering the first `flat_hours`, then hourly on top.
pub struct FlatThenHourly {
    pub flat: Money,
    pub flat_hours: i64,
    pub hourly: Money,
}

impl FeePolicy for FlatThenHourly {
    fn fee(&self, _kind: VehicleKind, parked: Duration) -> Money {
        let hours = started_hours(parked);
        if hours <= self.flat_hours {
            self.flat
        } else {
            self.flat + self.hourly * (hours - self.flat_hours)
        }
    }
}

struct SpotState {
    size: SpotSize,
    occupant: Option<u64>,
}

struct LotState {
    // Spot order is allocation order: lowest floor first, and within a
    // floor the spots as declared (smallest sizes declared first by
    // convention of the builder).
    spots: HashMap<SpotId, SpotState>,
    order: Vec<SpotId>,
    tickets: HashMap<u64, Ticket>,
    plates: HashMap<String, u64>,
}

pub struct ParkingLot {
    state: Mutex<LotState>,
    policy: Box<dyn FeePolicy>,
}

/// Per-floor free counts by spot size, for the display board.
pub type AvailabilityBoard = Vec<(u32, Vec<(SpotSize, usize)>)>;

impl ParkingLot {
    /// Build a lot from floor descriptions: for each floor, how many spots of
    /// each size. Spots allocate first-fit smallest-size-first within the
    /// lowest floor that fits.
    pub fn new(floors: &[&[(SpotSize, u32)]], policy: Box<dyn FeePolicy>) -> Self {
        let mut spots = HashMap::new();
        let mut order = Vec::new();
        for (floor_idx, floor) in floors.iter().enumerate() {
            let mut index = 0;
            let mut sized: Vec<(SpotSize, u32)> = floor.to_vec();
            sized.sort_by_key(|(size, _)| *size);
            for (size, count) in sized {
                for _ in 0..count {
                    let id = SpotId {
                        floor: floor_idx as u32,
                        index,
                    };
                    spots.insert(
                        id,
                        SpotState {
                            size,
                            occupant: None,
                        },
                    );
                    order.push(id);
                    index += 1;
                }
            }
        }
        Self {
            state: Mutex::new(LotState {
                spots,
                order,
                tickets: HashMap::new(),
                plates: HashMap::new(),
            }),
            policy,
        }
    }

    pub fn park(&self, vehicle: Vehicle) -> Result<Ticket, ParkingError> {
        self.park_at(vehicle, Instant::now())
    }

    /// `park` with an explicit clock, for deterministic fee tests.
    pub fn park_at(&self, vehicle: Vehicle, at: Instant) -> Result<Ticket, ParkingError> {
        let mut lot = self.lock();

        if lot.plates.contains_key(&vehicle.plate) {
            return Err(ParkingError::AlreadyParked(vehicle.plate));
        }

        let spot = lot
            .order
            .iter()
            .copied()
            .find(|id| {
                let spot = &lot.spots[id];
                spot.occupant.is_none() && vehicle.kind.fits(spot.size)
            })
            .ok_or(ParkingError::LotFull(vehicle.kind))?;

        let ticket = Ticket {
            id: ids::next(IdKind::Ticket),
            vehicle: vehicle.clone(),
            spot,
            entered_at: at,
        };
        if let Some(state) = lot.spots.get_mut(&spot) {
            state.occupant = Some(ticket.id);
        }
        lot.plates.insert(vehicle.plate.clone(), ticket.id);
        lot.tickets.insert(ticket.id, ticket.clone());

        info!(plate = %vehicle.plate, floor = spot.floor, index = spot.index, "parked");
        Ok(ticket)
    }

    pub fn exit(&self, ticket_id: u64) -> Result<Receipt, ParkingError> {
        self.exit_at(ticket_id, Instant::now())
    }

    pub fn exit_at(&self, ticket_id: u64, at: Instant) -> Result<Receipt, ParkingError> {
        let mut lot = self.lock();

        let ticket = lot
            .tickets
            .remove(&ticket_id)
            .ok_or(ParkingError::UnknownTicket(ticket_id))?;
        if let Some(state) = lot.spots.get_mut(&ticket.spot) {
            state.occupant = None;
        }
        lot.plates.remove(&ticket.vehicle.plate);

        let parked_for = at.saturating_duration_since(ticket.entered_at);
        let fee = self.policy.fee(ticket.vehicle.kind, parked_for);
        info!(plate = %ticket.vehicle.plate, fee = %fee, "exited");
        Ok(Receipt {
            ticket_id,
            plate: ticket.vehicle.plate,
            parked_for,
            fee,
        })
    }

    /// Free counts per floor and size.
    pub fn availability(&self) -> AvailabilityBoard {
        let lot = self.lock();
        let mut board: std::collections::BTreeMap<u32, std::collections::BTreeMap<SpotSize, usize>> =
            std::collections::BTreeMap::new();
        for (id, state) in lot.spots.iter().filter(|(_, s)| s.occupant.is_none()) {
            *board
                .entry(id.floor)
                .or_default()
                .entry(state.size)
                .or_insert(0) += 1;
        }
        board
            .into_iter()
            .map(|(floor, sizes)| (floor, sizes.into_iter().collect()))
            .collect()
    }

    pub fn free_spots(&self) -> usize {
        self.lock()
            .spots
            .values()
            .filter(|state| state.occupant.is_none())
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LotState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
