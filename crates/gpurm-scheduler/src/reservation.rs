//! Reservation ledger for tracking memory pledged to in-flight tasks

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Memory pledged on one device for the duration of a task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reservation {
    pub id: Uuid,
    pub device_id: u32,
    pub memory_mb: u64,
    pub created_at: DateTime<Utc>,
}

/// Active reservations indexed by id
///
/// Releasing is keyed by reservation id, so a second release of the same
/// reservation is a no-op.
#[derive(Debug, Default)]
pub struct ReservationLedger {
    reservations: HashMap<Uuid, Reservation>,
}

impl ReservationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new reservation
    pub fn reserve(&mut self, device_id: u32, memory_mb: u64) -> Reservation {
        let reservation = Reservation {
            id: Uuid::new_v4(),
            device_id,
            memory_mb,
            created_at: Utc::now(),
        };
        self.reservations.insert(reservation.id, reservation.clone());
        reservation
    }

    /// Remove a reservation, returning it if it was active
    pub fn release(&mut self, id: &Uuid) -> Option<Reservation> {
        let removed = self.reservations.remove(id);
        if let Some(r) = &removed {
            debug!(reservation_id = %r.id, device_id = r.device_id, "Reservation released");
        }
        removed
    }

    /// Total memory pledged on a device
    pub fn pledged_mb(&self, device_id: u32) -> u64 {
        self.reservations
            .values()
            .filter(|r| r.device_id == device_id)
            .fold(0u64, |acc, r| acc.saturating_add(r.memory_mb))
    }

    /// Number of reservations held on a device
    pub fn active_count(&self, device_id: u32) -> usize {
        self.reservations
            .values()
            .filter(|r| r.device_id == device_id)
            .count()
    }

    /// Pledged memory for every device with at least one reservation
    pub fn pledges(&self) -> HashMap<u32, u64> {
        let mut pledges = HashMap::new();
        for r in self.reservations.values() {
            let entry = pledges.entry(r.device_id).or_insert(0u64);
            *entry = entry.saturating_add(r.memory_mb);
        }
        pledges
    }

    pub fn get(&self, id: &Uuid) -> Option<&Reservation> {
        self.reservations.get(id)
    }

    /// All reservations, oldest first
    pub fn list(&self) -> Vec<Reservation> {
        let mut list: Vec<Reservation> = self.reservations.values().cloned().collect();
        list.sort_by_key(|r| (r.created_at, r.device_id));
        list
    }

    pub fn len(&self) -> usize {
        self.reservations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }
}
