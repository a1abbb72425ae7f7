//! # Slave Health Tracking
//!
//! Per-unit-id responsiveness table. The transport writes it when a
//! transaction resolves (a validated response marks the unit responding,
//! exhausted retries mark it non-responding) and front-end collaborators
//! read it for scan prioritization and request deduplication. Unit id 0
//! (broadcast) never participates.

/// Highest unit id the table covers.
const TABLE_SIZE: usize = 248;

/// Fixed-size "last known responding" table indexed by unit id 1..=247.
///
/// Units start out non-responding until a transaction proves otherwise.
#[derive(Debug, Clone)]
pub struct SlaveHealth {
    responding: [bool; TABLE_SIZE],
}

impl SlaveHealth {
    pub fn new() -> Self {
        Self { responding: [false; TABLE_SIZE] }
    }

    /// Record a validated response from `unit_id`. Broadcast and ids beyond
    /// the Modbus address range are ignored.
    pub fn mark_responding(&mut self, unit_id: u8) {
        if Self::in_range(unit_id) {
            self.responding[unit_id as usize] = true;
        }
    }

    /// Record an exhausted retry cycle for `unit_id`. Broadcast and ids
    /// beyond the Modbus address range are ignored.
    pub fn mark_unresponsive(&mut self, unit_id: u8) {
        if Self::in_range(unit_id) {
            self.responding[unit_id as usize] = false;
        }
    }

    /// Last known responsiveness of `unit_id`; always `false` for 0 and for
    /// ids beyond the Modbus address range.
    pub fn is_responding(&self, unit_id: u8) -> bool {
        Self::in_range(unit_id) && self.responding[unit_id as usize]
    }

    fn in_range(unit_id: u8) -> bool {
        (1..TABLE_SIZE).contains(&(unit_id as usize))
    }

    /// Unit ids currently marked responding, ascending.
    pub fn responding_units(&self) -> impl Iterator<Item = u8> + '_ {
        (1u8..=247).filter(move |&id| self.responding[id as usize])
    }
}

impl Default for SlaveHealth {
    fn default() -> Self {
        Self::new()
    }
}
