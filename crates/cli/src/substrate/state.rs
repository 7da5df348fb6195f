// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared admission state: the clock and occupancy fields every actor reads,
//! and the two mutations remote actors may apply. Compound read-modify-write
//! sequences are bracketed by the semaphore-set state mutex; the struct lock
//! here only serializes individual accesses.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::proto::{Dept, OfficeStatus};
use crate::substrate::wire::{Conn, Reply, Request};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionState {
    /// Day index, strictly monotonic, starts at 0.
    pub day: u32,
    /// Seconds since midnight of the simulated day.
    pub simulated_time: u32,
    /// Building capacity N. Read-only after init.
    pub capacity: u32,
    /// Clients admitted but not yet finished.
    pub queue_length: u32,
    /// Active registration workers.
    pub registration_workers: u16,
    /// Tickets issued today, one slot per department.
    pub ticket_counters: [u32; 5],
    /// Daily ticket quotas; 0 means the department issues no tickets.
    pub ticket_quotas: [u32; 5],
    /// Simulated seconds per real second.
    pub time_mul: u32,
    pub status: OfficeStatus,
}

impl AdmissionState {
    pub fn new(capacity: u32, quotas: [u32; 5], time_mul: u32) -> AdmissionState {
        AdmissionState {
            day: 0,
            simulated_time: 0,
            capacity,
            queue_length: 0,
            registration_workers: 0,
            ticket_counters: [0; 5],
            ticket_quotas: quotas,
            time_mul: time_mul.max(1),
            status: OfficeStatus::Closed,
        }
    }
}

/// Mutations remote actors may apply. Both are single-field writes; the
/// caller holds the state mutex around any read-modify-write sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateOp {
    /// Adjust `queue_length`, clamped at zero.
    QueueAdd(i64),
    /// Overwrite one department's ticket counter.
    TicketSet { dept: Dept, count: u32 },
}

/// Server-side state cell; also mutated directly by the supervisor and its
/// clock task.
pub struct StateCore {
    inner: Mutex<AdmissionState>,
}

impl StateCore {
    pub fn new(state: AdmissionState) -> StateCore {
        StateCore { inner: Mutex::new(state) }
    }

    fn lock(&self) -> MutexGuard<'_, AdmissionState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn snapshot(&self) -> AdmissionState {
        self.lock().clone()
    }

    pub fn apply(&self, ops: &[StateOp]) {
        let mut state = self.lock();
        for op in ops {
            match *op {
                StateOp::QueueAdd(delta) => {
                    let current = i64::from(state.queue_length);
                    state.queue_length = current.saturating_add(delta).max(0) as u32;
                }
                StateOp::TicketSet { dept, count } => {
                    state.ticket_counters[dept.index()] = count;
                }
            }
        }
    }

    /// In-process access for the supervisor and clock.
    pub fn with<R>(&self, f: impl FnOnce(&mut AdmissionState) -> R) -> R {
        f(&mut self.lock())
    }
}

/// Client handle over the state socket.
pub struct StateClient {
    conn: Conn,
}

impl StateClient {
    pub async fn connect(path: &Path) -> anyhow::Result<StateClient> {
        Ok(StateClient { conn: Conn::connect(path).await? })
    }

    pub async fn snapshot(&mut self) -> anyhow::Result<AdmissionState> {
        match self.conn.request(|seq| Request::Snapshot { seq }).await? {
            Reply::State { state, .. } => Ok(state),
            other => anyhow::bail!("unexpected state reply: {other:?}"),
        }
    }

    pub async fn apply(&mut self, ops: Vec<StateOp>) -> anyhow::Result<()> {
        match self.conn.request(|seq| Request::Apply { seq, ops }).await? {
            Reply::Ok { .. } => Ok(()),
            other => anyhow::bail!("unexpected state reply: {other:?}"),
        }
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
