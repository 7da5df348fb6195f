// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Two-slot semaphore set: slot 0 is the building-capacity counter, slot 1
//! the binary mutex guarding admission-state read-modify-write sequences.
//! An n-unit wait is atomic, so a parent entering with a child takes both
//! seats or neither. No FIFO fairness across waiters, matching SysV semop.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::substrate::wire::{Conn, Reply, Request};

/// Slot index of the building-capacity counter.
pub const SEM_CAPACITY: usize = 0;
/// Slot index of the admission-state mutex.
pub const SEM_STATE_MUTEX: usize = 1;

/// Server-side semaphore state.
pub struct SemCore {
    counts: Mutex<Vec<u32>>,
    notify: Notify,
}

impl SemCore {
    pub fn new(initial: Vec<u32>) -> SemCore {
        SemCore { counts: Mutex::new(initial), notify: Notify::new() }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u32>> {
        match self.counts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Atomically take `n` units from slot `idx`, parking until available.
    pub async fn wait(&self, idx: usize, n: u32) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut counts = self.lock();
                if let Some(count) = counts.get_mut(idx) {
                    if *count >= n {
                        *count -= n;
                        return;
                    }
                }
            }
            notified.await;
        }
    }

    /// Release `n` units back to slot `idx`.
    pub fn post(&self, idx: usize, n: u32) {
        {
            let mut counts = self.lock();
            if let Some(count) = counts.get_mut(idx) {
                *count += n;
            }
        }
        self.notify.notify_waiters();
    }

    /// Current value of slot `idx` (diagnostics only).
    pub fn value(&self, idx: usize) -> u32 {
        self.lock().get(idx).copied().unwrap_or(0)
    }
}

/// Client handle over the semaphore socket.
pub struct SemClient {
    conn: Conn,
}

impl SemClient {
    pub async fn connect(path: &Path) -> anyhow::Result<SemClient> {
        Ok(SemClient { conn: Conn::connect(path).await? })
    }

    pub async fn wait(&mut self, idx: usize, n: u32) -> anyhow::Result<()> {
        match self.conn.request(|seq| Request::SemWait { seq, idx, n }).await? {
            Reply::Ok { .. } => Ok(()),
            other => anyhow::bail!("unexpected semaphore reply: {other:?}"),
        }
    }

    /// Wait that aborts on `cancel`. Returns false if canceled; a grant that
    /// won the race is reported as acquired and must be released by the
    /// caller's unwind path.
    pub async fn wait_cancellable(
        &mut self,
        idx: usize,
        n: u32,
        cancel: &CancellationToken,
    ) -> anyhow::Result<bool> {
        let reply =
            self.conn.request_cancellable(cancel, |seq| Request::SemWait { seq, idx, n }).await?;
        match reply {
            Reply::Ok { .. } => Ok(true),
            Reply::Canceled { .. } => Ok(false),
            other => anyhow::bail!("unexpected semaphore reply: {other:?}"),
        }
    }

    pub async fn post(&mut self, idx: usize, n: u32) -> anyhow::Result<()> {
        match self.conn.request(|seq| Request::SemPost { seq, idx, n }).await? {
            Reply::Ok { .. } => Ok(()),
            other => anyhow::bail!("unexpected semaphore reply: {other:?}"),
        }
    }

    /// Take the admission-state mutex.
    pub async fn lock_state(&mut self) -> anyhow::Result<()> {
        self.wait(SEM_STATE_MUTEX, 1).await
    }

    /// Release the admission-state mutex.
    pub async fn unlock_state(&mut self) -> anyhow::Result<()> {
        self.post(SEM_STATE_MUTEX, 1).await
    }
}

#[cfg(test)]
#[path = "sem_tests.rs"]
mod tests;
