// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Simulated day clock. Ticks one simulated second at a time, opens the
//! office at the opening hour, closes it exactly once at the closing hour,
//! keeps ticking through a short grace window so in-flight work can drain,
//! then bumps the day counter and parks until the supervisor finishes the
//! daily restart.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::proto::OfficeStatus;
use crate::substrate::state::StateCore;

/// Simulated seconds the clock keeps running after closing time.
pub const CLOSE_GRACE_SECS: u32 = 120;

pub async fn run(
    state: Arc<StateCore>,
    open_hour: u32,
    close_hour: u32,
    mut released: watch::Receiver<u32>,
    stop: CancellationToken,
) {
    loop {
        let day = state.with(|s| s.day);

        // Park until the supervisor has finished restarting workers for
        // this day. Day 0 is released from the start.
        while *released.borrow() < day {
            tokio::select! {
                _ = stop.cancelled() => return,
                changed = released.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }

        state.with(|s| {
            s.simulated_time = open_hour * 3600;
            s.status = OfficeStatus::Open;
        });
        info!(day = day + 1, "office open");

        let close_at = close_hour * 3600;
        let end_at = close_at + CLOSE_GRACE_SECS;
        let mut closed = false;
        loop {
            let (now, time_mul) = state.with(|s| (s.simulated_time, s.time_mul));
            if now >= end_at {
                break;
            }
            let tick = Duration::from_millis(u64::from(1000 / time_mul.max(1)).max(1));
            tokio::select! {
                _ = stop.cancelled() => return,
                _ = tokio::time::sleep(tick) => {}
            }
            let now = state.with(|s| {
                s.simulated_time += 1;
                s.simulated_time
            });
            if now >= close_at && !closed {
                state.with(|s| s.status = OfficeStatus::Closed);
                closed = true;
                info!(day = day + 1, "office closed");
            }
        }

        state.with(|s| s.day += 1);
        info!(day = day + 1, "end of day");
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
