// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervisor: owns the substrate and the simulated clock, spawns and reaps
//! every worker, scales the registration tier with the queue, handles the
//! daily teardown/respawn, and tears the whole simulation down on shutdown.

use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::proto::{Dept, Msg, CLASS_NORMAL, CLASS_REQUEST, CLASS_VIP, SENTINEL_ID};
use crate::report;
use crate::signals;
use crate::substrate::state::AdmissionState;
use crate::substrate::wire::ClassFilter;
use crate::substrate::{Paths, Substrate};

pub mod clock;
pub mod process;

use process::WorkerSet;

/// Main-loop cadence: reap, autoscale, and day-rollover polling.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub async fn run(config: &Config) -> anyhow::Result<()> {
    signals::become_group_leader();
    let shutdown = signals::install_supervisor()?;
    let paths = Paths::new(&config.dir);

    // One building slot stays reserved for the registration tier, as long
    // as there is more than one to begin with.
    let capacity_slots = if config.n > 1 { config.n - 1 } else { 1 };
    let initial = AdmissionState::new(config.n, config.quotas(), config.time_mul);

    let substrate_stop = CancellationToken::new();
    let substrate =
        Substrate::create(&paths, initial, [capacity_slots, 1], substrate_stop.clone()).await?;
    info!(
        capacity = config.n,
        time_mul = config.time_mul,
        dir = %paths.dir().display(),
        "supervisor started"
    );

    let mut workers = WorkerSet::new()?;
    workers.spawn_clerks(config)?;
    workers.spawn_registration(config)?;
    workers.spawn_cashier(config)?;
    if config.gen_from_dyrektor {
        workers.spawn_generator(config)?;
    }
    substrate.state.with(|s| s.registration_workers = 1);

    let (release_tx, release_rx) = watch::channel(0u32);
    let clock_stop = CancellationToken::new();
    let clock_task = tokio::spawn(clock::run(
        std::sync::Arc::clone(&substrate.state),
        config.tp,
        config.tk,
        release_rx,
        clock_stop.clone(),
    ));

    let mut last_day = 0u32;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }

        workers.reap_registration();
        if let Err(e) = autoscale(config, &substrate, &mut workers) {
            error!("registration autoscaling failed: {e}");
        }

        let day = substrate.state.with(|s| s.day);
        if day != last_day {
            if let Err(e) = rollover(config, &substrate, &mut workers, day - 1).await {
                error!("day rollover failed: {e}");
            }
            last_day = day;
            if config.one_day {
                info!("single-day run complete");
                break;
            }
            if let Err(e) = respawn(config, &substrate, &mut workers) {
                error!("worker respawn failed: {e}");
                break;
            }
            let _ = release_tx.send(day);
        }
    }

    // Shutdown: evacuate the group, then sentinels, then reap, then remove
    // the substrate. Best effort all the way down.
    info!("supervisor shutting down");
    clock_stop.cancel();
    if let Err(e) = signals::broadcast_evacuation() {
        warn!("evacuation broadcast failed: {e}");
    }
    for _ in 0..workers.registration.len().max(1) {
        if !substrate.registration.try_send(CLASS_REQUEST, Msg::registration_sentinel()) {
            warn!("registration channel full, sentinel dropped");
        }
    }
    for clerk in &workers.clerks {
        if !substrate.department(clerk.dept).try_send(CLASS_VIP, Msg::clerk_sentinel(clerk.dept)) {
            warn!(dept = %clerk.dept, "department channel full, sentinel dropped");
        }
    }
    if !substrate.cashier.try_send(CLASS_REQUEST, Msg::cashier_sentinel()) {
        warn!("cashier channel full, sentinel dropped");
    }
    workers.reap_all().await;
    let _ = clock_task.await;
    substrate_stop.cancel();
    Substrate::destroy(&paths);
    info!("supervisor stopped");
    Ok(())
}

/// Registration tier size for the current queue length.
fn desired_registration(capacity: u32, queue_length: u32) -> usize {
    let k = (capacity / 3).max(1);
    if queue_length > 2 * k {
        3
    } else if queue_length > k {
        2
    } else {
        1
    }
}

fn autoscale(
    config: &Config,
    substrate: &Substrate,
    workers: &mut WorkerSet,
) -> anyhow::Result<()> {
    let (queue_length, capacity) =
        substrate.state.with(|s| (s.queue_length, s.capacity));
    let target = desired_registration(capacity, queue_length);
    let active = workers.registration_active();

    if active < target {
        for _ in active..target {
            workers.spawn_registration(config)?;
        }
        info!(queue_length, target, "scaled registration up");
    } else if active > target {
        for _ in target..active {
            if substrate.registration.try_send(CLASS_REQUEST, Msg::registration_sentinel()) {
                workers.retiring += 1;
            }
        }
        info!(queue_length, target, "scaling registration down");
    }

    let active = workers.registration_active() as u16;
    substrate.state.with(|s| s.registration_workers = active);
    Ok(())
}

/// Day rollover: finish the service tier, report whatever was left on the
/// department channels, and reset the daily counters.
async fn rollover(
    config: &Config,
    substrate: &Substrate,
    workers: &mut WorkerSet,
    ended_day: u32,
) -> anyhow::Result<()> {
    info!(day = ended_day + 1, "day ended, tearing down workers");
    workers.stop_daily().await;

    for dept in Dept::ALL {
        let channel = substrate.department(dept);
        while let Some((_, msg)) = channel.try_recv(ClassFilter::AtMost(CLASS_NORMAL)) {
            let Msg::TicketIssued(ticket) = msg else {
                continue;
            };
            if ticket.client_id == SENTINEL_ID {
                continue;
            }
            report::unserved_after_close(
                &config.dir,
                ended_day,
                ticket.client_id,
                ticket.department,
                ticket.ticket_number,
            )?;
        }
    }

    substrate.state.with(|s| {
        s.queue_length = 0;
        s.ticket_counters = [0; 5];
    });
    Ok(())
}

fn respawn(
    config: &Config,
    substrate: &Substrate,
    workers: &mut WorkerSet,
) -> anyhow::Result<()> {
    workers.spawn_clerks(config)?;
    workers.spawn_registration(config)?;
    substrate.state.with(|s| s.registration_workers = 1);
    info!("workers respawned for the new day");
    Ok(())
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
