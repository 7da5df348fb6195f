// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client generator: spawns visitor processes at randomized intervals while
//! the office is open, up to an optional cap. Departments follow the
//! 60/10/10/10/10 weighting; VIP and child flags are rolled here so a
//! manually spawned client stays deterministic.

use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use rand::Rng;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::config::Config;
use crate::proto::{Dept, OfficeStatus};
use crate::signals::{self, WorkerSignals};
use crate::substrate::state::StateClient;
use crate::substrate::Paths;

/// Chance (percent) that a generated client is a VIP.
const VIP_CHANCE: u32 = 10;
/// Chance (percent) that a generated client brings a child.
const CHILD_CHANCE: u32 = 20;

pub async fn run(config: &Config) -> anyhow::Result<()> {
    let signals = WorkerSignals::install()?;
    let evacuate = signals.evacuate.clone();
    let paths = Paths::new(&config.dir);

    let mut state =
        StateClient::connect(&paths.state()).await.context("substrate attach failed (state)")?;
    let exe = std::env::current_exe()?;

    info!("client generator started");

    let mut children: Vec<Child> = Vec::new();
    let mut spawned: u32 = 0;

    loop {
        if evacuate.is_cancelled() {
            info!("client generator stopping on signal");
            break;
        }
        if let Some(cap) = config.gen_max_count {
            if spawned >= cap {
                info!(spawned, "client generator reached its cap");
                break;
            }
        }

        let snapshot = state.snapshot().await?;
        if snapshot.status == OfficeStatus::Open {
            match spawn_client(&exe, config) {
                Ok(child) => {
                    children.push(child);
                    spawned += 1;
                }
                Err(e) => warn!("failed to spawn client: {e}"),
            }

            let delay_s =
                u64::from(rand::rng().random_range(config.gen_min_delay..=config.gen_max_delay));
            let ms = (delay_s * 1000 / u64::from(snapshot.time_mul.max(1))).max(1);
            tokio::select! {
                _ = evacuate.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
            }
        } else {
            tokio::select! {
                _ = evacuate.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_millis(200)) => {}
            }
        }

        reap(&mut children);
    }

    // Whatever ends the generator empties the building behind it.
    if let Err(e) = signals::broadcast_evacuation() {
        warn!("evacuation broadcast failed: {e}");
    }
    for child in &mut children {
        if let Err(e) = child.wait().await {
            warn!("client reap failed: {e}");
        }
    }

    info!(spawned, "client generator stopped");
    Ok(())
}

fn spawn_client(exe: &std::path::Path, config: &Config) -> anyhow::Result<Child> {
    let dept = weighted_department(rand::rng().random_range(1..=100));
    let mut command = Command::new(exe);
    command
        .arg("--role")
        .arg("client")
        .arg("--dir")
        .arg(&config.dir)
        .arg("--dept")
        .arg(dept.as_str())
        .arg("--log-level")
        .arg(&config.log_level)
        .stdin(Stdio::null());
    if rand::rng().random_range(1..=100) <= VIP_CHANCE {
        command.arg("--vip");
    }
    if rand::rng().random_range(1..=100) <= CHILD_CHANCE {
        command.arg("--child");
    }
    let child = command.spawn()?;
    info!(dept = %dept, pid = child.id().unwrap_or_default(), "spawned client");
    Ok(child)
}

/// Map a 1-100 roll onto the SA 60% / SC,KM,ML,PD 10% each distribution.
fn weighted_department(roll: u32) -> Dept {
    match roll {
        1..=60 => Dept::SA,
        61..=70 => Dept::SC,
        71..=80 => Dept::KM,
        81..=90 => Dept::ML,
        _ => Dept::PD,
    }
}

fn reap(children: &mut Vec<Child>) {
    children.retain_mut(|child| match child.try_wait() {
        Ok(Some(_)) => false,
        Ok(None) => true,
        Err(e) => {
            warn!("client reap failed: {e}");
            false
        }
    });
}

#[cfg(test)]
#[path = "generator_tests.rs"]
mod tests;
