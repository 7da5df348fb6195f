// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Child-process bookkeeping for the supervisor: spawning worker roles from
//! the same executable, the daily finish-signal teardown, and reaping.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::config::Config;
use crate::proto::Dept;
use crate::signals;

/// One spawned clerk and the department it serves.
pub struct ClerkProc {
    pub dept: Dept,
    pub child: Child,
}

/// Every child the supervisor owns. Clients are not here — the generator
/// spawns and reaps those itself.
pub struct WorkerSet {
    exe: PathBuf,
    pub clerks: Vec<ClerkProc>,
    pub registration: Vec<Child>,
    /// Registration workers that got a retirement sentinel but have not
    /// exited yet. Keeps the autoscaler from re-sending sentinels every poll.
    pub retiring: usize,
    pub cashier: Option<Child>,
    pub generator: Option<Child>,
}

impl WorkerSet {
    pub fn new() -> anyhow::Result<WorkerSet> {
        Ok(WorkerSet {
            exe: std::env::current_exe()?,
            clerks: Vec::new(),
            registration: Vec::new(),
            retiring: 0,
            cashier: None,
            generator: None,
        })
    }

    fn command(&self, config: &Config, role: &str) -> Command {
        let mut command = Command::new(&self.exe);
        command
            .arg("--role")
            .arg(role)
            .arg("--dir")
            .arg(&config.dir)
            .arg("--log-level")
            .arg(&config.log_level)
            .stdin(Stdio::null());
        command
    }

    pub fn spawn_clerk(&mut self, config: &Config, dept: Dept) -> anyhow::Result<()> {
        let child =
            self.command(config, "clerk").arg("--dept").arg(dept.as_str()).spawn()?;
        info!(dept = %dept, pid = child.id().unwrap_or_default(), "spawned clerk");
        self.clerks.push(ClerkProc { dept, child });
        Ok(())
    }

    /// The static clerk set: two general admissions, one of each other role.
    pub fn spawn_clerks(&mut self, config: &Config) -> anyhow::Result<()> {
        for dept in [Dept::SA, Dept::SA, Dept::SC, Dept::KM, Dept::ML, Dept::PD] {
            self.spawn_clerk(config, dept)?;
        }
        Ok(())
    }

    pub fn spawn_registration(&mut self, config: &Config) -> anyhow::Result<()> {
        let child = self.command(config, "registration").spawn()?;
        info!(pid = child.id().unwrap_or_default(), "spawned registration worker");
        self.registration.push(child);
        Ok(())
    }

    pub fn spawn_cashier(&mut self, config: &Config) -> anyhow::Result<()> {
        let child = self.command(config, "cashier").spawn()?;
        info!(pid = child.id().unwrap_or_default(), "spawned cashier");
        self.cashier = Some(child);
        Ok(())
    }

    pub fn spawn_generator(&mut self, config: &Config) -> anyhow::Result<()> {
        let mut command = self.command(config, "generator");
        command
            .arg("--gen-min-delay")
            .arg(config.gen_min_delay.to_string())
            .arg("--gen-max-delay")
            .arg(config.gen_max_delay.to_string());
        if let Some(cap) = config.gen_max_count {
            command.arg("--gen-max-count").arg(cap.to_string());
        }
        let child = command.spawn()?;
        info!(pid = child.id().unwrap_or_default(), "spawned client generator");
        self.generator = Some(child);
        Ok(())
    }

    /// Registration workers still alive, not counting ones already asked to
    /// retire.
    pub fn registration_active(&self) -> usize {
        self.registration.len().saturating_sub(self.retiring)
    }

    /// Drop registration workers that have exited.
    pub fn reap_registration(&mut self) {
        let before = self.registration.len();
        self.registration.retain_mut(|child| match child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) => false,
            Err(e) => {
                warn!("registration reap failed: {e}");
                false
            }
        });
        let reaped = before - self.registration.len();
        self.retiring = self.retiring.saturating_sub(reaped);
    }

    /// Day rollover: ask every clerk and registration worker to finish its
    /// current message, then wait for all of them.
    pub async fn stop_daily(&mut self) {
        for clerk in &self.clerks {
            request_finish(&clerk.child);
        }
        for worker in &self.registration {
            request_finish(worker);
        }
        for mut clerk in self.clerks.drain(..) {
            if let Err(e) = clerk.child.wait().await {
                warn!(dept = %clerk.dept, "clerk reap failed: {e}");
            }
        }
        for mut worker in self.registration.drain(..) {
            if let Err(e) = worker.wait().await {
                warn!("registration reap failed: {e}");
            }
        }
        self.retiring = 0;
    }

    /// Final teardown: wait for everything that is still ours.
    pub async fn reap_all(&mut self) {
        self.stop_daily().await;
        if let Some(mut generator) = self.generator.take() {
            if let Err(e) = generator.wait().await {
                warn!("generator reap failed: {e}");
            }
        }
        if let Some(mut cashier) = self.cashier.take() {
            if let Err(e) = cashier.wait().await {
                warn!("cashier reap failed: {e}");
            }
        }
    }
}

fn request_finish(child: &Child) {
    let Some(pid) = child.id() else {
        return;
    };
    if let Err(e) = signals::request_finish(pid) {
        warn!(pid, "finish signal failed: {e}");
    }
}
