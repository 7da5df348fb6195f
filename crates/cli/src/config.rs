// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;

use crate::proto::Dept;
use crate::substrate::DEFAULT_DIR;

/// Multi-process government-office simulation.
#[derive(Debug, Parser)]
#[command(name = "urzad", version, about)]
pub struct Config {
    /// Role this process runs (supervisor, client, registration, clerk,
    /// generator, cashier).
    #[arg(long)]
    pub role: String,

    /// Runtime directory holding the substrate sockets, lock file, log and
    /// reports.
    #[arg(long, env = "URZAD_DIR", default_value = DEFAULT_DIR)]
    pub dir: PathBuf,

    /// Opening hour (0-23).
    #[arg(long = "Tp", default_value = "8")]
    pub tp: u32,

    /// Closing hour (0-23), must be later than the opening hour.
    #[arg(long = "Tk", default_value = "16")]
    pub tk: u32,

    /// Building capacity.
    #[arg(long = "N", default_value = "100")]
    pub n: u32,

    /// Daily ticket quota for SA (0 = no tickets).
    #[arg(long = "X1", default_value = "10")]
    pub x1: u32,

    /// Daily ticket quota for SC (0 = no tickets).
    #[arg(long = "X2", default_value = "10")]
    pub x2: u32,

    /// Daily ticket quota for KM (0 = no tickets).
    #[arg(long = "X3", default_value = "10")]
    pub x3: u32,

    /// Daily ticket quota for ML (0 = no tickets).
    #[arg(long = "X4", default_value = "10")]
    pub x4: u32,

    /// Daily ticket quota for PD (0 = no tickets).
    #[arg(long = "X5", default_value = "10")]
    pub x5: u32,

    /// Simulated seconds per real second.
    #[arg(long = "time-mul", env = "URZAD_TIME_MUL", default_value = "1000")]
    pub time_mul: u32,

    /// Supervisor spawns the client generator itself.
    #[arg(long)]
    pub gen_from_dyrektor: bool,

    /// Shut down after the first simulated day.
    #[arg(long)]
    pub one_day: bool,

    /// Minimum seconds between generated clients (simulated).
    #[arg(long, default_value = "1")]
    pub gen_min_delay: u32,

    /// Maximum seconds between generated clients (simulated).
    #[arg(long, default_value = "5")]
    pub gen_max_delay: u32,

    /// Stop generating after this many clients.
    #[arg(long)]
    pub gen_max_count: Option<u32>,

    /// Department (clerk: required; client: defaults to SA).
    #[arg(long)]
    pub dept: Option<String>,

    /// This client is served with strict priority.
    #[arg(long)]
    pub vip: bool,

    /// This client brings a child along (takes two seats).
    #[arg(long)]
    pub child: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "URZAD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Known roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Supervisor,
    Client,
    Registration,
    Clerk,
    Generator,
    Cashier,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        let role = self.role_enum()?;

        if self.tp > 23 {
            anyhow::bail!("--Tp must be in range 0-23");
        }
        if self.tk > 23 {
            anyhow::bail!("--Tk must be in range 0-23");
        }
        if self.tp >= self.tk {
            anyhow::bail!("opening hour (--Tp) must be earlier than closing hour (--Tk)");
        }
        if self.n == 0 {
            anyhow::bail!("--N must be at least 1");
        }
        if self.time_mul == 0 {
            anyhow::bail!("--time-mul must be greater than 0");
        }
        if self.gen_min_delay > self.gen_max_delay {
            anyhow::bail!("--gen-min-delay must not exceed --gen-max-delay");
        }

        if role == Role::Clerk && self.dept.is_none() {
            anyhow::bail!("--dept is required for --role clerk");
        }
        if let Some(ref dept) = self.dept {
            dept.parse::<Dept>()?;
        }

        Ok(())
    }

    /// Parse the role string into an enum.
    pub fn role_enum(&self) -> anyhow::Result<Role> {
        match self.role.to_lowercase().as_str() {
            "supervisor" | "dyrektor" => Ok(Role::Supervisor),
            "client" | "petent" => Ok(Role::Client),
            "registration" | "rejestracja" => Ok(Role::Registration),
            "clerk" | "urzednik" => Ok(Role::Clerk),
            "generator" => Ok(Role::Generator),
            "cashier" | "kasa" => Ok(Role::Cashier),
            other => anyhow::bail!("invalid role: {other}"),
        }
    }

    /// Department for clerk/client roles; clients default to SA.
    pub fn dept_enum(&self) -> anyhow::Result<Dept> {
        match self.dept {
            Some(ref dept) => dept.parse(),
            None => Ok(Dept::SA),
        }
    }

    /// Per-department quota slots in counter order.
    pub fn quotas(&self) -> [u32; 5] {
        [self.x1, self.x2, self.x3, self.x4, self.x5]
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
