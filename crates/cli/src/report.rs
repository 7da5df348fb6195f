// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-day unserved-case reports: append-only text files in the runtime
//! directory, one per day index, written under an exclusive advisory lock
//! because clerks and the supervisor append concurrently.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};

use crate::proto::Dept;

/// Issuer tag for tickets handed out by registration.
pub const ISSUER_REJESTRACJA: &str = "REJESTRACJA";
/// Issuer tag for tickets forwarded by a general-admissions clerk.
pub const ISSUER_SA: &str = "SA";
/// Issuer tag for the synthetic no-pending-work marker.
pub const ISSUER_DYREKTOR: &str = "DYREKTOR";

pub fn report_path(dir: &Path, day: u32) -> PathBuf {
    dir.join(format!("raport_dzien_{day}.txt"))
}

fn append_line(dir: &Path, day: u32, line: &str) -> anyhow::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(report_path(dir, day))?;
    let mut locked = Flock::lock(file, FlockArg::LockExclusive)
        .map_err(|(_, errno)| std::io::Error::from_raw_os_error(errno as i32))?;
    locked.write_all(line.as_bytes())?;
    locked.write_all(b"\n")?;
    Ok(())
}

/// Ticket drained from a department channel after the office closed.
pub fn unserved_after_close(
    dir: &Path,
    day: u32,
    client_id: u32,
    dept: Dept,
    ticket_number: u32,
) -> anyhow::Result<()> {
    let line = format!("{client_id} - sprawa do {dept} - nr biletu {ticket_number}");
    append_line(dir, day, &line)
}

/// Ticket left unserved when a worker got the finish signal, or a redirect
/// that could not be placed. `issuer` names who handed the ticket out.
pub fn unserved_after_signal(
    dir: &Path,
    day: u32,
    client_id: u32,
    dept: Dept,
    issuer: &str,
) -> anyhow::Result<()> {
    let line = format!("{client_id} - skierowanie do {dept} - wystawil {issuer}");
    append_line(dir, day, &line)
}

#[cfg(test)]
#[path = "report_tests.rs"]
mod tests;
