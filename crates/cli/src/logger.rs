// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tracing setup shared by every role. Events go to stderr and to one
//! append-only log file in the runtime directory; every process in the
//! simulation writes the same file, so each flush takes an exclusive
//! advisory lock to keep lines whole.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};
use tracing_subscriber::fmt::writer::{MakeWriter, MakeWriterExt};
use tracing_subscriber::EnvFilter;

use crate::config::Config;

const LOG_FILE: &str = "urzad.log";

pub fn log_path(dir: &Path) -> PathBuf {
    dir.join(LOG_FILE)
}

/// `MakeWriter` targeting the shared log file.
#[derive(Debug, Clone)]
pub struct LockedLogFile {
    path: PathBuf,
}

impl LockedLogFile {
    pub fn new(dir: &Path) -> LockedLogFile {
        LockedLogFile { path: log_path(dir) }
    }
}

impl<'a> MakeWriter<'a> for LockedLogFile {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter { path: self.path.clone(), buf: Vec::new() }
    }
}

/// Buffers one formatted event, then appends it under `flock`.
pub struct LogWriter {
    path: PathBuf,
    buf: Vec<u8>,
}

impl LogWriter {
    fn flush_locked(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut locked = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| io::Error::from_raw_os_error(errno as i32))?;
        locked.write_all(&self.buf)?;
        self.buf.clear();
        Ok(())
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_locked()
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        let _ = self.flush_locked();
    }
}

/// Initialize tracing/logging from config.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    // Priority: --log-level / URZAD_LOG_LEVEL > RUST_LOG > default ("info").
    let filter = if std::env::var("URZAD_LOG_LEVEL").is_err() && config.log_level == "info" {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    } else {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let writer = LockedLogFile::new(&config.dir).and(io::stderr as fn() -> io::Stderr);
    let result =
        fmt::fmt().with_env_filter(filter).with_writer(writer).with_ansi(false).try_init();
    drop(result);
}

#[cfg(test)]
#[path = "logger_tests.rs"]
mod tests;
