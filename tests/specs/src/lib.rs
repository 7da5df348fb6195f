// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end scenario tests.
//!
//! Spawns the real `urzad` binary — a supervisor with its whole worker tree,
//! plus standalone clients — against an isolated runtime directory, and
//! inspects the shared log and daily report files it leaves behind.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

/// Resolve the path to the compiled `urzad` binary.
pub fn urzad_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("urzad")
}

/// A running `urzad` process that is killed on drop.
pub struct OfficeProcess {
    child: Child,
    dir: PathBuf,
}

/// Builder for a supervisor process and its runtime directory.
pub struct SupervisorBuilder {
    dir: PathBuf,
    args: Vec<String>,
}

impl SupervisorBuilder {
    pub fn new(dir: &Path) -> SupervisorBuilder {
        SupervisorBuilder {
            dir: dir.to_path_buf(),
            args: vec![
                "--Tp".into(),
                "8".into(),
                "--Tk".into(),
                "9".into(),
                "--time-mul".into(),
                "3600".into(),
            ],
        }
    }

    /// Replace the default hours/time-mul arguments entirely.
    pub fn raw_args(mut self, args: &[&str]) -> SupervisorBuilder {
        self.args = args.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn arg(mut self, arg: &str) -> SupervisorBuilder {
        self.args.push(arg.to_string());
        self
    }

    pub fn args(mut self, args: &[&str]) -> SupervisorBuilder {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    pub fn spawn(self) -> anyhow::Result<OfficeProcess> {
        OfficeProcess::spawn_role(&self.dir, "supervisor", &self.args)
    }
}

impl OfficeProcess {
    pub fn supervisor(dir: &Path) -> SupervisorBuilder {
        SupervisorBuilder::new(dir)
    }

    /// Spawn one role process against an existing runtime directory.
    pub fn spawn_role(dir: &Path, role: &str, extra: &[String]) -> anyhow::Result<OfficeProcess> {
        let binary = urzad_binary();
        anyhow::ensure!(binary.exists(), "urzad binary not found at {}", binary.display());

        let child = Command::new(&binary)
            .arg("--role")
            .arg(role)
            .arg("--dir")
            .arg(dir)
            .args(extra)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(OfficeProcess { child, dir: dir.to_path_buf() })
    }

    /// Spawn a client against the runtime directory.
    pub fn client(dir: &Path, extra: &[&str]) -> anyhow::Result<OfficeProcess> {
        let extra: Vec<String> = extra.iter().map(|s| s.to_string()).collect();
        Self::spawn_role(dir, "client", &extra)
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Contents of the shared log file (empty string before first write).
    pub fn log_contents(&self) -> String {
        log_contents(&self.dir)
    }

    /// Poll the shared log until `needle` shows up.
    pub async fn wait_for_log(&self, needle: &str, timeout: Duration) -> anyhow::Result<()> {
        wait_for_log(&self.dir, needle, timeout).await
    }

    /// Wait for the process to exit within `timeout`.
    pub async fn wait_exit(
        &mut self,
        timeout: Duration,
    ) -> anyhow::Result<std::process::ExitStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("urzad process did not exit within {timeout:?}");
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Send SIGINT, as a terminal would.
    pub fn interrupt(&self) -> anyhow::Result<()> {
        nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(self.child.id() as i32),
            nix::sys::signal::Signal::SIGINT,
        )?;
        Ok(())
    }
}

impl Drop for OfficeProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn log_contents(dir: &Path) -> String {
    std::fs::read_to_string(urzad::logger::log_path(dir)).unwrap_or_default()
}

pub fn report_contents(dir: &Path, day: u32) -> Option<String> {
    std::fs::read_to_string(urzad::report::report_path(dir, day)).ok()
}

pub async fn wait_for_log(dir: &Path, needle: &str, timeout: Duration) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if log_contents(dir).contains(needle) {
            return Ok(());
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("log never contained {needle:?} within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
