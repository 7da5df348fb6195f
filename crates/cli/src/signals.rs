// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Out-of-band interrupts mapped to cancellation tokens.
//!
//! Two flavors reach workers: SIGUSR1 means finish-after-current (complete
//! the in-flight message, then drain and exit) and SIGUSR2 means
//! evacuate-now (unwind from any wait, release held resources, exit).
//! SIGTERM/SIGINT on a worker behave like evacuation. The supervisor keeps
//! its own two-stage SIGTERM/SIGINT handling and broadcasts SIGUSR2 to the
//! whole process group when the building empties.

use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::{getpgrp, setpgid, Pid};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Cancellation flags observed by worker loops at every suspension point.
pub struct WorkerSignals {
    pub finish: CancellationToken,
    pub evacuate: CancellationToken,
}

impl WorkerSignals {
    /// Install worker signal handling. The returned tokens are canceled from
    /// a background task holding the signal streams.
    pub fn install() -> anyhow::Result<WorkerSignals> {
        let finish = CancellationToken::new();
        let evacuate = CancellationToken::new();

        let mut usr1 = signal(SignalKind::user_defined1())?;
        let mut usr2 = signal(SignalKind::user_defined2())?;
        let mut term = signal(SignalKind::terminate())?;
        let mut int = signal(SignalKind::interrupt())?;

        let finish_flag = finish.clone();
        let evacuate_flag = evacuate.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = usr1.recv() => finish_flag.cancel(),
                    _ = usr2.recv() => evacuate_flag.cancel(),
                    _ = term.recv() => evacuate_flag.cancel(),
                    _ = int.recv() => evacuate_flag.cancel(),
                }
            }
        });

        Ok(WorkerSignals { finish, evacuate })
    }

    /// A token canceled when either flavor fires. Consumer loops block on
    /// this between messages.
    pub fn stop(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let out = token.clone();
        let finish = self.finish.clone();
        let evacuate = self.evacuate.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = finish.cancelled() => {}
                _ = evacuate.cancelled() => {}
            }
            out.cancel();
        });
        token
    }
}

/// Supervisor signal handling: first SIGTERM/SIGINT starts graceful
/// shutdown, the second forces exit. SIGUSR1/SIGUSR2 are absorbed so the
/// supervisor survives its own group broadcast.
pub fn install_supervisor() -> anyhow::Result<CancellationToken> {
    let shutdown = CancellationToken::new();

    let mut usr1 = signal(SignalKind::user_defined1())?;
    let mut usr2 = signal(SignalKind::user_defined2())?;
    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;

    let flag = shutdown.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = usr1.recv() => {}
                _ = usr2.recv() => {}
                _ = term.recv() => {
                    if flag.is_cancelled() {
                        info!("received SIGTERM again, forcing exit");
                        std::process::exit(130);
                    }
                    info!("received SIGTERM");
                    flag.cancel();
                }
                _ = int.recv() => {
                    if flag.is_cancelled() {
                        info!("received SIGINT again, forcing exit");
                        std::process::exit(130);
                    }
                    info!("received SIGINT");
                    flag.cancel();
                }
            }
        }
    });

    Ok(shutdown)
}

/// Make this process a group leader so one killpg reaches every worker and
/// generated client, and nothing outside the simulation.
pub fn become_group_leader() {
    if let Err(e) = setpgid(Pid::from_raw(0), Pid::from_raw(0)) {
        debug!("setpgid failed: {e}");
    }
}

/// Broadcast evacuate-now to the whole process group.
pub fn broadcast_evacuation() -> anyhow::Result<()> {
    killpg(getpgrp(), Signal::SIGUSR2)?;
    Ok(())
}

/// Ask one worker to finish its current message and exit.
pub fn request_finish(pid: u32) -> anyhow::Result<()> {
    kill(Pid::from_raw(pid as i32), Signal::SIGUSR1)?;
    Ok(())
}
