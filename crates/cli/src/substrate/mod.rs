// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coordination substrate: the admission state, the semaphore set, and the
//! typed priority channels, hosted by the supervisor and served to worker
//! processes over per-object Unix sockets in the runtime directory.
//!
//! Each object is addressed by a one-character tag (`S` state, `M`
//! semaphores, `R` registration, `A`/`C`/`K`/`L`/`P` departments, `W`
//! cashier). Workers that fail to connect treat the substrate as absent and
//! exit with code 1.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::proto::Dept;

pub mod channel;
pub mod sem;
pub mod state;
pub mod wire;

use channel::ChannelCore;
use sem::SemCore;
use state::{AdmissionState, StateCore};
use wire::{Reply, Request};

/// Default runtime directory; overridable with `--dir` for test isolation.
pub const DEFAULT_DIR: &str = "/tmp/urzad";

const LOCK_FILE: &str = "urzad.lock";
const MAX_FRAME: usize = 64 * 1024;

/// Locations of every substrate object under one runtime directory.
#[derive(Debug, Clone)]
pub struct Paths {
    dir: PathBuf,
}

impl Paths {
    pub fn new(dir: impl Into<PathBuf>) -> Paths {
        Paths { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn lock_file(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    fn socket(&self, tag: char) -> PathBuf {
        self.dir.join(format!("{tag}.sock"))
    }

    pub fn state(&self) -> PathBuf {
        self.socket('S')
    }

    pub fn semaphores(&self) -> PathBuf {
        self.socket('M')
    }

    pub fn registration(&self) -> PathBuf {
        self.socket('R')
    }

    pub fn department(&self, dept: Dept) -> PathBuf {
        self.socket(dept.tag())
    }

    pub fn cashier(&self) -> PathBuf {
        self.socket('W')
    }

    fn all_sockets(&self) -> Vec<PathBuf> {
        let mut sockets = vec![self.state(), self.semaphores(), self.registration(), self.cashier()];
        sockets.extend(Dept::ALL.iter().map(|d| self.department(*d)));
        sockets
    }
}

/// The served object set. Held by the supervisor, which also uses the cores
/// directly (sentinels, drains, clock).
pub struct Substrate {
    pub state: Arc<StateCore>,
    pub sems: Arc<SemCore>,
    pub registration: Arc<ChannelCore>,
    pub departments: [Arc<ChannelCore>; 5],
    pub cashier: Arc<ChannelCore>,
}

impl Substrate {
    /// Create-or-replace the runtime directory, bind every object socket,
    /// and start serving. Server tasks stop when `shutdown` fires.
    pub async fn create(
        paths: &Paths,
        state: AdmissionState,
        sem_initial: [u32; 2],
        shutdown: CancellationToken,
    ) -> anyhow::Result<Substrate> {
        std::fs::create_dir_all(paths.dir())?;
        for stale in paths.all_sockets() {
            let _ = std::fs::remove_file(stale);
        }
        std::fs::write(paths.lock_file(), format!("{}\n", std::process::id()))?;

        let substrate = Substrate {
            state: Arc::new(StateCore::new(state)),
            sems: Arc::new(SemCore::new(sem_initial.to_vec())),
            registration: Arc::new(ChannelCore::new("registration")),
            departments: [
                Arc::new(ChannelCore::new("dept-SA")),
                Arc::new(ChannelCore::new("dept-SC")),
                Arc::new(ChannelCore::new("dept-KM")),
                Arc::new(ChannelCore::new("dept-ML")),
                Arc::new(ChannelCore::new("dept-PD")),
            ],
            cashier: Arc::new(ChannelCore::new("cashier")),
        };

        serve_object(paths.state(), Object::State(Arc::clone(&substrate.state)), &shutdown)?;
        serve_object(paths.semaphores(), Object::Sem(Arc::clone(&substrate.sems)), &shutdown)?;
        serve_object(
            paths.registration(),
            Object::Channel(Arc::clone(&substrate.registration)),
            &shutdown,
        )?;
        for dept in Dept::ALL {
            serve_object(
                paths.department(dept),
                Object::Channel(Arc::clone(&substrate.departments[dept.index()])),
                &shutdown,
            )?;
        }
        serve_object(paths.cashier(), Object::Channel(Arc::clone(&substrate.cashier)), &shutdown)?;

        Ok(substrate)
    }

    pub fn department(&self, dept: Dept) -> &Arc<ChannelCore> {
        &self.departments[dept.index()]
    }

    /// Remove the sockets and lock file. Log and report files stay.
    pub fn destroy(paths: &Paths) {
        for socket in paths.all_sockets() {
            let _ = std::fs::remove_file(socket);
        }
        let _ = std::fs::remove_file(paths.lock_file());
    }
}

#[derive(Clone)]
enum Object {
    Channel(Arc<ChannelCore>),
    Sem(Arc<SemCore>),
    State(Arc<StateCore>),
}

fn serve_object(
    path: PathBuf,
    object: Object,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    let listener = UnixListener::bind(&path)?;
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let object = object.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(handle_conn(stream, object, shutdown));
                    }
                    Err(e) => {
                        debug!("substrate accept error: {e}");
                    }
                }
            }
        }
    });
    Ok(())
}

type ReplySink = SplitSink<Framed<UnixStream, LinesCodec>, String>;

async fn write_replies(mut sink: ReplySink, mut replies: mpsc::Receiver<Reply>) {
    while let Some(reply) = replies.recv().await {
        let line = match serde_json::to_string(&reply) {
            Ok(line) => line,
            Err(e) => {
                warn!("substrate reply encode error: {e}");
                continue;
            }
        };
        if sink.send(line).await.is_err() {
            break;
        }
    }
}

async fn handle_conn(stream: UnixStream, object: Object, shutdown: CancellationToken) {
    let framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME));
    let (sink, mut lines) = framed.split();
    let (reply_tx, reply_rx) = mpsc::channel::<Reply>(32);
    tokio::spawn(write_replies(sink, reply_rx));

    let pending: Arc<Mutex<HashMap<u64, CancellationToken>>> = Arc::new(Mutex::new(HashMap::new()));

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next() => line,
        };
        let line = match line {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                debug!("substrate read error: {e}");
                break;
            }
            None => break,
        };
        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!("substrate request decode error: {e}");
                continue;
            }
        };
        dispatch(request, &object, &reply_tx, &pending).await;
    }

    // Peer gone: abort its parked operations so they release what they hold.
    let parked: Vec<CancellationToken> = {
        let mut map = lock_pending(&pending);
        map.drain().map(|(_, token)| token).collect()
    };
    for token in parked {
        token.cancel();
    }
}

fn lock_pending(
    pending: &Arc<Mutex<HashMap<u64, CancellationToken>>>,
) -> std::sync::MutexGuard<'_, HashMap<u64, CancellationToken>> {
    match pending.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

async fn dispatch(
    request: Request,
    object: &Object,
    reply_tx: &mpsc::Sender<Reply>,
    pending: &Arc<Mutex<HashMap<u64, CancellationToken>>>,
) {
    let seq = request.seq();
    match (request, object) {
        (Request::Cancel { seq }, _) => {
            if let Some(token) = lock_pending(pending).remove(&seq) {
                token.cancel();
            }
        }
        (Request::Send { seq, class, msg, wait: false }, Object::Channel(core)) => {
            let reply = if core.try_send(class, msg) {
                Reply::Sent { seq }
            } else {
                Reply::Full { seq }
            };
            let _ = reply_tx.send(reply).await;
        }
        (Request::Send { seq, class, msg, wait: true }, Object::Channel(core)) => {
            let token = register(pending, seq);
            let core = Arc::clone(core);
            let tx = reply_tx.clone();
            let pending = Arc::clone(pending);
            tokio::spawn(async move {
                let reply = tokio::select! {
                    biased;
                    () = core.send(class, msg) => Reply::Sent { seq },
                    _ = token.cancelled() => Reply::Canceled { seq },
                };
                lock_pending(&pending).remove(&seq);
                let _ = tx.send(reply).await;
            });
        }
        (Request::Recv { seq, filter, wait: false }, Object::Channel(core)) => {
            let reply = match core.try_recv(filter) {
                Some((class, msg)) => Reply::Msg { seq, class, msg },
                None => Reply::Empty { seq },
            };
            let _ = reply_tx.send(reply).await;
        }
        (Request::Recv { seq, filter, wait: true }, Object::Channel(core)) => {
            let token = register(pending, seq);
            let core = Arc::clone(core);
            let tx = reply_tx.clone();
            let pending = Arc::clone(pending);
            tokio::spawn(async move {
                let reply = tokio::select! {
                    biased;
                    (class, msg) = core.recv(filter) => Reply::Msg { seq, class, msg },
                    _ = token.cancelled() => Reply::Canceled { seq },
                };
                lock_pending(&pending).remove(&seq);
                if let Err(undelivered) = tx.send(reply).await {
                    // Keep the message visible to the end-of-day drain.
                    if let Reply::Msg { class, msg, .. } = undelivered.0 {
                        core.push_front(class, msg);
                    }
                }
            });
        }
        (Request::SemWait { seq, idx, n }, Object::Sem(core)) => {
            let token = register(pending, seq);
            let core = Arc::clone(core);
            let tx = reply_tx.clone();
            let pending = Arc::clone(pending);
            tokio::spawn(async move {
                let reply = tokio::select! {
                    biased;
                    () = core.wait(idx, n) => Reply::Ok { seq },
                    _ = token.cancelled() => Reply::Canceled { seq },
                };
                lock_pending(&pending).remove(&seq);
                let acquired = matches!(reply, Reply::Ok { .. });
                if tx.send(reply).await.is_err() && acquired {
                    // Peer vanished after the grant; return the units.
                    core.post(idx, n);
                }
            });
        }
        (Request::SemPost { seq, idx, n }, Object::Sem(core)) => {
            core.post(idx, n);
            let _ = reply_tx.send(Reply::Ok { seq }).await;
        }
        (Request::Snapshot { seq }, Object::State(core)) => {
            let _ = reply_tx.send(Reply::State { seq, state: core.snapshot() }).await;
        }
        (Request::Apply { seq, ops }, Object::State(core)) => {
            core.apply(&ops);
            let _ = reply_tx.send(Reply::Ok { seq }).await;
        }
        (request, _) => {
            warn!("request {request:?} sent to wrong substrate object");
            let reply =
                Reply::Error { seq, message: "operation not supported by this object".to_owned() };
            let _ = reply_tx.send(reply).await;
        }
    }
}

fn register(pending: &Arc<Mutex<HashMap<u64, CancellationToken>>>, seq: u64) -> CancellationToken {
    let token = CancellationToken::new();
    lock_pending(pending).insert(seq, token.clone());
    token
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
