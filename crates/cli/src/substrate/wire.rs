// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Framed request/reply protocol spoken on every substrate socket.
//!
//! One JSON object per line. Requests carry a client-chosen `seq` and the
//! terminal reply echoes it. `Cancel` aborts a pending blocking operation;
//! if the operation already completed, the original reply is delivered
//! instead, so cancellers keep reading until their `seq` comes back. This is
//! the cooperative analogue of an EINTR'd syscall: the interrupted wait
//! re-checks its flag and either unwinds or handles the delivered message.

use std::path::Path;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::UnixStream;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;

use crate::proto::Msg;
use crate::substrate::state::{AdmissionState, StateOp};

/// Upper bound on one wire line. Messages are small; anything beyond this is
/// a protocol error, not data.
const MAX_FRAME: usize = 64 * 1024;

/// Which classes a receive is willing to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassFilter {
    /// Exactly this class — content-addressed rendezvous (class = client id).
    Exact(u32),
    /// Lowest non-empty class up to and including this one — priority drain.
    AtMost(u32),
}

impl ClassFilter {
    pub fn admits(self, class: u32) -> bool {
        match self {
            ClassFilter::Exact(c) => class == c,
            ClassFilter::AtMost(max) => class <= max,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Request {
    Send { seq: u64, class: u32, msg: Msg, wait: bool },
    Recv { seq: u64, filter: ClassFilter, wait: bool },
    SemWait { seq: u64, idx: usize, n: u32 },
    SemPost { seq: u64, idx: usize, n: u32 },
    Snapshot { seq: u64 },
    Apply { seq: u64, ops: Vec<StateOp> },
    Cancel { seq: u64 },
}

impl Request {
    pub fn seq(&self) -> u64 {
        match self {
            Request::Send { seq, .. }
            | Request::Recv { seq, .. }
            | Request::SemWait { seq, .. }
            | Request::SemPost { seq, .. }
            | Request::Snapshot { seq }
            | Request::Apply { seq, .. }
            | Request::Cancel { seq } => *seq,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Reply {
    Sent { seq: u64 },
    Full { seq: u64 },
    Msg { seq: u64, class: u32, msg: Msg },
    Empty { seq: u64 },
    Ok { seq: u64 },
    State { seq: u64, state: AdmissionState },
    Canceled { seq: u64 },
    Error { seq: u64, message: String },
}

impl Reply {
    pub fn seq(&self) -> u64 {
        match self {
            Reply::Sent { seq }
            | Reply::Full { seq }
            | Reply::Msg { seq, .. }
            | Reply::Empty { seq }
            | Reply::Ok { seq }
            | Reply::State { seq, .. }
            | Reply::Canceled { seq }
            | Reply::Error { seq, .. } => *seq,
        }
    }
}

/// One connection to a substrate object. Each actor opens one per object it
/// talks to and issues requests sequentially.
pub struct Conn {
    framed: Framed<UnixStream, LinesCodec>,
    next_seq: u64,
}

impl Conn {
    pub async fn connect(path: &Path) -> anyhow::Result<Conn> {
        let stream = UnixStream::connect(path).await?;
        Ok(Conn {
            framed: Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME)),
            next_seq: 1,
        })
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    async fn write(&mut self, req: &Request) -> anyhow::Result<()> {
        let line = serde_json::to_string(req)?;
        self.framed.send(line).await?;
        Ok(())
    }

    async fn read(&mut self) -> anyhow::Result<Reply> {
        match self.framed.next().await {
            Some(line) => Ok(serde_json::from_str(&line?)?),
            None => anyhow::bail!("substrate connection closed"),
        }
    }

    /// Read replies until `seq` comes back, dropping stale ones.
    async fn read_for(&mut self, seq: u64) -> anyhow::Result<Reply> {
        loop {
            let reply = self.read().await?;
            if reply.seq() == seq {
                return Ok(reply);
            }
        }
    }

    /// Issue a request and wait for its terminal reply.
    pub async fn request(&mut self, build: impl FnOnce(u64) -> Request) -> anyhow::Result<Reply> {
        let seq = self.take_seq();
        let req = build(seq);
        self.write(&req).await?;
        self.read_for(seq).await
    }

    /// Like [`Conn::request`], but when `cancel` fires before the reply
    /// arrives, a `Cancel` is sent and the terminal reply (which may still be
    /// the real result if the operation won the race) is returned.
    pub async fn request_cancellable(
        &mut self,
        cancel: &CancellationToken,
        build: impl FnOnce(u64) -> Request,
    ) -> anyhow::Result<Reply> {
        let seq = self.take_seq();
        let req = build(seq);
        self.write(&req).await?;

        let mut cancel_requested = false;
        let mut cancel_sent = false;
        loop {
            if cancel_requested && !cancel_sent {
                self.write(&Request::Cancel { seq }).await?;
                cancel_sent = true;
            }
            if cancel_sent {
                let reply = self.read_for(seq).await?;
                return Ok(reply);
            }
            tokio::select! {
                biased;
                reply = self.read() => {
                    let reply = reply?;
                    if reply.seq() == seq {
                        return Ok(reply);
                    }
                }
                _ = cancel.cancelled() => {
                    cancel_requested = true;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "wire_tests.rs"]
mod tests;
