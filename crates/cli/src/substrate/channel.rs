// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed priority channel: per-class FIFO sub-queues with a consumer policy
//! that picks the lowest class admitted by the receive filter. Class 1/2 on a
//! department channel gives VIPs strict precedence; class = client id on the
//! registration channel gives content-addressed rendezvous.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::proto::Msg;
use crate::substrate::wire::{ClassFilter, Conn, Reply, Request};

/// Total messages a channel holds across all classes before senders block.
pub const CHANNEL_CAPACITY: usize = 128;

#[derive(Default)]
struct Queues {
    classes: BTreeMap<u32, VecDeque<Msg>>,
    len: usize,
}

impl Queues {
    fn pop(&mut self, filter: ClassFilter) -> Option<(u32, Msg)> {
        let class = match filter {
            ClassFilter::Exact(c) => {
                if self.classes.get(&c).is_some_and(|q| !q.is_empty()) {
                    Some(c)
                } else {
                    None
                }
            }
            ClassFilter::AtMost(max) => self
                .classes
                .range(..=max)
                .find(|(_, q)| !q.is_empty())
                .map(|(class, _)| *class),
        }?;
        let msg = self.classes.get_mut(&class)?.pop_front()?;
        self.len -= 1;
        Some((class, msg))
    }
}

/// Server-side channel state. Shared between the socket server and the
/// supervisor, which sends sentinels and drains leftovers in-process.
pub struct ChannelCore {
    name: String,
    inner: Mutex<Queues>,
    readable: Notify,
    writable: Notify,
    capacity: usize,
}

impl ChannelCore {
    pub fn new(name: impl Into<String>) -> ChannelCore {
        ChannelCore {
            name: name.into(),
            inner: Mutex::new(Queues::default()),
            readable: Notify::new(),
            writable: Notify::new(),
            capacity: CHANNEL_CAPACITY,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, Queues> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn try_send_inner(&self, class: u32, msg: Msg) -> Result<(), Msg> {
        let mut queues = self.lock();
        if queues.len >= self.capacity {
            return Err(msg);
        }
        queues.classes.entry(class).or_default().push_back(msg);
        queues.len += 1;
        drop(queues);
        self.readable.notify_waiters();
        Ok(())
    }

    /// Non-blocking send. Returns false (message dropped) when full.
    pub fn try_send(&self, class: u32, msg: Msg) -> bool {
        self.try_send_inner(class, msg).is_ok()
    }

    /// Blocking send; parks until a slot frees up.
    pub async fn send(&self, class: u32, msg: Msg) {
        let mut msg = msg;
        loop {
            let notified = self.writable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            match self.try_send_inner(class, msg) {
                Ok(()) => return,
                Err(back) => msg = back,
            }
            notified.await;
        }
    }

    /// Re-queue a message at the front of its class after a failed delivery,
    /// so it stays visible to the end-of-day drain.
    pub fn push_front(&self, class: u32, msg: Msg) {
        let mut queues = self.lock();
        queues.classes.entry(class).or_default().push_front(msg);
        queues.len += 1;
        drop(queues);
        self.readable.notify_waiters();
    }

    /// Non-blocking receive of the lowest admitted class.
    pub fn try_recv(&self, filter: ClassFilter) -> Option<(u32, Msg)> {
        let popped = self.lock().pop(filter);
        if popped.is_some() {
            self.writable.notify_waiters();
        }
        popped
    }

    /// Blocking receive of the lowest admitted class.
    pub async fn recv(&self, filter: ClassFilter) -> (u32, Msg) {
        loop {
            let notified = self.readable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(found) = self.try_recv(filter) {
                return found;
            }
            notified.await;
        }
    }

    /// Queued message count across all classes.
    pub fn len(&self) -> usize {
        self.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Client handle over one channel socket.
pub struct ChannelClient {
    conn: Conn,
}

impl ChannelClient {
    pub async fn connect(path: &Path) -> anyhow::Result<ChannelClient> {
        Ok(ChannelClient { conn: Conn::connect(path).await? })
    }

    /// Blocking send.
    pub async fn send(&mut self, class: u32, msg: Msg) -> anyhow::Result<()> {
        match self.conn.request(|seq| Request::Send { seq, class, msg, wait: true }).await? {
            Reply::Sent { .. } => Ok(()),
            other => anyhow::bail!("unexpected send reply: {other:?}"),
        }
    }

    /// Blocking send that aborts on `cancel`. Returns false if canceled
    /// before the message was queued.
    pub async fn send_cancellable(
        &mut self,
        class: u32,
        msg: Msg,
        cancel: &CancellationToken,
    ) -> anyhow::Result<bool> {
        let reply = self
            .conn
            .request_cancellable(cancel, |seq| Request::Send { seq, class, msg, wait: true })
            .await?;
        match reply {
            Reply::Sent { .. } => Ok(true),
            Reply::Canceled { .. } => Ok(false),
            other => anyhow::bail!("unexpected send reply: {other:?}"),
        }
    }

    /// Non-blocking send. Returns false (message dropped) when full.
    pub async fn try_send(&mut self, class: u32, msg: Msg) -> anyhow::Result<bool> {
        match self.conn.request(|seq| Request::Send { seq, class, msg, wait: false }).await? {
            Reply::Sent { .. } => Ok(true),
            Reply::Full { .. } => Ok(false),
            other => anyhow::bail!("unexpected send reply: {other:?}"),
        }
    }

    /// Blocking receive.
    pub async fn recv(&mut self, filter: ClassFilter) -> anyhow::Result<(u32, Msg)> {
        match self.conn.request(|seq| Request::Recv { seq, filter, wait: true }).await? {
            Reply::Msg { class, msg, .. } => Ok((class, msg)),
            other => anyhow::bail!("unexpected recv reply: {other:?}"),
        }
    }

    /// Blocking receive that aborts on `cancel`. A message that won the race
    /// against the cancel is still returned and must be handled.
    pub async fn recv_cancellable(
        &mut self,
        filter: ClassFilter,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Option<(u32, Msg)>> {
        let reply = self
            .conn
            .request_cancellable(cancel, |seq| Request::Recv { seq, filter, wait: true })
            .await?;
        match reply {
            Reply::Msg { class, msg, .. } => Ok(Some((class, msg))),
            Reply::Canceled { .. } => Ok(None),
            other => anyhow::bail!("unexpected recv reply: {other:?}"),
        }
    }

    /// Non-blocking receive.
    pub async fn try_recv(&mut self, filter: ClassFilter) -> anyhow::Result<Option<(u32, Msg)>> {
        match self.conn.request(|seq| Request::Recv { seq, filter, wait: false }).await? {
            Reply::Msg { class, msg, .. } => Ok(Some((class, msg))),
            Reply::Empty { .. } => Ok(None),
            other => anyhow::bail!("unexpected recv reply: {other:?}"),
        }
    }
}

#[cfg(test)]
#[path = "channel_tests.rs"]
mod tests;
