// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Visitor process: acquires building seats, requests a ticket, queues at
//! the assigned department, optionally detours via the cashier, and unwinds
//! cleanly on rejection or evacuation. A client bringing a child takes two
//! seats atomically and runs a companion task that leaves when it does.

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::proto::{
    CashierRequest, CashierReturn, Dept, Msg, OfficeStatus, RejectReason, ServiceAction,
    TicketRequest, CLASS_CASHIER_RETURN, CLASS_NORMAL, CLASS_REQUEST, CLASS_VIP,
};
use crate::signals::WorkerSignals;
use crate::substrate::channel::ChannelClient;
use crate::substrate::sem::{SemClient, SEM_CAPACITY};
use crate::substrate::state::{StateClient, StateOp};
use crate::substrate::wire::ClassFilter;
use crate::substrate::Paths;

pub async fn run(config: &Config) -> anyhow::Result<()> {
    let signals = WorkerSignals::install()?;
    let evacuate = signals.evacuate.clone();
    let paths = Paths::new(&config.dir);
    let client_id = std::process::id();
    let department = config.dept_enum()?;

    let mut registration = ChannelClient::connect(&paths.registration())
        .await
        .context("substrate attach failed (registration channel)")?;
    let mut sems =
        SemClient::connect(&paths.semaphores()).await.context("substrate attach failed (semaphores)")?;
    let mut state =
        StateClient::connect(&paths.state()).await.context("substrate attach failed (state)")?;

    if evacuate.is_cancelled() {
        info!(client = client_id, "evacuation - client leaves the building");
        return Ok(());
    }
    if state.snapshot().await?.status == OfficeStatus::Closed {
        info!(client = client_id, "office closed - client leaves");
        return Ok(());
    }

    let seats: u32 = if config.child { 2 } else { 1 };
    info!(
        client = client_id,
        dept = %department,
        vip = config.vip,
        child = config.child,
        "client arrives"
    );

    // Both seats in one acquire; a parent never enters half-admitted.
    if !sems.wait_cancellable(SEM_CAPACITY, seats, &evacuate).await? {
        info!(client = client_id, "evacuation - client leaves before entering");
        return Ok(());
    }
    sems.lock_state().await?;
    state.apply(vec![StateOp::QueueAdd(i64::from(seats))]).await?;
    sems.unlock_state().await?;

    let companion = if config.child { Some(Companion::spawn(client_id, evacuate.clone())) } else { None };

    let request = Msg::TicketRequest(TicketRequest {
        client_id,
        department: department.index() as u32,
        is_vip: config.vip,
        has_child: config.child,
    });
    if !registration.send_cancellable(CLASS_REQUEST, request, &evacuate).await? {
        // Never reached registration, so all seats are still ours to free.
        leave(&mut sems, &mut state, seats).await?;
        finish_companion(companion).await;
        info!(client = client_id, "evacuation - client leaves the building");
        return Ok(());
    }
    info!(client = client_id, "client requests a ticket at registration");

    // Registration freed the wait seat when it consumed the request; from
    // here the client owns seats - 1.
    let held = seats - 1;

    let issued = loop {
        let Some((_, msg)) =
            registration.recv_cancellable(ClassFilter::Exact(client_id), &evacuate).await?
        else {
            leave(&mut sems, &mut state, held).await?;
            finish_companion(companion).await;
            info!(client = client_id, "evacuation - client leaves the building");
            return Ok(());
        };
        if let Msg::TicketIssued(issued) = msg {
            break issued;
        }
    };

    match issued.reject {
        RejectReason::OfficeClosed => {
            info!(client = client_id, "office closed - no ticket issued");
            leave(&mut sems, &mut state, held).await?;
            finish_companion(companion).await;
            return Ok(());
        }
        RejectReason::LimitReached => {
            info!(client = client_id, dept = %issued.department, "no slots left - no ticket issued");
            leave(&mut sems, &mut state, held).await?;
            finish_companion(companion).await;
            return Ok(());
        }
        RejectReason::None => {}
    }
    info!(
        client = client_id,
        ticket = issued.ticket_number,
        dept = %issued.department,
        "ticket received"
    );

    let mut dept_channel = ChannelClient::connect(&paths.department(issued.department))
        .await
        .context("substrate attach failed (department channel)")?;
    let class = if issued.is_vip { CLASS_VIP } else { CLASS_NORMAL };
    let served_dept = issued.department;
    if !dept_channel.send_cancellable(class, Msg::TicketIssued(issued), &evacuate).await? {
        leave(&mut sems, &mut state, held).await?;
        finish_companion(companion).await;
        info!(client = client_id, "evacuation - client leaves the building");
        return Ok(());
    }
    info!(client = client_id, dept = %served_dept, "client queues at the department");

    let mut cashier: Option<ChannelClient> = None;
    let mut return_channel: Option<(Dept, ChannelClient)> = None;
    loop {
        let Some((_, msg)) =
            registration.recv_cancellable(ClassFilter::Exact(client_id), &evacuate).await?
        else {
            leave(&mut sems, &mut state, held).await?;
            finish_companion(companion).await;
            info!(client = client_id, "evacuation - client leaves the building");
            return Ok(());
        };
        let Msg::ServiceDone(done) = msg else {
            continue;
        };
        match done.action {
            ServiceAction::Complete => break,
            ServiceAction::GoToCashier => {
                info!(client = client_id, "client goes to the cashier");
                if cashier.is_none() {
                    cashier = Some(
                        ChannelClient::connect(&paths.cashier())
                            .await
                            .context("substrate attach failed (cashier channel)")?,
                    );
                }
                let Some(ref mut cashier_channel) = cashier else {
                    continue;
                };

                let pay = Msg::CashierRequest(CashierRequest {
                    client_id,
                    department: done.department,
                });
                if !cashier_channel.send_cancellable(CLASS_REQUEST, pay, &evacuate).await? {
                    leave(&mut sems, &mut state, held).await?;
                    finish_companion(companion).await;
                    info!(client = client_id, "evacuation - client leaves the building");
                    return Ok(());
                }

                // Paid confirmation comes back addressed like any response.
                let Some(_) = registration
                    .recv_cancellable(ClassFilter::Exact(client_id), &evacuate)
                    .await?
                else {
                    leave(&mut sems, &mut state, held).await?;
                    finish_companion(companion).await;
                    info!(client = client_id, "evacuation - client leaves the building");
                    return Ok(());
                };

                // The serving clerk parks on the channel of the department
                // that demanded payment, which after a redirect is not the
                // ticket's original department.
                let back = Msg::CashierReturn(CashierReturn {
                    client_id,
                    department: done.department,
                });
                let return_via = if done.department == served_dept {
                    &mut dept_channel
                } else {
                    if return_channel.as_ref().map(|(dept, _)| *dept) != Some(done.department) {
                        let connected = ChannelClient::connect(&paths.department(done.department))
                            .await
                            .context("substrate attach failed (department channel)")?;
                        return_channel = Some((done.department, connected));
                    }
                    let Some((_, ref mut channel)) = return_channel else {
                        continue;
                    };
                    channel
                };
                if !return_via.send_cancellable(CLASS_CASHIER_RETURN, back, &evacuate).await? {
                    leave(&mut sems, &mut state, held).await?;
                    finish_companion(companion).await;
                    info!(client = client_id, "evacuation - client leaves the building");
                    return Ok(());
                }
                info!(client = client_id, "payment complete, client returns to the clerk");
            }
        }
    }

    info!(client = client_id, "service complete, client leaves");
    leave(&mut sems, &mut state, held).await?;
    finish_companion(companion).await;
    Ok(())
}

/// Release `seats` seats and queue slots on the way out.
async fn leave(sems: &mut SemClient, state: &mut StateClient, seats: u32) -> anyhow::Result<()> {
    if seats == 0 {
        return Ok(());
    }
    sems.lock_state().await?;
    state.apply(vec![StateOp::QueueAdd(-i64::from(seats))]).await?;
    sems.unlock_state().await?;
    sems.post(SEM_CAPACITY, seats).await?;
    Ok(())
}

/// Companion task for a client that brought a child: enters with the parent
/// and wakes when the visit ends or the building evacuates.
struct Companion {
    done: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl Companion {
    fn spawn(parent: u32, evacuate: CancellationToken) -> Companion {
        let done = CancellationToken::new();
        let flag = done.clone();
        let task = tokio::spawn(async move {
            info!(parent, "child enters the office with parent");
            tokio::select! {
                _ = flag.cancelled() => info!(parent, "child leaves the office with parent"),
                _ = evacuate.cancelled() => info!(parent, "child evacuates with parent"),
            }
        });
        Companion { done, task }
    }
}

async fn finish_companion(companion: Option<Companion>) {
    if let Some(companion) = companion {
        companion.done.cancel();
        let _ = companion.task.await;
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
