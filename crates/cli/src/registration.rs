// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registration worker: consumes ticket requests FIFO, frees the seat the
//! client used to wait in line, and either issues a numbered ticket against
//! the department quota or rejects (office closed / limit reached).

use anyhow::Context;
use tracing::{info, warn};

use crate::config::Config;
use crate::proto::{
    Dept, Msg, OfficeStatus, RejectReason, TicketIssued, CLASS_REQUEST, SENTINEL_ID,
};
use crate::signals::WorkerSignals;
use crate::substrate::channel::ChannelClient;
use crate::substrate::sem::{SemClient, SEM_CAPACITY};
use crate::substrate::state::{StateClient, StateOp};
use crate::substrate::wire::ClassFilter;
use crate::substrate::Paths;

pub async fn run(config: &Config) -> anyhow::Result<()> {
    let signals = WorkerSignals::install()?;
    let stop = signals.stop();
    let paths = Paths::new(&config.dir);

    let mut registration = ChannelClient::connect(&paths.registration())
        .await
        .context("substrate attach failed (registration channel)")?;
    let mut sems =
        SemClient::connect(&paths.semaphores()).await.context("substrate attach failed (semaphores)")?;
    let mut state =
        StateClient::connect(&paths.state()).await.context("substrate attach failed (state)")?;

    info!("registration started");

    loop {
        let received =
            registration.recv_cancellable(ClassFilter::Exact(CLASS_REQUEST), &stop).await?;
        let Some((_, msg)) = received else {
            info!("registration stopping on signal");
            break;
        };
        let Msg::TicketRequest(request) = msg else {
            warn!("registration received unexpected message kind");
            continue;
        };
        if request.client_id == SENTINEL_ID {
            info!("registration received shutdown sentinel");
            break;
        }

        // The client stops waiting in line the moment its request is picked
        // up: give its wait seat back before anything else.
        sems.lock_state().await?;
        state.apply(vec![StateOp::QueueAdd(-1)]).await?;
        sems.unlock_state().await?;
        sems.post(SEM_CAPACITY, 1).await?;

        let snapshot = state.snapshot().await?;
        if snapshot.status == OfficeStatus::Closed {
            let rejected = TicketIssued {
                client_id: request.client_id,
                ticket_number: 0,
                department: Dept::SA,
                redirected_from_sa: false,
                reject: RejectReason::OfficeClosed,
                is_vip: request.is_vip,
            };
            respond(&mut registration, &stop, rejected).await?;
            info!(client = request.client_id, "office closed, no ticket issued");
            continue;
        }

        let department = match Dept::from_index(request.department) {
            Some(department) => department,
            None => {
                warn!(
                    client = request.client_id,
                    value = request.department,
                    "invalid department in ticket request, coercing to SA"
                );
                Dept::SA
            }
        };

        sems.lock_state().await?;
        let snapshot = state.snapshot().await?;
        let count = snapshot.ticket_counters[department.index()];
        let quota = snapshot.ticket_quotas[department.index()];
        let (reject, ticket_number) = if quota == 0 || count >= quota {
            (RejectReason::LimitReached, 0)
        } else {
            state.apply(vec![StateOp::TicketSet { dept: department, count: count + 1 }]).await?;
            (RejectReason::None, count + 1)
        };
        sems.unlock_state().await?;

        let issued = TicketIssued {
            client_id: request.client_id,
            ticket_number,
            department,
            redirected_from_sa: false,
            reject,
            is_vip: request.is_vip,
        };
        respond(&mut registration, &stop, issued).await?;

        match reject {
            RejectReason::LimitReached => {
                info!(client = request.client_id, dept = %department, "ticket limit reached");
            }
            _ => {
                info!(
                    client = request.client_id,
                    dept = %department,
                    ticket = ticket_number,
                    "issued ticket"
                );
            }
        }

        if stop.is_cancelled() {
            info!("registration finishing after current request");
            break;
        }
    }

    info!("registration stopped");
    Ok(())
}

/// Reply to a client by its id. During shutdown the send is non-blocking so
/// a full queue cannot wedge the worker; a dropped reply is logged and the
/// client unwinds via the evacuation broadcast.
async fn respond(
    registration: &mut ChannelClient,
    stop: &tokio_util::sync::CancellationToken,
    issued: TicketIssued,
) -> anyhow::Result<()> {
    let class = issued.client_id;
    let client = issued.client_id;
    let msg = Msg::TicketIssued(issued);
    if stop.is_cancelled() {
        if !registration.try_send(class, msg).await? {
            warn!(client, "dropped reply to client during shutdown (queue full)");
        }
        return Ok(());
    }
    if !registration.send_cancellable(class, msg, stop).await? {
        warn!(client, "reply to client interrupted by shutdown");
    }
    Ok(())
}

#[cfg(test)]
#[path = "registration_tests.rs"]
mod tests;
