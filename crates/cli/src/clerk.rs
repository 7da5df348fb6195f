// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Department clerk: serves one ticket at a time with strict VIP precedence,
//! optionally redirects general-admissions cases to another department, and
//! may park a session on a cashier detour before completing it.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::proto::{
    Dept, Msg, OfficeStatus, ServiceAction, ServiceDone, TicketIssued, CLASS_CASHIER_RETURN,
    CLASS_NORMAL,
};
use crate::report;
use crate::signals::WorkerSignals;
use crate::substrate::channel::ChannelClient;
use crate::substrate::sem::SemClient;
use crate::substrate::state::{StateClient, StateOp};
use crate::substrate::wire::ClassFilter;
use crate::substrate::Paths;

/// Chance (percent) that a general-admissions case is redirected.
const REDIRECT_CHANCE: u32 = 40;
/// Chance (percent) that a served case is sent to the cashier first.
const PAYMENT_CHANCE: u32 = 25;
/// Simulated minutes a parked cashier detour survives the finish signal
/// before the clerk gives the client up for gone. Twice the longest
/// payment delay.
const RETURN_GRACE_MINUTES: u64 = 60;

pub async fn run(config: &Config, dept: Dept) -> anyhow::Result<()> {
    let signals = WorkerSignals::install()?;
    let stop = signals.stop();
    let paths = Paths::new(&config.dir);

    let mut own = ChannelClient::connect(&paths.department(dept))
        .await
        .context("substrate attach failed (department channel)")?;
    let mut registration = ChannelClient::connect(&paths.registration())
        .await
        .context("substrate attach failed (registration channel)")?;
    let mut sems =
        SemClient::connect(&paths.semaphores()).await.context("substrate attach failed (semaphores)")?;
    let mut state =
        StateClient::connect(&paths.state()).await.context("substrate attach failed (state)")?;
    let mut targets: HashMap<Dept, ChannelClient> = HashMap::new();

    info!(dept = %dept, "clerk started");

    loop {
        let received = own.recv_cancellable(ClassFilter::AtMost(CLASS_NORMAL), &stop).await?;
        let Some((class, msg)) = received else {
            drain(&mut own, &mut state, &paths, dept).await?;
            break;
        };
        let Msg::TicketIssued(ticket) = msg else {
            warn!(dept = %dept, "clerk received unexpected message kind");
            continue;
        };
        if ticket.client_id == crate::proto::SENTINEL_ID {
            info!(dept = %dept, "clerk received shutdown sentinel");
            break;
        }

        info!(
            dept = %dept,
            client = ticket.client_id,
            ticket = ticket.ticket_number,
            vip = ticket.is_vip,
            "serving client"
        );

        let snapshot = state.snapshot().await?;
        service_delay(snapshot.time_mul).await;

        // Re-read: the office may have closed during the delay.
        let snapshot = state.snapshot().await?;
        if dept == Dept::SA
            && snapshot.status == OfficeStatus::Open
            && rand::rng().random_range(1..=100) <= REDIRECT_CHANCE
        {
            let redirected =
                redirect(&mut sems, &mut state, &mut targets, &paths, &stop, &ticket, class)
                    .await?;
            if !redirected {
                // Target was full: the petitioner is already reported
                // unserved; close the session so the client is not left
                // waiting forever.
                respond(&mut registration, &stop, ticket.client_id, dept, ServiceAction::Complete)
                    .await?;
            }
            if stop.is_cancelled() {
                drain(&mut own, &mut state, &paths, dept).await?;
                break;
            }
            continue;
        }

        let action = if rand::rng().random_range(1..=100) <= PAYMENT_CHANCE {
            ServiceAction::GoToCashier
        } else {
            ServiceAction::Complete
        };

        respond(&mut registration, &stop, ticket.client_id, dept, action).await?;

        if action == ServiceAction::GoToCashier {
            let returned = await_cashier_return(
                &mut own,
                &stop,
                &signals.evacuate,
                ticket.client_id,
                snapshot.time_mul,
            )
            .await?;
            if returned {
                let snapshot = state.snapshot().await?;
                service_delay(snapshot.time_mul).await;
                respond(&mut registration, &stop, ticket.client_id, dept, ServiceAction::Complete)
                    .await?;
                info!(dept = %dept, client = ticket.client_id, "service complete after payment");
            } else if !signals.evacuate.is_cancelled() {
                // Grace expired during teardown; close the session in case
                // the client is still alive and waiting.
                respond(&mut registration, &stop, ticket.client_id, dept, ServiceAction::Complete)
                    .await?;
            }
        } else {
            info!(dept = %dept, client = ticket.client_id, "service complete");
        }

        if stop.is_cancelled() {
            drain(&mut own, &mut state, &paths, dept).await?;
            break;
        }
    }

    info!(dept = %dept, "clerk stopped");
    Ok(())
}

/// Uniform 5-30 simulated minutes, scaled to real time.
async fn service_delay(time_mul: u32) {
    let minutes = u64::from(rand::rng().random_range(5u32..=30));
    let ms = (minutes * 60_000 / u64::from(time_mul.max(1))).max(1);
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Forward a general-admissions ticket to a random target department,
/// allocating a fresh ticket number against the target quota. Returns true
/// when the session moved to the target; false leaves the session with SA
/// (target quota exhausted — the unserved case is already reported).
async fn redirect(
    sems: &mut SemClient,
    state: &mut StateClient,
    targets: &mut HashMap<Dept, ChannelClient>,
    paths: &Paths,
    stop: &CancellationToken,
    ticket: &TicketIssued,
    class: u32,
) -> anyhow::Result<bool> {
    let target = Dept::REDIRECT_TARGETS[rand::rng().random_range(0..Dept::REDIRECT_TARGETS.len())];

    sems.lock_state().await?;
    let snapshot = state.snapshot().await?;
    let count = snapshot.ticket_counters[target.index()];
    let quota = snapshot.ticket_quotas[target.index()];
    let number = if quota == 0 || count >= quota {
        None
    } else {
        state.apply(vec![StateOp::TicketSet { dept: target, count: count + 1 }]).await?;
        Some(count + 1)
    };
    sems.unlock_state().await?;

    let Some(number) = number else {
        report::unserved_after_signal(
            paths.dir(),
            snapshot.day,
            ticket.client_id,
            target,
            report::ISSUER_SA,
        )?;
        info!(
            client = ticket.client_id,
            target = %target,
            "redirect target quota exhausted, case unserved"
        );
        return Ok(false);
    };

    let forwarded = TicketIssued {
        client_id: ticket.client_id,
        ticket_number: number,
        department: target,
        redirected_from_sa: true,
        reject: crate::proto::RejectReason::None,
        is_vip: ticket.is_vip,
    };
    let channel = match targets.entry(target) {
        std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
        std::collections::hash_map::Entry::Vacant(entry) => {
            entry.insert(ChannelClient::connect(&paths.department(target)).await?)
        }
    };
    let msg = Msg::TicketIssued(forwarded);
    let delivered = if stop.is_cancelled() {
        channel.try_send(class, msg).await?
    } else {
        channel.send_cancellable(class, msg, stop).await?
    };
    if !delivered {
        warn!(client = ticket.client_id, target = %target, "dropped redirect during shutdown");
        return Ok(false);
    }
    info!(client = ticket.client_id, target = %target, ticket = number, "redirected client");
    Ok(true)
}

/// Park until the paying client comes back on the return class. Two clerks
/// of the same department can both be parked here, so a return addressed to
/// the other session goes back on the queue. Evacuation aborts right away.
/// The finish signal keeps the session parked — the client is expected to
/// return — but only for a bounded grace window, so a client that died at
/// the cashier cannot wedge the daily teardown.
async fn await_cashier_return(
    own: &mut ChannelClient,
    stop: &CancellationToken,
    evacuate: &CancellationToken,
    client_id: u32,
    time_mul: u32,
) -> anyhow::Result<bool> {
    let abort = CancellationToken::new();
    let watcher = tokio::spawn({
        let abort = abort.clone();
        let stop = stop.clone();
        let evacuate = evacuate.clone();
        let grace = Duration::from_millis(
            (RETURN_GRACE_MINUTES * 60_000 / u64::from(time_mul.max(1))).max(1),
        );
        async move {
            tokio::select! {
                _ = evacuate.cancelled() => {}
                () = async {
                    stop.cancelled().await;
                    tokio::time::sleep(grace).await;
                } => {}
            }
            abort.cancel();
        }
    });

    let outcome = park_for_return(own, &abort, evacuate, client_id).await;
    watcher.abort();
    outcome
}

async fn park_for_return(
    own: &mut ChannelClient,
    abort: &CancellationToken,
    evacuate: &CancellationToken,
    client_id: u32,
) -> anyhow::Result<bool> {
    loop {
        let received =
            own.recv_cancellable(ClassFilter::Exact(CLASS_CASHIER_RETURN), abort).await?;
        let Some((class, msg)) = received else {
            if evacuate.is_cancelled() {
                info!(client = client_id, "evacuation while waiting for cashier return");
            } else {
                warn!(client = client_id, "cashier return never arrived after finish signal");
            }
            return Ok(false);
        };
        if msg.client_id() == client_id {
            return Ok(true);
        }
        if !own.try_send(class, msg).await? {
            warn!(client = client_id, "dropped foreign cashier return (queue full)");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Send the service outcome to the client by id on the registration channel.
async fn respond(
    registration: &mut ChannelClient,
    stop: &CancellationToken,
    client_id: u32,
    department: Dept,
    action: ServiceAction,
) -> anyhow::Result<()> {
    let msg = Msg::ServiceDone(ServiceDone { client_id, department, action });
    let delivered = if stop.is_cancelled() {
        registration.try_send(client_id, msg).await?
    } else {
        registration.send_cancellable(client_id, msg, stop).await?
    };
    if !delivered {
        warn!(client = client_id, "dropped service response during shutdown");
    }
    Ok(())
}

/// Drain leftover tickets after the finish signal and report each as
/// unserved; with nothing pending, write one synthetic marker attributing
/// the unserved slot to the supervisor.
async fn drain(
    own: &mut ChannelClient,
    state: &mut StateClient,
    paths: &Paths,
    dept: Dept,
) -> anyhow::Result<()> {
    let day = state.snapshot().await?.day;
    let mut drained = 0u32;
    while let Some((_, msg)) = own.try_recv(ClassFilter::AtMost(CLASS_NORMAL)).await? {
        let Msg::TicketIssued(ticket) = msg else {
            continue;
        };
        if ticket.client_id == crate::proto::SENTINEL_ID {
            continue;
        }
        let issuer =
            if ticket.redirected_from_sa { report::ISSUER_SA } else { report::ISSUER_REJESTRACJA };
        report::unserved_after_signal(paths.dir(), day, ticket.client_id, ticket.department, issuer)?;
        drained += 1;
    }
    if drained == 0 {
        report::unserved_after_signal(
            paths.dir(),
            day,
            crate::proto::SENTINEL_ID,
            dept,
            report::ISSUER_DYREKTOR,
        )?;
    }
    info!(dept = %dept, drained, "clerk drained channel after finish signal");
    Ok(())
}

#[cfg(test)]
#[path = "clerk_tests.rs"]
mod tests;
