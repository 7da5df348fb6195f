// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Payment station: takes payment requests in arrival order and confirms
//! each one back to the paying client by id.

use std::time::Duration;

use anyhow::Context;
use rand::Rng;
use tracing::{info, warn};

use crate::config::Config;
use crate::proto::{Msg, ServiceAction, ServiceDone, CLASS_REQUEST, SENTINEL_ID};
use crate::signals::WorkerSignals;
use crate::substrate::channel::ChannelClient;
use crate::substrate::state::StateClient;
use crate::substrate::wire::ClassFilter;
use crate::substrate::Paths;

pub async fn run(config: &Config) -> anyhow::Result<()> {
    let signals = WorkerSignals::install()?;
    let stop = signals.stop();
    let paths = Paths::new(&config.dir);

    let mut cashier = ChannelClient::connect(&paths.cashier())
        .await
        .context("substrate attach failed (cashier channel)")?;
    let mut registration = ChannelClient::connect(&paths.registration())
        .await
        .context("substrate attach failed (registration channel)")?;
    let mut state =
        StateClient::connect(&paths.state()).await.context("substrate attach failed (state)")?;

    info!("cashier started");

    loop {
        let received = cashier.recv_cancellable(ClassFilter::Exact(CLASS_REQUEST), &stop).await?;
        let Some((_, msg)) = received else {
            info!("cashier stopping on signal");
            break;
        };
        let Msg::CashierRequest(request) = msg else {
            warn!("cashier received unexpected message kind");
            continue;
        };
        if request.client_id == SENTINEL_ID {
            info!("cashier received shutdown sentinel");
            break;
        }

        info!(client = request.client_id, "client pays at the cashier");
        payment_delay(state.snapshot().await?.time_mul).await;

        let paid = Msg::ServiceDone(ServiceDone {
            client_id: request.client_id,
            department: request.department,
            action: ServiceAction::Complete,
        });
        let delivered = if stop.is_cancelled() {
            cashier_reply_nonblocking(&mut registration, request.client_id, paid).await?
        } else {
            registration.send_cancellable(request.client_id, paid, &stop).await?
        };
        if delivered {
            info!(client = request.client_id, "payment confirmed");
        } else {
            warn!(client = request.client_id, "dropped payment confirmation during shutdown");
        }

        if stop.is_cancelled() {
            info!("cashier finishing after current payment");
            break;
        }
    }

    info!("cashier stopped");
    Ok(())
}

async fn cashier_reply_nonblocking(
    registration: &mut ChannelClient,
    client_id: u32,
    msg: Msg,
) -> anyhow::Result<bool> {
    registration.try_send(client_id, msg).await
}

/// Uniform 5-30 simulated minutes, scaled to real time.
async fn payment_delay(time_mul: u32) {
    let minutes = u64::from(rand::rng().random_range(5u32..=30));
    let ms = (minutes * 60_000 / u64::from(time_mul.max(1))).max(1);
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[cfg(test)]
#[path = "cashier_tests.rs"]
mod tests;
