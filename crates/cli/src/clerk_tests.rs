// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use clap::Parser;
use serial_test::serial;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::proto::{RejectReason, CLASS_VIP};
use crate::report::report_path;
use crate::substrate::state::AdmissionState;
use crate::substrate::Substrate;

const DEADLINE: Duration = Duration::from_secs(30);

fn ticket(client_id: u32, redirected: bool, vip: bool) -> Msg {
    Msg::TicketIssued(TicketIssued {
        client_id,
        ticket_number: client_id % 100,
        department: Dept::SC,
        redirected_from_sa: redirected,
        reject: RejectReason::None,
        is_vip: vip,
    })
}

async fn start(
    dir: &std::path::Path,
    dept: Dept,
) -> anyhow::Result<(Substrate, CancellationToken, tokio::task::JoinHandle<anyhow::Result<()>>)> {
    let paths = Paths::new(dir);
    let shutdown = CancellationToken::new();
    let substrate = Substrate::create(
        &paths,
        AdmissionState::new(10, [10; 5], 3600),
        [9, 1],
        shutdown.clone(),
    )
    .await?;

    let dir_arg = dir.display().to_string();
    let dept_arg = dept.as_str();
    let config = Config::parse_from([
        "urzad", "--role", "clerk", "--dept", dept_arg, "--dir", dir_arg.as_str(),
    ]);
    let worker = tokio::spawn(async move { run(&config, dept).await });
    Ok((substrate, shutdown, worker))
}

/// Drive every queued session to its final Complete, answering GoToCashier
/// detours with a return message, and record which client got its first
/// response first.
async fn completion_order(substrate: &Substrate, ids: &[u32]) -> anyhow::Result<Vec<u32>> {
    let mut first_response: Vec<u32> = Vec::new();
    let mut completed: Vec<u32> = Vec::new();
    while completed.len() < ids.len() {
        for &id in ids {
            if completed.contains(&id) {
                continue;
            }
            let Some((_, msg)) =
                substrate.registration.try_recv(ClassFilter::Exact(id))
            else {
                continue;
            };
            if !first_response.contains(&id) {
                first_response.push(id);
            }
            let Msg::ServiceDone(done) = msg else {
                continue;
            };
            match done.action {
                ServiceAction::Complete => completed.push(id),
                ServiceAction::GoToCashier => {
                    let back = Msg::CashierReturn(crate::proto::CashierReturn {
                        client_id: id,
                        department: done.department,
                    });
                    assert!(substrate.department(done.department).try_send(CLASS_CASHIER_RETURN, back));
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(first_response)
}

// Ordering assertion rides on real service delays; run alone.
#[tokio::test]
#[serial]
async fn vip_is_served_before_earlier_normals() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let paths = Paths::new(dir.path());
    let shutdown = CancellationToken::new();
    let substrate = Substrate::create(
        &paths,
        AdmissionState::new(10, [10; 5], 3600),
        [9, 1],
        shutdown.clone(),
    )
    .await?;

    // Queue two normals, then a VIP, before the clerk exists at all.
    let channel = substrate.department(Dept::SC);
    assert!(channel.try_send(CLASS_NORMAL, ticket(10, false, false)));
    assert!(channel.try_send(CLASS_NORMAL, ticket(11, false, false)));
    assert!(channel.try_send(CLASS_VIP, ticket(99, false, true)));

    let dir_arg = dir.path().display().to_string();
    let config = Config::parse_from([
        "urzad", "--role", "clerk", "--dept", "SC", "--dir", dir_arg.as_str(),
    ]);
    let worker = tokio::spawn(async move { run(&config, Dept::SC).await });

    let order = timeout(DEADLINE, completion_order(&substrate, &[10, 11, 99])).await??;
    assert_eq!(order, vec![99, 10, 11]);

    assert!(channel.try_send(CLASS_VIP, Msg::clerk_sentinel(Dept::SC)));
    timeout(DEADLINE, worker).await???;
    shutdown.cancel();
    Ok(())
}

#[tokio::test]
async fn sentinel_stops_clerk_without_report() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (substrate, shutdown, worker) = start(dir.path(), Dept::ML).await?;

    assert!(substrate.department(Dept::ML).try_send(CLASS_VIP, Msg::clerk_sentinel(Dept::ML)));
    timeout(DEADLINE, worker).await???;

    assert!(!report_path(dir.path(), 0).exists());
    shutdown.cancel();
    Ok(())
}

#[tokio::test]
async fn drain_reports_each_leftover_ticket() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let paths = Paths::new(dir.path());
    let shutdown = CancellationToken::new();
    let substrate = Substrate::create(
        &paths,
        AdmissionState::new(10, [10; 5], 3600),
        [9, 1],
        shutdown.clone(),
    )
    .await?;

    let channel = substrate.department(Dept::KM);
    assert!(channel.try_send(CLASS_NORMAL, ticket(71, false, false)));
    assert!(channel.try_send(CLASS_NORMAL, ticket(72, true, false)));

    let mut own = ChannelClient::connect(&paths.department(Dept::KM)).await?;
    let mut state = crate::substrate::state::StateClient::connect(&paths.state()).await?;
    drain(&mut own, &mut state, &paths, Dept::KM).await?;

    let contents = std::fs::read_to_string(report_path(dir.path(), 0))?;
    assert!(contents.contains("71 - skierowanie do SC - wystawil REJESTRACJA"));
    assert!(contents.contains("72 - skierowanie do SC - wystawil SA"));
    assert_eq!(contents.lines().count(), 2);

    shutdown.cancel();
    Ok(())
}

#[tokio::test]
async fn parked_return_wait_gives_up_after_finish_grace() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let paths = Paths::new(dir.path());
    let shutdown = CancellationToken::new();
    let _substrate = Substrate::create(
        &paths,
        AdmissionState::new(10, [10; 5], 3600),
        [9, 1],
        shutdown.clone(),
    )
    .await?;

    let mut own = ChannelClient::connect(&paths.department(Dept::SC)).await?;
    // Finish already signaled, no return in sight: at time-mul 3600 the
    // 60-simulated-minute grace is one real second.
    let stop = CancellationToken::new();
    stop.cancel();
    let evacuate = CancellationToken::new();

    let started = std::time::Instant::now();
    let returned =
        timeout(DEADLINE, await_cashier_return(&mut own, &stop, &evacuate, 42, 3600)).await??;
    assert!(!returned);
    assert!(started.elapsed() >= Duration::from_millis(900));

    shutdown.cancel();
    Ok(())
}

#[tokio::test]
async fn queued_return_beats_the_finish_grace() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let paths = Paths::new(dir.path());
    let shutdown = CancellationToken::new();
    let substrate = Substrate::create(
        &paths,
        AdmissionState::new(10, [10; 5], 3600),
        [9, 1],
        shutdown.clone(),
    )
    .await?;

    let back = Msg::CashierReturn(crate::proto::CashierReturn {
        client_id: 42,
        department: Dept::SC,
    });
    assert!(substrate.department(Dept::SC).try_send(CLASS_CASHIER_RETURN, back));

    let mut own = ChannelClient::connect(&paths.department(Dept::SC)).await?;
    let stop = CancellationToken::new();
    stop.cancel();
    let evacuate = CancellationToken::new();

    let returned =
        timeout(DEADLINE, await_cashier_return(&mut own, &stop, &evacuate, 42, 3600)).await??;
    assert!(returned);

    shutdown.cancel();
    Ok(())
}

#[tokio::test]
async fn empty_drain_writes_synthetic_marker() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let paths = Paths::new(dir.path());
    let shutdown = CancellationToken::new();
    let _substrate = Substrate::create(
        &paths,
        AdmissionState::new(10, [10; 5], 3600),
        [9, 1],
        shutdown.clone(),
    )
    .await?;

    let mut own = ChannelClient::connect(&paths.department(Dept::PD)).await?;
    let mut state = crate::substrate::state::StateClient::connect(&paths.state()).await?;
    drain(&mut own, &mut state, &paths, Dept::PD).await?;

    let contents = std::fs::read_to_string(report_path(dir.path(), 0))?;
    assert_eq!(contents, "0 - skierowanie do PD - wystawil DYREKTOR\n");

    shutdown.cancel();
    Ok(())
}
