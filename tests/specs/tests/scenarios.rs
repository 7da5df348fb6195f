// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios that spawn the real `urzad` binary: a supervisor
//! with its full worker tree, plus standalone clients, all sharing one
//! runtime directory per test.

use std::time::Duration;

use serial_test::serial;
use urzad_specs::{log_contents, report_contents, OfficeProcess};

const OPEN_TIMEOUT: Duration = Duration::from_secs(30);
const EXIT_TIMEOUT: Duration = Duration::from_secs(60);
const DAY_TIMEOUT: Duration = Duration::from_secs(120);

// -- Happy path ---------------------------------------------------------------

// Each scenario spawns a full worker tree; run them one at a time.
#[tokio::test]
#[serial]
async fn single_client_is_ticketed_and_served() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut supervisor = OfficeProcess::supervisor(dir.path())
        .args(&["--N", "2", "--one-day"])
        .spawn()?;
    supervisor.wait_for_log("office open", OPEN_TIMEOUT).await?;

    let mut client = OfficeProcess::client(dir.path(), &["--dept", "SC"])?;
    let status = client.wait_exit(EXIT_TIMEOUT).await?;
    assert_eq!(status.code(), Some(0));

    let log = log_contents(dir.path());
    assert!(log.contains("issued ticket"), "no ticket issuance in log:\n{log}");
    assert!(log.contains("ticket=1"), "first SC ticket should be number 1:\n{log}");
    assert!(log.contains("service complete"), "service never completed:\n{log}");

    let status = supervisor.wait_exit(DAY_TIMEOUT).await?;
    assert_eq!(status.code(), Some(0));
    Ok(())
}

// -- Quota rejection ----------------------------------------------------------

#[tokio::test]
#[serial]
async fn quota_of_zero_rejects_every_request() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut supervisor = OfficeProcess::supervisor(dir.path())
        .args(&["--N", "2", "--X2", "0", "--one-day"])
        .spawn()?;
    supervisor.wait_for_log("office open", OPEN_TIMEOUT).await?;

    let mut first = OfficeProcess::client(dir.path(), &["--dept", "SC"])?;
    let status = first.wait_exit(EXIT_TIMEOUT).await?;
    assert_eq!(status.code(), Some(0));

    let mut second = OfficeProcess::client(dir.path(), &["--dept", "SC"])?;
    let status = second.wait_exit(EXIT_TIMEOUT).await?;
    assert_eq!(status.code(), Some(0));

    let log = log_contents(dir.path());
    assert!(log.contains("ticket limit reached"), "no limit rejection in log:\n{log}");
    assert!(log.contains("no slots left"), "client never saw the rejection:\n{log}");
    assert!(!log.contains("issued ticket"), "a ticket slipped through:\n{log}");

    let status = supervisor.wait_exit(DAY_TIMEOUT).await?;
    assert_eq!(status.code(), Some(0));
    Ok(())
}

// -- Day rollover -------------------------------------------------------------

#[tokio::test]
#[serial]
async fn idle_day_ends_with_synthetic_report_markers() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut supervisor = OfficeProcess::supervisor(dir.path()).arg("--one-day").spawn()?;

    let status = supervisor.wait_exit(DAY_TIMEOUT).await?;
    assert_eq!(status.code(), Some(0));

    let log = log_contents(dir.path());
    assert!(log.contains("office open"), "day never opened:\n{log}");
    assert!(log.contains("office closed"), "day never closed:\n{log}");
    assert!(log.contains("end of day"), "day never rolled over:\n{log}");

    // Six clerks exited with no pending work; each left one marker.
    let report = report_contents(dir.path(), 1)
        .ok_or_else(|| anyhow::anyhow!("day report missing"))?;
    let markers = report.lines().filter(|l| l.contains("wystawil DYREKTOR")).count();
    assert_eq!(markers, 6, "unexpected report contents:\n{report}");
    Ok(())
}

// -- Evacuation ---------------------------------------------------------------

#[tokio::test]
#[serial]
async fn interrupt_evacuates_and_removes_the_substrate() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut supervisor = OfficeProcess::supervisor(dir.path())
        .args(&[
            "--N",
            "10",
            "--gen-from-dyrektor",
            "--gen-min-delay",
            "300",
            "--gen-max-delay",
            "600",
        ])
        .spawn()?;
    supervisor.wait_for_log("office open", OPEN_TIMEOUT).await?;

    tokio::time::sleep(Duration::from_secs(1)).await;
    supervisor.interrupt()?;

    let status = supervisor.wait_exit(EXIT_TIMEOUT).await?;
    assert_eq!(status.code(), Some(0));

    let log = log_contents(dir.path());
    assert!(log.contains("supervisor stopped"), "no clean shutdown in log:\n{log}");

    // The substrate is gone; the log and any reports stay.
    assert!(!dir.path().join("urzad.lock").exists());
    assert!(!dir.path().join("R.sock").exists());
    assert!(!dir.path().join("S.sock").exists());
    Ok(())
}

// -- Substrate absent ---------------------------------------------------------

#[tokio::test]
async fn client_without_substrate_fails_fast() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut client = OfficeProcess::client(dir.path(), &["--dept", "SA"])?;
    let status = client.wait_exit(EXIT_TIMEOUT).await?;
    assert_eq!(status.code(), Some(1));
    Ok(())
}
