// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::io::Write;

use tracing_subscriber::fmt::writer::MakeWriter;

use super::*;

#[test]
fn log_path_lands_in_runtime_dir() {
    let path = log_path(Path::new("/tmp/office-test"));
    assert_eq!(path, PathBuf::from("/tmp/office-test/urzad.log"));
}

#[test]
fn writer_appends_whole_lines() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let make = LockedLogFile::new(dir.path());

    {
        let mut writer = make.make_writer();
        writer.write_all(b"first line\n")?;
    }
    {
        let mut writer = make.make_writer();
        writer.write_all(b"second ")?;
        writer.write_all(b"line\n")?;
    }

    let contents = std::fs::read_to_string(log_path(dir.path()))?;
    assert_eq!(contents, "first line\nsecond line\n");
    Ok(())
}

#[test]
fn empty_writer_creates_nothing() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let make = LockedLogFile::new(dir.path());
    drop(make.make_writer());
    assert!(!log_path(dir.path()).exists());
    Ok(())
}
