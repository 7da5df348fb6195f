// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use yare::parameterized;

use super::{Config, Role};
use crate::proto::Dept;

fn parse(args: &[&str]) -> Config {
    Config::parse_from(args)
}

#[test]
fn supervisor_defaults_validate() -> anyhow::Result<()> {
    let config = parse(&["urzad", "--role", "supervisor"]);
    config.validate()?;
    assert_eq!(config.role_enum()?, Role::Supervisor);
    assert_eq!(config.tp, 8);
    assert_eq!(config.tk, 16);
    assert_eq!(config.quotas(), [10; 5]);
    Ok(())
}

#[parameterized(
    supervisor = { "supervisor", Role::Supervisor },
    dyrektor = { "dyrektor", Role::Supervisor },
    client = { "client", Role::Client },
    petent = { "petent", Role::Client },
    registration = { "rejestracja", Role::Registration },
    clerk = { "CLERK", Role::Clerk },
    generator = { "generator", Role::Generator },
    cashier = { "kasa", Role::Cashier },
)]
fn role_aliases_parse(role: &str, expected: Role) -> anyhow::Result<()> {
    let config = parse(&["urzad", "--role", role, "--dept", "SC"]);
    assert_eq!(config.role_enum()?, expected);
    Ok(())
}

#[test]
fn unknown_role_is_rejected() {
    let config = parse(&["urzad", "--role", "janitor"]);
    assert!(config.validate().is_err());
}

#[test]
fn opening_must_precede_closing() {
    let config = parse(&["urzad", "--role", "supervisor", "--Tp", "9", "--Tk", "9"]);
    assert!(config.validate().is_err());

    let config = parse(&["urzad", "--role", "supervisor", "--Tp", "10", "--Tk", "8"]);
    assert!(config.validate().is_err());
}

#[test]
fn hours_are_bounded() {
    let config = parse(&["urzad", "--role", "supervisor", "--Tp", "8", "--Tk", "24"]);
    assert!(config.validate().is_err());
}

#[test]
fn zero_capacity_is_rejected() {
    let config = parse(&["urzad", "--role", "supervisor", "--N", "0"]);
    assert!(config.validate().is_err());
}

#[test]
fn zero_time_mul_is_rejected() {
    let config = parse(&["urzad", "--role", "supervisor", "--time-mul", "0"]);
    assert!(config.validate().is_err());
}

#[test]
fn generator_delay_ordering_is_checked() {
    let config = parse(&[
        "urzad",
        "--role",
        "generator",
        "--gen-min-delay",
        "9",
        "--gen-max-delay",
        "3",
    ]);
    assert!(config.validate().is_err());
}

#[test]
fn clerk_requires_department() -> anyhow::Result<()> {
    let config = parse(&["urzad", "--role", "clerk"]);
    assert!(config.validate().is_err());

    let config = parse(&["urzad", "--role", "clerk", "--dept", "KM"]);
    config.validate()?;
    assert_eq!(config.dept_enum()?, Dept::KM);
    Ok(())
}

#[test]
fn client_department_defaults_to_sa() -> anyhow::Result<()> {
    let config = parse(&["urzad", "--role", "client"]);
    config.validate()?;
    assert_eq!(config.dept_enum()?, Dept::SA);
    assert!(!config.vip);
    assert!(!config.child);
    Ok(())
}

#[test]
fn quota_slots_follow_department_order() {
    let config = parse(&[
        "urzad", "--role", "supervisor", "--X1", "1", "--X2", "2", "--X3", "3", "--X4", "4",
        "--X5", "5",
    ]);
    assert_eq!(config.quotas(), [1, 2, 3, 4, 5]);
}

#[test]
fn invalid_department_is_rejected() {
    let config = parse(&["urzad", "--role", "client", "--dept", "ZZ"]);
    assert!(config.validate().is_err());
}
