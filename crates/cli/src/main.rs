// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use urzad::config::{Config, Role};

#[tokio::main]
async fn main() {
    let config = Config::parse();

    let role = match config.validate().and_then(|()| config.role_enum()) {
        Ok(role) => role,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    urzad::logger::init_tracing(&config);

    let result = match role {
        Role::Supervisor => urzad::supervisor::run(&config).await,
        Role::Registration => urzad::registration::run(&config).await,
        Role::Clerk => match config.dept_enum() {
            Ok(dept) => urzad::clerk::run(&config, dept).await,
            Err(e) => Err(e),
        },
        Role::Client => urzad::client::run(&config).await,
        Role::Cashier => urzad::cashier::run(&config).await,
        Role::Generator => urzad::generator::run(&config).await,
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!("fatal: {e:#}");
            std::process::exit(1);
        }
    }
}
