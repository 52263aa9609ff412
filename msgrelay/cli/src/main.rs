// This file is part of Gear.
//
// Copyright (C) 2024-2025 Gear Technologies Inc.
// SPDX-License-Identifier: GPL-3.0-or-later WITH Classpath-exception-2.0
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

mod params;


use crate::params::{MergeParams, Params};
use anyhow::{Context as _, Result, anyhow};
use clap::Parser;
use msgrelay_service::{Service, config::Config};
use std::{env, path::PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    #[clap(flatten)]
    params: Params,

    /// Path to the TOML config. `.msgrelay.toml` in the working directory if not set.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logger(cli.verbose)?;

    let file_params = match &cli.config {
        Some(path) => Some(
            Params::from_file(path)?
                .ok_or_else(|| anyhow!("config file {} not found", path.display()))?,
        ),
        None => Params::from_file(env::current_dir()?.join(Params::DEFAULT_FILE))?,
    };

    let params = match file_params {
        Some(file_params) => {
            tracing::info!("❗️ Using configuration file");
            cli.params.merge(file_params)
        }
        None => cli.params,
    };

    let config = params
        .into_config()
        .with_context(|| "invalid configuration")?;

    print_info(&config);

    let service = Service::new(&config)
        .await
        .with_context(|| "failed to create relay service")?;

    service
        .run(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Received SIGINT, shutting down"),
                Err(err) => {
                    tracing::error!("Failed to listen for SIGINT: {err}");
                    std::future::pending::<()>().await
                }
            }
        })
        .await
}

fn init_logger(verbose: bool) -> Result<()> {
    let filter = if env::var(EnvFilter::DEFAULT_ENV).is_ok() {
        EnvFilter::from_default_env()
    } else if verbose {
        "msgrelay=debug,info".into()
    } else {
        "msgrelay=info,info".into()
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .try_init()
        .map_err(|err| anyhow!("{err}"))
}

fn print_info(config: &Config) {
    tracing::info!("⧫  Ethereum RPC: {}", config.ethereum.rpc.head);
    for fallback in &config.ethereum.rpc.tail {
        tracing::info!("⧫  Fallback RPC: {fallback}");
    }
    tracing::info!(
        "⏱️ Poll interval: {:?}",
        config.ethereum.observer.poll_interval
    );
    tracing::info!("🧵 Max active jobs: {}", config.node.max_active_jobs);
    match &config.rpc {
        None => tracing::info!("🌐 Live feed is disabled"),
        Some(rpc) if rpc.admin => tracing::warn!("🔓 Operator methods are enabled on the live feed"),
        Some(_) => {}
    }
}
