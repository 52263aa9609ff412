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

use super::{ConfigError, MergeParams};
use clap::Parser;
use msgrelay_service::config::NodeConfig;
use serde::Deserialize;
use std::time::Duration;

#[derive(Clone, Debug, Default, Deserialize, Parser)]
#[serde(deny_unknown_fields)]
pub struct NodeParams {
    /// Max number of messages processed at once. Polling pauses at the limit.
    #[arg(long)]
    #[serde(rename = "max-active-jobs")]
    pub max_active_jobs: Option<usize>,

    /// Time given to the agent per message, in seconds.
    #[arg(long)]
    #[serde(rename = "agent-timeout")]
    pub agent_timeout: Option<u64>,

    /// Time given to in-flight messages on shutdown, in seconds.
    #[arg(long)]
    #[serde(rename = "shutdown-grace")]
    pub shutdown_grace: Option<u64>,
}

impl NodeParams {
    /// Convert self into a proper `NodeConfig` object.
    pub fn into_config(self) -> Result<NodeConfig, ConfigError> {
        let default = NodeConfig::default();

        let max_active_jobs = match self.max_active_jobs {
            Some(0) => return Err(ConfigError::invalid("max-active-jobs", "must be positive")),
            Some(max) => max,
            None => default.max_active_jobs,
        };

        Ok(NodeConfig {
            max_active_jobs,
            agent_timeout: self
                .agent_timeout
                .map(Duration::from_secs)
                .unwrap_or(default.agent_timeout),
            shutdown_grace: self
                .shutdown_grace
                .map(Duration::from_secs)
                .unwrap_or(default.shutdown_grace),
        })
    }
}

impl MergeParams for NodeParams {
    fn merge(self, with: Self) -> Self {
        Self {
            max_active_jobs: self.max_active_jobs.or(with.max_active_jobs),
            agent_timeout: self.agent_timeout.or(with.agent_timeout),
            shutdown_grace: self.shutdown_grace.or(with.shutdown_grace),
        }
    }
}
