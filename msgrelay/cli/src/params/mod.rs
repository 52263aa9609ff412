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

use anyhow::{Context as _, Result};
use clap::Parser;
use msgrelay_service::config::Config;
use serde::Deserialize;
use std::{fmt, fs, path::Path};

mod agent;
mod ethereum;
mod feed;
mod node;

pub use agent::AgentParams;
pub use ethereum::EthereumParams;
pub use feed::{FeedParams, Origins};
pub use node::NodeParams;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required settings: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("invalid `{name}`: {reason}")]
    Invalid { name: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(name: &'static str, reason: impl fmt::Display) -> Self {
        Self::Invalid {
            name,
            reason: reason.to_string(),
        }
    }
}

pub(crate) fn required<T>(value: Option<T>, name: &'static str) -> Result<T, ConfigError> {
    value.ok_or_else(|| ConfigError::Missing(vec![name]))
}

/// All relay parameters, from the command line or from a TOML file.
#[derive(Clone, Debug, Default, Deserialize, Parser)]
#[serde(deny_unknown_fields)]
pub struct Params {
    #[clap(flatten)]
    #[serde(default)]
    pub ethereum: EthereumParams,

    #[clap(flatten)]
    #[serde(default)]
    pub node: NodeParams,

    #[clap(flatten)]
    #[serde(default)]
    pub feed: FeedParams,

    #[clap(flatten)]
    #[serde(default)]
    pub agent: AgentParams,
}

impl Params {
    /// Default name of the config file looked up in the working directory.
    pub const DEFAULT_FILE: &str = ".msgrelay.toml";

    /// Reads params from a TOML file, `None` if there's no such file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        toml::from_str(&content)
            .map(Some)
            .with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Validates params, reporting every missing required value at once.
    pub fn into_config(self) -> Result<Config, ConfigError> {
        let missing: Vec<_> = self
            .ethereum
            .missing()
            .chain(self.agent.missing())
            .collect();

        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        Ok(Config {
            node: self.node.into_config()?,
            ethereum: self.ethereum.into_config()?,
            agent: self.agent.into_config()?,
            rpc: self.feed.into_config()?,
        })
    }
}

impl MergeParams for Params {
    fn merge(self, with: Self) -> Self {
        Self {
            ethereum: self.ethereum.merge(with.ethereum),
            node: self.node.merge(with.node),
            feed: self.feed.merge(with.feed),
            agent: self.agent.merge(with.agent),
        }
    }
}

/// Combines two sets of params, values of `self` win.
pub trait MergeParams: Sized {
    fn merge(self, with: Self) -> Self;
}
