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

use super::{ConfigError, MergeParams, required};
use clap::Parser;
use msgrelay_service::config::AgentConfig;
use serde::Deserialize;
use url::Url;

#[derive(Clone, Debug, Default, Deserialize, Parser)]
#[serde(deny_unknown_fields)]
pub struct AgentParams {
    /// Endpoint which processes message content.
    #[arg(long, env = "MSGRELAY_AGENT_URL")]
    #[serde(rename = "url")]
    pub agent_url: Option<String>,
}

impl AgentParams {
    pub const URL: &str = "agent-url (MSGRELAY_AGENT_URL)";

    pub(crate) fn missing(&self) -> impl Iterator<Item = &'static str> + use<> {
        self.agent_url.is_none().then_some(Self::URL).into_iter()
    }

    /// Convert self into a proper `AgentConfig` object.
    pub fn into_config(self) -> Result<AgentConfig, ConfigError> {
        let url: Url = required(self.agent_url, Self::URL)?
            .parse()
            .map_err(|err| ConfigError::invalid("agent-url", err))?;

        Ok(AgentConfig { url })
    }
}

impl MergeParams for AgentParams {
    fn merge(self, with: Self) -> Self {
        Self {
            agent_url: self.agent_url.or(with.agent_url),
        }
    }
}
