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
use msgrelay_rpc::{DEFAULT_MAX_CLIENTS, RpcConfig};
use serde::Deserialize;
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    str::FromStr,
};

/// Live feed server parameters.
#[derive(Clone, Debug, Default, Deserialize, Parser)]
#[serde(deny_unknown_fields)]
pub struct FeedParams {
    /// Port live clients connect to.
    #[arg(long, env = "MSGRELAY_FEED_PORT")]
    #[serde(rename = "port")]
    pub feed_port: Option<u16>,

    /// Address the live feed binds to, loopback by default.
    #[arg(long, env = "MSGRELAY_FEED_HOST")]
    #[serde(rename = "host")]
    pub feed_host: Option<IpAddr>,

    /// Browser origins allowed to connect: "*" or a comma separated list.
    #[arg(long)]
    #[serde(rename = "origins")]
    pub feed_origins: Option<Origins>,

    /// Max number of simultaneously connected live clients.
    #[arg(long)]
    #[serde(rename = "max-clients")]
    pub feed_max_clients: Option<u32>,

    /// Serve operator methods such as `feed_release`.
    #[arg(long)]
    #[serde(default, rename = "admin")]
    pub feed_admin: bool,

    /// Run without the live feed.
    #[arg(long)]
    #[serde(default, rename = "disabled")]
    pub no_feed: bool,
}

impl FeedParams {
    pub const PORT: &str = "feed-port";
    pub const MAX_CLIENTS: &str = "feed-max-clients";

    pub const DEFAULT_PORT: u16 = 9944;

    /// Origins of a locally served dashboard.
    pub const LOCAL_ORIGINS: [&str; 4] = [
        "http://localhost:*",
        "http://127.0.0.1:*",
        "https://localhost:*",
        "https://127.0.0.1:*",
    ];

    /// Returns `None` when the live feed is disabled.
    pub fn into_config(self) -> Result<Option<RpcConfig>, ConfigError> {
        if self.no_feed {
            return Ok(None);
        }

        let port = match self.feed_port {
            Some(0) => return Err(ConfigError::invalid(Self::PORT, "must be positive")),
            Some(port) => port,
            None => Self::DEFAULT_PORT,
        };
        let max_clients = match self.feed_max_clients {
            Some(0) => return Err(ConfigError::invalid(Self::MAX_CLIENTS, "must be positive")),
            Some(max) => max,
            None => DEFAULT_MAX_CLIENTS,
        };
        let host = self.feed_host.unwrap_or(Ipv4Addr::LOCALHOST.into());

        let cors = match self.feed_origins {
            Some(Origins::Any) => None,
            Some(Origins::Only(origins)) => Some(origins),
            None => Some(Self::LOCAL_ORIGINS.iter().map(|origin| origin.to_string()).collect()),
        };

        Ok(Some(RpcConfig {
            listen_addr: SocketAddr::new(host, port),
            cors,
            max_clients,
            admin: self.feed_admin,
        }))
    }
}

impl MergeParams for FeedParams {
    fn merge(self, with: Self) -> Self {
        Self {
            feed_port: self.feed_port.or(with.feed_port),
            feed_host: self.feed_host.or(with.feed_host),
            feed_origins: self.feed_origins.or(with.feed_origins),
            feed_max_clients: self.feed_max_clients.or(with.feed_max_clients),
            feed_admin: self.feed_admin || with.feed_admin,
            no_feed: self.no_feed || with.no_feed,
        }
    }
}

/// Origins allowed to open a live feed connection from a browser.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawOrigins")]
pub enum Origins {
    Any,
    Only(Vec<String>),
}

impl Origins {
    fn from_list<S: AsRef<str>>(list: &[S]) -> Result<Self, String> {
        let list: Vec<&str> = list.iter().map(|origin| origin.as_ref().trim()).collect();

        if list.contains(&"*") {
            return Ok(Self::Any);
        }

        if list.is_empty() {
            return Err("origin list is empty".into());
        }

        list.into_iter()
            .map(|origin| {
                if origin.starts_with("http://") || origin.starts_with("https://") {
                    Ok(origin.to_string())
                } else {
                    Err(format!("origin `{origin}` must start with http:// or https://"))
                }
            })
            .collect::<Result<_, _>>()
            .map(Self::Only)
    }
}

impl FromStr for Origins {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let list: Vec<&str> = s.split(',').filter(|origin| !origin.trim().is_empty()).collect();
        Self::from_list(&list)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawOrigins {
    One(String),
    Many(Vec<String>),
}

impl TryFrom<RawOrigins> for Origins {
    type Error = String;

    fn try_from(raw: RawOrigins) -> Result<Self, Self::Error> {
        match raw {
            RawOrigins::One(origins) => origins.parse(),
            RawOrigins::Many(list) => Self::from_list(&list),
        }
    }
}
