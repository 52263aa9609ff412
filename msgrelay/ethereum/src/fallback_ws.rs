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

use alloy::{
    providers::WsConnect,
    pubsub::{ConnectionHandle, PubSubConnect},
    rpc::client::{ClientBuilder, RpcClient},
    transports::{TransportError, TransportResult},
};
use nonempty::NonEmpty;
use std::sync::atomic::{AtomicUsize, Ordering};

/// [`FallbackWs`] is a rotating set of websocket endpoints.
/// It implements [`PubSubConnect`], so a dropped connection is re-established
/// against the next endpoint instead of surfacing to the caller.
pub struct FallbackWs {
    rpc: NonEmpty<String>,
    cursor: AtomicUsize,
}

impl FallbackWs {
    pub fn new(rpc: NonEmpty<String>) -> Self {
        Self {
            rpc,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Builds the [`RpcClient`] backed by [`FallbackWs`].
    pub async fn client(rpc: NonEmpty<String>) -> Result<RpcClient, TransportError> {
        ClientBuilder::default().pubsub(Self::new(rpc)).await
    }

    /// Endpoint for the next connection attempt, round robin.
    fn next_url(&self) -> &str {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.rpc.len();
        self.rpc.get(idx).unwrap_or(&self.rpc.head)
    }

    async fn connect_next(&self) -> TransportResult<ConnectionHandle> {
        let url = self.next_url();
        log::debug!("Connecting to ethereum websocket rpc {url}");
        WsConnect::new(url).connect().await
    }
}

impl PubSubConnect for FallbackWs {
    fn is_local(&self) -> bool {
        false
    }

    async fn connect(&self) -> TransportResult<ConnectionHandle> {
        self.connect_next().await
    }

    async fn try_reconnect(&self) -> TransportResult<ConnectionHandle> {
        log::warn!("Ethereum websocket connection lost, reconnecting...");
        self.connect_next().await
    }
}
