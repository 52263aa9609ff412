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

//! JSON-RPC websocket feed for live clients.

pub use apis::{FeedApi, RelayStatus};
pub use hub::{BroadcastHub, Connection, ConnectionId, FramePayload};

use anyhow::Result;
use apis::FeedServer;
use futures::{Stream, stream::FusedStream};
use hyper::{
    Method,
    header::{CONTENT_TYPE, HeaderValue},
};
use jsonrpsee::server::{Server, ServerHandle};
use msgrelay_common::{JobSnapshot, MessageId};
use std::{
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio::sync::{mpsc, oneshot};
use tower_http::cors::{AllowOrigin, CorsLayer};

mod apis;
mod errors;
pub mod hub;


/// Status requests waiting for the service before new ones are refused.
pub const REQUEST_QUEUE: usize = 64;

pub const DEFAULT_MAX_CLIENTS: u32 = 100;

/// Requests the feed cannot answer by itself.
#[derive(Debug)]
pub enum RpcEvent {
    Status {
        response_sender: oneshot::Sender<RelayStatus>,
    },
    Job {
        id: MessageId,
        response_sender: oneshot::Sender<Option<JobSnapshot>>,
    },
    /// Operator lets a held message be processed again.
    Release {
        id: MessageId,
        response_sender: oneshot::Sender<bool>,
    },
}

#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub listen_addr: SocketAddr,
    /// Allowed origin patterns, `None` allows any origin.
    ///
    /// A pattern ending with `:*` matches the host on every port.
    pub cors: Option<Vec<String>>,
    pub max_clients: u32,
    /// Enables operator methods such as `feed_release`.
    pub admin: bool,
}

pub struct RpcServer {
    config: RpcConfig,
    hub: BroadcastHub,
}

/// Handles of a started feed server.
pub struct RunningRpc {
    pub handle: ServerHandle,
    pub receiver: RpcReceiver,
    pub local_addr: SocketAddr,
}

impl RpcServer {
    pub fn new(config: RpcConfig, hub: BroadcastHub) -> Self {
        Self { config, hub }
    }

    pub const fn port(&self) -> u16 {
        self.config.listen_addr.port()
    }

    pub async fn run_server(self) -> Result<RunningRpc> {
        let (rpc_sender, rpc_receiver) = mpsc::channel(REQUEST_QUEUE);

        let http_middleware = tower::ServiceBuilder::new().layer(cors_layer(self.config.cors)?);

        let server = Server::builder()
            .max_connections(self.config.max_clients)
            .set_http_middleware(http_middleware)
            .build(self.config.listen_addr)
            .await?;
        let local_addr = server.local_addr()?;

        let feed = FeedApi::new(rpc_sender, self.hub, self.config.admin);
        let handle = server.start(feed.into_rpc());

        Ok(RunningRpc {
            handle,
            receiver: RpcReceiver(rpc_receiver),
            local_addr,
        })
    }
}

fn cors_layer(patterns: Option<Vec<String>>) -> Result<CorsLayer> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE]);

    let Some(patterns) = patterns else {
        return Ok(layer.allow_origin(AllowOrigin::any()));
    };

    // A pattern that is not a valid header value could never match.
    for pattern in &patterns {
        HeaderValue::from_str(pattern)?;
    }

    let patterns = Arc::new(patterns);
    let allow = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        origin.to_str().is_ok_and(|origin| {
            patterns
                .iter()
                .any(|pattern| origin_matches(pattern, origin))
        })
    });

    Ok(layer.allow_origin(allow))
}

fn origin_matches(pattern: &str, origin: &str) -> bool {
    let Some(host) = pattern.strip_suffix(":*") else {
        return pattern == origin;
    };

    match origin.strip_prefix(host) {
        Some("") => true,
        Some(port) => port
            .strip_prefix(':')
            .is_some_and(|port| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit())),
        None => false,
    }
}

/// Stream of requests the service has to answer.
pub struct RpcReceiver(mpsc::Receiver<RpcEvent>);

impl Stream for RpcReceiver {
    type Item = RpcEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.0.poll_recv(cx)
    }
}

impl FusedStream for RpcReceiver {
    fn is_terminated(&self) -> bool {
        self.0.is_closed() && self.0.is_empty()
    }
}
