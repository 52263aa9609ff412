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

use crate::{RpcEvent, errors, hub::BroadcastHub};
use jsonrpsee::{
    PendingSubscriptionSink, SubscriptionMessage,
    core::{RpcResult, SubscriptionResult, async_trait},
    proc_macros::rpc,
};
use msgrelay_common::{Frame, JobSnapshot, MessageId};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    oneshot,
};

/// Relay overview returned by `feed_status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStatus {
    /// Last block covered by the observer.
    pub last_block: Option<u64>,
    /// Jobs which have not reached a terminal state yet.
    pub active: Vec<JobSnapshot>,
    /// Most recently finished jobs, newest first.
    pub recent: Vec<JobSnapshot>,
    /// Messages whose acknowledgement failed, waiting for `feed_release`.
    pub held: Vec<MessageId>,
    pub connections: usize,
}

#[rpc(server)]
pub trait Feed {
    #[method(name = "feed_ping")]
    async fn ping(&self) -> RpcResult<String>;

    #[method(name = "feed_status")]
    async fn status(&self) -> RpcResult<RelayStatus>;

    #[method(name = "feed_job")]
    async fn job(&self, id: MessageId) -> RpcResult<Option<JobSnapshot>>;

    #[method(name = "feed_release")]
    async fn release(&self, id: MessageId) -> RpcResult<bool>;

    #[subscription(name = "feed_subscribe", unsubscribe = "feed_unsubscribe", item = Frame)]
    async fn subscribe(&self) -> SubscriptionResult;
}

/// Implementation of the live feed API.
///
/// Clients can only observe: pings and status queries are the whole request
/// surface, every state change originates from chain events. The one
/// exception is `feed_release`, served to operators when admin methods are on.
#[derive(derive_more::Debug, Clone)]
pub struct FeedApi {
    rpc_sender: mpsc::Sender<RpcEvent>,
    #[debug(skip)]
    hub: BroadcastHub,
    admin: bool,
}

impl FeedApi {
    pub fn new(rpc_sender: mpsc::Sender<RpcEvent>, hub: BroadcastHub, admin: bool) -> Self {
        Self {
            rpc_sender,
            hub,
            admin,
        }
    }

    async fn request<T: Send>(&self, event: impl FnOnce(oneshot::Sender<T>) -> RpcEvent) -> RpcResult<T> {
        let (response_sender, response_receiver) = oneshot::channel();

        self.rpc_sender
            .try_send(event(response_sender))
            .map_err(|err| match err {
                TrySendError::Full(_) => errors::service_busy(),
                TrySendError::Closed(_) => errors::service_unavailable(),
            })?;

        response_receiver
            .await
            .map_err(|_| errors::service_unavailable())
    }
}

#[async_trait]
impl FeedServer for FeedApi {
    async fn ping(&self) -> RpcResult<String> {
        Ok("pong".into())
    }

    async fn status(&self) -> RpcResult<RelayStatus> {
        let mut status = self
            .request(|response_sender| RpcEvent::Status { response_sender })
            .await?;
        status.connections = self.hub.connections_count();

        Ok(status)
    }

    async fn job(&self, id: MessageId) -> RpcResult<Option<JobSnapshot>> {
        self.request(|response_sender| RpcEvent::Job {
            id,
            response_sender,
        })
        .await
    }

    async fn release(&self, id: MessageId) -> RpcResult<bool> {
        if !self.admin {
            return Err(errors::admin_disabled());
        }

        self.request(|response_sender| RpcEvent::Release {
            id,
            response_sender,
        })
        .await
    }

    async fn subscribe(&self, pending: PendingSubscriptionSink) -> SubscriptionResult {
        let sink = pending.accept().await?;
        let mut connection = self.hub.register();

        tracing::debug!(connection = connection.id(), "live client subscribed");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sink.closed() => {
                        tracing::trace!(connection = connection.id(), "subscription sink closed");
                        break;
                    }
                    payload = connection.recv() => {
                        let Some(payload) = payload else {
                            tracing::debug!(connection = connection.id(), "connection dropped by hub");
                            break;
                        };

                        let raw: &RawValue = &payload;
                        let message = match SubscriptionMessage::from_json(&raw) {
                            Ok(message) => message,
                            Err(err) => {
                                tracing::error!(
                                    error = %err,
                                    "failed to create `SubscriptionMessage` from json object"
                                );
                                continue;
                            }
                        };

                        if let Err(err) = sink.send(message).await {
                            tracing::debug!(
                                connection = connection.id(),
                                error = ?err,
                                "failed to send subscription message"
                            );
                            break;
                        }
                    }
                }
            }
        });

        Ok(())
    }
}
