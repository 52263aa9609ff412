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

//! Fan-out of job frames to live client connections.

use dashmap::DashMap;
use msgrelay_common::Frame;
use serde_json::value::RawValue;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Frames buffered per connection before it is considered stalled.
pub const DEFAULT_CONNECTION_QUEUE: usize = 256;

pub type ConnectionId = u64;

/// Serialized frame shared between all connection queues.
pub type FramePayload = Arc<RawValue>;

/// Registry of live client connections.
///
/// Publishing never waits on a client: a connection whose queue is full or
/// closed is dropped, the others still receive the frame. There is no replay,
/// clients only see frames published while they are registered.
#[derive(Clone, derive_more::Debug)]
pub struct BroadcastHub {
    #[debug(skip)]
    connections: Arc<DashMap<ConnectionId, mpsc::Sender<FramePayload>>>,
    #[debug(skip)]
    next_id: Arc<AtomicU64>,
    queue_capacity: usize,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECTION_QUEUE)
    }
}

impl BroadcastHub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(0)),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Creates a new connection. It is unregistered when dropped.
    pub fn register(&self) -> Connection {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        self.connections.insert(id, sender);

        tracing::debug!(connection = id, "live connection registered");

        Connection {
            id,
            receiver,
            hub: self.clone(),
        }
    }

    pub fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self.connections.remove(&id).is_some();
        if removed {
            tracing::debug!(connection = id, "live connection unregistered");
        }
        removed
    }

    pub fn connections_count(&self) -> usize {
        self.connections.len()
    }

    /// Enqueues `frame` to every live connection.
    ///
    /// Returns the number of connections the frame was queued to.
    pub fn publish(&self, frame: &Frame) -> usize {
        if self.connections.is_empty() {
            tracing::trace!(id = %frame.id(), kind = frame.kind(), "no live connections");
            return 0;
        }

        let payload: FramePayload = match serde_json::value::to_raw_value(frame) {
            Ok(raw) => raw.into(),
            Err(err) => {
                tracing::error!(id = %frame.id(), error = %err, "failed to serialize frame");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut dead = Vec::new();

        for entry in self.connections.iter() {
            match entry.value().try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(connection = *entry.key(), "connection stalled, dropping it");
                    dead.push(*entry.key());
                }
                Err(TrySendError::Closed(_)) => dead.push(*entry.key()),
            }
        }

        for id in dead {
            self.unregister(id);
        }

        tracing::trace!(id = %frame.id(), kind = frame.kind(), delivered, "frame published");

        delivered
    }
}

/// Receiving end of one live client.
#[derive(derive_more::Debug)]
pub struct Connection {
    id: ConnectionId,
    #[debug(skip)]
    receiver: mpsc::Receiver<FramePayload>,
    #[debug(skip)]
    hub: BroadcastHub,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Next queued frame, `None` once the hub dropped this connection.
    pub async fn recv(&mut self) -> Option<FramePayload> {
        self.receiver.recv().await
    }

    /// Already queued frame, if any.
    pub fn try_recv(&mut self) -> Option<FramePayload> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.hub.unregister(self.id);
    }
}
