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

//! Polling observer of `MessagePaid` events.

use futures::Stream;
use msgrelay_common::ChainEvent;
use msgrelay_ethereum::{
    ChainError, ChainReader, message_manager::MAX_QUERY_BLOCK_RANGE, retry::RetryPolicy,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;

mod fetcher;


pub use fetcher::{FetchError, MessageFetcher};

/// Default interval between two polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct ObserverConfig {
    pub poll_interval: Duration,
    /// First block to scan. The chain head at startup if `None`.
    pub from_block: Option<u64>,
    /// Max number of blocks per log query.
    pub max_block_range: u64,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            from_block: None,
            max_block_range: MAX_QUERY_BLOCK_RANGE,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObserverStatus {
    /// Last block covered by a successful poll.
    pub last_block: Option<u64>,
    pub events_seen: u64,
}

pub struct ObserverService {
    reader: Arc<dyn ChainReader>,
    config: ObserverConfig,
    status_sender: watch::Sender<ObserverStatus>,
}

impl ObserverService {
    pub fn new(reader: Arc<dyn ChainReader>, config: ObserverConfig) -> Self {
        let (status_sender, _status_receiver) = watch::channel(ObserverStatus::default());

        Self {
            reader,
            config,
            status_sender,
        }
    }

    pub fn get_status_receiver(&self) -> watch::Receiver<ObserverStatus> {
        self.status_sender.subscribe()
    }

    /// Reads all `MessagePaid` events from `since` up to the chain head.
    ///
    /// Returns the events in chain order and the block to continue from.
    pub async fn poll_events(&self, since: u64) -> Result<(Vec<ChainEvent>, u64), ChainError> {
        let latest = self.reader.latest_block().await?;
        if latest < since {
            return Ok((Vec::new(), since));
        }

        let range = self.config.max_block_range.max(1);
        let mut events = Vec::new();
        let mut from = since;

        while from <= latest {
            let to = latest.min(from.saturating_add(range - 1));
            events.extend(self.reader.message_paid_events(from, to).await?);
            from = to + 1;
        }

        events.sort_by_key(|event| event.block_number);

        Ok((events, latest + 1))
    }

    /// Infinite stream of new events.
    ///
    /// Chain errors are logged and retried with backoff, they never end the stream.
    pub fn events(&self) -> impl Stream<Item = ChainEvent> + '_ {
        let backoff = RetryPolicy {
            attempts: u32::MAX,
            initial_delay: self.config.poll_interval,
            max_delay: self.config.poll_interval.saturating_mul(16),
        };

        async_stream::stream! {
            let mut failures = 0;

            let mut next_block = match self.config.from_block {
                Some(block) => block,
                None => loop {
                    match self.reader.latest_block().await {
                        Ok(block) => break block,
                        Err(err) => {
                            let delay = backoff.delay(failures);
                            log::warn!("Failed to read chain head: {err}. Retrying in {delay:?}...");
                            failures += 1;
                            tokio::time::sleep(delay).await;
                        }
                    }
                },
            };

            log::info!("👀 Observing MessagePaid events from block #{next_block}");

            loop {
                match self.poll_events(next_block).await {
                    Ok((events, next)) => {
                        failures = 0;

                        if next > next_block {
                            log::trace!("Polled blocks #{next_block}..#{}: {} events", next - 1, events.len());

                            let events_len = events.len() as u64;
                            self.status_sender.send_modify(|status| {
                                status.last_block = Some(next - 1);
                                status.events_seen += events_len;
                            });
                        }

                        next_block = next;

                        for event in events {
                            log::debug!("MessagePaid {} by {} at block #{}", event.id, event.payer, event.block_number);
                            yield event;
                        }

                        tokio::time::sleep(self.config.poll_interval).await;
                    }
                    Err(err) => {
                        let delay = backoff.delay(failures);
                        log::warn!("Failed to poll events from block #{next_block}: {err}. Retrying in {delay:?}...");
                        failures += 1;
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}
