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

use crate::{
    agent::{Agent, HttpAgent},
    config::{Config, NodeConfig},
    job::{Job, JobContext},
    tracker::{JobTracker, Rejection},
};
use anyhow::{Context as _, Result, bail};
use futures::stream::StreamExt;
use msgrelay_common::{ChainEvent, JobSnapshot};
use msgrelay_ethereum::{
    AckSubmitter, ChainReader, MessageManager, SubmitterConfig, TxBackend, retry::RetryPolicy,
};
use msgrelay_observer::{MessageFetcher, ObserverConfig, ObserverService, ObserverStatus};
use msgrelay_rpc::{BroadcastHub, RelayStatus, RpcConfig, RpcEvent, RpcServer, RunningRpc};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    task::{JoinError, JoinSet},
};
use utils::*;

pub mod agent;
pub mod config;
pub mod job;
pub mod tracker;

#[cfg(test)]
mod tests;

pub struct Service {
    observer: ObserverService,
    tracker: JobTracker,
    ctx: JobContext,
    verify_backoff: RetryPolicy,
    shutdown_grace: Duration,

    // Optional services
    rpc: Option<RpcServer>,
}

impl Service {
    pub async fn new(config: &Config) -> Result<Self> {
        let client = msgrelay_ethereum::rpc_client(config.ethereum.rpc.clone())
            .await
            .with_context(|| "failed to connect to ethereum rpc")?;

        let manager = MessageManager::new(
            config.ethereum.message_manager,
            client,
            config.ethereum.signer.clone(),
        );
        let query = manager.query();

        let sender = manager.sender();
        let has_role = query
            .has_agent_role(sender)
            .await
            .with_context(|| "failed to query agent role")?;

        if !has_role {
            tracing::error!(
                "🚫 {sender} lacks AGENT_ROLE on MessageManager {}, acknowledgements would revert",
                manager.address()
            );

            bail!("Signer is not authorized to acknowledge messages");
        }

        tracing::info!("📜 MessageManager: {}", manager.address());
        tracing::info!("🔑 Acknowledging as: {sender}");
        tracing::info!("🤖 Agent endpoint: {}", config.agent.url);

        Ok(Self::new_from_parts(
            Arc::new(query),
            Arc::new(manager),
            Arc::new(HttpAgent::new(config.agent.url.clone())),
            config.ethereum.observer.clone(),
            config.ethereum.submitter.clone(),
            config.node.clone(),
            config.rpc.clone(),
        ))
    }

    pub fn new_from_parts(
        reader: Arc<dyn ChainReader>,
        backend: Arc<dyn TxBackend>,
        agent: Arc<dyn Agent>,
        observer: ObserverConfig,
        submitter: SubmitterConfig,
        node: NodeConfig,
        rpc: Option<RpcConfig>,
    ) -> Self {
        let hub = BroadcastHub::default();

        let ctx = JobContext {
            fetcher: MessageFetcher::new(reader.clone()),
            agent,
            submitter: Arc::new(AckSubmitter::new(reader.clone(), backend, submitter)),
            hub: hub.clone(),
            agent_timeout: node.agent_timeout,
        };

        // Same pace as the observer retrying its own reads.
        let verify_backoff = RetryPolicy {
            attempts: u32::MAX,
            initial_delay: observer.poll_interval,
            max_delay: observer.poll_interval.saturating_mul(16),
        };

        Self {
            observer: ObserverService::new(reader.clone(), observer),
            tracker: JobTracker::new(reader, node.max_active_jobs),
            ctx,
            verify_backoff,
            shutdown_grace: node.shutdown_grace,
            rpc: rpc.map(|config| RpcServer::new(config, hub)),
        }
    }

    pub fn hub(&self) -> BroadcastHub {
        self.ctx.hub.clone()
    }

    pub fn tracker(&self) -> JobTracker {
        self.tracker.clone()
    }

    /// Runs the relay until `shutdown` resolves or a vital part stops.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        self.run_inner(shutdown).await.map_err(|err| {
            tracing::error!("Service finished work with error: {err:?}");
            err
        })
    }

    async fn run_inner(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let Service {
            observer,
            tracker,
            ctx,
            verify_backoff,
            shutdown_grace,
            rpc,
        } = self;

        let (mut rpc_handle, mut rpc_stopped, mut rpc_receiver) = (None, None, None);
        if let Some(rpc) = rpc {
            tracing::info!("🌐 Rpc server starting at: {}", rpc.port());

            let RunningRpc {
                handle,
                receiver,
                local_addr,
            } = rpc.run_server().await?;

            tracing::info!("🌐 Rpc server listening on {local_addr}");

            rpc_stopped = Some(tokio::spawn(handle.clone().stopped()));
            rpc_handle = Some(handle);
            rpc_receiver = Some(receiver);
        }

        let observer_status = observer.get_status_receiver();
        let observer_events = observer.events();
        futures::pin_mut!(observer_events);
        futures::pin_mut!(shutdown);

        let mut jobs = JoinSet::new();

        tracing::info!("⚙️ Relay service started");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested, stop observing...");
                    break;
                }
                event = observer_events.next(), if tracker.has_capacity() => {
                    let Some(event) = event else {
                        tracing::info!("Observer stream ended, shutting down...");
                        break;
                    };

                    Self::admit_event(&tracker, &ctx, verify_backoff, &mut jobs, event);

                    if !tracker.has_capacity() {
                        tracing::warn!(
                            active = tracker.active_count(),
                            "Active jobs limit reached, polling paused"
                        );
                    }
                }
                Some(res) = jobs.join_next(), if !jobs.is_empty() => {
                    Self::process_job_result(res);
                }
                Some(event) = maybe_await(rpc_receiver.as_mut().map(|r| r.next())) => {
                    Self::process_rpc_event(&tracker, &ctx.hub, &observer_status, event);
                }
                _ = maybe_await(rpc_stopped.as_mut()) => {
                    tracing::info!("`RPCWorker` has terminated, shutting down...");
                    break;
                }
            }
        }

        // Queued status requests fail fast from now on.
        drop(rpc_receiver);

        Self::drain_jobs(&tracker, &mut jobs, shutdown_grace).await;

        if let Some(handle) = rpc_handle {
            if handle.stop().is_ok() {
                handle.stopped().await;
            }
        }

        tracing::info!("Relay service stopped");

        Ok(())
    }

    fn admit_event(
        tracker: &JobTracker,
        ctx: &JobContext,
        verify_backoff: RetryPolicy,
        jobs: &mut JoinSet<Option<JobSnapshot>>,
        event: ChainEvent,
    ) {
        let id = event.id;

        let mut handle = match tracker.reserve(id) {
            Ok(handle) => handle,
            Err(rejection @ Rejection::AwaitingOperator) => {
                tracing::error!(%id, %rejection, "MessagePaid event for a held message ignored");
                return;
            }
            Err(rejection) => {
                tracing::warn!(%id, %rejection, "Duplicate MessagePaid event rejected");
                return;
            }
        };

        let ctx = ctx.clone();
        jobs.spawn(async move {
            match handle.verify_until_known(&verify_backoff).await {
                Ok(()) => {}
                Err(Rejection::AlreadyProcessed) => {
                    tracing::info!(%id, "Message is already processed on chain, skipping");
                    return None;
                }
                Err(rejection) => {
                    tracing::warn!(%id, %rejection, "Message dropped");
                    return None;
                }
            }

            Job::new(handle, event, ctx).run().await
        });
    }

    fn process_job_result(res: Result<Option<JobSnapshot>, JoinError>) {
        match res {
            Ok(Some(snapshot)) => tracing::info!(
                id = %snapshot.id,
                state = %snapshot.state,
                chunks = snapshot.result_chunks.len(),
                "🏁 Job finished"
            ),
            Ok(None) => {}
            Err(err) if err.is_panic() => tracing::error!("Job panicked: {err}"),
            Err(err) => tracing::debug!("Job cancelled: {err}"),
        }
    }

    fn process_rpc_event(
        tracker: &JobTracker,
        hub: &BroadcastHub,
        observer_status: &watch::Receiver<ObserverStatus>,
        event: RpcEvent,
    ) {
        match event {
            RpcEvent::Status { response_sender } => {
                let status = RelayStatus {
                    last_block: observer_status.borrow().last_block,
                    active: tracker.active(),
                    recent: tracker.recent(),
                    held: tracker.held(),
                    connections: hub.connections_count(),
                };

                let _ = response_sender.send(status);
            }
            RpcEvent::Job {
                id,
                response_sender,
            } => {
                let _ = response_sender.send(tracker.snapshot(id));
            }
            RpcEvent::Release {
                id,
                response_sender,
            } => {
                let _ = response_sender.send(tracker.release(id));
            }
        }
    }

    /// Waits for in-flight jobs, abandoning those still running after `grace`.
    async fn drain_jobs(
        tracker: &JobTracker,
        jobs: &mut JoinSet<Option<JobSnapshot>>,
        grace: Duration,
    ) {
        if jobs.is_empty() {
            return;
        }

        tracing::info!("Waiting up to {grace:?} for {} in-flight jobs...", jobs.len());

        let drained = tokio::time::timeout(grace, async {
            while let Some(res) = jobs.join_next().await {
                Self::process_job_result(res);
            }
        })
        .await;

        if drained.is_ok() {
            return;
        }

        for snapshot in tracker.active() {
            tracing::warn!(id = %snapshot.id, state = %snapshot.state, "Abandoning job");
        }

        jobs.abort_all();
        while jobs.join_next().await.is_some() {}
    }
}

mod utils {
    use futures::future;
    use std::future::Future;

    pub(crate) async fn maybe_await<F: Future>(f: Option<F>) -> F::Output {
        if let Some(f) = f {
            f.await
        } else {
            future::pending().await
        }
    }
}
