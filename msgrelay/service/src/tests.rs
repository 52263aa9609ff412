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
    Service,
    agent::{Agent, AgentError, AgentStream},
    config::NodeConfig,
    job::{Job, JobContext},
    tracker::{JobTracker, Rejection},
};
use async_trait::async_trait;
use futures::StreamExt;
use msgrelay_common::{
    AgentChunk, ChainEvent, ContentRef, FailureReason, Frame, JobState, MessageId, mock::Mock,
};
use msgrelay_ethereum::{
    AckSubmitter, ChainReader, SubmitterConfig, mock::MockChain, retry::RetryPolicy,
};
use msgrelay_observer::{MessageFetcher, ObserverConfig, ObserverStatus};
use msgrelay_rpc::{BroadcastHub, Connection, RelayStatus, RpcEvent};
use parking_lot::Mutex;
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::{
    sync::{Semaphore, mpsc, oneshot, watch},
    task::JoinHandle,
};
use tokio_stream::wrappers::ReceiverStream;

const DEPOSIT: &str = "Deposit 100 USDC";

fn init_logger() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Replies with a fixed script, optionally held back by a gate.
#[derive(Clone, Default)]
struct MockAgent {
    chunks: Vec<AgentChunk>,
    error: Option<AgentError>,
    gate: Option<Arc<Semaphore>>,
    calls: Arc<AtomicUsize>,
}

impl MockAgent {
    fn replying(chunks: impl IntoIterator<Item = AgentChunk>) -> Self {
        Self {
            chunks: chunks.into_iter().collect(),
            ..Default::default()
        }
    }

    fn failing(mut self, error: AgentError) -> Self {
        self.error = Some(error);
        self
    }

    /// Calls block until the returned gate is closed.
    fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(gate.clone());
        (self, gate)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for MockAgent {
    async fn process(&self, _content: String) -> Result<AgentStream, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            let _ = gate.acquire().await;
        }

        let items: Vec<_> = self
            .chunks
            .iter()
            .cloned()
            .map(Ok)
            .chain(self.error.clone().map(Err))
            .collect();

        Ok(futures::stream::iter(items).boxed())
    }
}

/// Emits whatever the test pushes into the paired sender.
struct StreamingAgent {
    receiver: Mutex<Option<mpsc::Receiver<Result<AgentChunk, AgentError>>>>,
}

impl StreamingAgent {
    fn new() -> (Self, mpsc::Sender<Result<AgentChunk, AgentError>>) {
        let (sender, receiver) = mpsc::channel(16);
        let agent = Self {
            receiver: Mutex::new(Some(receiver)),
        };
        (agent, sender)
    }
}

#[async_trait]
impl Agent for StreamingAgent {
    async fn process(&self, _content: String) -> Result<AgentStream, AgentError> {
        let receiver = self
            .receiver
            .lock()
            .take()
            .ok_or_else(|| AgentError::Request("agent is busy".into()))?;

        Ok(ReceiverStream::new(receiver).boxed())
    }
}

fn text(content: &str) -> AgentChunk {
    AgentChunk::AgentText {
        content: content.into(),
    }
}

fn submitter_config() -> SubmitterConfig {
    SubmitterConfig {
        receipt_timeout: Duration::from_secs(2),
        receipt_poll_interval: Duration::from_millis(10),
        send_retry: RetryPolicy {
            attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        },
    }
}

fn context(chain: &MockChain, agent: impl Agent + 'static) -> JobContext {
    let reader: Arc<dyn ChainReader> = Arc::new(chain.clone());

    JobContext {
        fetcher: MessageFetcher::new(reader.clone()),
        agent: Arc::new(agent),
        submitter: Arc::new(AckSubmitter::new(
            reader,
            Arc::new(chain.clone()),
            submitter_config(),
        )),
        hub: BroadcastHub::default(),
        agent_timeout: Duration::from_secs(5),
    }
}

fn tracker(chain: &MockChain) -> JobTracker {
    JobTracker::new(Arc::new(chain.clone()), 8)
}

fn received(connection: &mut Connection) -> Vec<Frame> {
    std::iter::from_fn(|| connection.try_recv())
        .map(|payload| serde_json::from_str(payload.get()).unwrap())
        .collect()
}

async fn next_frame(connection: &mut Connection) -> Frame {
    let payload = connection.recv().await.unwrap();
    serde_json::from_str(payload.get()).unwrap()
}

async fn wait_until(condition: impl Fn() -> bool) {
    while !condition() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn paid_message_is_processed_and_acknowledged() {
    init_logger();

    let chain = MockChain::new();
    let agent = MockAgent::replying([text("Deposited")]);
    let ctx = context(&chain, agent.clone());
    let mut client = ctx.hub.register();
    let tracker = tracker(&chain);

    let id = MessageId::from([0xab; 32]);
    let event = ChainEvent::mock((id, ContentRef::Uri(DEPOSIT.into())));
    let payer = event.payer;

    let handle = tracker.accept(id).await.unwrap();
    let snapshot = Job::new(handle, event, ctx).run().await.unwrap();

    let acks = chain.acks();
    assert_eq!(acks.len(), 1);
    assert!(chain.processed(id));

    assert_eq!(snapshot.state, JobState::Done);
    assert_eq!(snapshot.content.as_deref(), Some(DEPOSIT));
    assert_eq!(snapshot.result_chunks, vec![text("Deposited")]);
    assert_eq!(snapshot.ack_tx_hash, Some(acks[0].tx_hash));
    assert_eq!(snapshot.error, None);
    assert!(!tracker.is_active(id));
    assert_eq!(agent.calls(), 1);

    assert_eq!(
        received(&mut client),
        vec![
            Frame::MessageReceived {
                id,
                payer,
                content: DEPOSIT.into(),
            },
            Frame::AgentText {
                id,
                content: "Deposited".into(),
            },
            Frame::Complete {
                id,
                success: true,
                marked_processed: true,
                ack_tx_hash: Some(acks[0].tx_hash),
                error: None,
            },
        ]
    );
}

#[tokio::test]
async fn stored_content_is_read_from_chain() {
    let chain = MockChain::new();
    let ctx = context(&chain, MockAgent::replying([text("ok")]));
    let mut client = ctx.hub.register();
    let tracker = tracker(&chain);

    let id = MessageId::mock(());
    chain.set_content(id, "Swap 5 ETH");
    let event = ChainEvent::mock((id, ContentRef::Stored));

    let handle = tracker.accept(id).await.unwrap();
    let snapshot = Job::new(handle, event, ctx).run().await.unwrap();
    assert_eq!(snapshot.state, JobState::Done);

    let Frame::MessageReceived { content, .. } = &received(&mut client)[0] else {
        panic!("first frame is not message_received");
    };
    assert_eq!(content, "Swap 5 ETH");
}

#[tokio::test]
async fn missing_content_fails_without_acknowledgement() {
    let chain = MockChain::new();
    let agent = MockAgent::replying([text("never")]);
    let ctx = context(&chain, agent.clone());
    let mut client = ctx.hub.register();
    let tracker = tracker(&chain);

    let id = MessageId::mock(());
    let event = ChainEvent::mock((id, ContentRef::Stored));

    let handle = tracker.accept(id).await.unwrap();
    let snapshot = Job::new(handle, event, ctx).run().await.unwrap();

    assert_eq!(
        snapshot.state,
        JobState::Failed(FailureReason::ContentMissing)
    );
    assert!(chain.acks().is_empty());
    assert_eq!(agent.calls(), 0);
    assert!(!tracker.is_active(id));

    let frames = received(&mut client);
    assert_eq!(frames.len(), 2);
    assert!(matches!(
        frames[0],
        Frame::Error {
            reason: FailureReason::ContentMissing,
            ..
        }
    ));
    assert!(matches!(
        frames[1],
        Frame::Complete {
            success: false,
            marked_processed: false,
            ack_tx_hash: None,
            ..
        }
    ));
}

#[tokio::test]
async fn blank_content_is_missing() {
    let chain = MockChain::new();
    let ctx = context(&chain, MockAgent::default());
    let tracker = tracker(&chain);

    let id = MessageId::mock(());
    let event = ChainEvent::mock((id, ContentRef::Uri("   ".into())));

    let handle = tracker.accept(id).await.unwrap();
    let snapshot = Job::new(handle, event, ctx).run().await.unwrap();

    assert_eq!(
        snapshot.state,
        JobState::Failed(FailureReason::ContentMissing)
    );
    assert!(chain.acks().is_empty());
}

#[tokio::test]
async fn agent_failure_still_acknowledges() {
    let chain = MockChain::new();
    let agent = MockAgent::replying([AgentChunk::ToolCall {
        tool: "get_balance".into(),
        arguments: r#"{"__arg1": "USDC"}"#.into(),
    }])
    .failing(AgentError::Request("connection refused".into()));
    let ctx = context(&chain, agent);
    let mut client = ctx.hub.register();
    let tracker = tracker(&chain);

    let id = MessageId::mock(());
    let event = ChainEvent::mock((id, ContentRef::Uri(DEPOSIT.into())));

    let handle = tracker.accept(id).await.unwrap();
    let snapshot = Job::new(handle, event, ctx).run().await.unwrap();

    assert_eq!(snapshot.state, JobState::Failed(FailureReason::AgentError));
    assert_eq!(chain.acks_for(id), 1);
    assert!(chain.processed(id));
    assert_eq!(snapshot.ack_tx_hash, Some(chain.acks()[0].tx_hash));

    let frames = received(&mut client);
    assert_eq!(
        frames.iter().map(Frame::kind).collect::<Vec<_>>(),
        ["message_received", "tool_call", "error", "complete"]
    );
    assert_eq!(
        frames[1],
        Frame::ToolCall {
            id,
            tool: "get_balance".into(),
            content: "USDC".into(),
        }
    );
    let Frame::Complete {
        success,
        marked_processed,
        error,
        ..
    } = &frames[3]
    else {
        unreachable!()
    };
    assert!(!*success);
    assert!(*marked_processed);
    assert!(error.as_deref().unwrap().contains("connection refused"));
}

#[tokio::test]
async fn agent_timeout_still_acknowledges() {
    let chain = MockChain::new();
    let (agent, _gate) = MockAgent::replying([text("late")]).gated();
    let mut ctx = context(&chain, agent);
    ctx.agent_timeout = Duration::from_millis(50);
    let tracker = tracker(&chain);

    let id = MessageId::mock(());
    let event = ChainEvent::mock((id, ContentRef::Uri(DEPOSIT.into())));

    let handle = tracker.accept(id).await.unwrap();
    let snapshot = Job::new(handle, event, ctx).run().await.unwrap();

    assert_eq!(snapshot.state, JobState::Failed(FailureReason::AgentError));
    assert!(snapshot.error.unwrap().contains("did not finish"));
    assert_eq!(chain.acks_for(id), 1);
}

#[tokio::test]
async fn reverted_acknowledgement_is_final() {
    let chain = MockChain::new();
    chain.revert_acks();
    let ctx = context(&chain, MockAgent::replying([text("Deposited")]));
    let mut client = ctx.hub.register();
    let tracker = tracker(&chain);

    let id = MessageId::mock(());
    let event = ChainEvent::mock((id, ContentRef::Uri(DEPOSIT.into())));

    let handle = tracker.accept(id).await.unwrap();
    let snapshot = Job::new(handle, event, ctx).run().await.unwrap();

    assert_eq!(snapshot.state, JobState::Failed(FailureReason::AckFailed));
    assert_eq!(chain.acks().len(), 1);
    assert!(!chain.processed(id));

    let tx_hash = chain.acks()[0].tx_hash;
    assert_eq!(snapshot.ack_tx_hash, Some(tx_hash));
    assert_eq!(
        received(&mut client).last(),
        Some(&Frame::Complete {
            id,
            success: false,
            marked_processed: false,
            ack_tx_hash: Some(tx_hash),
            error: snapshot.error.clone(),
        })
    );
}

#[tokio::test]
async fn failed_acknowledgement_is_not_reprocessed() {
    let chain = MockChain::new();
    chain.revert_acks();
    let agent = MockAgent::replying([text("Deposited")]);
    let ctx = context(&chain, agent.clone());
    let tracker = tracker(&chain);

    let id = MessageId::mock(());
    let event = ChainEvent::mock((id, ContentRef::Uri(DEPOSIT.into())));

    let handle = tracker.accept(id).await.unwrap();
    let snapshot = Job::new(handle, event.clone(), ctx.clone()).run().await.unwrap();
    assert_eq!(snapshot.state, JobState::Failed(FailureReason::AckFailed));

    // Same content hash paid again.
    assert_eq!(
        tracker.accept(id).await.err(),
        Some(Rejection::AwaitingOperator)
    );
    assert_eq!(agent.calls(), 1);
    assert_eq!(chain.acks_for(id), 1);

    assert!(tracker.release(id));
    let handle = tracker.accept(id).await.unwrap();
    Job::new(handle, event, ctx).run().await.unwrap();
    assert_eq!(agent.calls(), 2);
}

#[tokio::test]
async fn acknowledged_elsewhere_counts_as_done() {
    let chain = MockChain::new();
    let ctx = context(&chain, MockAgent::replying([text("Deposited")]));
    let tracker = tracker(&chain);

    let id = MessageId::mock(());
    let event = ChainEvent::mock((id, ContentRef::Uri(DEPOSIT.into())));

    let handle = tracker.accept(id).await.unwrap();
    // Someone else acknowledges while the job is running.
    chain.mark_processed(id);
    let snapshot = Job::new(handle, event, ctx).run().await.unwrap();

    assert_eq!(snapshot.state, JobState::Done);
    assert_eq!(snapshot.ack_tx_hash, None);
    assert!(chain.acks().is_empty());
}

#[tokio::test]
#[ntest::timeout(10_000)]
async fn chunks_are_streamed_as_they_come() {
    let chain = MockChain::new();
    let (agent, chunks) = StreamingAgent::new();
    let ctx = context(&chain, agent);
    let mut client = ctx.hub.register();
    let tracker = tracker(&chain);

    let id = MessageId::mock(());
    let event = ChainEvent::mock((id, ContentRef::Uri(DEPOSIT.into())));

    let handle = tracker.accept(id).await.unwrap();
    let job = tokio::spawn(Job::new(handle, event, ctx).run());

    assert_eq!(next_frame(&mut client).await.kind(), "message_received");

    chunks.send(Ok(text("Checking balance"))).await.unwrap();
    assert_eq!(
        next_frame(&mut client).await,
        Frame::AgentText {
            id,
            content: "Checking balance".into(),
        }
    );

    let snapshot = tracker.snapshot(id).unwrap();
    assert_eq!(snapshot.state, JobState::Processing);
    assert_eq!(snapshot.result_chunks, vec![text("Checking balance")]);
    assert!(chain.acks().is_empty());

    let tool_call = AgentChunk::ToolCall {
        tool: "deposit".into(),
        arguments: r#"{"__arg1": "100 USDC"}"#.into(),
    };
    chunks.send(Ok(tool_call.clone())).await.unwrap();
    chunks.send(Ok(text("Deposited"))).await.unwrap();
    drop(chunks);

    let snapshot = job.await.unwrap().unwrap();
    assert_eq!(snapshot.state, JobState::Done);
    assert_eq!(
        snapshot.result_chunks,
        vec![text("Checking balance"), tool_call, text("Deposited")]
    );
    assert_eq!(tracker.snapshot(id), Some(snapshot));
}

#[tokio::test]
#[ntest::timeout(10_000)]
async fn concurrent_jobs_use_distinct_nonces() {
    let chain = MockChain::new();
    let ctx = context(&chain, MockAgent::replying([text("done")]));
    let tracker = tracker(&chain);

    let mut jobs = Vec::new();
    for _ in 0..8 {
        let id = MessageId::mock(());
        let event = ChainEvent::mock((id, ContentRef::Uri(DEPOSIT.into())));
        let handle = tracker.accept(id).await.unwrap();
        jobs.push(tokio::spawn(Job::new(handle, event, ctx.clone()).run()));
    }

    for job in jobs {
        assert_eq!(job.await.unwrap().unwrap().state, JobState::Done);
    }

    let mut nonces: Vec<_> = chain.acks().iter().map(|ack| ack.nonce).collect();
    nonces.sort_unstable();
    assert_eq!(nonces, (0..8).collect::<Vec<_>>());
}

fn observer_config() -> ObserverConfig {
    ObserverConfig {
        poll_interval: Duration::from_millis(10),
        from_block: Some(0),
        max_block_range: 1_000,
    }
}

fn service(chain: &MockChain, agent: impl Agent + 'static, node: NodeConfig) -> Service {
    Service::new_from_parts(
        Arc::new(chain.clone()),
        Arc::new(chain.clone()),
        Arc::new(agent),
        observer_config(),
        submitter_config(),
        node,
        None,
    )
}

fn start(service: Service) -> (oneshot::Sender<()>, JoinHandle<anyhow::Result<()>>) {
    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(service.run(async move {
        let _ = stopped.await;
    }));

    (stop, handle)
}

#[tokio::test(flavor = "multi_thread")]
#[ntest::timeout(20_000)]
async fn service_relays_paid_message() {
    init_logger();

    let chain = MockChain::new();
    let service = service(
        &chain,
        MockAgent::replying([text("Deposited")]),
        NodeConfig::default(),
    );
    let tracker = service.tracker();
    let mut client = service.hub().register();
    let (stop, handle) = start(service);

    let id = MessageId::mock(());
    chain.push_event(ChainEvent::mock((id, ContentRef::Uri(DEPOSIT.into()))));

    let mut kinds = Vec::new();
    while kinds.last() != Some(&"complete") {
        kinds.push(next_frame(&mut client).await.kind());
    }
    assert_eq!(kinds, ["message_received", "agent_text", "complete"]);

    wait_until(|| tracker.snapshot(id).is_some_and(|s| s.state == JobState::Done)).await;
    assert_eq!(chain.acks_for(id), 1);

    stop.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
#[ntest::timeout(20_000)]
async fn duplicate_event_is_not_processed_twice() {
    init_logger();

    let chain = MockChain::new();
    let (agent, gate) = MockAgent::replying([text("Deposited")]).gated();
    let service = service(&chain, agent.clone(), NodeConfig::default());
    let tracker = service.tracker();
    let (stop, handle) = start(service);

    let id = MessageId::mock(());
    let event = ChainEvent::mock((id, ContentRef::Uri(DEPOSIT.into())));
    chain.push_event(event.clone());
    wait_until(|| agent.calls() == 1).await;

    // Same id, emitted again while the first job is processing.
    chain.push_event(ChainEvent {
        block_number: event.block_number + 1,
        ..event
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(tracker.active_count(), 1);
    assert_eq!(
        tracker.snapshot(id).map(|s| s.state),
        Some(JobState::Processing)
    );

    gate.close();
    wait_until(|| !tracker.is_active(id)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(agent.calls(), 1);
    assert_eq!(chain.acks_for(id), 1);

    stop.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
#[ntest::timeout(20_000)]
async fn processed_message_is_skipped() {
    init_logger();

    let chain = MockChain::new();
    let agent = MockAgent::replying([text("Deposited")]);
    let service = service(&chain, agent.clone(), NodeConfig::default());
    let tracker = service.tracker();
    let mut client = service.hub().register();
    let (stop, handle) = start(service);

    let id = MessageId::mock(());
    chain.mark_processed(id);
    chain.push_event(ChainEvent::mock((id, ContentRef::Uri(DEPOSIT.into()))));

    wait_until(|| chain.processed_reads() >= 1).await;
    wait_until(|| !tracker.is_active(id)).await;

    assert_eq!(agent.calls(), 0);
    assert!(chain.acks().is_empty());
    assert!(tracker.recent().is_empty());
    assert!(client.try_recv().is_none());

    stop.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
#[ntest::timeout(20_000)]
async fn flaky_processed_reads_delay_admission() {
    init_logger();

    let chain = MockChain::new();
    let agent = MockAgent::replying([text("Deposited")]);
    let service = service(&chain, agent.clone(), NodeConfig::default());
    let tracker = service.tracker();
    let (stop, handle) = start(service);

    let id = MessageId::mock(());
    chain.fail_next_processed_reads(10);
    chain.push_event(ChainEvent::mock((id, ContentRef::Uri(DEPOSIT.into()))));

    wait_until(|| chain.acks_for(id) == 1).await;
    wait_until(|| tracker.snapshot(id).is_some_and(|s| s.state == JobState::Done)).await;

    assert!(chain.processed_reads() >= 1);
    assert_eq!(agent.calls(), 1);

    stop.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
#[ntest::timeout(20_000)]
async fn repaid_message_waits_for_operator_after_failed_ack() {
    init_logger();

    let chain = MockChain::new();
    chain.revert_acks();
    let agent = MockAgent::replying([text("Deposited")]);
    let service = service(&chain, agent.clone(), NodeConfig::default());
    let tracker = service.tracker();
    let (stop, handle) = start(service);

    let id = MessageId::mock(());
    let event = ChainEvent::mock((id, ContentRef::Uri(DEPOSIT.into())));
    chain.push_event(event.clone());
    wait_until(|| tracker.held() == vec![id]).await;

    // Same content paid again in a later block.
    chain.push_event(ChainEvent {
        block_number: event.block_number + 1,
        ..event
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(agent.calls(), 1);
    assert_eq!(chain.acks_for(id), 1);
    assert!(!tracker.is_active(id));
    assert_eq!(tracker.held(), vec![id]);
    assert_eq!(
        tracker.snapshot(id).map(|s| s.state),
        Some(JobState::Failed(FailureReason::AckFailed))
    );

    stop.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
#[ntest::timeout(20_000)]
async fn polling_pauses_while_jobs_limit_is_reached() {
    init_logger();

    let chain = MockChain::new();
    let (agent, gate) = MockAgent::replying([text("Deposited")]).gated();
    let node = NodeConfig {
        max_active_jobs: 2,
        ..Default::default()
    };
    let service = service(&chain, agent.clone(), node);
    let tracker = service.tracker();
    let (stop, handle) = start(service);

    for _ in 0..5 {
        chain.push_event(ChainEvent::mock((
            MessageId::mock(()),
            ContentRef::Uri(DEPOSIT.into()),
        )));
    }

    wait_until(|| agent.calls() == 2).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(agent.calls(), 2);
    assert_eq!(tracker.active_count(), 2);

    gate.close();
    wait_until(|| chain.acks().len() == 5).await;
    wait_until(|| tracker.active_count() == 0).await;

    let mut nonces: Vec<_> = chain.acks().iter().map(|ack| ack.nonce).collect();
    nonces.sort_unstable();
    assert_eq!(nonces, (0..5).collect::<Vec<_>>());

    stop.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
#[ntest::timeout(20_000)]
async fn shutdown_abandons_jobs_after_grace() {
    init_logger();

    let chain = MockChain::new();
    let (agent, _gate) = MockAgent::replying([text("Deposited")]).gated();
    let node = NodeConfig {
        shutdown_grace: Duration::from_millis(100),
        ..Default::default()
    };
    let service = service(&chain, agent.clone(), node);
    let tracker = service.tracker();
    let (stop, handle) = start(service);

    let id = MessageId::mock(());
    chain.push_event(ChainEvent::mock((id, ContentRef::Uri(DEPOSIT.into()))));
    wait_until(|| agent.calls() == 1).await;

    stop.send(()).unwrap();
    handle.await.unwrap().unwrap();

    assert!(!tracker.is_active(id));
    assert_eq!(tracker.recent()[0].state, JobState::Processing);
    assert!(chain.acks().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
#[ntest::timeout(20_000)]
async fn shutdown_waits_for_running_jobs() {
    init_logger();

    let chain = MockChain::new();
    let (agent, gate) = MockAgent::replying([text("Deposited")]).gated();
    let service = service(&chain, agent.clone(), NodeConfig::default());
    let tracker = service.tracker();
    let (stop, handle) = start(service);

    let id = MessageId::mock(());
    chain.push_event(ChainEvent::mock((id, ContentRef::Uri(DEPOSIT.into()))));
    wait_until(|| agent.calls() == 1).await;

    stop.send(()).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_finished());

    gate.close();
    handle.await.unwrap().unwrap();

    assert_eq!(tracker.recent()[0].state, JobState::Done);
    assert_eq!(chain.acks_for(id), 1);
}

#[tokio::test]
async fn rpc_queries_are_answered_from_tracker() {
    let chain = MockChain::new();
    let tracker = tracker(&chain);
    let hub = BroadcastHub::default();
    let _client = hub.register();
    let (_status_sender, status) = watch::channel(ObserverStatus {
        last_block: Some(43),
        events_seen: 1,
    });

    let done = MessageId::mock(());
    let mut job = tracker.accept(done).await.unwrap();
    job.fail(FailureReason::ContentMissing, "empty");

    let active = MessageId::mock(());
    let _active_job = tracker.accept(active).await.unwrap();

    let (response_sender, response) = oneshot::channel();
    Service::process_rpc_event(&tracker, &hub, &status, RpcEvent::Status { response_sender });
    let RelayStatus {
        last_block,
        active: active_jobs,
        recent,
        held,
        connections,
    } = response.await.unwrap();

    assert_eq!(last_block, Some(43));
    assert_eq!(active_jobs.len(), 1);
    assert_eq!(active_jobs[0].id, active);
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].id, done);
    assert!(held.is_empty());
    assert_eq!(connections, 1);

    let (response_sender, response) = oneshot::channel();
    Service::process_rpc_event(
        &tracker,
        &hub,
        &status,
        RpcEvent::Job {
            id: done,
            response_sender,
        },
    );
    assert_eq!(
        response.await.unwrap().map(|s| s.state),
        Some(JobState::Failed(FailureReason::ContentMissing))
    );

    let (response_sender, response) = oneshot::channel();
    Service::process_rpc_event(
        &tracker,
        &hub,
        &status,
        RpcEvent::Job {
            id: MessageId::mock(()),
            response_sender,
        },
    );
    assert_eq!(response.await.unwrap(), None);
}
