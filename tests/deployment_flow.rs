//! End-to-end deployment flow over the public API: jobs arrive from the
//! protocol in phase order, flow through the sequential queue, and come out
//! the other side as accept/deliver actions and a completed record.

use async_trait::async_trait;
use fundry::backend::RegistrationClient;
use fundry::chain::{ChainClient, FundCreated, FundCreatedEvent, PaymentTransferEvent};
use fundry::config::{AgentConfig, QueueConfig};
use fundry::pipeline::DeploymentPipeline;
use fundry::protocol::job::{Job, JobPhase, Memo};
use fundry::protocol::{Deliverable, ProtocolAgent, ProtocolHandle};
use fundry::queue::JobQueue;
use fundry::tracker::{MemoryStore, TransactionTracker, TxStatus};
use fundry::{AgentError, QuickDeployRequest, Result};
use alloy::primitives::Address;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const BUYER: &str = "0xcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcd";
const FUND: &str = "0x00000000000000000000000000000000000f00d1";

fn tx(fill: &str) -> String {
    format!("0x{}", fill.repeat(32))
}

/// Chain stub that records how many transactions run at once
struct SerialChain {
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
    create_calls: AtomicU32,
}

impl SerialChain {
    fn new() -> Self {
        Self {
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
            create_calls: AtomicU32::new(0),
        }
    }

    async fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChainClient for SerialChain {
    fn signer_address(&self) -> Address {
        Address::ZERO
    }

    async fn simulate_deployment(&self, _ai_wallet: Address) -> Result<()> {
        Ok(())
    }

    async fn create_fund(&self, _ai_wallet: Address) -> Result<FundCreated> {
        self.enter().await;
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.exit();
        Ok(FundCreated {
            tx_hash: tx("aa"),
            fund_address: FUND.parse().unwrap(),
        })
    }

    async fn transfer_payment(&self) -> Result<String> {
        self.enter().await;
        self.exit();
        Ok(tx("bb"))
    }

    async fn enable_trading(&self, _fund: Address) -> Result<String> {
        self.enter().await;
        self.exit();
        Ok(tx("cc"))
    }

    async fn latest_block(&self) -> Result<u64> {
        Ok(0)
    }

    async fn fund_creations(&self, _f: u64, _t: u64) -> Result<Vec<FundCreatedEvent>> {
        Ok(Vec::new())
    }

    async fn payment_transfers(&self, _f: u64, _t: u64) -> Result<Vec<PaymentTransferEvent>> {
        Ok(Vec::new())
    }
}

struct CountingBackend {
    calls: AtomicU32,
}

#[async_trait]
impl RegistrationClient for CountingBackend {
    async fn register(&self, request: &QuickDeployRequest) -> Result<serde_json::Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        request.validate()?;
        Ok(json!({ "status": "registered", "agentName": request.agent_name }))
    }
}

#[derive(Debug, Clone)]
enum Action {
    Accept(String),
    Reject(String),
    Deliver(String, bool),
}

#[derive(Default)]
struct RecordingHandle {
    actions: Mutex<Vec<Action>>,
}

#[async_trait]
impl ProtocolHandle for RecordingHandle {
    async fn accept(&self, job_id: &str, _memo_id: &str, _reason: &str) -> Result<()> {
        self.actions.lock().await.push(Action::Accept(job_id.into()));
        Ok(())
    }

    async fn reject(&self, job_id: &str, _memo_id: &str, _reason: &str) -> Result<()> {
        self.actions.lock().await.push(Action::Reject(job_id.into()));
        Ok(())
    }

    async fn deliver(&self, job_id: &str, deliverable: &Deliverable) -> Result<()> {
        self.actions
            .lock()
            .await
            .push(Action::Deliver(job_id.into(), deliverable.success));
        Ok(())
    }
}

struct World {
    agent: Arc<ProtocolAgent>,
    queue: Arc<JobQueue<Job>>,
    handle: Arc<RecordingHandle>,
    tracker: Arc<TransactionTracker>,
    chain: Arc<SerialChain>,
    backend: Arc<CountingBackend>,
}

async fn world() -> World {
    let handle = Arc::new(RecordingHandle::default());
    let chain = Arc::new(SerialChain::new());
    let backend = Arc::new(CountingBackend {
        calls: AtomicU32::new(0),
    });
    let tracker = Arc::new(TransactionTracker::new(Arc::new(MemoryStore::new()), 100));
    let pipeline = Arc::new(DeploymentPipeline::new(
        chain.clone(),
        backend.clone(),
        tracker.clone(),
        "fundry".into(),
        None,
    ));
    let queue = Arc::new(JobQueue::new(QueueConfig {
        job_delay_ms: 1,
        max_job_retries: 0,
    }));
    let agent = ProtocolAgent::new(
        handle.clone(),
        pipeline,
        tracker.clone(),
        queue.clone(),
        None,
        AgentConfig::default(),
    );
    agent.start().await;
    World {
        agent,
        queue,
        handle,
        tracker,
        chain,
        backend,
    }
}

fn job(id: &str, phase: JobPhase) -> Job {
    Job {
        id: id.into(),
        buyer: BUYER.into(),
        phase,
        memos: vec![Memo {
            id: format!("{id}-{phase}"),
            next_phase: Some(phase),
            content: None,
        }],
        params: json!({ "serviceType": "deploy_fund", "agentName": format!("fund-{id}") }),
    }
}

#[tokio::test]
async fn full_job_lifecycle_completes_and_delivers() {
    let w = world().await;

    for phase in [
        JobPhase::Request,
        JobPhase::Negotiation,
        JobPhase::Transaction,
        JobPhase::Evaluation,
    ] {
        w.agent.on_new_task(job("job-1", phase)).await.unwrap();
        // Let each phase drain before the next arrives, as the protocol does
        tokio::time::sleep(Duration::from_millis(80)).await;
    }
    w.queue.shutdown().await;

    let actions = w.handle.actions.lock().await.clone();
    assert!(matches!(actions[0], Action::Accept(ref id) if id == "job-1"));
    assert!(actions
        .iter()
        .any(|a| matches!(a, Action::Deliver(id, true) if id == "job-1")));
    // Evaluation auto-approval is the second accept
    let accepts = actions
        .iter()
        .filter(|a| matches!(a, Action::Accept(_)))
        .count();
    assert_eq!(accepts, 2);

    let record = w.tracker.get_by_job("job-1").await.unwrap();
    assert_eq!(record.status, TxStatus::Completed);
    assert_eq!(record.contract_address.as_deref(), Some(FUND));
    assert_eq!(w.backend.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_jobs_never_overlap_on_chain() {
    let w = world().await;

    for i in 0..4 {
        let id = format!("job-{i}");
        w.agent
            .on_new_task(job(&id, JobPhase::Request))
            .await
            .unwrap();
        w.agent
            .on_new_task(job(&id, JobPhase::Transaction))
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(800)).await;
    w.queue.shutdown().await;

    // One signer: chain transactions must have run strictly one at a time
    assert_eq!(w.chain.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(w.chain.create_calls.load(Ordering::SeqCst), 4);
    assert_eq!(w.backend.calls.load(Ordering::SeqCst), 4);

    for i in 0..4 {
        let record = w.tracker.get_by_job(&format!("job-{i}")).await.unwrap();
        assert_eq!(record.status, TxStatus::Completed);
    }
}

#[tokio::test]
async fn malformed_job_is_rejected_and_nothing_runs() {
    let w = world().await;

    let mut bad = job("job-bad", JobPhase::Request);
    bad.params = json!({ "serviceType": "deploy_fund", "aiWallet": "not-an-address" });
    w.agent.on_new_task(bad).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    w.queue.shutdown().await;

    let actions = w.handle.actions.lock().await.clone();
    assert!(matches!(actions[0], Action::Reject(ref id) if id == "job-bad"));
    assert!(w.tracker.get_by_job("job-bad").await.is_none());
    assert_eq!(w.chain.create_calls.load(Ordering::SeqCst), 0);
    assert_eq!(w.backend.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn shutdown_drains_queued_jobs_before_stopping() {
    let w = world().await;

    w.agent
        .on_new_task(job("job-1", JobPhase::Request))
        .await
        .unwrap();
    w.agent
        .on_new_task(job("job-1", JobPhase::Transaction))
        .await
        .unwrap();
    // Shutdown joins the worker, which finishes what is already queued
    w.queue.shutdown().await;

    let record = w.tracker.get_by_job("job-1").await.unwrap();
    assert_eq!(record.status, TxStatus::Completed);

    let late = w.agent.on_new_task(job("job-2", JobPhase::Request)).await;
    assert!(matches!(late, Err(AgentError::Processing(_))));
}
