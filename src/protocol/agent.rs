//! Job-phase state machine
//!
//! The protocol network drives each job through REQUEST, NEGOTIATION,
//! TRANSACTION, and EVALUATION; the agent reacts to each phase exactly
//! once. Phase handling errors never escape: they are logged and converted
//! into a reject or a failure deliverable with a sanitized message.
//!
//! All chain-mutating work funnels through the sequential job queue, which
//! is the only thing preventing signer-nonce races.

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::notify::{WebhookNotifier, EVENT_DEPLOYED, EVENT_DEPLOYMENT_FAILED};
use crate::pipeline::{DeploymentOutcome, DeploymentPipeline};
use crate::protocol::job::{DeploymentRequest, Job, JobPhase};
use crate::protocol::{Deliverable, ProtocolHandle};
use crate::queue::JobQueue;
use crate::tracker::{RecordUpdate, TransactionTracker, TxStatus};
use dashmap::DashSet;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Seller-side protocol agent
pub struct ProtocolAgent {
    handle: Arc<dyn ProtocolHandle>,
    pipeline: Arc<DeploymentPipeline>,
    tracker: Arc<TransactionTracker>,
    queue: Arc<JobQueue<Job>>,
    notifier: Option<Arc<WebhookNotifier>>,
    config: AgentConfig,
    /// Guards exactly-once accept/reject/deliver per job phase
    acted: DashSet<String>,
}

impl ProtocolAgent {
    pub fn new(
        handle: Arc<dyn ProtocolHandle>,
        pipeline: Arc<DeploymentPipeline>,
        tracker: Arc<TransactionTracker>,
        queue: Arc<JobQueue<Job>>,
        notifier: Option<Arc<WebhookNotifier>>,
        config: AgentConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            handle,
            pipeline,
            tracker,
            queue,
            notifier,
            config,
            acted: DashSet::new(),
        })
    }

    /// Start the queue worker that dispatches phases one job at a time
    pub async fn start(self: &Arc<Self>) {
        let agent = self.clone();
        self.queue
            .start(move |job| {
                let agent = agent.clone();
                async move { agent.dispatch(job).await }
            })
            .await;
    }

    /// Entry point for jobs arriving from the protocol network
    pub async fn on_new_task(&self, job: Job) -> Result<()> {
        debug!("job {} arrived in phase {}", job.id, job.phase);
        let priority = phase_priority(job.phase);
        self.queue.enqueue(job, priority).await
    }

    /// Mark an action done; false means it already happened
    fn first_time(&self, job_id: &str, action: &str) -> bool {
        self.acted.insert(format!("{job_id}:{action}"))
    }

    async fn dispatch(&self, job: Job) -> Result<()> {
        let result = match job.phase {
            JobPhase::Request => self.handle_request(&job).await,
            JobPhase::Negotiation => self.handle_negotiation(&job).await,
            JobPhase::Transaction => self.handle_transaction(&job).await,
            JobPhase::Evaluation => self.handle_evaluation(&job).await,
        };

        // Keep the worker alive no matter what went wrong in a handler
        if let Err(e) = result {
            error!("unhandled error in {} phase of job {}: {e}", job.phase, job.id);
        }
        Ok(())
    }

    /// REQUEST: validate the service requirement, open a transaction record,
    /// and accept; anything malformed is rejected with the reason.
    async fn handle_request(&self, job: &Job) -> Result<()> {
        let memo_id = job.latest_memo_id();

        let request = match DeploymentRequest::from_job(job, &self.config.agent_name_default) {
            Ok(request) => request,
            Err(e) => {
                warn!("rejecting job {}: {e}", job.id);
                if self.first_time(&job.id, "respond") {
                    self.handle.reject(&job.id, &memo_id, &e.sanitized()).await?;
                }
                return Ok(());
            }
        };

        // The record may already exist when phases arrive out of order
        if self.tracker.get_by_job(&job.id).await.is_none() {
            if let Err(e) = self
                .tracker
                .create(&job.id, &request.buyer, &request.agent_name, None)
                .await
            {
                warn!("rejecting job {}: {e}", job.id);
                if self.first_time(&job.id, "respond") {
                    self.handle.reject(&job.id, &memo_id, &e.sanitized()).await?;
                }
                return Ok(());
            }
        }

        if self.first_time(&job.id, "respond") {
            self.handle
                .accept(&job.id, &memo_id, "deployment request accepted")
                .await?;
            info!("accepted job {} for agent '{}'", job.id, request.agent_name);
        }
        Ok(())
    }

    /// NEGOTIATION: price and deliverable shape are fixed, nothing to counter
    async fn handle_negotiation(&self, job: &Job) -> Result<()> {
        debug!("job {} negotiation: terms are fixed, proceeding", job.id);
        Ok(())
    }

    /// TRANSACTION: run the deployment pipeline and deliver the outcome
    async fn handle_transaction(&self, job: &Job) -> Result<()> {
        if !self.first_time(&job.id, "transaction") {
            debug!("transaction phase for job {} already handled", job.id);
            return Ok(());
        }
        // Errors before the pipeline still owe the buyer an answer
        let request = match DeploymentRequest::from_job(job, &self.config.agent_name_default) {
            Ok(request) => request,
            Err(e) => {
                return self
                    .deliver_failure(job, &self.config.agent_name_default, &e)
                    .await
            }
        };

        // A job can land here without having passed through REQUEST locally
        // (process restart); make sure a record exists either way.
        let record = match self
            .tracker
            .get_by_job(&job.id)
            .await
            .filter(|r| !r.status.is_terminal())
        {
            Some(record) => record,
            None => {
                match self
                    .tracker
                    .create(&job.id, &request.buyer, &request.agent_name, None)
                    .await
                {
                    Ok(record) => record,
                    Err(e) => return self.deliver_failure(job, &request.agent_name, &e).await,
                }
            }
        };

        if let Err(e) = self
            .tracker
            .update(&record.id, RecordUpdate::status(TxStatus::Processing))
            .await
        {
            return self.deliver_failure(job, &request.agent_name, &e).await;
        }

        match self.pipeline.execute(&record.id, &request).await {
            Ok(outcome) => self.complete(job, &record.id, &outcome).await,
            Err(e) => self.fail(job, &record.id, &request.agent_name, e).await,
        }
    }

    /// Failure deliverable for jobs that never reached the pipeline,
    /// so the buyer is not left waiting on a silently dropped job
    async fn deliver_failure(&self, job: &Job, agent_name: &str, err: &AgentError) -> Result<()> {
        error!("job {} failed before deployment: {err}", job.id);
        if self.first_time(&job.id, "deliver") {
            let deliverable = Deliverable::failed(agent_name, err);
            self.handle.deliver(&job.id, &deliverable).await?;
        }
        Ok(())
    }

    async fn complete(&self, job: &Job, record_id: &str, outcome: &DeploymentOutcome) -> Result<()> {
        self.tracker
            .update(record_id, RecordUpdate::status(TxStatus::Completed))
            .await?;

        if self.first_time(&job.id, "deliver") {
            let deliverable = Deliverable::succeeded(outcome);
            self.handle.deliver(&job.id, &deliverable).await?;
            info!(
                "delivered job {}: fund {} for '{}'",
                job.id, outcome.contract_address, outcome.agent_name
            );
        }

        self.notify(
            record_id,
            EVENT_DEPLOYED,
            json!({
                "jobId": job.id,
                "agentName": outcome.agent_name,
                "contractAddress": outcome.contract_address,
                "creationTxHash": outcome.creation_tx_hash,
                "paymentTxHash": outcome.payment_tx_hash,
            }),
        )
        .await;
        Ok(())
    }

    async fn fail(&self, job: &Job, record_id: &str, agent_name: &str, err: AgentError) -> Result<()> {
        error!("deployment failed for job {}: {err}", job.id);
        self.tracker
            .update(
                record_id,
                RecordUpdate {
                    status: Some(TxStatus::Failed),
                    error: Some(err.to_string()),
                    ..Default::default()
                },
            )
            .await?;

        if self.first_time(&job.id, "deliver") {
            let deliverable = Deliverable::failed(agent_name, &err);
            self.handle.deliver(&job.id, &deliverable).await?;
        }

        self.notify(
            record_id,
            EVENT_DEPLOYMENT_FAILED,
            json!({
                "jobId": job.id,
                "agentName": agent_name,
                "error": err.sanitized(),
                "errorCode": err.code(),
            }),
        )
        .await;
        Ok(())
    }

    /// EVALUATION: approve when the deployment completed, otherwise log
    async fn handle_evaluation(&self, job: &Job) -> Result<()> {
        let memo_id = job.latest_memo_id();
        let completed = self
            .tracker
            .get_by_job(&job.id)
            .await
            .map(|r| r.status == TxStatus::Completed)
            .unwrap_or(false);

        if completed {
            if self.first_time(&job.id, "evaluate") {
                self.handle
                    .accept(&job.id, &memo_id, "deployment verified")
                    .await?;
                info!("auto-approved evaluation for job {}", job.id);
            }
        } else {
            warn!("evaluation for job {} without completed deployment", job.id);
        }
        Ok(())
    }

    /// Best-effort completion webhook; a lost notification never fails a job
    async fn notify(&self, record_id: &str, event: &str, data: serde_json::Value) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        match notifier.send(event, &data).await {
            Ok(()) => {
                let update = RecordUpdate {
                    notification_sent: Some(true),
                    ..Default::default()
                };
                if let Err(e) = self.tracker.update(record_id, update).await {
                    warn!("could not record notification flag: {e}");
                }
            }
            Err(e) => warn!("webhook delivery failed for {event}: {e}"),
        }
    }
}

/// TRANSACTION carries the chain work and runs ahead of paperwork phases
fn phase_priority(phase: JobPhase) -> i32 {
    match phase {
        JobPhase::Transaction => 2,
        JobPhase::Evaluation => 1,
        JobPhase::Request | JobPhase::Negotiation => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{QuickDeployRequest, RegistrationClient};
    use crate::chain::{ChainClient, FundCreated, FundCreatedEvent, PaymentTransferEvent};
    use crate::config::QueueConfig;
    use crate::protocol::job::Memo;
    use crate::tracker::MemoryStore;
    use alloy::primitives::Address;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex;

    const BUYER: &str = "0xcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcd";

    #[derive(Debug, Clone, PartialEq)]
    enum Action {
        Accept(String, String),
        Reject(String, String),
        Deliver(String, bool),
    }

    #[derive(Default)]
    struct RecordingHandle {
        actions: Mutex<Vec<Action>>,
    }

    impl RecordingHandle {
        async fn actions(&self) -> Vec<Action> {
            self.actions.lock().await.clone()
        }
    }

    #[async_trait]
    impl ProtocolHandle for RecordingHandle {
        async fn accept(&self, job_id: &str, _memo_id: &str, reason: &str) -> Result<()> {
            self.actions
                .lock()
                .await
                .push(Action::Accept(job_id.into(), reason.into()));
            Ok(())
        }

        async fn reject(&self, job_id: &str, _memo_id: &str, reason: &str) -> Result<()> {
            self.actions
                .lock()
                .await
                .push(Action::Reject(job_id.into(), reason.into()));
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

    struct StubChain {
        fail_create: bool,
        create_calls: AtomicU32,
    }

    #[async_trait]
    impl ChainClient for StubChain {
        fn signer_address(&self) -> Address {
            Address::ZERO
        }

        async fn simulate_deployment(&self, _ai_wallet: Address) -> Result<()> {
            Ok(())
        }

        async fn create_fund(&self, _ai_wallet: Address) -> Result<FundCreated> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_create {
                return Err(AgentError::Contract("execution reverted".into()));
            }
            Ok(FundCreated {
                tx_hash: format!("0x{}", "aa".repeat(32)),
                fund_address: "0x00000000000000000000000000000000000f00d1"
                    .parse()
                    .unwrap(),
            })
        }

        async fn transfer_payment(&self) -> Result<String> {
            Ok(format!("0x{}", "bb".repeat(32)))
        }

        async fn enable_trading(&self, _fund: Address) -> Result<String> {
            Ok(format!("0x{}", "cc".repeat(32)))
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

    struct StubBackend;

    #[async_trait]
    impl RegistrationClient for StubBackend {
        async fn register(&self, _request: &QuickDeployRequest) -> Result<serde_json::Value> {
            Ok(serde_json::json!({ "status": "registered" }))
        }
    }

    struct Harness {
        agent: Arc<ProtocolAgent>,
        handle: Arc<RecordingHandle>,
        tracker: Arc<TransactionTracker>,
    }

    async fn harness(fail_create: bool) -> Harness {
        let handle = Arc::new(RecordingHandle::default());
        let tracker = Arc::new(TransactionTracker::new(Arc::new(MemoryStore::new()), 100));
        let chain = Arc::new(StubChain {
            fail_create,
            create_calls: AtomicU32::new(0),
        });
        let pipeline = Arc::new(DeploymentPipeline::new(
            chain,
            Arc::new(StubBackend),
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
            queue,
            None,
            AgentConfig::default(),
        );
        Harness {
            agent,
            handle,
            tracker,
        }
    }

    fn job(id: &str, phase: JobPhase, params: serde_json::Value) -> Job {
        Job {
            id: id.into(),
            buyer: BUYER.into(),
            phase,
            memos: vec![Memo {
                id: "memo-1".into(),
                next_phase: Some(phase),
                content: None,
            }],
            params,
        }
    }

    fn valid_params() -> serde_json::Value {
        serde_json::json!({ "serviceType": "deploy_fund", "agentName": "my-fund" })
    }

    #[tokio::test]
    async fn test_request_phase_accepts_and_opens_record() {
        let h = harness(false).await;
        h.agent
            .dispatch(job("job-1", JobPhase::Request, valid_params()))
            .await
            .unwrap();

        let actions = h.handle.actions().await;
        assert!(matches!(&actions[0], Action::Accept(id, _) if id == "job-1"));

        let record = h.tracker.get_by_job("job-1").await.unwrap();
        assert_eq!(record.status, TxStatus::Pending);
        assert_eq!(record.agent_name, "my-fund");
    }

    #[tokio::test]
    async fn test_invalid_requirement_rejected_without_record() {
        let h = harness(false).await;
        h.agent
            .dispatch(job(
                "job-1",
                JobPhase::Request,
                serde_json::json!({ "serviceType": "write_poetry" }),
            ))
            .await
            .unwrap();

        let actions = h.handle.actions().await;
        assert!(matches!(&actions[0], Action::Reject(id, _) if id == "job-1"));
        assert!(h.tracker.get_by_job("job-1").await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_request_phase_responds_once() {
        let h = harness(false).await;
        let request = job("job-1", JobPhase::Request, valid_params());
        h.agent.dispatch(request.clone()).await.unwrap();
        h.agent.dispatch(request).await.unwrap();

        let accepts = h
            .handle
            .actions()
            .await
            .iter()
            .filter(|a| matches!(a, Action::Accept(_, _)))
            .count();
        assert_eq!(accepts, 1);
    }

    #[tokio::test]
    async fn test_transaction_phase_delivers_success() {
        let h = harness(false).await;
        h.agent
            .dispatch(job("job-1", JobPhase::Request, valid_params()))
            .await
            .unwrap();
        h.agent
            .dispatch(job("job-1", JobPhase::Transaction, valid_params()))
            .await
            .unwrap();

        let actions = h.handle.actions().await;
        assert!(actions.contains(&Action::Deliver("job-1".into(), true)));

        let record = h.tracker.get_by_job("job-1").await.unwrap();
        assert_eq!(record.status, TxStatus::Completed);
        assert!(record.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_transaction_failure_delivers_sanitized_failure() {
        let h = harness(true).await;
        h.agent
            .dispatch(job("job-1", JobPhase::Request, valid_params()))
            .await
            .unwrap();
        h.agent
            .dispatch(job("job-1", JobPhase::Transaction, valid_params()))
            .await
            .unwrap();

        let actions = h.handle.actions().await;
        assert!(actions.contains(&Action::Deliver("job-1".into(), false)));

        let record = h.tracker.get_by_job("job-1").await.unwrap();
        assert_eq!(record.status, TxStatus::Failed);
        assert!(record.error.is_some());
    }

    #[tokio::test]
    async fn test_evaluation_auto_approves_completed_deployment() {
        let h = harness(false).await;
        h.agent
            .dispatch(job("job-1", JobPhase::Request, valid_params()))
            .await
            .unwrap();
        h.agent
            .dispatch(job("job-1", JobPhase::Transaction, valid_params()))
            .await
            .unwrap();
        h.agent
            .dispatch(job("job-1", JobPhase::Evaluation, valid_params()))
            .await
            .unwrap();

        let accepts = h
            .handle
            .actions()
            .await
            .iter()
            .filter(|a| matches!(a, Action::Accept(_, _)))
            .count();
        // One for the request, one for the evaluation approval
        assert_eq!(accepts, 2);
    }

    #[tokio::test]
    async fn test_transaction_parse_failure_still_answers_buyer() {
        let h = harness(false).await;
        h.agent
            .dispatch(job(
                "job-1",
                JobPhase::Transaction,
                serde_json::json!({
                    "serviceType": "deploy_fund",
                    "aiWallet": "not-an-address",
                }),
            ))
            .await
            .unwrap();

        // The job never reached the pipeline, but it was not dropped silently
        let actions = h.handle.actions().await;
        assert_eq!(actions, vec![Action::Deliver("job-1".into(), false)]);
        assert!(h.tracker.get_by_job("job-1").await.is_none());
    }

    #[tokio::test]
    async fn test_transaction_without_prior_request_creates_record() {
        let h = harness(false).await;
        h.agent
            .dispatch(job("job-1", JobPhase::Transaction, valid_params()))
            .await
            .unwrap();

        let record = h.tracker.get_by_job("job-1").await.unwrap();
        assert_eq!(record.status, TxStatus::Completed);
        assert!(h
            .handle
            .actions()
            .await
            .contains(&Action::Deliver("job-1".into(), true)));
    }
}
