pub mod backend;
pub mod chain;
pub mod config;
pub mod error;
pub mod monitor;
pub mod notify;
pub mod pipeline;
pub mod protocol;
pub mod queue;
pub mod resilience;
pub mod tracker;

pub use backend::{QuickDeployClient, QuickDeployRequest, RegistrationClient};
pub use chain::{ChainClient, FundCreated, RpcChainClient};
pub use config::AppConfig;
pub use error::{AgentError, Result};
pub use monitor::{EventMonitor, MatchedDeployment, MonitorConfig};
pub use notify::WebhookNotifier;
pub use pipeline::{DeploymentOutcome, DeploymentPipeline};
pub use protocol::{Deliverable, DeploymentRequest, Job, JobPhase, ProtocolAgent, ProtocolHandle};
pub use queue::JobQueue;
pub use resilience::{with_retry, CircuitBreaker, CircuitState, RateLimiter, RetryConfig};
pub use tracker::{JsonFileStore, MemoryStore, TransactionTracker, TxStatus};
