use thiserror::Error;

/// Main error type for the deployment agent
#[derive(Error, Debug)]
pub enum AgentError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Input validation (never retried; rejects the job immediately)
    #[error("Validation failed for {field}: {message}")]
    Validation { field: String, message: String },

    // Generic job-processing failure
    #[error("Processing error: {0}")]
    Processing(String),

    // External dependency degraded (retryable)
    #[error("Service error from {endpoint} (status {status}): {message}")]
    Service {
        endpoint: String,
        status: u16,
        message: String,
    },

    // On-chain call failed (retryable only when gas/nonce related)
    #[error("Contract error: {0}")]
    Contract(String),

    // Backend rejected the request (retryable only for 429/5xx)
    #[error("API error from {endpoint} (status {status}): {message}")]
    Api {
        endpoint: String,
        status: u16,
        message: String,
    },

    // Payment verification failed
    #[error("Payment error: {0}")]
    Payment(String),

    // Operation exceeded its deadline (retryable)
    #[error("Timeout in {operation} after {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    // Circuit breaker fast-fail
    #[error("Circuit '{name}' is open")]
    CircuitOpen { name: String },

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Crypto/signing errors
    #[error("Wallet error: {0}")]
    Wallet(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for AgentError
pub type Result<T> = std::result::Result<T, AgentError>;

impl AgentError {
    /// Machine-readable error code surfaced in logs and deliverables
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::Config(_) => "CONFIG_ERROR",
            AgentError::Validation { .. } => "VALIDATION_ERROR",
            AgentError::Processing(_) => "PROCESSING_ERROR",
            AgentError::Service { .. } => "SERVICE_ERROR",
            AgentError::Contract(_) => "CONTRACT_ERROR",
            AgentError::Api { .. } => "API_ERROR",
            AgentError::Payment(_) => "PAYMENT_ERROR",
            AgentError::Timeout { .. } => "TIMEOUT_ERROR",
            AgentError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            AgentError::Http(_) => "HTTP_ERROR",
            AgentError::Json(_) => "SERIALIZATION_ERROR",
            AgentError::Io(_) => "IO_ERROR",
            AgentError::Wallet(_) => "WALLET_ERROR",
            AgentError::Internal(_) | AgentError::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether a retry could plausibly succeed.
    ///
    /// Timeouts and degraded services are transient. Contract errors retry
    /// only for gas/nonce problems; everything else about a chain call is
    /// deterministic. Validation and auth failures never retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentError::Timeout { .. } => true,
            AgentError::Service { .. } => true,
            // Any transport-level failure is transient, including a
            // connection dropped mid-response; only client misconfiguration
            // is worth giving up on
            AgentError::Http(e) => !e.is_builder(),
            AgentError::Contract(msg) => {
                let msg = msg.to_ascii_lowercase();
                msg.contains("gas") || msg.contains("nonce")
            }
            AgentError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Human-readable message safe to surface to the protocol counterparty.
    ///
    /// Full detail (endpoints, statuses, inner errors) stays in the logs.
    pub fn sanitized(&self) -> String {
        match self {
            AgentError::Validation { field, message } => {
                format!("Invalid request: {field}: {message}")
            }
            AgentError::Payment(_) => "Payment verification failed".to_string(),
            AgentError::Contract(_) => "On-chain deployment step failed".to_string(),
            AgentError::Service { .. } | AgentError::CircuitOpen { .. } => {
                "A backing service is temporarily unavailable".to_string()
            }
            AgentError::Api { .. } => "Registration with the backend failed".to_string(),
            AgentError::Timeout { operation, .. } => {
                format!("Operation timed out: {operation}")
            }
            AgentError::Processing(msg) => msg.clone(),
            _ => "Internal error while processing the job".to_string(),
        }
    }

    /// Shorthand for a validation error
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AgentError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(AgentError::Timeout {
            operation: "call".into(),
            elapsed_ms: 100
        }
        .is_retryable());
        assert!(AgentError::Service {
            endpoint: "/quick-deploy".into(),
            status: 503,
            message: "down".into()
        }
        .is_retryable());
        assert!(AgentError::Contract("nonce too low".into()).is_retryable());
        assert!(AgentError::Contract("out of gas".into()).is_retryable());
        assert!(!AgentError::Contract("execution reverted".into()).is_retryable());
        assert!(!AgentError::validation("agentName", "bad").is_retryable());
        assert!(AgentError::Api {
            endpoint: "/quick-deploy".into(),
            status: 429,
            message: "slow down".into()
        }
        .is_retryable());
        assert!(!AgentError::Api {
            endpoint: "/quick-deploy".into(),
            status: 403,
            message: "no".into()
        }
        .is_retryable());
    }

    #[tokio::test]
    async fn test_transport_errors_are_retryable() {
        // Nothing listens on port 1; the refused connection stands in for
        // any mid-flight transport failure
        let transport = reqwest::get("http://127.0.0.1:1").await.unwrap_err();
        assert!(AgentError::Http(transport).is_retryable());

        // A misconfigured client will fail identically on every attempt
        let builder = reqwest::Client::builder()
            .user_agent("\n")
            .build()
            .unwrap_err();
        assert!(!AgentError::Http(builder).is_retryable());
    }

    #[test]
    fn test_sanitized_hides_internals() {
        let err = AgentError::Api {
            endpoint: "https://backend.internal/quick-deploy".into(),
            status: 500,
            message: "stack trace here".into(),
        };
        let sanitized = err.sanitized();
        assert!(!sanitized.contains("backend.internal"));
        assert!(!sanitized.contains("stack trace"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(AgentError::Payment("short".into()).code(), "PAYMENT_ERROR");
        assert_eq!(
            AgentError::CircuitOpen {
                name: "backend".into()
            }
            .code(),
            "CIRCUIT_OPEN"
        );
    }
}
