use thiserror::Error;

/// Errors surfaced by the upstream gateway stack.
///
/// The first five variants classify a single HTTP exchange; the remaining
/// ones are produced by the breaker and retry layers wrapping it.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// No response was received (connect failure, reset, or deadline exceeded)
    #[error("Network error: {0}")]
    Network(String),

    /// Upstream responded with a 5xx status
    #[error("Server error: upstream returned status {status}")]
    Server { status: u16 },

    /// Upstream responded 429
    #[error("Throttled by upstream")]
    Throttled,

    /// Upstream responded with a non-429 4xx status
    #[error("Client error: upstream returned status {status}")]
    Client { status: u16 },

    /// Response body could not be parsed
    #[error("Decode error: {0}")]
    Decode(String),

    /// The circuit is open and the call was rejected without reaching the wire
    #[error("Circuit '{circuit}' is OPEN, retry in {retry_in_secs}s")]
    CircuitOpen { circuit: String, retry_in_secs: i64 },

    /// This failure pushed the circuit over its threshold
    #[error("Circuit '{circuit}' opened after {failures} failures: {source}")]
    CircuitTripped {
        circuit: String,
        failures: u32,
        #[source]
        source: Box<GatewayError>,
    },

    /// The retry budget was spent without a success
    #[error("Retries exhausted after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: usize,
        #[source]
        source: Box<GatewayError>,
    },
}

impl GatewayError {
    /// Whether a fresh attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Network(_) | GatewayError::Server { .. } | GatewayError::Throttled
        )
    }

    /// Whether this error is a breaker rejection (the call never ran).
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, GatewayError::CircuitOpen { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(GatewayError::Network("reset".into()).is_retryable());
        assert!(GatewayError::Server { status: 503 }.is_retryable());
        assert!(GatewayError::Throttled.is_retryable());
        assert!(!GatewayError::Client { status: 404 }.is_retryable());
        assert!(!GatewayError::Decode("bad json".into()).is_retryable());
        assert!(!GatewayError::CircuitOpen {
            circuit: "twitter".into(),
            retry_in_secs: 30
        }
        .is_retryable());
    }
}
