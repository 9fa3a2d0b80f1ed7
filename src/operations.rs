//! Polling of long-running operations.
//!
//! An operation resource is GET-polled until its `done` flag is set, with
//! exponential backoff. This is the only place in the crate with automatic
//! retries, and the wait is bounded by [`PollConfig::timeout`].

use std::time::Duration;

use serde_json::Value;

use crate::client::{Transport, TransportExt};
use crate::errors::Error;
use crate::request::{Method, RequestSpec};

/// Backoff and budget for an operation poll loop.
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    /// Total wait budget across all polls.
    pub timeout: Duration,
    /// Delay before the second poll.
    pub initial_delay: Duration,
    /// Backoff multiplier applied after each poll.
    pub multiplier: f64,
    /// Upper bound on a single delay.
    pub max_delay: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(900),
            initial_delay: Duration::from_secs(1),
            multiplier: 1.5,
            max_delay: Duration::from_secs(20),
        }
    }
}

/// Polls `operation_name` until it completes, returning its `response`
/// payload.
///
/// Elapsed time accumulates the delays actually slept; when it exceeds the
/// budget the loop stops before sleeping again.
///
/// # Errors
///
/// [`Error::Operation`] when the operation reports an error payload,
/// [`Error::OperationTimeout`] when the budget is exhausted, plus any
/// transport failure.
pub async fn poll_operation<T>(
    transport: &T,
    operation_name: &str,
    config: PollConfig,
) -> Result<Value, Error>
where
    T: Transport + Sync + ?Sized,
{
    let mut delay = config.initial_delay;
    let mut elapsed = Duration::ZERO;

    loop {
        let operation = transport
            .request(Method::GET, operation_name, RequestSpec::empty(), None)
            .await?
            .ok_or_else(|| {
                Error::InvalidInput(format!("empty operation body for {operation_name}"))
            })?;

        if let Some(error) = operation.get("error") {
            return Err(Error::Operation {
                name: operation_name.to_string(),
                payload: error.clone(),
            });
        }
        if operation.get("done").and_then(Value::as_bool) == Some(true) {
            return Ok(operation.get("response").cloned().unwrap_or(Value::Null));
        }

        if elapsed >= config.timeout {
            return Err(Error::OperationTimeout {
                name: operation_name.to_string(),
                elapsed_secs: elapsed.as_secs_f64(),
            });
        }

        log::debug!("operation {operation_name} not done, waiting {delay:?}");
        tokio::time::sleep(delay).await;
        elapsed += delay;
        delay = next_delay(delay, &config);
    }
}

/// Next backoff delay: scaled by the multiplier, capped at the maximum.
fn next_delay(delay: Duration, config: &PollConfig) -> Duration {
    let scaled = delay.mul_f64(config.multiplier);
    if scaled > config.max_delay {
        config.max_delay
    } else {
        scaled
    }
}
