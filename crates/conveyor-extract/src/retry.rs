//! Two independent retry loops for a single C3 invocation (spec.md §4.4.1).

use conveyor_core::traits::{ExtractionApiClient, ExtractionResponse};
use std::time::Duration;

pub(crate) const NETWORK_MAX_RETRIES: u32 = 5;
const NETWORK_RETRY_DELAY: Duration = Duration::from_secs(12);

#[derive(Debug)]
pub(crate) struct AttemptResult {
    pub response: ExtractionResponse,
    pub attempts: u32,
}

#[derive(Debug, thiserror::Error)]
#[error("network abort after {attempts} attempts")]
pub(crate) struct NetworkAbort {
    pub attempts: u32,
}

/// Retries a transport failure (`statusCode == 0`) up to
/// `NETWORK_MAX_RETRIES` times with a fixed delay, and an HTTP 429/5xx
/// response up to `max_retries` times with linear backoff. Any other
/// response (including HTTP success) is returned on the first attempt.
pub(crate) async fn submit_with_retries(
    client: &dyn ExtractionApiClient,
    relative_path: &str,
    body_base64: &str,
    max_retries: u32,
    retry_backoff_ms: u64,
) -> Result<AttemptResult, NetworkAbort> {
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        match client.submit(relative_path, body_base64).await {
            Err(_transport) => {
                if attempt < NETWORK_MAX_RETRIES {
                    tokio::time::sleep(NETWORK_RETRY_DELAY).await;
                    continue;
                }
                return Err(NetworkAbort { attempts: attempt });
            }
            Ok(response) => {
                let retriable =
                    response.http_status == 429 || (500..600).contains(&response.http_status);
                if retriable && attempt <= max_retries {
                    let backoff = Duration::from_millis(retry_backoff_ms * attempt as u64);
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                return Ok(AttemptResult {
                    response,
                    attempts: attempt,
                });
            }
        }
    }
}

/// Truncates to 500 chars and appends `" (after N attempts)"` when `N > 1`
/// (spec.md §4.4 step 5).
pub(crate) fn format_error_message(raw: &str, attempts: u32) -> String {
    let truncated: String = raw.chars().take(500).collect();
    if attempts > 1 {
        format!("{truncated} (after {attempts} attempts)")
    } else {
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conveyor_core::traits::ExtractionApiError;
    use std::collections::VecDeque;
    use tokio::sync::Mutex as TokioMutex;

    struct ScriptedClient {
        responses: TokioMutex<VecDeque<Result<ExtractionResponse, ExtractionApiError>>>,
    }

    #[async_trait]
    impl ExtractionApiClient for ScriptedClient {
        async fn submit(
            &self,
            _relative_path: &str,
            _body_base64: &str,
        ) -> Result<ExtractionResponse, ExtractionApiError> {
            self.responses
                .lock()
                .await
                .pop_front()
                .expect("no more scripted responses")
        }
    }

    fn ok(status: u16) -> Result<ExtractionResponse, ExtractionApiError> {
        Ok(ExtractionResponse {
            http_status: status,
            latency_ms: 1,
            body_bytes: bytes::Bytes::from_static(b"{}"),
        })
    }

    #[tokio::test]
    async fn five_consecutive_transport_failures_abort() {
        let client = ScriptedClient {
            responses: TokioMutex::new(
                std::iter::repeat_with(|| Err(ExtractionApiError("boom".into())))
                    .take(5)
                    .collect(),
            ),
        };

        let err = submit_with_retries(&client, "a.csv", "", 2, 10)
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 5);
    }

    #[tokio::test]
    async fn four_failures_then_success_reports_five_attempts() {
        let client = ScriptedClient {
            responses: TokioMutex::new(
                vec![ok(503), ok(503), ok(503), ok(503), ok(200)]
                    .into_iter()
                    .collect(),
            ),
        };

        let result = submit_with_retries(&client, "a.csv", "", 4, 1)
            .await
            .unwrap();
        assert_eq!(result.attempts, 5);
        assert_eq!(result.response.http_status, 200);
    }

    #[tokio::test]
    async fn non_retriable_status_terminates_on_first_attempt() {
        let client = ScriptedClient {
            responses: TokioMutex::new(vec![ok(404)].into_iter().collect()),
        };

        let result = submit_with_retries(&client, "a.csv", "", 3, 10)
            .await
            .unwrap();
        assert_eq!(result.attempts, 1);
    }
}
