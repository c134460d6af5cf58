//! Long-lived HTTP client with bounded retry and exponential backoff
//! (spec §4.4, §7). One client is constructed per service and reused across
//! requests so connections pool.

use std::time::Duration;

use tracing::warn;

use crate::error::PipelineError;

pub struct FetchResponse {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub status: u16,
}

#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(user_agent: &str) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| PipelineError::FatalIo(e.to_string()))?;
        Ok(Self { client })
    }

    /// GET `url`, retrying on a transient status (408/429/5xx) or network
    /// error with `backoff * 2^attempt` between attempts, up to
    /// `max_retries` retries. A non-transient 4xx returns immediately.
    pub async fn fetch_with_retry(
        &self,
        url: &str,
        max_retries: u32,
        backoff: Duration,
    ) -> Result<FetchResponse, PipelineError> {
        let mut attempt = 0u32;
        loop {
            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let content_type = response
                            .headers()
                            .get(reqwest::header::CONTENT_TYPE)
                            .and_then(|v| v.to_str().ok())
                            .map(|s| s.to_string());
                        let status_code = status.as_u16();
                        let bytes = response
                            .bytes()
                            .await
                            .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
                        return Ok(FetchResponse {
                            bytes: bytes.to_vec(),
                            content_type,
                            status: status_code,
                        });
                    }

                    let code = status.as_u16();
                    if !is_transient_status(code) {
                        return Err(PipelineError::FatalIo(format!("HTTP {code} from {url}")));
                    }

                    if attempt >= max_retries {
                        return Err(PipelineError::TransientIo(format!(
                            "HTTP {code} from {url} after {attempt} retries"
                        )));
                    }
                }
                Err(e) => {
                    if attempt >= max_retries {
                        return Err(PipelineError::TransientIo(e.to_string()));
                    }
                    warn!(url, attempt, error = %e, "transient fetch error, retrying");
                }
            }

            let sleep_for = backoff * 2u32.pow(attempt);
            tokio::time::sleep(sleep_for).await;
            attempt += 1;
        }
    }
}

fn is_transient_status(code: u16) -> bool {
    code == 408 || code == 429 || code >= 500
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_transient_status() {
        assert!(is_transient_status(408));
        assert!(is_transient_status(429));
        assert!(is_transient_status(500));
        assert!(is_transient_status(503));
        assert!(!is_transient_status(404));
        assert!(!is_transient_status(403));
    }
}
