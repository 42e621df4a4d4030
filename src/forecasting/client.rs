use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::{Forecast, ForecastOptions, ForecastingProvider};
use crate::config::RequestConfig;
use crate::error::{ForecastError, ForecastResult};

#[derive(Debug, Serialize)]
struct ForecastRequest<'a> {
    series: &'a [f64],
    horizon_minutes: u32,
    confidence_level: f64,
}

/// Client for a remote forecasting service.
///
/// Posts the series to `{base_url}/v1/forecast` and expects
/// `{"value": f64, "confidence": f64}` back.
#[derive(Clone)]
pub struct HttpForecastingClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    request_config: RequestConfig,
}

impl HttpForecastingClient {
    /// Create a new forecasting client
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        request_config: RequestConfig,
    ) -> ForecastResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(ForecastError::Http)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            request_config,
        })
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Execute a single request (internal)
    async fn execute_request(
        &self,
        url: &str,
        request: &ForecastRequest<'_>,
    ) -> ForecastResult<Forecast> {
        debug!(points = request.series.len(), "Calling forecasting service");

        let mut builder = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ForecastError::Timeout {
                    timeout_ms: self.request_config.timeout_ms,
                }
            } else {
                ForecastError::Http(e)
            }
        })?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ForecastError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let forecast: Forecast =
            response
                .json()
                .await
                .map_err(|e| ForecastError::InvalidResponse {
                    message: format!("Failed to parse response: {}", e),
                })?;

        if !(0.0..=1.0).contains(&forecast.confidence) {
            return Err(ForecastError::InvalidResponse {
                message: format!("confidence {} outside [0, 1]", forecast.confidence),
            });
        }

        Ok(forecast)
    }
}

#[async_trait]
impl ForecastingProvider for HttpForecastingClient {
    async fn predict(&self, series: &[f64], options: &ForecastOptions) -> ForecastResult<Forecast> {
        let url = format!("{}/v1/forecast", self.base_url);
        let request = ForecastRequest {
            series,
            horizon_minutes: options.horizon_minutes,
            confidence_level: options.confidence_level,
        };

        let mut last_error = None;
        let mut retries = 0;

        while retries <= self.request_config.max_retries {
            if retries > 0 {
                let delay = Duration::from_millis(
                    self.request_config.retry_delay_ms * (2_u64.pow(retries - 1)),
                );
                warn!(
                    retry = retries,
                    delay_ms = delay.as_millis(),
                    "Retrying forecast request"
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();

            match self.execute_request(&url, &request).await {
                Ok(forecast) => {
                    info!(
                        confidence = forecast.confidence,
                        latency_ms = start.elapsed().as_millis(),
                        "Forecast call succeeded"
                    );
                    return Ok(forecast);
                }
                // Malformed answers will not improve on retry.
                Err(e @ ForecastError::InvalidResponse { .. }) => return Err(e),
                Err(e) => {
                    error!(
                        error = %e,
                        latency_ms = start.elapsed().as_millis(),
                        retry = retries,
                        "Forecast call failed"
                    );
                    last_error = Some(e);
                    retries += 1;
                }
            }
        }

        Err(ForecastError::Unavailable {
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
            retries,
        })
    }
}
