//! Forecasting collaborator.
//!
//! The cascade predictor asks a [`ForecastingProvider`] how likely the trigger's
//! degradation is to continue, and scales path probabilities by the answer.
//! [`HttpForecastingClient`] talks to a remote forecasting service;
//! [`StaticForecaster`] returns a fixed answer and is used in tests and when
//! analyses should be reproducible.

mod client;

pub use client::HttpForecastingClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ForecastingConfig;
use crate::error::ForecastResult;

/// Options passed with every forecast request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastOptions {
    pub horizon_minutes: u32,
    pub confidence_level: f64,
}

impl Default for ForecastOptions {
    fn default() -> Self {
        Self {
            horizon_minutes: 30,
            confidence_level: 0.95,
        }
    }
}

impl From<&ForecastingConfig> for ForecastOptions {
    fn from(config: &ForecastingConfig) -> Self {
        Self {
            horizon_minutes: config.horizon_minutes,
            confidence_level: config.confidence_level,
        }
    }
}

/// A forecast for the next point of a series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    /// Predicted value.
    pub value: f64,
    /// Confidence in the prediction (0.0-1.0).
    pub confidence: f64,
}

/// Predicts the continuation of a health series.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ForecastingProvider: Send + Sync {
    async fn predict(&self, series: &[f64], options: &ForecastOptions) -> ForecastResult<Forecast>;
}

/// Provider that always returns the same confidence.
///
/// The predicted value is the last point of the series.
#[derive(Debug, Clone, Copy)]
pub struct StaticForecaster {
    confidence: f64,
}

impl StaticForecaster {
    pub fn new(confidence: f64) -> Self {
        Self {
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

#[async_trait]
impl ForecastingProvider for StaticForecaster {
    async fn predict(&self, series: &[f64], _options: &ForecastOptions) -> ForecastResult<Forecast> {
        Ok(Forecast {
            value: series.last().copied().unwrap_or(0.0),
            confidence: self.confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_forecaster_echoes_last_point() {
        let forecaster = StaticForecaster::new(0.8);
        let forecast = forecaster
            .predict(&[1.0, 0.7, 0.4], &ForecastOptions::default())
            .await
            .unwrap();
        assert_eq!(forecast.value, 0.4);
        assert_eq!(forecast.confidence, 0.8);
    }

    #[tokio::test]
    async fn test_static_forecaster_clamps_confidence() {
        let forecast = StaticForecaster::new(1.7)
            .predict(&[], &ForecastOptions::default())
            .await
            .unwrap();
        assert_eq!(forecast.confidence, 1.0);
        assert_eq!(forecast.value, 0.0);
    }

    #[test]
    fn test_options_from_config() {
        let config = ForecastingConfig {
            horizon_minutes: 15,
            confidence_level: 0.9,
            ..ForecastingConfig::default()
        };
        let options = ForecastOptions::from(&config);
        assert_eq!(options.horizon_minutes, 15);
        assert_eq!(options.confidence_level, 0.9);
    }
}
