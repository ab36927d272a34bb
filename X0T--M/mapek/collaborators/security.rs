use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::MapekResult;

/// Zero-trust validation counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ValidationStats {
    /// Validations attempted.
    pub total: u64,
    /// Validations passed.
    pub passed: u64,
    /// Explicit success rate; derived from the counters when absent.
    pub success_rate: Option<f64>,
}

impl ValidationStats {
    /// Success rate, explicit or derived; `None` before any validation.
    #[must_use]
    pub fn rate(&self) -> Option<f64> {
        self.success_rate.or_else(|| {
            (self.total > 0).then(|| {
                #[allow(clippy::cast_precision_loss)]
                let rate = self.passed as f64 / self.total as f64;
                rate
            })
        })
    }
}

/// Source of zero-trust validation statistics.
#[async_trait]
pub trait ZeroTrustValidator: Send + Sync {
    /// Current counters.
    async fn validation_stats(&self) -> MapekResult<ValidationStats>;
}

/// Validator with a settable success rate.
#[derive(Debug)]
pub struct StaticZeroTrust {
    rate: RwLock<f64>,
}

impl Default for StaticZeroTrust {
    fn default() -> Self {
        Self::new(0.95)
    }
}

impl StaticZeroTrust {
    /// Creates a validator reporting `rate`.
    #[must_use]
    pub fn new(rate: f64) -> Self {
        Self {
            rate: RwLock::new(rate.clamp(0.0, 1.0)),
        }
    }

    /// Updates the reported rate.
    pub fn set_rate(&self, rate: f64) {
        *self.rate.write() = rate.clamp(0.0, 1.0);
    }
}

#[async_trait]
impl ZeroTrustValidator for StaticZeroTrust {
    async fn validation_stats(&self) -> MapekResult<ValidationStats> {
        Ok(ValidationStats {
            success_rate: Some(*self.rate.read()),
            ..ValidationStats::default()
        })
    }
}
