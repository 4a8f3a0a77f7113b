//! Pipeline configuration

use serde::{Deserialize, Serialize};

/// Configuration for a [`PoolContext`](crate::PoolContext)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Fresh buffer allocations tolerated before the pool warns
    ///
    /// A steadily growing allocation count means buffers are not being
    /// returned to the pool.
    ///
    /// Default: 1024
    pub allocation_warning_threshold: usize,

    /// Smallest normalization denominator treated as meaningful
    ///
    /// Probability and density results whose total weight falls below this
    /// are reported as all-NaN.
    ///
    /// Default: 1e-6
    pub normalization_epsilon: f32,

    /// Minimum output size, in cells, for parallel kernel evaluation
    ///
    /// Default: 4096
    pub parallel_threshold: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            allocation_warning_threshold: 1024,
            normalization_epsilon: 1e-6,
            parallel_threshold: 4096,
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for tests: strict allocation budget, sequential kernels
    pub fn debug() -> Self {
        Self {
            allocation_warning_threshold: 64,
            parallel_threshold: usize::MAX,
            ..Default::default()
        }
    }

    /// Set the allocation warning threshold
    pub fn with_allocation_warning_threshold(mut self, threshold: usize) -> Self {
        self.allocation_warning_threshold = threshold;
        self
    }

    /// Set the normalization epsilon
    pub fn with_normalization_epsilon(mut self, epsilon: f32) -> Self {
        self.normalization_epsilon = epsilon;
        self
    }

    /// Set the parallel threshold
    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if !(self.normalization_epsilon.is_finite() && self.normalization_epsilon > 0.0) {
            return Err(format!(
                "normalization_epsilon must be finite and > 0, got {}",
                self.normalization_epsilon
            ));
        }
        if self.allocation_warning_threshold == 0 {
            return Err("allocation_warning_threshold must be > 0".to_string());
        }
        if self.parallel_threshold == 0 {
            return Err("parallel_threshold must be > 0".to_string());
        }
        Ok(())
    }
}
