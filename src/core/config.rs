//! Engine configuration.
//!
//! Thresholds and behavior knobs for the scheduler and the escalation
//! evaluator. Values are validated up front so a bad deployment fails at
//! construction rather than mid-conversation.

use serde::{Deserialize, Serialize};

use super::errors::{Result, SwitchboardError};

/// Configuration for engine behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Refund ceiling above which a conversation escalates to a human
    pub max_refund_amount: f64,
    /// Orders older than this are outside the self-service return window
    pub max_order_age_days: u32,
    /// Consecutive error-tagged capability results that trigger escalation
    #[serde(default = "default_failure_run")]
    pub repeated_failure_threshold: usize,
    /// Hard cap on internal respond/execute loops within a single turn
    #[serde(default = "default_max_loops")]
    pub max_loops_per_turn: u32,
    /// Restrict the capability catalog to the essential allow-list
    #[serde(default = "default_true")]
    pub filter_essential_capabilities: bool,
    /// Validate capability arguments against declared schemas before dispatch
    #[serde(default = "default_true")]
    pub validate_capability_arguments: bool,
}

fn default_failure_run() -> usize {
    3
}

fn default_max_loops() -> u32 {
    25
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_refund_amount: 500.0,
            max_order_age_days: 90,
            repeated_failure_threshold: default_failure_run(),
            max_loops_per_turn: default_max_loops(),
            filter_essential_capabilities: true,
            validate_capability_arguments: true,
        }
    }
}

impl EngineConfig {
    /// Validates configuration values
    pub fn validate(&self) -> Result<()> {
        if self.max_refund_amount <= 0.0 {
            return Err(SwitchboardError::configuration(
                "max_refund_amount must be greater than 0",
            ));
        }
        if self.max_order_age_days == 0 {
            return Err(SwitchboardError::configuration(
                "max_order_age_days must be greater than 0",
            ));
        }
        if self.repeated_failure_threshold == 0 {
            return Err(SwitchboardError::configuration(
                "repeated_failure_threshold must be greater than 0",
            ));
        }
        if self.max_loops_per_turn == 0 {
            return Err(SwitchboardError::configuration(
                "max_loops_per_turn must be greater than 0",
            ));
        }
        if self.max_loops_per_turn > 1000 {
            return Err(SwitchboardError::configuration(
                "max_loops_per_turn cannot exceed 1000",
            ));
        }
        Ok(())
    }

    /// Merges two configurations, with override_with taking precedence
    pub fn merge(base: &Self, override_with: &Self) -> Result<Self> {
        let merged = Self {
            max_refund_amount: override_with.max_refund_amount,
            max_order_age_days: override_with.max_order_age_days,
            repeated_failure_threshold: override_with.repeated_failure_threshold,
            // The loop cap only ever tightens relative to the base deployment.
            max_loops_per_turn: override_with.max_loops_per_turn.min(base.max_loops_per_turn),
            filter_essential_capabilities: override_with.filter_essential_capabilities,
            validate_capability_arguments: override_with.validate_capability_arguments,
        };
        merged.validate()?;
        Ok(merged)
    }
}
