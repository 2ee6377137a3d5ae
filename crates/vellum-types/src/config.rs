//! Engine policy knobs

use serde::{Deserialize, Serialize};

/// Consensus policy for a project's sections
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConsensusPolicy {
    /// Fraction of currently assigned reviewers whose approval is needed.
    /// Threshold is `ceil(assigned × ratio)`, at least 1 when assigned > 0.
    pub approval_ratio: f64,
}

impl ConsensusPolicy {
    pub fn new(approval_ratio: f64) -> Self {
        Self { approval_ratio }
    }

    /// Minimum approvals for `assigned` currently assigned reviewers
    pub fn threshold(&self, assigned: usize) -> usize {
        if assigned == 0 {
            return 0;
        }
        let raw = (assigned as f64 * self.approval_ratio).ceil() as usize;
        raw.max(1)
    }
}

impl Default for ConsensusPolicy {
    fn default() -> Self {
        Self {
            approval_ratio: 0.6,
        }
    }
}

/// Engine-wide configuration
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnginePolicy {
    pub consensus: ConsensusPolicy,
    /// Upper bound on external token lifetime, in days
    pub max_token_ttl_days: u32,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            consensus: ConsensusPolicy::default(),
            max_token_ttl_days: 30,
        }
    }
}
