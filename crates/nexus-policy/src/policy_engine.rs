use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;
pub const DEFAULT_DAILY_LIMIT_LAMPORTS: u64 = LAMPORTS_PER_SOL / 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
/// Enumerates supported `Protocol` values.
pub enum Protocol {
    Jupiter,
    SplTransfer,
}

impl Protocol {
    pub const ALL: [Protocol; 2] = [Protocol::Jupiter, Protocol::SplTransfer];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Jupiter => "JUPITER",
            Self::SplTransfer => "SPL_TRANSFER",
        }
    }

    /// Tag used inside the on-chain account payload.
    pub fn account_tag(self) -> &'static str {
        match self {
            Self::Jupiter => "jupiter",
            Self::SplTransfer => "spl_transfer",
        }
    }

    pub fn from_account_tag(tag: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|protocol| protocol.account_tag() == tag)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|protocol| protocol.as_str() == normalized)
            .ok_or_else(|| format!("unknown protocol `{value}` (expected JUPITER or SPL_TRANSFER)"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Spending policy mirrored from the on-chain vault.
///
/// `daily_spent_lamports <= daily_limit_lamports` is enforced by writers only;
/// readers tolerate any pair.
pub struct PolicyRecord {
    pub daily_limit_lamports: u64,
    pub daily_spent_lamports: u64,
    pub allowed_protocols: Vec<Protocol>,
    pub is_active: bool,
}

impl Default for PolicyRecord {
    fn default() -> Self {
        Self {
            daily_limit_lamports: DEFAULT_DAILY_LIMIT_LAMPORTS,
            daily_spent_lamports: 0,
            allowed_protocols: vec![Protocol::Jupiter],
            is_active: true,
        }
    }
}

impl PolicyRecord {
    pub fn daily_limit_sol(&self) -> f64 {
        lamports_to_sol(self.daily_limit_lamports)
    }

    pub fn daily_spent_sol(&self) -> f64 {
        lamports_to_sol(self.daily_spent_lamports)
    }

    pub fn remaining_lamports(&self) -> u64 {
        self.daily_limit_lamports
            .saturating_sub(self.daily_spent_lamports)
    }

    pub fn allows(&self, protocol: Protocol) -> bool {
        self.allowed_protocols.contains(&protocol)
    }
}

pub fn sol_to_lamports(amount_sol: f64) -> u64 {
    if !amount_sol.is_finite() || amount_sol <= 0.0 {
        return 0;
    }
    // float-to-int casts saturate at u64::MAX
    (amount_sol * LAMPORTS_PER_SOL as f64).round() as u64
}

pub fn lamports_to_sol(amount_lamports: u64) -> f64 {
    amount_lamports as f64 / LAMPORTS_PER_SOL as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Public struct `PolicyAction` used across Nexus components.
pub struct PolicyAction {
    pub amount_lamports: u64,
    pub protocol: Protocol,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `PolicyEvaluation` used across Nexus components.
pub struct PolicyEvaluation {
    pub allowed: bool,
    pub requires_approval: bool,
    pub reason: Option<String>,
    pub remaining_lamports: u64,
}

impl PolicyEvaluation {
    pub fn remaining_sol(&self) -> f64 {
        lamports_to_sol(self.remaining_lamports)
    }

    fn denied(reason: String, remaining_lamports: u64) -> Self {
        Self {
            allowed: false,
            requires_approval: true,
            reason: Some(reason),
            remaining_lamports,
        }
    }
}

/// Checks, in order: active flag, protocol allow-list, remaining allowance.
pub fn evaluate_policy(policy: &PolicyRecord, action: &PolicyAction) -> PolicyEvaluation {
    let remaining_lamports = policy.remaining_lamports();

    if !policy.is_active {
        return PolicyEvaluation::denied(
            "Policy is currently disabled.".to_string(),
            remaining_lamports,
        );
    }

    if !policy.allows(action.protocol) {
        return PolicyEvaluation::denied(
            format!("{} is not whitelisted in your policy.", action.protocol),
            remaining_lamports,
        );
    }

    if action.amount_lamports > remaining_lamports {
        let excess = action.amount_lamports - remaining_lamports;
        return PolicyEvaluation::denied(
            format!(
                "Action exceeds your daily limit by {:.4} SOL.",
                lamports_to_sol(excess)
            ),
            remaining_lamports,
        );
    }

    PolicyEvaluation {
        allowed: true,
        requires_approval: false,
        reason: None,
        remaining_lamports,
    }
}
