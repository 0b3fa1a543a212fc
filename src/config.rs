//! Engine configuration, injected at startup.
//!
//! Replaces the old pattern of reading payout constants and admin
//! credentials from the environment on every request.

use std::env;

use crate::Amount;
use crate::auth::Credential;
use crate::model::REFERRAL_LEVELS;

/// Admin credentials and signing material supplied by the operator.
#[derive(Debug, Clone)]
pub struct AdminConfig {
    pub username: String,
    pub password: Credential,
}

impl AdminConfig {
    pub fn new(username: impl Into<String>, password: &str) -> Self {
        Self {
            username: username.into(),
            password: Credential::new(password),
        }
    }

    /// Verify admin credentials without revealing which factor failed.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        self.username == username && self.password.verify(password)
    }
}

/// Payout table and operational knobs for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Fixed signup bonus paid to each chain level on a referred signup.
    pub signup_bonus: [Amount; REFERRAL_LEVELS],
    /// Recharge commission per chain level, in basis points of the
    /// recharge amount.
    pub recharge_reward_bps: [u32; REFERRAL_LEVELS],
    /// Withdrawal processing fee in basis points; only the payout shown to
    /// the operator is adjusted, the ledger debits the full amount.
    pub withdrawal_fee_bps: u32,
    /// Length of generated invite codes.
    pub invite_code_len: usize,
    /// Bounded retries for invite-code collisions before the generator is
    /// treated as misconfigured.
    pub invite_code_attempts: u32,
    pub admin: AdminConfig,
}

impl EngineConfig {
    /// Default payout table, with admin credentials taken from
    /// `PAYOUT_ADMIN_USER` / `PAYOUT_ADMIN_PASS` when both are set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let (Ok(user), Ok(pass)) = (env::var("PAYOUT_ADMIN_USER"), env::var("PAYOUT_ADMIN_PASS"))
        {
            config.admin = AdminConfig::new(user, &pass);
        }
        config
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            signup_bonus: [
                Amount::from_float(50.0),
                Amount::from_float(30.0),
                Amount::from_float(20.0),
            ],
            recharge_reward_bps: [2500, 300, 200],
            withdrawal_fee_bps: 1000,
            invite_code_len: 6,
            invite_code_attempts: 16,
            admin: AdminConfig::new("admin", "admin"),
        }
    }
}
