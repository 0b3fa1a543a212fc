use chrono::{DateTime, Utc};

use crate::Amount;
use crate::auth::Credential;
use crate::model::{AccountId, BankInfo, REFERRAL_LEVELS};

/// The 3-level upline invite codes stored on an account at creation.
///
/// The chain is contiguous by construction: a missing level implies every
/// deeper level is missing too.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chain {
    pub level1: Option<String>,
    pub level2: Option<String>,
    pub level3: Option<String>,
}

impl Chain {
    /// Chain inherited one hop up from the direct referrer, truncated at
    /// three levels.
    pub fn inherited_from(referrer_code: &str, referrer_chain: &Chain) -> Self {
        Self {
            level1: Some(referrer_code.to_string()),
            level2: referrer_chain.level1.clone(),
            level3: referrer_chain.level2.clone(),
        }
    }

    /// Invite code at a 1-based level.
    pub fn code_at(&self, level: u8) -> Option<&str> {
        match level {
            1 => self.level1.as_deref(),
            2 => self.level2.as_deref(),
            3 => self.level3.as_deref(),
            _ => None,
        }
    }
}

/// A downline member attributed to an account.
#[derive(Debug, Clone)]
pub struct TeamEntry {
    pub account: AccountId,
    pub phone: String,
    pub username: String,
    /// 1..=3.
    pub level: u8,
    pub joined_at: DateTime<Utc>,
}

/// A user account and its wallet.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: AccountId,
    pub phone: String,
    pub username: String,
    pub password: Credential,
    pub txn_password: Credential,
    pub wallet: Amount,
    pub invite_code: String,
    pub chain: Chain,
    pub referral_earnings: [Amount; REFERRAL_LEVELS],
    pub referral_counts: [u32; REFERRAL_LEVELS],
    pub team: Vec<TeamEntry>,
    pub bank_info: Option<BankInfo>,
    pub created_at: DateTime<Utc>,
}
