//! Referral graph maintenance and reward distribution.
//!
//! Every account stores its 3-level upline chain as invite codes at
//! registration time; team attribution and reward fan-out both walk that
//! stored chain rather than re-deriving it, so later re-referrals cannot
//! change who earns from whom.

use chrono::Utc;
use rand::Rng;
use tracing::warn;

use crate::Amount;
use crate::model::{REFERRAL_LEVELS, TxDraft, TxType};
use crate::notify::Event;
use crate::store::{Account, TeamEntry};

use super::{Engine, ProfileError};

const INVITE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Random invite code over A-Z0-9.
pub(crate) fn generate_invite_code(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| INVITE_CHARSET[rng.gen_range(0..INVITE_CHARSET.len())] as char)
        .collect()
}

/// What prompted a reward fan-out.
#[derive(Debug, Clone, Copy)]
pub(crate) enum RewardTrigger {
    /// Fixed per-level bonus when a referred account registers.
    Signup,
    /// Percentage of the recharged amount per level.
    Recharge(Amount),
}

/// Per-level referral earnings for one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferralEarnings {
    pub earned: [Amount; REFERRAL_LEVELS],
    pub counts: [u32; REFERRAL_LEVELS],
    pub total: Amount,
}

impl Engine {
    /// Downline members attributed to an account, ordered by join time.
    /// Entries carry only the member's identity and level, never the
    /// member's credentials or wallet.
    pub fn team_for(&self, phone: &str) -> Result<Vec<TeamEntry>, ProfileError> {
        let account = self
            .store
            .account_by_phone(phone)
            .ok_or_else(|| ProfileError::AccountNotFound(phone.to_string()))?;
        Ok(account.team)
    }

    /// Accumulated referral earnings and downline counts per level.
    pub fn referral_earnings_for(&self, phone: &str) -> Result<ReferralEarnings, ProfileError> {
        let account = self
            .store
            .account_by_phone(phone)
            .ok_or_else(|| ProfileError::AccountNotFound(phone.to_string()))?;
        let total = account
            .referral_earnings
            .iter()
            .fold(Amount::ZERO, |acc, &earned| acc + earned);
        Ok(ReferralEarnings {
            earned: account.referral_earnings,
            counts: account.referral_counts,
            total,
        })
    }

    /// Record the new account as a downline member of each resolved chain
    /// level. The walk stops at the first unresolvable link; the chain is
    /// contiguous so nothing deeper can resolve either.
    pub(crate) fn attach_to_teams(&self, account: &Account) {
        for level in 1..=REFERRAL_LEVELS as u8 {
            let Some(code) = account.chain.code_at(level) else {
                break;
            };
            let Some(referrer) = self.store.account_id_by_invite(code) else {
                break;
            };
            let entry = TeamEntry {
                account: account.id,
                phone: account.phone.clone(),
                username: account.username.clone(),
                level,
                joined_at: Utc::now(),
            };
            if self.store.apply_atomic(referrer, |r| r.team.push(entry)).is_err() {
                warn!(code, level, "referrer disappeared while recording team entry");
                break;
            }
        }
    }

    /// Pay the per-level reward to each resolved upline referrer. Each
    /// reward is credited with its own transaction record and tallied on
    /// the referrer's per-level earnings; one failed credit is logged and
    /// skipped without blocking the other levels.
    pub(crate) fn distribute_referral_rewards(&self, source: &Account, trigger: RewardTrigger) {
        if let RewardTrigger::Recharge(amount) = trigger
            && !amount.is_positive()
        {
            return;
        }

        for level in 1..=REFERRAL_LEVELS as u8 {
            let idx = (level - 1) as usize;
            let Some(code) = source.chain.code_at(level) else {
                break;
            };
            let Some(referrer) = self.store.account_id_by_invite(code) else {
                break;
            };

            let (reward, description) = match trigger {
                RewardTrigger::Signup => (
                    self.config.signup_bonus[idx],
                    format!(
                        "Level {level} referral bonus for inviting user {}",
                        source.username
                    ),
                ),
                RewardTrigger::Recharge(amount) => (
                    amount.mul_bps(self.config.recharge_reward_bps[idx]),
                    format!(
                        "Level {level} referral bonus from wallet recharge of user {}",
                        source.username
                    ),
                ),
            };
            if !reward.is_positive() {
                continue;
            }

            let draft =
                TxDraft::success(TxType::ReferralBonus, description).with_referral_level(level);
            match self.store.credit(referrer, reward, draft) {
                Ok(_) => {
                    let _ = self.store.apply_atomic(referrer, |r| {
                        r.referral_earnings[idx] += reward;
                        r.referral_counts[idx] += 1;
                    });
                    self.notifier.publish(Event::ReferralBonus {
                        account: referrer,
                        level,
                        amount: reward,
                        from_username: source.username.clone(),
                    });
                    if let Ok(balance) = self.store.balance(referrer) {
                        self.notifier.publish(Event::WalletUpdated {
                            account: referrer,
                            balance,
                            amount: reward,
                            tx_type: TxType::ReferralBonus,
                        });
                    }
                }
                Err(e) => {
                    warn!(level, reward = %reward, reason = %e, "referral reward not applied");
                }
            }
        }
    }
}
