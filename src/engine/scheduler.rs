//! Daily income crediting.
//!
//! Idempotent per calendar day: each active purchase is credited its
//! snapshot daily income at most once per day, keyed by the purchase's
//! last-credited date. Per-item failures are logged and skipped so one
//! bad record never blocks the rest of the batch.

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::Amount;
use crate::model::{AccountId, PurchaseStatus, TxDraft, TxType};
use crate::notify::Event;
use crate::store::LedgerError;

use super::Engine;

/// Counters from one scheduler run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DailyRunSummary {
    /// Purchases credited this run.
    pub credited: u32,
    /// Active purchases already credited for this date.
    pub already_credited: u32,
    /// Purchases not in `Active` status.
    pub inactive: u32,
    /// Purchases whose owner account no longer resolves.
    pub missing_owner: u32,
    /// Credits that failed for any other reason.
    pub failed: u32,
}

enum Outcome {
    Credited { account: AccountId, amount: Amount },
    AlreadyCredited,
    Inactive,
    MissingOwner,
    Failed,
}

impl Engine {
    /// Credit daily income for every active purchase, at most once per
    /// purchase for the given date. Safe to re-run after a partial
    /// failure; already-credited purchases are skipped.
    pub fn credit_daily_income(&self, today: NaiveDate) -> DailyRunSummary {
        info!(%today, "daily income run starting");
        let mut summary = DailyRunSummary::default();

        for id in self.store.purchase_ids() {
            // The credit and the idempotence markers commit under the same
            // purchase lock, so a concurrent run for the same date cannot
            // double-credit.
            let Some(outcome) = self.store.with_purchase_mut(id, |purchase| {
                if purchase.status != PurchaseStatus::Active {
                    return Outcome::Inactive;
                }
                if purchase.last_income_date == Some(today) {
                    return Outcome::AlreadyCredited;
                }
                let draft = TxDraft::success(
                    TxType::Earning,
                    format!("Daily income from {}", purchase.plan_name),
                )
                .with_plan(purchase.plan, purchase.id);
                match self.store.credit(purchase.account, purchase.daily_income, draft) {
                    Ok(_) => {
                        purchase.total_earned += purchase.daily_income;
                        purchase.last_income_date = Some(today);
                        Outcome::Credited {
                            account: purchase.account,
                            amount: purchase.daily_income,
                        }
                    }
                    Err(LedgerError::AccountNotFound(_)) => Outcome::MissingOwner,
                    Err(e) => {
                        warn!(purchase = id, reason = %e, "daily income credit failed");
                        Outcome::Failed
                    }
                }
            }) else {
                continue;
            };

            match outcome {
                Outcome::Credited { account, amount } => {
                    summary.credited += 1;
                    if let Ok(balance) = self.store.balance(account) {
                        self.notifier.publish(Event::WalletUpdated {
                            account,
                            balance,
                            amount,
                            tx_type: TxType::Earning,
                        });
                    }
                }
                Outcome::AlreadyCredited => summary.already_credited += 1,
                Outcome::Inactive => summary.inactive += 1,
                Outcome::MissingOwner => {
                    warn!(purchase = id, "owner account not found, purchase skipped");
                    summary.missing_owner += 1;
                }
                Outcome::Failed => summary.failed += 1,
            }
        }

        info!(
            credited = summary.credited,
            already_credited = summary.already_credited,
            inactive = summary.inactive,
            missing_owner = summary.missing_owner,
            failed = summary.failed,
            "daily income run finished"
        );
        summary
    }
}
