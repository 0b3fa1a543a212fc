//! Core domain types for the ledger and payout engine.

use chrono::{DateTime, NaiveDate, Utc};

use crate::Amount;

/// Account identifier.
pub type AccountId = u64;

/// Transaction identifier.
pub type TxId = u64;

/// Plan identifier.
pub type PlanId = u64;

/// Purchase identifier.
pub type PurchaseId = u64;

/// Referral levels are 1-based and capped at three.
pub const REFERRAL_LEVELS: usize = 3;

/// Category of a ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxType {
    Recharge,
    Withdraw,
    Earning,
    Purchase,
    ReferralBonus,
    Other,
}

/// Lifecycle status of a transaction record. Only `Withdraw` records ever
/// leave their initial status, and only through admin review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Rejected,
}

impl TxStatus {
    /// Terminal review states admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::Success | TxStatus::Rejected)
    }
}

/// Bank details snapshotted onto withdrawal records.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BankInfo {
    pub real_name: String,
    pub account_number: String,
    pub ifsc_code: String,
}

/// Immutable audit record of a wallet mutation.
///
/// Appended by the ledger store in the same critical section as the balance
/// change it describes; never deleted.
#[derive(Debug, Clone)]
pub struct TxRecord {
    pub id: TxId,
    pub phone: String,
    pub account: Option<AccountId>,
    pub tx_type: TxType,
    pub amount: Amount,
    pub status: TxStatus,
    pub date: DateTime<Utc>,
    pub description: String,
    pub plan: Option<PlanId>,
    pub purchase: Option<PurchaseId>,
    /// 1..=3 for referral bonus records.
    pub referral_level: Option<u8>,
    /// Fee-adjusted payout recorded on withdrawal requests for the operator.
    pub payout_amount: Option<Amount>,
    pub bank_info: Option<BankInfo>,
}

/// The caller-supplied half of a [`TxRecord`]. The store fills in id, phone,
/// account, amount and timestamp when it applies the paired balance change.
#[derive(Debug, Clone)]
pub struct TxDraft {
    pub tx_type: TxType,
    pub status: TxStatus,
    pub description: String,
    pub plan: Option<PlanId>,
    pub purchase: Option<PurchaseId>,
    pub referral_level: Option<u8>,
    pub payout_amount: Option<Amount>,
    pub bank_info: Option<BankInfo>,
}

impl TxDraft {
    /// Draft for an immediately settled mutation.
    pub fn success(tx_type: TxType, description: impl Into<String>) -> Self {
        Self {
            tx_type,
            status: TxStatus::Success,
            description: description.into(),
            plan: None,
            purchase: None,
            referral_level: None,
            payout_amount: None,
            bank_info: None,
        }
    }

    pub fn with_status(mut self, status: TxStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_plan(mut self, plan: PlanId, purchase: PurchaseId) -> Self {
        self.plan = Some(plan);
        self.purchase = Some(purchase);
        self
    }

    pub fn with_referral_level(mut self, level: u8) -> Self {
        self.referral_level = Some(level);
        self
    }

    pub fn with_payout(mut self, payout: Amount) -> Self {
        self.payout_amount = Some(payout);
        self
    }

    pub fn with_bank_info(mut self, bank_info: BankInfo) -> Self {
        self.bank_info = Some(bank_info);
        self
    }
}

/// Product category of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanType {
    PlanA,
    Welfare,
}

impl std::str::FromStr for PlanType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PlanA" => Ok(PlanType::PlanA),
            "Welfare" => Ok(PlanType::Welfare),
            other => Err(format!("unknown plan type '{other}'")),
        }
    }
}

/// A purchasable product paying a fixed daily income over its duration.
#[derive(Debug, Clone)]
pub struct Plan {
    pub id: PlanId,
    pub name: String,
    pub price: Amount,
    pub daily_income: Amount,
    pub plan_type: PlanType,
    pub duration_days: u32,
    /// Derived: daily_income x duration_days, recomputed on create/update.
    pub yearly_income: Amount,
}

/// Input for plan creation and admin edits.
#[derive(Debug, Clone)]
pub struct PlanSpec {
    pub name: String,
    pub price: Amount,
    pub daily_income: Amount,
    pub plan_type: PlanType,
    /// Defaults to 365, floored at 1.
    pub duration_days: Option<u32>,
}

impl PlanSpec {
    pub(crate) fn normalized_duration(&self) -> u32 {
        self.duration_days.unwrap_or(365).max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseStatus {
    Active,
    Completed,
}

/// An account's instance of a plan. The plan fields are snapshotted at
/// purchase time so later plan edits do not change existing obligations.
#[derive(Debug, Clone)]
pub struct Purchase {
    pub id: PurchaseId,
    pub account: AccountId,
    pub plan: PlanId,
    pub plan_name: String,
    pub plan_type: PlanType,
    pub price: Amount,
    pub daily_income: Amount,
    pub purchased_at: DateTime<Utc>,
    pub status: PurchaseStatus,
    /// Monotonically non-decreasing; bumped only by the daily scheduler.
    pub total_earned: Amount,
    /// Day granularity; the scheduler's sole idempotence guard.
    pub last_income_date: Option<NaiveDate>,
}

/// A batch operation, the engine's stream input (csv rows map to these).
#[derive(Debug, Clone)]
pub enum Operation {
    Register {
        phone: String,
        username: String,
        password: String,
        referred_by: Option<String>,
        invite_code: Option<String>,
    },
    Recharge {
        phone: String,
        amount: Amount,
    },
    CreatePlan {
        name: String,
        plan_type: PlanType,
        price: Amount,
        daily_income: Amount,
    },
    BuyPlan {
        phone: String,
        plan: String,
    },
    Withdraw {
        phone: String,
        password: String,
        amount: Amount,
    },
    CreditDaily {
        date: Option<NaiveDate>,
    },
}
