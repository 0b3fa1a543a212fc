//! Ledger store.
//!
//! Durable mapping from account to balance plus an append-only transaction
//! log, with secondary unique lookup by phone, username and invite code.
//! All state lives in sharded concurrent maps; mutations to one account are
//! serialized by that account's map entry, so contention stays scoped to
//! the accounts an operation actually touches.
//!
//! [`LedgerStore::credit`] and [`LedgerStore::debit`] are the only wallet
//! mutators (plus the withdrawal-rejection refund, whose record is the
//! original request's status flip rather than a new row). Each pairs the
//! balance change with exactly one appended [`TxRecord`] inside the same
//! synchronous critical section, so a cancelled caller can never leave a
//! balance change without its record.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;

use crate::Amount;
use crate::auth::Credential;
use crate::model::{
    AccountId, BankInfo, Plan, PlanId, PlanSpec, Purchase, PurchaseId, TxDraft, TxId, TxRecord,
    TxStatus, TxType,
};

mod account;
pub use account::{Account, Chain, TeamEntry};

/// Errors from wallet mutations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("account {0} not found")]
    AccountNotFound(AccountId),

    #[error("insufficient funds for account {0}: balance {1}, requested {2}")]
    InsufficientFunds(AccountId, Amount, Amount),

    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Amount),
}

/// Errors from account insertion (unique-key claims).
#[derive(Debug, Error)]
pub enum InsertError {
    #[error("phone number {0} is already registered")]
    DuplicatePhone(String),

    #[error("username {0} is already taken")]
    DuplicateUsername(String),

    #[error("invite code {0} is already in use")]
    DuplicateInviteCode(String),
}

/// Errors from settling a withdrawal request.
#[derive(Debug, Error)]
pub enum SettleError {
    #[error("transaction {0} not found")]
    TxNotFound(TxId),

    #[error("transaction {0} is not a withdrawal")]
    NotAWithdrawal(TxId),

    #[error("withdrawal {0} is not pending review (status {1:?})")]
    NotProcessing(TxId, TxStatus),

    #[error("account for withdrawal {0} not found")]
    AccountNotFound(TxId),
}

/// Errors from claiming bank details.
#[derive(Debug, Error)]
pub enum BankInfoError {
    #[error("account {0} not found")]
    AccountNotFound(AccountId),

    #[error("bank account number is already registered to another account")]
    NumberInUse,
}

/// New-account fields the engine hands to [`LedgerStore::insert_account`].
#[derive(Debug)]
pub struct NewAccountRecord {
    pub phone: String,
    pub username: String,
    pub password: Credential,
    pub txn_password: Credential,
    pub invite_code: String,
    pub chain: Chain,
}

pub struct LedgerStore {
    accounts: DashMap<AccountId, Account>,
    by_phone: DashMap<String, AccountId>,
    by_username: DashMap<String, AccountId>,
    by_invite: DashMap<String, AccountId>,
    by_bank_account: DashMap<String, AccountId>,
    plans: DashMap<PlanId, Plan>,
    purchases: DashMap<PurchaseId, Purchase>,
    /// Append-only; ids are allocated monotonically so sorting by id
    /// recovers insertion order.
    transactions: DashMap<TxId, TxRecord>,
    next_account_id: AtomicU64,
    next_plan_id: AtomicU64,
    next_purchase_id: AtomicU64,
    next_tx_id: AtomicU64,
}

impl LedgerStore {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
            by_phone: DashMap::new(),
            by_username: DashMap::new(),
            by_invite: DashMap::new(),
            by_bank_account: DashMap::new(),
            plans: DashMap::new(),
            purchases: DashMap::new(),
            transactions: DashMap::new(),
            next_account_id: AtomicU64::new(1),
            next_plan_id: AtomicU64::new(1),
            next_purchase_id: AtomicU64::new(1),
            next_tx_id: AtomicU64::new(1),
        }
    }
}

/// Accounts
impl LedgerStore {
    /// Insert a new account, claiming its phone, username and invite code
    /// atomically. On any duplicate nothing is inserted.
    pub fn insert_account(&self, record: NewAccountRecord) -> Result<AccountId, InsertError> {
        // Vacant entries hold their shard locks until dropped; acquisition
        // order (phone, username, invite) is the same everywhere.
        let phone_slot = match self.by_phone.entry(record.phone.clone()) {
            Entry::Occupied(_) => return Err(InsertError::DuplicatePhone(record.phone)),
            Entry::Vacant(slot) => slot,
        };
        let username_slot = match self.by_username.entry(record.username.clone()) {
            Entry::Occupied(_) => return Err(InsertError::DuplicateUsername(record.username)),
            Entry::Vacant(slot) => slot,
        };
        let invite_slot = match self.by_invite.entry(record.invite_code.clone()) {
            Entry::Occupied(_) => return Err(InsertError::DuplicateInviteCode(record.invite_code)),
            Entry::Vacant(slot) => slot,
        };

        let id = self.next_account_id.fetch_add(1, Ordering::Relaxed);
        let account = Account {
            id,
            phone: record.phone,
            username: record.username,
            password: record.password,
            txn_password: record.txn_password,
            wallet: Amount::ZERO,
            invite_code: record.invite_code,
            chain: record.chain,
            referral_earnings: [Amount::ZERO; 3],
            referral_counts: [0; 3],
            team: Vec::new(),
            bank_info: None,
            created_at: Utc::now(),
        };
        self.accounts.insert(id, account);
        phone_slot.insert(id);
        username_slot.insert(id);
        invite_slot.insert(id);
        Ok(id)
    }

    /// Snapshot of one account.
    pub fn get_account(&self, id: AccountId) -> Option<Account> {
        self.accounts.get(&id).map(|a| a.clone())
    }

    pub fn account_id_by_phone(&self, phone: &str) -> Option<AccountId> {
        self.by_phone.get(phone).map(|id| *id)
    }

    pub fn account_id_by_username(&self, username: &str) -> Option<AccountId> {
        self.by_username.get(username).map(|id| *id)
    }

    pub fn account_id_by_invite(&self, code: &str) -> Option<AccountId> {
        self.by_invite.get(code).map(|id| *id)
    }

    pub fn account_by_phone(&self, phone: &str) -> Option<Account> {
        self.account_id_by_phone(phone).and_then(|id| self.get_account(id))
    }

    pub fn account_by_username(&self, username: &str) -> Option<Account> {
        self.account_id_by_username(username)
            .and_then(|id| self.get_account(id))
    }

    pub fn account_by_invite(&self, code: &str) -> Option<Account> {
        self.account_id_by_invite(code).and_then(|id| self.get_account(id))
    }

    /// Set an account's bank details, claiming the account number in the
    /// unique index inside the same critical section. Re-saving your own
    /// number is allowed; a number held by another account is rejected.
    pub fn set_bank_info(&self, id: AccountId, bank_info: BankInfo) -> Result<(), BankInfoError> {
        // Entry lock on the number is held across the account write, so
        // two accounts can never both claim it. Acquisition order (bank
        // index, account) is the same for both arms.
        match self.by_bank_account.entry(bank_info.account_number.clone()) {
            Entry::Occupied(slot) => {
                if *slot.get() != id {
                    return Err(BankInfoError::NumberInUse);
                }
                let mut account = self
                    .accounts
                    .get_mut(&id)
                    .ok_or(BankInfoError::AccountNotFound(id))?;
                account.bank_info = Some(bank_info);
                Ok(())
            }
            Entry::Vacant(slot) => {
                let previous = {
                    let mut account = self
                        .accounts
                        .get_mut(&id)
                        .ok_or(BankInfoError::AccountNotFound(id))?;
                    let previous = account.bank_info.replace(bank_info);
                    slot.insert(id);
                    previous
                };
                // Release the old number only after both locks are gone;
                // a briefly stale claim is conservative, a missing one is
                // not.
                if let Some(previous) = previous {
                    self.by_bank_account
                        .remove_if(&previous.account_number, |_, owner| *owner == id);
                }
                Ok(())
            }
        }
    }

    /// Run a mutation against the latest state of one account, serialized
    /// with every other mutation of the same account. The closure must not
    /// touch wallet balance; that is reserved for credit/debit.
    pub fn apply_atomic<T>(
        &self,
        id: AccountId,
        f: impl FnOnce(&mut Account) -> T,
    ) -> Result<T, LedgerError> {
        let mut entry = self
            .accounts
            .get_mut(&id)
            .ok_or(LedgerError::AccountNotFound(id))?;
        Ok(f(&mut entry))
    }

    pub fn balance(&self, id: AccountId) -> Result<Amount, LedgerError> {
        self.accounts
            .get(&id)
            .map(|a| a.wallet)
            .ok_or(LedgerError::AccountNotFound(id))
    }

    /// (phone, username, balance) for every account, sorted by phone.
    pub fn balances(&self) -> Vec<(String, String, Amount)> {
        let mut rows: Vec<_> = self
            .accounts
            .iter()
            .map(|a| (a.phone.clone(), a.username.clone(), a.wallet))
            .collect();
        rows.sort();
        rows
    }
}

/// Wallet mutations
impl LedgerStore {
    /// Increase an account's balance and append the paired record.
    pub fn credit(
        &self,
        id: AccountId,
        amount: Amount,
        draft: TxDraft,
    ) -> Result<TxId, LedgerError> {
        if !amount.is_positive() {
            return Err(LedgerError::NonPositiveAmount(amount));
        }
        let mut account = self
            .accounts
            .get_mut(&id)
            .ok_or(LedgerError::AccountNotFound(id))?;
        account.wallet += amount;
        Ok(self.append_record(&account, amount, draft))
    }

    /// Decrease an account's balance and append the paired record. Fails
    /// before any mutation if the balance would go negative.
    pub fn debit(&self, id: AccountId, amount: Amount, draft: TxDraft) -> Result<TxId, LedgerError> {
        if !amount.is_positive() {
            return Err(LedgerError::NonPositiveAmount(amount));
        }
        let mut account = self
            .accounts
            .get_mut(&id)
            .ok_or(LedgerError::AccountNotFound(id))?;
        if account.wallet < amount {
            return Err(LedgerError::InsufficientFunds(id, account.wallet, amount));
        }
        account.wallet -= amount;
        Ok(self.append_record(&account, amount, draft))
    }

    /// Called while the account entry is held, so the record and the
    /// balance change commit as one unit.
    fn append_record(&self, account: &Account, amount: Amount, draft: TxDraft) -> TxId {
        let id = self.next_tx_id.fetch_add(1, Ordering::Relaxed);
        let record = TxRecord {
            id,
            phone: account.phone.clone(),
            account: Some(account.id),
            tx_type: draft.tx_type,
            amount,
            status: draft.status,
            date: Utc::now(),
            description: draft.description,
            plan: draft.plan,
            purchase: draft.purchase,
            referral_level: draft.referral_level,
            payout_amount: draft.payout_amount,
            bank_info: draft.bank_info,
        };
        self.transactions.insert(id, record);
        id
    }
}

/// Transactions
impl LedgerStore {
    pub fn get_transaction(&self, id: TxId) -> Option<TxRecord> {
        self.transactions.get(&id).map(|t| t.clone())
    }

    /// All records for a phone, oldest first.
    pub fn transactions_for(&self, phone: &str) -> Vec<TxRecord> {
        let mut records: Vec<_> = self
            .transactions
            .iter()
            .filter(|t| t.phone == phone)
            .map(|t| t.clone())
            .collect();
        records.sort_by_key(|t| t.id);
        records
    }

    /// Withdrawal requests awaiting admin review, oldest first.
    pub fn pending_withdrawals(&self) -> Vec<TxRecord> {
        let mut records: Vec<_> = self
            .transactions
            .iter()
            .filter(|t| t.tx_type == TxType::Withdraw && t.status == TxStatus::Processing)
            .map(|t| t.clone())
            .collect();
        records.sort_by_key(|t| t.id);
        records
    }

    /// Settle a withdrawal request. Approval leaves the debit in place;
    /// rejection re-credits the full original amount onto the account and
    /// flips the request record's status (no new record is appended).
    /// Remarks, if any, are appended to the record's description.
    pub fn settle_withdrawal(
        &self,
        tx_id: TxId,
        status: TxStatus,
        remarks: Option<&str>,
    ) -> Result<TxRecord, SettleError> {
        debug_assert!(status.is_terminal());

        // Validate on a snapshot first so the account lock is only taken
        // for refunds, and always before the record lock.
        let snapshot = self
            .transactions
            .get(&tx_id)
            .map(|t| t.clone())
            .ok_or(SettleError::TxNotFound(tx_id))?;
        if snapshot.tx_type != TxType::Withdraw {
            return Err(SettleError::NotAWithdrawal(tx_id));
        }
        if snapshot.status != TxStatus::Processing {
            return Err(SettleError::NotProcessing(tx_id, snapshot.status));
        }

        if status == TxStatus::Rejected {
            let account_id = snapshot.account.ok_or(SettleError::AccountNotFound(tx_id))?;
            let mut account = self
                .accounts
                .get_mut(&account_id)
                .ok_or(SettleError::AccountNotFound(tx_id))?;
            let mut record = self
                .transactions
                .get_mut(&tx_id)
                .ok_or(SettleError::TxNotFound(tx_id))?;
            // Re-check under the lock; a concurrent reviewer may have won.
            if record.status != TxStatus::Processing {
                return Err(SettleError::NotProcessing(tx_id, record.status));
            }
            account.wallet += record.amount;
            record.status = TxStatus::Rejected;
            if let Some(remarks) = remarks {
                record.description.push_str(&format!(" Admin remarks: {remarks}"));
            }
            return Ok(record.clone());
        }

        let mut record = self
            .transactions
            .get_mut(&tx_id)
            .ok_or(SettleError::TxNotFound(tx_id))?;
        if record.status != TxStatus::Processing {
            return Err(SettleError::NotProcessing(tx_id, record.status));
        }
        record.status = status;
        if let Some(remarks) = remarks {
            record.description.push_str(&format!(" Admin remarks: {remarks}"));
        }
        Ok(record.clone())
    }
}

/// Plans
impl LedgerStore {
    /// Create a plan; duration defaults to 365 (floored at 1) and yearly
    /// income is derived.
    pub fn insert_plan(&self, spec: PlanSpec) -> Plan {
        let id = self.next_plan_id.fetch_add(1, Ordering::Relaxed);
        let duration = spec.normalized_duration();
        let plan = Plan {
            id,
            name: spec.name,
            price: spec.price,
            daily_income: spec.daily_income,
            plan_type: spec.plan_type,
            duration_days: duration,
            yearly_income: spec.daily_income.mul_days(duration),
        };
        self.plans.insert(id, plan.clone());
        plan
    }

    /// Admin edit; yearly income is recomputed from the new fields.
    pub fn update_plan(&self, id: PlanId, spec: PlanSpec) -> Option<Plan> {
        let mut plan = self.plans.get_mut(&id)?;
        let duration = spec.normalized_duration();
        plan.name = spec.name;
        plan.price = spec.price;
        plan.daily_income = spec.daily_income;
        plan.plan_type = spec.plan_type;
        plan.duration_days = duration;
        plan.yearly_income = spec.daily_income.mul_days(duration);
        Some(plan.clone())
    }

    pub fn delete_plan(&self, id: PlanId) -> Option<Plan> {
        self.plans.remove(&id).map(|(_, plan)| plan)
    }

    pub fn get_plan(&self, id: PlanId) -> Option<Plan> {
        self.plans.get(&id).map(|p| p.clone())
    }

    pub fn plan_by_name(&self, name: &str) -> Option<Plan> {
        self.plans
            .iter()
            .filter(|p| p.name == name)
            .min_by_key(|p| p.id)
            .map(|p| p.clone())
    }

    pub fn plans(&self) -> Vec<Plan> {
        let mut plans: Vec<_> = self.plans.iter().map(|p| p.clone()).collect();
        plans.sort_by_key(|p| p.id);
        plans
    }
}

/// Purchases
impl LedgerStore {
    /// Reserve a purchase id so the purchase transaction record can
    /// reference it before the purchase row exists.
    pub fn allocate_purchase_id(&self) -> PurchaseId {
        self.next_purchase_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn insert_purchase(&self, purchase: Purchase) {
        self.purchases.insert(purchase.id, purchase);
    }

    pub fn get_purchase(&self, id: PurchaseId) -> Option<Purchase> {
        self.purchases.get(&id).map(|p| p.clone())
    }

    /// Ids only, so the scheduler can lock purchases one at a time instead
    /// of holding the iterator's shard locks across mutations.
    pub fn purchase_ids(&self) -> Vec<PurchaseId> {
        let mut ids: Vec<_> = self.purchases.iter().map(|p| p.id).collect();
        ids.sort_unstable();
        ids
    }

    pub fn purchases_for(&self, account: AccountId) -> Vec<Purchase> {
        let mut purchases: Vec<_> = self
            .purchases
            .iter()
            .filter(|p| p.account == account)
            .map(|p| p.clone())
            .collect();
        purchases.sort_by_key(|p| p.id);
        purchases
    }

    /// Serialized read-modify-write on one purchase.
    pub fn with_purchase_mut<T>(
        &self,
        id: PurchaseId,
        f: impl FnOnce(&mut Purchase) -> T,
    ) -> Option<T> {
        let mut entry = self.purchases.get_mut(&id)?;
        Some(f(&mut entry))
    }
}

impl Default for LedgerStore {
    fn default() -> Self {
        Self::new()
    }
}
