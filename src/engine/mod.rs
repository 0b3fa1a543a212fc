//! Ledger and payout engine.
//!
//! The engine owns the ledger store and applies the platform's operations:
//! registration with referral chain construction, wallet recharges with
//! multi-level commission, plan purchases, daily income crediting and the
//! withdrawal request/review state machine. Also supports an async stream
//! of batch operations.

use chrono::{Local, Utc};
use tokio_stream::{Stream, StreamExt};
use tracing::info;

use crate::Amount;
use crate::auth::Credential;
use crate::config::EngineConfig;
use crate::gateway::{CALLBACK_SUCCESS, CreatedOrder, GatewayError, PaymentGateway, RechargeCallback};
use crate::model::{
    AccountId, BankInfo, Operation, Plan, PlanId, PlanSpec, Purchase, PurchaseId, PurchaseStatus,
    TxDraft, TxId, TxRecord, TxStatus, TxType,
};
use crate::notify::{Event, Notifier};
use crate::store::{Account, BankInfoError, Chain, InsertError, LedgerStore, NewAccountRecord};

mod error;
pub use error::{
    CallbackError, CredentialError, EngineError, PlanError, ProfileError, PurchaseError,
    RechargeError, RegisterError, ReviewError, WithdrawError,
};

mod referral;
pub use referral::ReferralEarnings;
pub(crate) use referral::RewardTrigger;

mod scheduler;
pub use scheduler::DailyRunSummary;

/// Input for account registration.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub phone: String,
    pub username: String,
    pub password: String,
    pub txn_password: String,
    /// Referrer's invite code; the whole registration fails if it does not
    /// resolve.
    pub referred_by: Option<String>,
    /// Explicit invite code for this account; generated when absent.
    pub invite_code: Option<String>,
}

/// Outcome of a successful registration.
#[derive(Debug, Clone)]
pub struct Registration {
    pub account: AccountId,
    pub invite_code: String,
}

/// Counts from one batch run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub applied: u64,
    pub skipped: u64,
}

/// The ledger and payout engine.
pub struct Engine {
    store: LedgerStore,
    config: EngineConfig,
    notifier: Notifier,
}

/// Construction and batch surface
impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_notifier(config, Notifier::default())
    }

    pub fn with_notifier(config: EngineConfig, notifier: Notifier) -> Self {
        Self {
            store: LedgerStore::new(),
            config,
            notifier,
        }
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Run the engine over a stream of batch operations.
    pub async fn run(&self, mut stream: impl Stream<Item = Operation> + Unpin) -> BatchSummary {
        let mut summary = BatchSummary::default();
        while let Some(op) = stream.next().await {
            // a failed operation should not stop the batch
            match self.apply(op) {
                Ok(()) => summary.applied += 1,
                Err(_) => summary.skipped += 1,
            }
        }
        summary
    }

    /// Apply a single batch operation.
    pub fn apply(&self, op: Operation) -> Result<(), EngineError> {
        match op {
            Operation::Register {
                phone,
                username,
                password,
                referred_by,
                invite_code,
            } => {
                let result = self.register(NewAccount {
                    phone: phone.clone(),
                    username: username.clone(),
                    txn_password: password.clone(),
                    password,
                    referred_by,
                    invite_code,
                });
                match &result {
                    Ok(reg) => info!(phone, username, invite_code = %reg.invite_code, "register applied"),
                    Err(e) => info!(phone, username, reason = %e, "register skipped"),
                }
                result?;
            }
            Operation::Recharge { phone, amount } => {
                let result = self.recharge(&phone, amount);
                Self::log_result("recharge", &phone, Some(amount), &result);
                result?;
            }
            Operation::CreatePlan {
                name,
                plan_type,
                price,
                daily_income,
            } => {
                let plan = self.create_plan(PlanSpec {
                    name,
                    price,
                    daily_income,
                    plan_type,
                    duration_days: None,
                });
                info!(plan = %plan.name, price = %plan.price, "plan created");
            }
            Operation::BuyPlan { phone, plan } => {
                let result = self.buy_plan_by_name(&phone, &plan);
                Self::log_result("buy", &phone, None, &result);
                result?;
            }
            Operation::Withdraw {
                phone,
                password,
                amount,
            } => {
                let result = self.withdraw(&phone, &password, amount, None);
                Self::log_result("withdraw", &phone, Some(amount), &result);
                result?;
            }
            Operation::CreditDaily { date } => {
                let today = date.unwrap_or_else(|| Local::now().date_naive());
                self.credit_daily_income(today);
            }
        }
        Ok(())
    }

    fn log_result<T, E: std::fmt::Display>(
        op: &str,
        phone: &str,
        amount: Option<Amount>,
        result: &Result<T, E>,
    ) {
        match (result, amount) {
            (Ok(_), Some(amt)) => info!(op, phone, amount = %amt, "{op} applied"),
            (Ok(_), None) => info!(op, phone, "{op} applied"),
            (Err(e), Some(amt)) => info!(op, phone, amount = %amt, reason = %e, "{op} skipped"),
            (Err(e), None) => info!(op, phone, reason = %e, "{op} skipped"),
        }
    }
}

/// Accounts and authentication
impl Engine {
    /// Register a new account.
    ///
    /// Resolves the referrer and builds the stored 3-level chain before
    /// anything is persisted; a bad invite code aborts with no partial
    /// state. After the account exists, upline team entries and signup
    /// bonuses fan out to each resolved chain level.
    pub fn register(&self, req: NewAccount) -> Result<Registration, RegisterError> {
        let NewAccount {
            phone,
            username,
            password,
            txn_password,
            referred_by,
            invite_code,
        } = req;

        let chain = match &referred_by {
            Some(code) => {
                let referrer = self
                    .store
                    .account_by_invite(code)
                    .ok_or_else(|| RegisterError::InvalidInviteCode(code.clone()))?;
                Chain::inherited_from(&referrer.invite_code, &referrer.chain)
            }
            None => Chain::default(),
        };

        let password = Credential::new(&password);
        let txn_password = Credential::new(&txn_password);
        let record = |code: String| NewAccountRecord {
            phone: phone.clone(),
            username: username.clone(),
            password: password.clone(),
            txn_password: txn_password.clone(),
            invite_code: code,
            chain: chain.clone(),
        };

        let (id, invite_code) = match invite_code {
            Some(code) => {
                let id = self.store.insert_account(record(code.clone()))?;
                (id, code)
            }
            None => self.insert_with_generated_code(record)?,
        };

        if let Some(account) = self.store.get_account(id) {
            self.attach_to_teams(&account);
            self.distribute_referral_rewards(&account, RewardTrigger::Signup);
        }

        Ok(Registration {
            account: id,
            invite_code,
        })
    }

    /// Claim a fresh random invite code, retrying on collision up to the
    /// configured bound.
    fn insert_with_generated_code(
        &self,
        record: impl Fn(String) -> NewAccountRecord,
    ) -> Result<(AccountId, String), RegisterError> {
        for _ in 0..self.config.invite_code_attempts {
            let code = referral::generate_invite_code(self.config.invite_code_len);
            match self.store.insert_account(record(code.clone())) {
                Ok(id) => return Ok((id, code)),
                Err(InsertError::DuplicateInviteCode(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(RegisterError::InviteCodeExhausted(
            self.config.invite_code_attempts,
        ))
    }

    /// Authenticate a user; the error never reveals which factor failed.
    pub fn login(&self, username: &str, password: &str) -> Result<AccountId, CredentialError> {
        let account = self
            .store
            .account_by_username(username)
            .ok_or(CredentialError)?;
        if account.password.verify(password) {
            Ok(account.id)
        } else {
            Err(CredentialError)
        }
    }

    /// Authenticate the operator against the injected admin config.
    pub fn admin_login(&self, username: &str, password: &str) -> Result<(), CredentialError> {
        if self.config.admin.verify(username, password) {
            Ok(())
        } else {
            Err(CredentialError)
        }
    }

    pub fn validate_txn_password(&self, phone: &str, txn_password: &str) -> Result<(), ProfileError> {
        let account = self
            .store
            .account_by_phone(phone)
            .ok_or_else(|| ProfileError::AccountNotFound(phone.to_string()))?;
        if account.txn_password.verify(txn_password) {
            Ok(())
        } else {
            Err(CredentialError.into())
        }
    }
}

/// Wallet operations
impl Engine {
    /// Credit a recharge, log it, and fan out recharge commission to the
    /// stored chain. Used by both the credentialed path and the verified
    /// gateway callback.
    pub fn recharge(&self, phone: &str, amount: Amount) -> Result<Amount, RechargeError> {
        let account = self
            .store
            .account_by_phone(phone)
            .ok_or_else(|| RechargeError::AccountNotFound(phone.to_string()))?;
        let balance = self.apply_recharge(&account, amount, format!("Wallet recharged with {amount}."))?;
        Ok(balance)
    }

    /// Recharge after verifying the transaction password.
    pub fn recharge_with_password(
        &self,
        phone: &str,
        amount: Amount,
        txn_password: &str,
    ) -> Result<Amount, RechargeError> {
        let account = self
            .store
            .account_by_phone(phone)
            .ok_or_else(|| RechargeError::AccountNotFound(phone.to_string()))?;
        if !account.txn_password.verify(txn_password) {
            return Err(CredentialError.into());
        }
        let balance = self.apply_recharge(&account, amount, format!("Wallet recharged with {amount}."))?;
        Ok(balance)
    }

    fn apply_recharge(
        &self,
        account: &Account,
        amount: Amount,
        description: String,
    ) -> Result<Amount, RechargeError> {
        self.store.credit(
            account.id,
            amount,
            TxDraft::success(TxType::Recharge, description),
        )?;
        let balance = self.store.balance(account.id)?;
        self.notifier.publish(Event::WalletUpdated {
            account: account.id,
            balance,
            amount,
            tx_type: TxType::Recharge,
        });
        self.distribute_referral_rewards(account, RewardTrigger::Recharge(amount));
        Ok(balance)
    }

    /// Ask the gateway to create a payment order for a recharge.
    pub fn create_order(
        &self,
        gateway: &dyn PaymentGateway,
        amount: Amount,
        phone: &str,
        client_ip: &str,
    ) -> Result<CreatedOrder, GatewayError> {
        gateway.create_order(amount, phone, client_ip)
    }

    /// Settle a gateway recharge callback. Only a verified signature with
    /// a successful status mutates the ledger.
    pub fn recharge_callback(
        &self,
        gateway: &dyn PaymentGateway,
        callback: &RechargeCallback,
    ) -> Result<Amount, CallbackError> {
        if !gateway.verify_signature(callback) {
            return Err(CallbackError::SignatureInvalid);
        }
        if callback.status != CALLBACK_SUCCESS {
            return Err(CallbackError::PaymentFailed(callback.status.clone()));
        }
        let account = self
            .store
            .account_by_phone(&callback.remark)
            .ok_or_else(|| CallbackError::AccountNotFound(callback.remark.clone()))?;
        let amount = callback.amount();
        self.store.credit(
            account.id,
            amount,
            TxDraft::success(
                TxType::Recharge,
                format!("Wallet recharged with {amount} via payment gateway."),
            ),
        )?;
        let balance = self.store.balance(account.id)?;
        self.notifier.publish(Event::PaymentComplete {
            account: account.id,
            balance,
            amount,
        });
        self.distribute_referral_rewards(&account, RewardTrigger::Recharge(amount));
        Ok(balance)
    }

    /// Debit the requested amount up front and open a withdrawal request
    /// in `Processing`. The record carries the fee-adjusted payout and a
    /// bank-info snapshot for the operator.
    pub fn withdraw(
        &self,
        phone: &str,
        txn_password: &str,
        amount: Amount,
        bank_info: Option<BankInfo>,
    ) -> Result<TxId, WithdrawError> {
        let account = self
            .store
            .account_by_phone(phone)
            .ok_or_else(|| WithdrawError::AccountNotFound(phone.to_string()))?;
        if !account.txn_password.verify(txn_password) {
            return Err(CredentialError.into());
        }

        let payout = amount - amount.mul_bps(self.config.withdrawal_fee_bps);
        let snapshot = bank_info.or(account.bank_info).unwrap_or_default();
        let draft = TxDraft::success(
            TxType::Withdraw,
            format!("Withdrawal of {amount} requested. {payout} will be paid out after processing fee."),
        )
        .with_status(TxStatus::Processing)
        .with_payout(payout)
        .with_bank_info(snapshot);

        let tx_id = self.store.debit(account.id, amount, draft)?;
        if let Ok(balance) = self.store.balance(account.id) {
            self.notifier.publish(Event::WalletUpdated {
                account: account.id,
                balance,
                amount,
                tx_type: TxType::Withdraw,
            });
        }
        Ok(tx_id)
    }

    /// Admin resolution of a withdrawal request. Only `Success` and
    /// `Rejected` are accepted; rejection refunds the full amount by
    /// flipping the request record, never by appending a new one.
    pub fn review_withdrawal(
        &self,
        tx_id: TxId,
        status: TxStatus,
        remarks: Option<&str>,
    ) -> Result<TxRecord, ReviewError> {
        if !matches!(status, TxStatus::Success | TxStatus::Rejected) {
            return Err(ReviewError::InvalidStatus(format!("{status:?}")));
        }
        let record = self.store.settle_withdrawal(tx_id, status, remarks)?;
        if record.status == TxStatus::Rejected
            && let Some(account) = record.account
            && let Ok(balance) = self.store.balance(account)
        {
            self.notifier.publish(Event::WalletUpdated {
                account,
                balance,
                amount: record.amount,
                tx_type: TxType::Other,
            });
        }
        Ok(record)
    }
}

/// Plans and purchases
impl Engine {
    pub fn create_plan(&self, spec: PlanSpec) -> Plan {
        self.store.insert_plan(spec)
    }

    pub fn update_plan(&self, id: PlanId, spec: PlanSpec) -> Result<Plan, PlanError> {
        self.store.update_plan(id, spec).ok_or(PlanError::NotFound(id))
    }

    pub fn delete_plan(&self, id: PlanId) -> Result<Plan, PlanError> {
        self.store.delete_plan(id).ok_or(PlanError::NotFound(id))
    }

    /// Buy a plan: the price is debited (guarded against insufficient
    /// funds) and the plan's terms are snapshotted into a new active
    /// purchase so later plan edits cannot change it.
    pub fn buy_plan(&self, phone: &str, plan_id: PlanId) -> Result<Purchase, PurchaseError> {
        let account = self
            .store
            .account_by_phone(phone)
            .ok_or_else(|| PurchaseError::AccountNotFound(phone.to_string()))?;
        let plan = self
            .store
            .get_plan(plan_id)
            .ok_or_else(|| PurchaseError::PlanNotFound(plan_id.to_string()))?;

        // Reserved up front so the purchase record can reference it.
        let purchase_id = self.store.allocate_purchase_id();
        let draft = TxDraft::success(TxType::Purchase, format!("Purchase of {}", plan.name))
            .with_plan(plan.id, purchase_id);
        self.store.debit(account.id, plan.price, draft)?;

        let purchase = Purchase {
            id: purchase_id,
            account: account.id,
            plan: plan.id,
            plan_name: plan.name.clone(),
            plan_type: plan.plan_type,
            price: plan.price,
            daily_income: plan.daily_income,
            purchased_at: Utc::now(),
            status: PurchaseStatus::Active,
            total_earned: Amount::ZERO,
            last_income_date: None,
        };
        self.store.insert_purchase(purchase.clone());

        if let Ok(balance) = self.store.balance(account.id) {
            self.notifier.publish(Event::WalletUpdated {
                account: account.id,
                balance,
                amount: plan.price,
                tx_type: TxType::Purchase,
            });
        }
        Ok(purchase)
    }

    pub fn buy_plan_by_name(&self, phone: &str, name: &str) -> Result<Purchase, PurchaseError> {
        let plan = self
            .store
            .plan_by_name(name)
            .ok_or_else(|| PurchaseError::PlanNotFound(name.to_string()))?;
        self.buy_plan(phone, plan.id)
    }

    /// Operator action: stop a purchase accruing daily income.
    pub fn complete_purchase(&self, id: PurchaseId) -> Result<Purchase, PurchaseError> {
        self.store
            .with_purchase_mut(id, |purchase| {
                purchase.status = PurchaseStatus::Completed;
                purchase.clone()
            })
            .ok_or(PurchaseError::PurchaseNotFound(id))
    }
}

/// Profile maintenance
impl Engine {
    /// Update bank details; an account number already registered to
    /// another user is rejected. The number is claimed atomically in the
    /// store, so concurrent updates can never both take it.
    pub fn update_bank_info(&self, phone: &str, bank_info: BankInfo) -> Result<(), ProfileError> {
        let id = self
            .store
            .account_id_by_phone(phone)
            .ok_or_else(|| ProfileError::AccountNotFound(phone.to_string()))?;
        self.store.set_bank_info(id, bank_info).map_err(|e| match e {
            BankInfoError::AccountNotFound(_) => ProfileError::AccountNotFound(phone.to_string()),
            BankInfoError::NumberInUse => ProfileError::BankAccountInUse,
        })
    }

    pub fn change_password(
        &self,
        phone: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), ProfileError> {
        self.change_credential(phone, old_password, new_password, false)
    }

    pub fn change_txn_password(
        &self,
        phone: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), ProfileError> {
        self.change_credential(phone, old_password, new_password, true)
    }

    fn change_credential(
        &self,
        phone: &str,
        old_password: &str,
        new_password: &str,
        txn: bool,
    ) -> Result<(), ProfileError> {
        let id = self
            .store
            .account_id_by_phone(phone)
            .ok_or_else(|| ProfileError::AccountNotFound(phone.to_string()))?;
        // Verify and replace under the account lock so a concurrent change
        // cannot slip between the check and the write.
        self.store
            .apply_atomic(id, |acct| {
                let current = if txn { &acct.txn_password } else { &acct.password };
                if !current.verify(old_password) {
                    return Err(ProfileError::from(CredentialError));
                }
                let fresh = Credential::new(new_password);
                if txn {
                    acct.txn_password = fresh;
                } else {
                    acct.password = fresh;
                }
                Ok(())
            })
            .map_err(|_| ProfileError::AccountNotFound(phone.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::RechargeCallback;
    use crate::model::PlanType;

    // test utils

    fn engine() -> Engine {
        Engine::new(EngineConfig::default())
    }

    fn register(
        engine: &Engine,
        phone: &str,
        username: &str,
        referred_by: Option<&str>,
    ) -> Registration {
        engine
            .register(NewAccount {
                phone: phone.to_string(),
                username: username.to_string(),
                password: "pw".to_string(),
                txn_password: "txn".to_string(),
                referred_by: referred_by.map(str::to_string),
                invite_code: None,
            })
            .unwrap()
    }

    fn balance(engine: &Engine, id: AccountId) -> Amount {
        engine.store().balance(id).unwrap()
    }

    fn amt(value: f64) -> Amount {
        Amount::from_float(value)
    }

    /// a <- b <- c, returning (a, b, c) registrations.
    fn three_level_chain(engine: &Engine) -> (Registration, Registration, Registration) {
        let a = register(engine, "900001", "alice", None);
        let b = register(engine, "900002", "bob", Some(&a.invite_code));
        let c = register(engine, "900003", "carol", Some(&b.invite_code));
        (a, b, c)
    }

    // Registration & referral graph

    #[test]
    fn register_creates_account_with_invite_code() {
        let engine = engine();
        let reg = register(&engine, "900001", "alice", None);

        let account = engine.store().get_account(reg.account).unwrap();
        assert_eq!(account.phone, "900001");
        assert_eq!(account.username, "alice");
        assert_eq!(account.wallet, Amount::ZERO);
        assert_eq!(account.invite_code, reg.invite_code);
        assert_eq!(account.invite_code.len(), 6);
        assert_eq!(account.chain, Chain::default());
    }

    #[test]
    fn register_duplicate_phone_fails() {
        let engine = engine();
        register(&engine, "900001", "alice", None);

        let result = engine.register(NewAccount {
            phone: "900001".into(),
            username: "bob".into(),
            password: "pw".into(),
            txn_password: "txn".into(),
            referred_by: None,
            invite_code: None,
        });
        assert!(matches!(result, Err(RegisterError::DuplicatePhone(_))));
    }

    #[test]
    fn register_duplicate_username_fails() {
        let engine = engine();
        register(&engine, "900001", "alice", None);

        let result = engine.register(NewAccount {
            phone: "900002".into(),
            username: "alice".into(),
            password: "pw".into(),
            txn_password: "txn".into(),
            referred_by: None,
            invite_code: None,
        });
        assert!(matches!(result, Err(RegisterError::DuplicateUsername(_))));
    }

    #[test]
    fn register_invalid_invite_code_aborts_whole_registration() {
        let engine = engine();
        let result = engine.register(NewAccount {
            phone: "900001".into(),
            username: "alice".into(),
            password: "pw".into(),
            txn_password: "txn".into(),
            referred_by: Some("NOSUCH".into()),
            invite_code: None,
        });
        assert!(matches!(result, Err(RegisterError::InvalidInviteCode(_))));
        // No partial account was created.
        assert!(engine.store().account_by_phone("900001").is_none());
    }

    #[test]
    fn register_with_explicit_invite_code_claims_it() {
        let engine = engine();
        let reg = engine
            .register(NewAccount {
                phone: "900001".into(),
                username: "alice".into(),
                password: "pw".into(),
                txn_password: "txn".into(),
                referred_by: None,
                invite_code: Some("ALICE1".into()),
            })
            .unwrap();
        assert_eq!(reg.invite_code, "ALICE1");
        assert_eq!(
            engine.store().account_by_invite("ALICE1").unwrap().id,
            reg.account
        );

        let clash = engine.register(NewAccount {
            phone: "900002".into(),
            username: "bob".into(),
            password: "pw".into(),
            txn_password: "txn".into(),
            referred_by: None,
            invite_code: Some("ALICE1".into()),
        });
        assert!(matches!(clash, Err(RegisterError::DuplicateInviteCode(_))));
    }

    #[test]
    fn referred_signup_inherits_stored_chain() {
        let engine = engine();
        let (a, b, c) = three_level_chain(&engine);
        let d = register(&engine, "900004", "dave", Some(&c.invite_code));

        let dave = engine.store().get_account(d.account).unwrap();
        assert_eq!(dave.chain.level1.as_deref(), Some(c.invite_code.as_str()));
        assert_eq!(dave.chain.level2.as_deref(), Some(b.invite_code.as_str()));
        assert_eq!(dave.chain.level3.as_deref(), Some(a.invite_code.as_str()));
    }

    #[test]
    fn referred_signup_grows_upline_teams() {
        let engine = engine();
        let (a, b, c) = three_level_chain(&engine);

        let alice = engine.store().get_account(a.account).unwrap();
        let bob = engine.store().get_account(b.account).unwrap();

        // bob is level 1 of alice; carol is level 1 of bob and level 2 of
        // alice.
        assert_eq!(alice.team.len(), 2);
        assert_eq!(alice.team[0].level, 1);
        assert_eq!(alice.team[0].username, "bob");
        assert_eq!(alice.team[1].level, 2);
        assert_eq!(alice.team[1].username, "carol");

        assert_eq!(bob.team.len(), 1);
        assert_eq!(bob.team[0].level, 1);
        assert_eq!(bob.team[0].username, "carol");
        assert_eq!(bob.team[0].account, c.account);
    }

    #[test]
    fn signup_bonuses_paid_to_each_level() {
        let engine = engine();
        let (a, b, c) = three_level_chain(&engine);
        register(&engine, "900004", "dave", Some(&c.invite_code));

        // alice earned 50 (bob) + 30 (carol) + 20 (dave)
        assert_eq!(balance(&engine, a.account), amt(100.0));
        // bob earned 50 (carol) + 30 (dave)
        assert_eq!(balance(&engine, b.account), amt(80.0));
        // carol earned 50 (dave)
        assert_eq!(balance(&engine, c.account), amt(50.0));

        let alice = engine.store().get_account(a.account).unwrap();
        assert_eq!(alice.referral_counts, [1, 1, 1]);
        assert_eq!(
            alice.referral_earnings,
            [amt(50.0), amt(30.0), amt(20.0)]
        );

        // Every bonus has a matching ReferralBonus record.
        let bonuses: Vec<_> = engine
            .store()
            .transactions_for("900001")
            .into_iter()
            .filter(|t| t.tx_type == TxType::ReferralBonus)
            .collect();
        assert_eq!(bonuses.len(), 3);
        assert_eq!(bonuses[0].referral_level, Some(1));
        assert_eq!(bonuses[1].referral_level, Some(2));
        assert_eq!(bonuses[2].referral_level, Some(3));
    }

    #[test]
    fn unreferred_signup_pays_nothing() {
        let engine = engine();
        let a = register(&engine, "900001", "alice", None);
        assert_eq!(balance(&engine, a.account), Amount::ZERO);
        assert!(engine.store().transactions_for("900001").is_empty());
    }

    // Recharge & commission

    #[test]
    fn recharge_credits_and_logs() {
        let engine = engine();
        let a = register(&engine, "900001", "alice", None);

        let new_balance = engine.recharge("900001", amt(200.0)).unwrap();
        assert_eq!(new_balance, amt(200.0));
        assert_eq!(balance(&engine, a.account), amt(200.0));

        let records = engine.store().transactions_for("900001");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tx_type, TxType::Recharge);
        assert_eq!(records[0].amount, amt(200.0));
    }

    #[test]
    fn recharge_distributes_exact_percentages() {
        let engine = engine();
        let (a, b, c) = three_level_chain(&engine);
        let d = register(&engine, "900004", "dave", Some(&c.invite_code));

        let before_a = balance(&engine, a.account);
        let before_b = balance(&engine, b.account);
        let before_c = balance(&engine, c.account);

        engine.recharge("900004", amt(200.0)).unwrap();

        assert_eq!(balance(&engine, d.account), amt(200.0));
        // dave's chain: level1 carol (25%), level2 bob (3%), level3 alice (2%)
        assert_eq!(balance(&engine, c.account) - before_c, amt(50.0));
        assert_eq!(balance(&engine, b.account) - before_b, amt(6.0));
        assert_eq!(balance(&engine, a.account) - before_a, amt(4.0));

        let carol_bonus: Vec<_> = engine
            .store()
            .transactions_for("900003")
            .into_iter()
            .filter(|t| t.tx_type == TxType::ReferralBonus && t.referral_level == Some(1))
            .collect();
        assert_eq!(carol_bonus.len(), 2); // dave's signup + this recharge
        assert_eq!(carol_bonus[1].amount, amt(50.0));
    }

    #[test]
    fn recharge_without_chain_distributes_nothing() {
        let engine = engine();
        register(&engine, "900001", "alice", None);
        engine.recharge("900001", amt(100.0)).unwrap();

        let records = engine.store().transactions_for("900001");
        assert_eq!(records.len(), 1);
        assert!(records.iter().all(|t| t.tx_type == TxType::Recharge));
    }

    #[test]
    fn recharge_unknown_phone_fails() {
        let engine = engine();
        assert!(matches!(
            engine.recharge("900001", amt(10.0)),
            Err(RechargeError::AccountNotFound(_))
        ));
    }

    #[test]
    fn recharge_with_password_verifies_credential() {
        let engine = engine();
        register(&engine, "900001", "alice", None);

        assert!(matches!(
            engine.recharge_with_password("900001", amt(10.0), "wrong"),
            Err(RechargeError::Credential(_))
        ));
        engine
            .recharge_with_password("900001", amt(10.0), "txn")
            .unwrap();
    }

    #[test]
    fn non_positive_recharge_rejected_before_any_mutation() {
        let engine = engine();
        let a = register(&engine, "900001", "alice", None);
        assert!(engine.recharge("900001", Amount::ZERO).is_err());
        assert_eq!(balance(&engine, a.account), Amount::ZERO);
        assert!(engine.store().transactions_for("900001").is_empty());
    }

    // Login

    #[test]
    fn login_verifies_password() {
        let engine = engine();
        let a = register(&engine, "900001", "alice", None);
        assert_eq!(engine.login("alice", "pw").unwrap(), a.account);
        assert!(engine.login("alice", "wrong").is_err());
        assert!(engine.login("nobody", "pw").is_err());
    }

    #[test]
    fn login_errors_are_indistinguishable() {
        let engine = engine();
        register(&engine, "900001", "alice", None);
        let wrong_password = engine.login("alice", "wrong").unwrap_err().to_string();
        let wrong_user = engine.login("nobody", "pw").unwrap_err().to_string();
        assert_eq!(wrong_password, wrong_user);
    }

    #[test]
    fn admin_login_uses_injected_config() {
        let mut config = EngineConfig::default();
        config.admin = crate::config::AdminConfig::new("ops", "s3cret");
        let engine = Engine::new(config);
        assert!(engine.admin_login("ops", "s3cret").is_ok());
        assert!(engine.admin_login("ops", "nope").is_err());
    }

    // Plans & purchases

    fn starter_plan(engine: &Engine) -> Plan {
        engine.create_plan(PlanSpec {
            name: "Starter".into(),
            price: amt(100.0),
            daily_income: amt(5.0),
            plan_type: PlanType::PlanA,
            duration_days: None,
        })
    }

    #[test]
    fn buy_plan_debits_and_snapshots() {
        let engine = engine();
        let a = register(&engine, "900001", "alice", None);
        engine.recharge("900001", amt(150.0)).unwrap();
        let plan = starter_plan(&engine);

        let purchase = engine.buy_plan("900001", plan.id).unwrap();
        assert_eq!(balance(&engine, a.account), amt(50.0));
        assert_eq!(purchase.status, PurchaseStatus::Active);
        assert_eq!(purchase.price, amt(100.0));
        assert_eq!(purchase.daily_income, amt(5.0));
        assert_eq!(purchase.total_earned, Amount::ZERO);
        assert!(purchase.last_income_date.is_none());

        // Later plan edits must not touch the snapshot.
        engine
            .update_plan(
                plan.id,
                PlanSpec {
                    name: "Starter".into(),
                    price: amt(500.0),
                    daily_income: amt(25.0),
                    plan_type: PlanType::PlanA,
                    duration_days: Some(30),
                },
            )
            .unwrap();
        let stored = engine.store().get_purchase(purchase.id).unwrap();
        assert_eq!(stored.price, amt(100.0));
        assert_eq!(stored.daily_income, amt(5.0));
    }

    #[test]
    fn buy_plan_insufficient_funds_leaves_state_unchanged() {
        let engine = engine();
        let a = register(&engine, "900001", "alice", None);
        engine.recharge("900001", amt(50.0)).unwrap();
        let plan = starter_plan(&engine);

        let result = engine.buy_plan("900001", plan.id);
        assert!(matches!(
            result,
            Err(PurchaseError::Ledger(
                crate::store::LedgerError::InsufficientFunds(_, _, _)
            ))
        ));
        assert_eq!(balance(&engine, a.account), amt(50.0));
        assert!(engine.store().purchases_for(a.account).is_empty());
        // Only the recharge record exists.
        assert_eq!(engine.store().transactions_for("900001").len(), 1);
    }

    #[test]
    fn buy_plan_by_name_resolves_plan() {
        let engine = engine();
        register(&engine, "900001", "alice", None);
        engine.recharge("900001", amt(150.0)).unwrap();
        starter_plan(&engine);

        engine.buy_plan_by_name("900001", "Starter").unwrap();
        assert!(matches!(
            engine.buy_plan_by_name("900001", "Missing"),
            Err(PurchaseError::PlanNotFound(_))
        ));
    }

    // Withdrawals

    #[test]
    fn withdraw_debits_full_amount_and_records_fee_adjusted_payout() {
        let engine = engine();
        let a = register(&engine, "900001", "alice", None);
        engine.recharge("900001", amt(200.0)).unwrap();

        let tx = engine.withdraw("900001", "txn", amt(100.0), None).unwrap();
        assert_eq!(balance(&engine, a.account), amt(100.0));

        let record = engine.store().get_transaction(tx).unwrap();
        assert_eq!(record.tx_type, TxType::Withdraw);
        assert_eq!(record.status, TxStatus::Processing);
        assert_eq!(record.amount, amt(100.0));
        assert_eq!(record.payout_amount, Some(amt(90.0)));
    }

    #[test]
    fn withdraw_requires_transaction_password() {
        let engine = engine();
        let a = register(&engine, "900001", "alice", None);
        engine.recharge("900001", amt(200.0)).unwrap();

        assert!(matches!(
            engine.withdraw("900001", "wrong", amt(50.0), None),
            Err(WithdrawError::Credential(_))
        ));
        assert_eq!(balance(&engine, a.account), amt(200.0));
    }

    #[test]
    fn withdraw_insufficient_funds_rejected_without_mutation() {
        let engine = engine();
        let a = register(&engine, "900001", "alice", None);
        engine.recharge("900001", amt(50.0)).unwrap();

        assert!(matches!(
            engine.withdraw("900001", "txn", amt(60.0), None),
            Err(WithdrawError::Ledger(
                crate::store::LedgerError::InsufficientFunds(_, _, _)
            ))
        ));
        assert_eq!(balance(&engine, a.account), amt(50.0));
        assert_eq!(engine.store().transactions_for("900001").len(), 1);
    }

    #[test]
    fn withdraw_snapshots_stored_bank_info() {
        let engine = engine();
        register(&engine, "900001", "alice", None);
        engine.recharge("900001", amt(100.0)).unwrap();
        engine
            .update_bank_info(
                "900001",
                BankInfo {
                    real_name: "Alice".into(),
                    account_number: "123".into(),
                    ifsc_code: "IFSC1".into(),
                },
            )
            .unwrap();

        let tx = engine.withdraw("900001", "txn", amt(50.0), None).unwrap();
        let record = engine.store().get_transaction(tx).unwrap();
        assert_eq!(record.bank_info.unwrap().account_number, "123");
    }

    #[test]
    fn rejected_withdrawal_refunds_without_duplicate_record() {
        let engine = engine();
        let a = register(&engine, "900001", "alice", None);
        engine.recharge("900001", amt(200.0)).unwrap();
        let tx = engine.withdraw("900001", "txn", amt(100.0), None).unwrap();

        let record = engine
            .review_withdrawal(tx, TxStatus::Rejected, Some("bad bank details"))
            .unwrap();
        assert_eq!(record.status, TxStatus::Rejected);
        assert_eq!(balance(&engine, a.account), amt(200.0));

        // recharge + withdrawal request only; the refund is the status flip
        let records = engine.store().transactions_for("900001");
        assert_eq!(records.len(), 2);
        assert!(records[1].description.ends_with("Admin remarks: bad bank details"));
    }

    #[test]
    fn approved_withdrawal_keeps_debit() {
        let engine = engine();
        let a = register(&engine, "900001", "alice", None);
        engine.recharge("900001", amt(200.0)).unwrap();
        let tx = engine.withdraw("900001", "txn", amt(100.0), None).unwrap();

        let record = engine.review_withdrawal(tx, TxStatus::Success, None).unwrap();
        assert_eq!(record.status, TxStatus::Success);
        assert_eq!(balance(&engine, a.account), amt(100.0));
    }

    #[test]
    fn review_restricts_status_to_defined_states() {
        let engine = engine();
        register(&engine, "900001", "alice", None);
        engine.recharge("900001", amt(200.0)).unwrap();
        let tx = engine.withdraw("900001", "txn", amt(100.0), None).unwrap();

        assert!(matches!(
            engine.review_withdrawal(tx, TxStatus::Pending, None),
            Err(ReviewError::InvalidStatus(_))
        ));
        assert!(matches!(
            engine.review_withdrawal(tx, TxStatus::Processing, None),
            Err(ReviewError::InvalidStatus(_))
        ));
    }

    #[test]
    fn terminal_review_states_admit_no_transition() {
        let engine = engine();
        let a = register(&engine, "900001", "alice", None);
        engine.recharge("900001", amt(200.0)).unwrap();
        let tx = engine.withdraw("900001", "txn", amt(100.0), None).unwrap();
        engine.review_withdrawal(tx, TxStatus::Success, None).unwrap();

        assert!(matches!(
            engine.review_withdrawal(tx, TxStatus::Rejected, None),
            Err(ReviewError::Settle(_))
        ));
        // No sneaky refund either.
        assert_eq!(balance(&engine, a.account), amt(100.0));
    }

    // Gateway callback

    struct StubGateway {
        valid_signature: bool,
    }

    impl PaymentGateway for StubGateway {
        fn create_order(
            &self,
            _amount: Amount,
            payer_phone: &str,
            _client_ip: &str,
        ) -> Result<CreatedOrder, GatewayError> {
            Ok(CreatedOrder {
                order_id: format!("ORDER-{payer_phone}"),
                pay_url: "https://pay.example/x".into(),
            })
        }

        fn verify_signature(&self, _callback: &RechargeCallback) -> bool {
            self.valid_signature
        }
    }

    fn callback(phone: &str, status: &str, money: i64) -> RechargeCallback {
        RechargeCallback {
            order_sn: "ORDER1".into(),
            status: status.into(),
            money,
            remark: phone.into(),
            sign: "sig".into(),
        }
    }

    #[test]
    fn callback_credits_verified_successful_payment() {
        let engine = engine();
        let a = register(&engine, "900001", "alice", None);
        let gateway = StubGateway {
            valid_signature: true,
        };

        // money arrives in smallest currency units
        let new_balance = engine
            .recharge_callback(&gateway, &callback("900001", "SUCCESS", 20_000))
            .unwrap();
        assert_eq!(new_balance, amt(200.0));
        assert_eq!(balance(&engine, a.account), amt(200.0));
    }

    #[test]
    fn callback_with_bad_signature_mutates_nothing() {
        let engine = engine();
        let a = register(&engine, "900001", "alice", None);
        let gateway = StubGateway {
            valid_signature: false,
        };

        assert!(matches!(
            engine.recharge_callback(&gateway, &callback("900001", "SUCCESS", 20_000)),
            Err(CallbackError::SignatureInvalid)
        ));
        assert_eq!(balance(&engine, a.account), Amount::ZERO);
        assert!(engine.store().transactions_for("900001").is_empty());
    }

    #[test]
    fn callback_with_failed_status_mutates_nothing() {
        let engine = engine();
        let a = register(&engine, "900001", "alice", None);
        let gateway = StubGateway {
            valid_signature: true,
        };

        assert!(matches!(
            engine.recharge_callback(&gateway, &callback("900001", "FAILED", 20_000)),
            Err(CallbackError::PaymentFailed(_))
        ));
        assert_eq!(balance(&engine, a.account), Amount::ZERO);
    }

    #[test]
    fn callback_distributes_recharge_commission() {
        let engine = engine();
        let a = register(&engine, "900001", "alice", None);
        register(&engine, "900002", "bob", Some(&a.invite_code));
        let gateway = StubGateway {
            valid_signature: true,
        };

        let before = balance(&engine, a.account);
        engine
            .recharge_callback(&gateway, &callback("900002", "SUCCESS", 10_000))
            .unwrap();
        assert_eq!(balance(&engine, a.account) - before, amt(25.0));
    }

    // Profile maintenance

    #[test]
    fn update_bank_info_rejects_duplicate_account_number() {
        let engine = engine();
        register(&engine, "900001", "alice", None);
        register(&engine, "900002", "bob", None);
        let info = BankInfo {
            real_name: "Alice".into(),
            account_number: "123".into(),
            ifsc_code: "IFSC1".into(),
        };

        engine.update_bank_info("900001", info.clone()).unwrap();
        // Re-saving your own details is fine.
        engine.update_bank_info("900001", info.clone()).unwrap();
        assert!(matches!(
            engine.update_bank_info("900002", info),
            Err(ProfileError::BankAccountInUse)
        ));
    }

    #[test]
    fn simultaneous_bank_updates_admit_one_owner() {
        use std::sync::Barrier;

        for _ in 0..200 {
            let engine = engine();
            register(&engine, "900001", "alice", None);
            register(&engine, "900002", "bob", None);
            let barrier = Barrier::new(2);

            let claim = |phone: &str| {
                let info = BankInfo {
                    real_name: "Holder".into(),
                    account_number: "123".into(),
                    ifsc_code: "IFSC1".into(),
                };
                barrier.wait();
                engine.update_bank_info(phone, info)
            };
            let (ra, rb) = std::thread::scope(|s| {
                let ta = s.spawn(|| claim("900001"));
                let tb = s.spawn(|| claim("900002"));
                (ta.join().unwrap(), tb.join().unwrap())
            });

            assert!(ra.is_ok() ^ rb.is_ok(), "exactly one update must win");
            let loser = if ra.is_ok() { "900002" } else { "900001" };
            assert!(
                engine
                    .store()
                    .account_by_phone(loser)
                    .unwrap()
                    .bank_info
                    .is_none()
            );
        }
    }

    #[test]
    fn change_password_requires_old_password() {
        let engine = engine();
        register(&engine, "900001", "alice", None);

        assert!(matches!(
            engine.change_password("900001", "wrong", "new"),
            Err(ProfileError::Credential(_))
        ));
        engine.change_password("900001", "pw", "new").unwrap();
        assert!(engine.login("alice", "pw").is_err());
        engine.login("alice", "new").unwrap();
    }

    #[test]
    fn change_txn_password_requires_old_password() {
        let engine = engine();
        register(&engine, "900001", "alice", None);

        assert!(engine.change_txn_password("900001", "nope", "new").is_err());
        engine.change_txn_password("900001", "txn", "new").unwrap();
        engine.validate_txn_password("900001", "new").unwrap();
        assert!(engine.validate_txn_password("900001", "txn").is_err());
    }

    // Batch surface

    #[tokio::test]
    async fn run_processes_operation_stream() {
        let engine = engine();
        let ops = vec![
            Operation::Register {
                phone: "900001".into(),
                username: "alice".into(),
                password: "pw".into(),
                referred_by: None,
                invite_code: Some("ALICE1".into()),
            },
            Operation::Register {
                phone: "900002".into(),
                username: "bob".into(),
                password: "pw".into(),
                referred_by: Some("ALICE1".into()),
                invite_code: None,
            },
            Operation::Recharge {
                phone: "900002".into(),
                amount: amt(100.0),
            },
        ];

        let summary = engine.run(tokio_stream::iter(ops)).await;
        assert_eq!(summary, BatchSummary { applied: 3, skipped: 0 });

        let alice = engine.store().account_by_phone("900001").unwrap();
        // 50 signup bonus + 25% of bob's 100 recharge
        assert_eq!(alice.wallet, amt(75.0));
        let bob = engine.store().account_by_phone("900002").unwrap();
        assert_eq!(bob.wallet, amt(100.0));
    }

    #[tokio::test]
    async fn run_skips_failed_operations_and_continues() {
        let engine = engine();
        let ops = vec![
            Operation::Register {
                phone: "900001".into(),
                username: "alice".into(),
                password: "pw".into(),
                referred_by: None,
                invite_code: None,
            },
            Operation::Recharge {
                phone: "999999".into(), // no such account
                amount: amt(100.0),
            },
            Operation::Recharge {
                phone: "900001".into(),
                amount: amt(40.0),
            },
        ];

        let summary = engine.run(tokio_stream::iter(ops)).await;
        assert_eq!(summary, BatchSummary { applied: 2, skipped: 1 });

        let alice = engine.store().account_by_phone("900001").unwrap();
        assert_eq!(alice.wallet, amt(40.0));
    }
}
