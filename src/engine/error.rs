//! Error types for engine operations.

use thiserror::Error;

use crate::model::PurchaseId;
use crate::store::{InsertError, LedgerError, SettleError};

/// Top-level error returned by [`Engine::apply`](super::Engine::apply).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("registration failed: {0}")]
    Register(#[from] RegisterError),

    #[error("login failed: {0}")]
    Credential(#[from] CredentialError),

    #[error("recharge failed: {0}")]
    Recharge(#[from] RechargeError),

    #[error("plan operation failed: {0}")]
    Plan(#[from] PlanError),

    #[error("purchase failed: {0}")]
    Purchase(#[from] PurchaseError),

    #[error("withdrawal failed: {0}")]
    Withdraw(#[from] WithdrawError),

    #[error("withdrawal review failed: {0}")]
    Review(#[from] ReviewError),

    #[error("profile update failed: {0}")]
    Profile(#[from] ProfileError),

    #[error("recharge callback rejected: {0}")]
    Callback(#[from] CallbackError),
}

/// Error during registration. Any failure aborts the whole registration;
/// no partial account is created.
#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("phone number {0} is already registered")]
    DuplicatePhone(String),

    #[error("username {0} is already taken")]
    DuplicateUsername(String),

    #[error("invite code {0} is already in use")]
    DuplicateInviteCode(String),

    #[error("invalid invite code {0}")]
    InvalidInviteCode(String),

    #[error("could not generate a unique invite code after {0} attempts; code space misconfigured")]
    InviteCodeExhausted(u32),
}

impl From<InsertError> for RegisterError {
    fn from(err: InsertError) -> Self {
        match err {
            InsertError::DuplicatePhone(phone) => RegisterError::DuplicatePhone(phone),
            InsertError::DuplicateUsername(username) => RegisterError::DuplicateUsername(username),
            InsertError::DuplicateInviteCode(code) => RegisterError::DuplicateInviteCode(code),
        }
    }
}

/// Deliberately generic: must not reveal which factor failed.
#[derive(Debug, Error)]
#[error("invalid credentials")]
pub struct CredentialError;

/// Error during a wallet recharge.
#[derive(Debug, Error)]
pub enum RechargeError {
    #[error("no account for phone {0}")]
    AccountNotFound(String),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Error during plan administration.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("plan {0} not found")]
    NotFound(u64),
}

/// Error during a plan purchase.
#[derive(Debug, Error)]
pub enum PurchaseError {
    #[error("no account for phone {0}")]
    AccountNotFound(String),

    #[error("plan '{0}' not found")]
    PlanNotFound(String),

    #[error("purchase {0} not found")]
    PurchaseNotFound(PurchaseId),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Error during a withdrawal request.
#[derive(Debug, Error)]
pub enum WithdrawError {
    #[error("no account for phone {0}")]
    AccountNotFound(String),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Error during admin withdrawal review.
#[derive(Debug, Error)]
pub enum ReviewError {
    /// Only `Success` and `Rejected` are reviewable outcomes.
    #[error("'{0}' is not a valid review status; use Success or Rejected")]
    InvalidStatus(String),

    #[error(transparent)]
    Settle(#[from] SettleError),
}

/// Error during profile maintenance (bank info, password changes).
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("no account for phone {0}")]
    AccountNotFound(String),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("bank account already in use by another user")]
    BankAccountInUse,
}

/// Error handling a payment gateway callback. None of these leave any
/// ledger mutation behind.
#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("invalid payment signature")]
    SignatureInvalid,

    #[error("payment was not successful (status '{0}')")]
    PaymentFailed(String),

    #[error("no account for phone {0}")]
    AccountNotFound(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}
