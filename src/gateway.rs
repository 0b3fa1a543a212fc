//! Payment gateway seam.
//!
//! The gateway's order creation and signature scheme are external
//! collaborators; the engine consumes them through this trait and only
//! ever credits a wallet after a verified, successful callback.

use crate::Amount;

/// Callback status string the gateway sends for a settled payment.
pub const CALLBACK_SUCCESS: &str = "SUCCESS";

/// Result of asking the gateway to create a payment order.
#[derive(Debug, Clone)]
pub struct CreatedOrder {
    pub order_id: String,
    pub pay_url: String,
}

/// Payload delivered to the recharge callback endpoint.
#[derive(Debug, Clone)]
pub struct RechargeCallback {
    pub order_sn: String,
    pub status: String,
    /// Amount in smallest currency units.
    pub money: i64,
    /// The gateway echoes the payer's phone in the remark field.
    pub remark: String,
    pub sign: String,
}

impl RechargeCallback {
    pub fn amount(&self) -> Amount {
        Amount::from_scaled(self.money)
    }
}

/// Black-box capability to create orders and verify callback signatures.
pub trait PaymentGateway {
    fn create_order(
        &self,
        amount: Amount,
        payer_phone: &str,
        client_ip: &str,
    ) -> Result<CreatedOrder, GatewayError>;

    fn verify_signature(&self, callback: &RechargeCallback) -> bool;
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway rejected order creation: {0}")]
    OrderRejected(String),

    #[error("gateway unreachable: {0}")]
    Unreachable(String),
}
