//! Fire-and-forget notification channel.
//!
//! Wallet mutations publish events for any real-time transport to relay;
//! the core requires no delivery guarantee and never blocks on a send.

use tokio::sync::broadcast;

use crate::Amount;
use crate::model::{AccountId, TxType};

/// An event published after a committed wallet mutation.
#[derive(Debug, Clone)]
pub enum Event {
    /// An account's wallet changed.
    WalletUpdated {
        account: AccountId,
        balance: Amount,
        amount: Amount,
        tx_type: TxType,
    },
    /// A referrer earned a commission.
    ReferralBonus {
        account: AccountId,
        level: u8,
        amount: Amount,
        from_username: String,
    },
    /// A gateway recharge settled.
    PaymentComplete {
        account: AccountId,
        balance: Amount,
        amount: Amount,
    },
}

/// Broadcast-based publisher. Cloneable; subscribers may come and go, and
/// publishing with no subscribers is a no-op.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Event>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publish without caring whether anyone is listening.
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(64)
    }
}
