pub mod amount;
pub mod auth;
pub mod config;
pub mod csv;
pub mod engine;
pub mod gateway;
pub mod model;
pub mod notify;
pub mod store;

pub use amount::Amount;
pub use config::EngineConfig;
pub use engine::Engine;
pub use model::{AccountId, Operation, PlanId, PurchaseId, TxId};
pub use store::LedgerStore;
