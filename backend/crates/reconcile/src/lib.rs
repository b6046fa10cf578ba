pub mod config;
pub mod engine;
pub mod ledger;
pub mod severity;

pub use config::ReconcileConfig;
pub use engine::reconcile;
pub use ledger::{diff, LedgerDiff};
