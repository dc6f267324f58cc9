pub mod ledger;

pub use ledger::PersistedLedger;
