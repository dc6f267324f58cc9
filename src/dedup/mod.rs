pub mod deduplicator;
pub mod ledger;

pub use deduplicator::{EventDeduplicator, NewEvent};
pub use ledger::{NotifiedLedger, Verdict};
