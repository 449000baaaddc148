//! Session reconciliation: observe the live multiplexer, diff it against
//! the ledger-derived target topology, apply the difference, decorate.

pub mod enrich;
pub mod execute;
pub mod plan;
pub mod state;
