// Application layer - the ledger engine and its error taxonomy.
// Transports (HTTP, CLI) validate input and call into `LedgerService`.

mod context;
pub mod error;
mod service;

pub use context::*;
pub use error::*;
pub use service::*;
