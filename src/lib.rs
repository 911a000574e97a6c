pub mod api;
pub mod application;
pub mod cli;
pub mod domain;
pub mod logging;
pub mod storage;

pub use application::{LedgerError, LedgerService, OpContext};
pub use domain::*;
