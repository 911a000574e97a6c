mod money;
mod wallet;

pub use money::*;
pub use wallet::*;
