pub mod error;
pub mod traits;
pub mod types;
pub mod utils;

pub use error::{Result, SableError};
pub use types::{Address, Block, BlockHeader, Hash, HeaderKind, Transaction};
