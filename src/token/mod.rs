mod actor;
pub mod ops;
pub mod pool;
pub mod record;

pub use actor::{TokenManagerHandle, spawn};
pub use pool::PoolSnapshot;
pub use record::{TokenRecord, TokenStatus, normalize_token};
