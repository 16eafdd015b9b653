pub mod lock;
pub mod log;
pub mod transfer;
