pub mod clock;
pub mod config;
pub mod error;
pub mod format;
pub mod identity;
pub mod lifecycle;
pub mod model;
pub mod monitor;
pub mod scheduler;
pub mod session;
pub mod storage;
pub mod store;
