pub mod config;
pub mod error;
pub mod notify;
pub mod session;
pub mod storage;
pub mod task;
pub mod utils;

pub use error::{Error, Result};
