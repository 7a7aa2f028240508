pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod index;
pub mod registry;
pub mod storage;
pub mod ticket;
pub mod types;
pub mod visa;

pub use config::Config;
pub use error::{Error, Result};
