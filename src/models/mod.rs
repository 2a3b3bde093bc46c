pub mod account;
pub mod config;

pub use account::{Account, AccountIdentity, Tier};
pub use config::AppConfig;
