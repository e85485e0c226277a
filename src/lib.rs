pub mod commands;
pub mod config;
pub mod data;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod logging;
pub mod moderation;
pub mod platform;
pub mod polls;
pub mod store;
pub mod sweeper;
pub mod temp_bans;

#[cfg(test)]
mod test_support;

pub const BOT_NAME: &str = "warden";
pub const COMMAND_TARGET: &str = "warden::command";
pub const ERROR_TARGET: &str = "warden::error";
pub const EVENT_TARGET: &str = "warden::handlers";
pub const CONSOLE_TARGET: &str = "warden";
pub const MODERATION_TARGET: &str = "warden::moderation";
pub const CASE_TARGET: &str = "warden::cases";

pub use config::Settings;
pub use data::{Data, DataInner, PolicyConfig, PolicyStore};
pub use error::{ErrorKind, ModerationError, ModerationResult};
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
