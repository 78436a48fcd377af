pub mod aggregator;
pub mod bridge;
pub mod chat;
pub mod completion;
pub mod config;
pub mod constants;
pub mod control;
pub mod db;
pub mod dispatcher;
pub mod failover;
pub mod gate;
pub mod hardening;
pub mod health;
pub mod log_rotation;
pub mod logging;
pub mod redaction;
pub mod str_utils;
pub mod telegram;
pub mod types;

pub use types::*;

pub use config::Args;
