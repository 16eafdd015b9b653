//! Chat, file drops and consent-gated remote commands between processes that
//! share nothing but an append-only log file and a transfer directory.

pub mod build_info;
pub mod codec;
pub mod commands;
pub mod config;
pub mod consent;
pub mod error;
pub mod grammar;
pub mod model;
pub mod output;
pub mod reader;
pub mod session;
pub mod store;
pub mod user;
