//! Mailflow — rule-driven automation for an email inbox.

pub mod actions;
pub mod bulk;
pub mod classify;
pub mod config;
pub mod cron;
pub mod digest;
pub mod error;
pub mod ingest;
pub mod jobs;
pub mod message;
pub mod provider;
pub mod rules;
pub mod server;
pub mod store;
pub mod threads;
