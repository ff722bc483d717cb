pub mod bot;
pub mod config;
pub mod error;
pub mod market;
pub mod monitoring;
pub mod notification;
pub mod valuation;
