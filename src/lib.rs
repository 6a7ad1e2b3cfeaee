// src/lib.rs
//! Simulated stock trading: registered users buy and sell shares with a
//! virtual cash balance, value their portfolio at live prices and review
//! their transaction history.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod quotes;
pub mod tracker;
pub mod trading;

pub use error::{Error, Result};
pub use tracker::FinanceTracker;
