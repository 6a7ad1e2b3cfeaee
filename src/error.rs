// src/error.rs
use rust_decimal::Decimal;
use thiserror::Error;
use warp::reject::Reject;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure a caller-facing operation can surface.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("Invalid username and/or password")]
    InvalidCredentials,

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Cannot quote {symbol} right now: {source}")]
    QuoteUnavailable {
        symbol: String,
        #[source]
        source: QuoteError,
    },

    #[error("Insufficient funds: {cost} required, {available} available")]
    InsufficientFunds { cost: Decimal, available: Decimal },

    #[error("Insufficient shares: {requested} requested, {owned} owned")]
    InsufficientShares { requested: i64, owned: i64 },

    #[error("Share quantity must be at least 1")]
    InvalidQuantity,

    #[error("No holding of {0}")]
    NoSuchHolding(String),

    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Reject for Error {}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to connect to database: {0}")]
    Connection(String),

    #[error("Database query failed: {0}")]
    Query(String),

    #[error("Malformed row: {0}")]
    Corrupt(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QuoteError {
    #[error("symbol {0} not found")]
    NotFound(String),

    #[error("quote provider failed: {0}")]
    Provider(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing configuration key: {0}")]
    MissingKey(&'static str),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}
