// src/db/mod.rs
//! Persistence for users, holdings and the transaction log.
//!
//! The trading engine validates every precondition before it builds a
//! [`TradeCommit`]; a backend only has to apply the commit as one unit.

pub mod memory;
pub mod scylla_store;

use crate::error::StorageError;
use crate::models::{Holding, Transaction, User, UserId};
use async_trait::async_trait;
use rust_decimal::Decimal;

pub use self::memory::MemoryStore;
pub use self::scylla_store::ScyllaStore;

#[derive(Debug, Clone, PartialEq)]
pub enum HoldingChange {
    /// First purchase of a symbol.
    Insert(Holding),
    /// New share count for an existing holding; always > 0.
    Update { id: String, symbol: String, shares: i64 },
    /// Last shares sold.
    Delete { id: String, symbol: String },
}

/// Everything one buy or sell writes.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeCommit {
    pub user_id: UserId,
    pub cash: Decimal,
    pub holding: HoldingChange,
    pub transaction: Transaction,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Persists a new user. Returns `None` when the username is already taken.
    async fn create_user(&self, user: User) -> Result<Option<User>, StorageError>;

    async fn find_user(&self, id: &UserId) -> Result<Option<User>, StorageError>;

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StorageError>;

    async fn find_holding(
        &self,
        user_id: &UserId,
        symbol: &str,
    ) -> Result<Option<Holding>, StorageError>;

    async fn list_holdings(&self, user_id: &UserId) -> Result<Vec<Holding>, StorageError>;

    /// Newest first.
    async fn list_transactions(&self, user_id: &UserId) -> Result<Vec<Transaction>, StorageError>;

    /// Applies the holding change, the new cash balance and the transaction
    /// row together.
    async fn commit_trade(&self, trade: &TradeCommit) -> Result<(), StorageError>;
}
