// src/db/memory.rs
use super::{HoldingChange, Store, TradeCommit};
use crate::error::StorageError;
use crate::models::{Holding, Transaction, User, UserId};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    users: HashMap<UserId, User>,
    usernames: HashMap<String, UserId>,
    // keyed by (user, symbol): one holding per pair
    holdings: HashMap<(UserId, String), Holding>,
    transactions: HashMap<UserId, Vec<Transaction>>,
}

/// In-process store. Used for local runs without a database and in tests.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, user: User) -> Result<Option<User>, StorageError> {
        let mut state = self.state.write().await;
        if state.usernames.contains_key(&user.username) {
            return Ok(None);
        }
        state.usernames.insert(user.username.clone(), user.id.clone());
        state.users.insert(user.id.clone(), user.clone());
        Ok(Some(user))
    }

    async fn find_user(&self, id: &UserId) -> Result<Option<User>, StorageError> {
        Ok(self.state.read().await.users.get(id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StorageError> {
        let state = self.state.read().await;
        Ok(state
            .usernames
            .get(username)
            .and_then(|id| state.users.get(id))
            .cloned())
    }

    async fn find_holding(
        &self,
        user_id: &UserId,
        symbol: &str,
    ) -> Result<Option<Holding>, StorageError> {
        let state = self.state.read().await;
        Ok(state
            .holdings
            .get(&(user_id.clone(), symbol.to_string()))
            .cloned())
    }

    async fn list_holdings(&self, user_id: &UserId) -> Result<Vec<Holding>, StorageError> {
        let state = self.state.read().await;
        let mut holdings: Vec<Holding> = state
            .holdings
            .values()
            .filter(|h| &h.user_id == user_id)
            .cloned()
            .collect();
        holdings.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(holdings)
    }

    async fn list_transactions(&self, user_id: &UserId) -> Result<Vec<Transaction>, StorageError> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .get(user_id)
            .map(|log| log.iter().rev().cloned().collect::<Vec<_>>())
            .unwrap_or_default())
    }

    async fn commit_trade(&self, trade: &TradeCommit) -> Result<(), StorageError> {
        let mut state = self.state.write().await;

        // Check everything before the first write so a bad commit leaves no trace.
        if !state.users.contains_key(&trade.user_id) {
            return Err(StorageError::Query(format!("unknown user {}", trade.user_id)));
        }
        match &trade.holding {
            HoldingChange::Insert(holding) => {
                if holding.shares <= 0 {
                    return Err(StorageError::Query("holding shares must be positive".into()));
                }
            }
            HoldingChange::Update { symbol, shares, .. } => {
                if *shares <= 0 {
                    return Err(StorageError::Query("holding shares must be positive".into()));
                }
                if !state
                    .holdings
                    .contains_key(&(trade.user_id.clone(), symbol.clone()))
                {
                    return Err(StorageError::Query(format!("no holding of {}", symbol)));
                }
            }
            HoldingChange::Delete { .. } => {}
        }

        match &trade.holding {
            HoldingChange::Insert(holding) => {
                state.holdings.insert(
                    (trade.user_id.clone(), holding.symbol.clone()),
                    holding.clone(),
                );
            }
            HoldingChange::Update { symbol, shares, .. } => {
                if let Some(holding) = state
                    .holdings
                    .get_mut(&(trade.user_id.clone(), symbol.clone()))
                {
                    holding.shares = *shares;
                }
            }
            HoldingChange::Delete { symbol, .. } => {
                state
                    .holdings
                    .remove(&(trade.user_id.clone(), symbol.clone()));
            }
        }
        if let Some(user) = state.users.get_mut(&trade.user_id) {
            user.cash = trade.cash;
        }
        state
            .transactions
            .entry(trade.user_id.clone())
            .or_default()
            .push(trade.transaction.clone());
        Ok(())
    }
}
