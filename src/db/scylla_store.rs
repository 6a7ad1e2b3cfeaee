// src/db/scylla_store.rs
use super::{HoldingChange, Store, TradeCommit};
use crate::error::StorageError;
use crate::models::{Holding, Transaction, User, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{error, info};
use rust_decimal::Decimal;
use scylla::batch::Batch;
use scylla::frame::response::result::{CqlValue, Row};
use scylla::{Session, SessionBuilder};
use std::str::FromStr;

pub struct ScyllaStore {
    session: Session,
    keyspace: String,
}

impl ScyllaStore {
    pub async fn connect(node: &str, keyspace: &str) -> Result<Self, StorageError> {
        let session = SessionBuilder::new()
            .known_node(node)
            .build()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = ScyllaStore {
            session,
            keyspace: keyspace.to_string(),
        };
        store.init_schema().await?;
        info!("Successfully connected to ScyllaDB at {}.", node);
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let ks = &self.keyspace;
        let statements = [
            format!("CREATE KEYSPACE IF NOT EXISTS {} WITH REPLICATION = {{'class': 'SimpleStrategy', 'replication_factor': 1}}", ks),
            format!("CREATE TABLE IF NOT EXISTS {}.users (id TEXT PRIMARY KEY, username TEXT, hash TEXT, cash TEXT)", ks),
            format!("CREATE TABLE IF NOT EXISTS {}.users_by_username (username TEXT PRIMARY KEY, user_id TEXT)", ks),
            format!("CREATE TABLE IF NOT EXISTS {}.holdings (user_id TEXT, symbol TEXT, id TEXT, shares BIGINT, PRIMARY KEY (user_id, symbol))", ks),
            format!("CREATE TABLE IF NOT EXISTS {}.transactions (user_id TEXT, created_at BIGINT, id TEXT, symbol TEXT, shares BIGINT, price TEXT, PRIMARY KEY (user_id, created_at, id)) WITH CLUSTERING ORDER BY (created_at DESC, id ASC)", ks),
        ];
        for statement in statements {
            self.session
                .query(statement, &[])
                .await
                .map_err(query_failed)?;
        }
        Ok(())
    }

    fn table(&self, name: &str) -> String {
        format!("{}.{}", self.keyspace, name)
    }

    fn trade_batch(&self, holding_statement: String) -> Batch {
        let mut batch = Batch::default();
        batch.append_statement(holding_statement.as_str());
        batch.append_statement(
            format!("UPDATE {} SET cash = ? WHERE id = ?", self.table("users")).as_str(),
        );
        batch.append_statement(
            format!(
                "INSERT INTO {} (user_id, created_at, id, symbol, shares, price) VALUES (?, ?, ?, ?, ?, ?)",
                self.table("transactions")
            )
            .as_str(),
        );
        batch
    }
}

#[async_trait]
impl Store for ScyllaStore {
    async fn create_user(&self, user: User) -> Result<Option<User>, StorageError> {
        let claim = format!(
            "INSERT INTO {} (username, user_id) VALUES (?, ?) IF NOT EXISTS",
            self.table("users_by_username")
        );
        let result = self
            .session
            .query(claim, (user.username.as_str(), user.id.as_str()))
            .await
            .map_err(query_failed)?;
        let applied = result
            .rows
            .and_then(|rows| rows.into_iter().next())
            .and_then(|row| row.columns.into_iter().next().flatten())
            .map(|value| matches!(value, CqlValue::Boolean(true)))
            .unwrap_or(false);
        if !applied {
            return Ok(None);
        }

        let insert = format!(
            "INSERT INTO {} (id, username, hash, cash) VALUES (?, ?, ?, ?)",
            self.table("users")
        );
        let inserted = self
            .session
            .query(
                insert,
                (
                    user.id.as_str(),
                    user.username.as_str(),
                    user.password_hash.as_str(),
                    user.cash.to_string(),
                ),
            )
            .await;
        if let Err(e) = inserted {
            error!("Failed to insert user {}: {}", user.username, e);
            let release = format!(
                "DELETE FROM {} WHERE username = ?",
                self.table("users_by_username")
            );
            if let Err(e) = self.session.query(release, (user.username.as_str(),)).await {
                error!("Failed to release username {}: {}", user.username, e);
            }
            return Err(query_failed(e));
        }
        Ok(Some(user))
    }

    async fn find_user(&self, id: &UserId) -> Result<Option<User>, StorageError> {
        let query = format!(
            "SELECT id, username, hash, cash FROM {} WHERE id = ?",
            self.table("users")
        );
        let result = self
            .session
            .query(query, (id.as_str(),))
            .await
            .map_err(query_failed)?;
        match result.rows.and_then(|rows| rows.into_iter().next()) {
            Some(row) => user_from_row(&row).map(Some),
            None => Ok(None),
        }
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StorageError> {
        let query = format!(
            "SELECT user_id FROM {} WHERE username = ?",
            self.table("users_by_username")
        );
        let result = self
            .session
            .query(query, (username,))
            .await
            .map_err(query_failed)?;
        match result.rows.and_then(|rows| rows.into_iter().next()) {
            Some(row) => {
                let id = UserId(text(&row, 0)?);
                self.find_user(&id).await
            }
            None => Ok(None),
        }
    }

    async fn find_holding(
        &self,
        user_id: &UserId,
        symbol: &str,
    ) -> Result<Option<Holding>, StorageError> {
        let query = format!(
            "SELECT user_id, symbol, id, shares FROM {} WHERE user_id = ? AND symbol = ?",
            self.table("holdings")
        );
        let result = self
            .session
            .query(query, (user_id.as_str(), symbol))
            .await
            .map_err(query_failed)?;
        match result.rows.and_then(|rows| rows.into_iter().next()) {
            Some(row) => holding_from_row(&row).map(Some),
            None => Ok(None),
        }
    }

    async fn list_holdings(&self, user_id: &UserId) -> Result<Vec<Holding>, StorageError> {
        let query = format!(
            "SELECT user_id, symbol, id, shares FROM {} WHERE user_id = ?",
            self.table("holdings")
        );
        let result = self
            .session
            .query(query, (user_id.as_str(),))
            .await
            .map_err(query_failed)?;
        result
            .rows
            .unwrap_or_default()
            .iter()
            .map(holding_from_row)
            .collect()
    }

    async fn list_transactions(&self, user_id: &UserId) -> Result<Vec<Transaction>, StorageError> {
        let query = format!(
            "SELECT user_id, created_at, id, symbol, shares, price FROM {} WHERE user_id = ?",
            self.table("transactions")
        );
        let result = self
            .session
            .query(query, (user_id.as_str(),))
            .await
            .map_err(query_failed)?;
        let transactions: Vec<Transaction> = result
            .rows
            .unwrap_or_default()
            .iter()
            .map(transaction_from_row)
            .collect::<Result<_, _>>()?;
        info!("Fetched {} transactions for user: {}", transactions.len(), user_id);
        Ok(transactions)
    }

    async fn commit_trade(&self, trade: &TradeCommit) -> Result<(), StorageError> {
        let user_id = trade.user_id.as_str();
        let cash = (trade.cash.to_string(), user_id);
        let tx = &trade.transaction;
        let tx_values = (
            user_id,
            tx.timestamp.timestamp_millis(),
            tx.id.as_str(),
            tx.symbol.as_str(),
            tx.shares,
            tx.price.to_string(),
        );

        let result = match &trade.holding {
            HoldingChange::Insert(holding) => {
                let batch = self.trade_batch(format!(
                    "INSERT INTO {} (user_id, symbol, id, shares) VALUES (?, ?, ?, ?)",
                    self.table("holdings")
                ));
                let values = (
                    user_id,
                    holding.symbol.as_str(),
                    holding.id.as_str(),
                    holding.shares,
                );
                self.session.batch(&batch, (values, cash, tx_values)).await
            }
            HoldingChange::Update { symbol, shares, .. } => {
                let batch = self.trade_batch(format!(
                    "UPDATE {} SET shares = ? WHERE user_id = ? AND symbol = ?",
                    self.table("holdings")
                ));
                let values = (*shares, user_id, symbol.as_str());
                self.session.batch(&batch, (values, cash, tx_values)).await
            }
            HoldingChange::Delete { symbol, .. } => {
                let batch = self.trade_batch(format!(
                    "DELETE FROM {} WHERE user_id = ? AND symbol = ?",
                    self.table("holdings")
                ));
                let values = (user_id, symbol.as_str());
                self.session.batch(&batch, (values, cash, tx_values)).await
            }
        };
        result.map_err(query_failed)?;
        Ok(())
    }
}

fn query_failed(e: impl std::fmt::Display) -> StorageError {
    StorageError::Query(e.to_string())
}

fn column(row: &Row, index: usize) -> Result<&CqlValue, StorageError> {
    row.columns
        .get(index)
        .and_then(|c| c.as_ref())
        .ok_or_else(|| StorageError::Corrupt(format!("missing column {}", index)))
}

fn text(row: &Row, index: usize) -> Result<String, StorageError> {
    column(row, index)?
        .as_text()
        .cloned()
        .ok_or_else(|| StorageError::Corrupt(format!("column {} is not text", index)))
}

fn bigint(row: &Row, index: usize) -> Result<i64, StorageError> {
    column(row, index)?
        .as_bigint()
        .ok_or_else(|| StorageError::Corrupt(format!("column {} is not a bigint", index)))
}

fn decimal(row: &Row, index: usize) -> Result<Decimal, StorageError> {
    let raw = text(row, index)?;
    Decimal::from_str(&raw)
        .map_err(|e| StorageError::Corrupt(format!("bad amount {:?}: {}", raw, e)))
}

fn user_from_row(row: &Row) -> Result<User, StorageError> {
    Ok(User {
        id: UserId(text(row, 0)?),
        username: text(row, 1)?,
        password_hash: text(row, 2)?,
        cash: decimal(row, 3)?,
    })
}

fn holding_from_row(row: &Row) -> Result<Holding, StorageError> {
    Ok(Holding {
        user_id: UserId(text(row, 0)?),
        symbol: text(row, 1)?,
        id: text(row, 2)?,
        shares: bigint(row, 3)?,
    })
}

fn transaction_from_row(row: &Row) -> Result<Transaction, StorageError> {
    let millis = bigint(row, 1)?;
    let timestamp = DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| StorageError::Corrupt(format!("bad timestamp {}", millis)))?;
    Ok(Transaction {
        user_id: UserId(text(row, 0)?),
        timestamp,
        id: text(row, 2)?,
        symbol: text(row, 3)?,
        shares: bigint(row, 4)?,
        price: decimal(row, 5)?,
    })
}
