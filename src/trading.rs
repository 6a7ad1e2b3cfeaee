// src/trading.rs
//! Buy, sell and portfolio valuation.
//!
//! Every precondition of a trade is checked before anything is written, and
//! the writes go to the store as a single [`TradeCommit`]. Trades for one user
//! are serialized through [`UserLocks`] from the cash read to the commit, so
//! two concurrent buys can never spend the same cash twice.

use crate::db::{HoldingChange, Store, TradeCommit};
use crate::error::{Error, Result};
use crate::models::{
    trade_value, usd, Holding, PortfolioLine, PortfolioView, Quote, Transaction, User, UserId,
};
use crate::quotes::QuoteProvider;
use futures::future::try_join_all;
use log::{error, info, warn};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per user id.
#[derive(Default)]
pub struct UserLocks {
    locks: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub async fn acquire(&self, user_id: &UserId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // drop entries nobody is holding or waiting on
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(user_id.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Trims and upper-cases a ticker symbol.
pub fn normalize_symbol(symbol: &str) -> Result<String> {
    let symbol = symbol.trim().to_ascii_uppercase();
    if symbol.is_empty() {
        return Err(Error::Validation("Invalid symbol. Please, try again".into()));
    }
    Ok(symbol)
}

/// Parses a share count typed by a user: ASCII digits only.
pub fn parse_shares(input: &str) -> Result<i64> {
    let input = input.trim();
    if input.is_empty() || !input.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::Validation("Invalid shares value. Please, try again".into()));
    }
    input
        .parse()
        .map_err(|_| Error::Validation("Share count is too large".into()))
}

pub struct TradingEngine {
    store: Arc<dyn Store>,
    quotes: Arc<dyn QuoteProvider>,
    locks: UserLocks,
}

impl TradingEngine {
    pub fn new(store: Arc<dyn Store>, quotes: Arc<dyn QuoteProvider>) -> Self {
        TradingEngine {
            store,
            quotes,
            locks: UserLocks::default(),
        }
    }

    pub async fn quote(&self, symbol: &str) -> Result<Quote> {
        let symbol = normalize_symbol(symbol)?;
        self.lookup(&symbol).await
    }

    pub async fn buy(&self, user_id: &UserId, symbol: &str, shares: &str) -> Result<Transaction> {
        let symbol = normalize_symbol(symbol)?;
        let shares = parse_shares(shares)?;
        if shares < 1 {
            return Err(Error::Validation("Shares must be a positive integer".into()));
        }

        let quote = self.lookup(&symbol).await?;
        let cost = trade_value(quote.price, shares);

        let _guard = self.locks.acquire(user_id).await;
        let user = self.user(user_id).await?;
        if cost <= Decimal::ZERO || user.cash < cost {
            warn!("User {} cannot afford {} x {} for {}", user_id, shares, symbol, usd(cost));
            return Err(Error::InsufficientFunds {
                cost,
                available: user.cash,
            });
        }

        let holding = match self.store.find_holding(user_id, &symbol).await? {
            None => HoldingChange::Insert(Holding {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: user_id.clone(),
                symbol: symbol.clone(),
                shares,
            }),
            Some(existing) => HoldingChange::Update {
                shares: existing
                    .shares
                    .checked_add(shares)
                    .ok_or_else(|| Error::Validation("Share count is too large".into()))?,
                id: existing.id,
                symbol: existing.symbol,
            },
        };

        let transaction = Transaction::record(user_id, &symbol, shares, cost);
        self.commit(TradeCommit {
            user_id: user_id.clone(),
            cash: user.cash - cost,
            holding,
            transaction: transaction.clone(),
        })
        .await?;

        info!("User {} bought {} {} for {}", user_id, shares, symbol, usd(cost));
        Ok(transaction)
    }

    pub async fn sell(&self, user_id: &UserId, symbol: &str, shares: &str) -> Result<Transaction> {
        let symbol = normalize_symbol(symbol)?;
        let shares = parse_shares(shares)?;

        let quote = self.lookup(&symbol).await?;
        let proceeds = trade_value(quote.price, shares);

        let _guard = self.locks.acquire(user_id).await;
        let user = self.user(user_id).await?;

        // Existence first: nothing is read off the holding until we know it is there.
        let holding = self
            .store
            .find_holding(user_id, &symbol)
            .await?
            .ok_or_else(|| Error::NoSuchHolding(symbol.clone()))?;
        if shares > holding.shares {
            return Err(Error::InsufficientShares {
                requested: shares,
                owned: holding.shares,
            });
        }
        if shares < 1 {
            return Err(Error::InvalidQuantity);
        }

        let change = if shares == holding.shares {
            HoldingChange::Delete {
                id: holding.id,
                symbol: holding.symbol,
            }
        } else {
            HoldingChange::Update {
                shares: holding.shares - shares,
                id: holding.id,
                symbol: holding.symbol,
            }
        };

        let transaction = Transaction::record(user_id, &symbol, -shares, proceeds);
        self.commit(TradeCommit {
            user_id: user_id.clone(),
            cash: user.cash + proceeds,
            holding: change,
            transaction: transaction.clone(),
        })
        .await?;

        info!("User {} sold {} {} for {}", user_id, shares, symbol, usd(proceeds));
        Ok(transaction)
    }

    /// Values every holding at its live price. One failed quote fails the
    /// whole valuation.
    pub async fn portfolio(&self, user_id: &UserId) -> Result<PortfolioView> {
        let user = self.user(user_id).await?;
        let holdings = self.store.list_holdings(user_id).await?;

        let quotes = try_join_all(holdings.iter().map(|h| self.lookup(&h.symbol))).await?;

        let lines: Vec<PortfolioLine> = holdings
            .into_iter()
            .zip(quotes)
            .map(|(holding, quote)| PortfolioLine {
                line_total: quote.price * Decimal::from(holding.shares),
                unit_price: quote.price,
                name: quote.name,
                shares: holding.shares,
                symbol: holding.symbol,
            })
            .collect();
        let total = lines
            .iter()
            .fold(user.cash, |acc, line| acc + line.line_total);

        Ok(PortfolioView {
            cash: user.cash,
            holdings: lines,
            total,
        })
    }

    pub async fn history(&self, user_id: &UserId) -> Result<Vec<Transaction>> {
        Ok(self.store.list_transactions(user_id).await?)
    }

    async fn lookup(&self, symbol: &str) -> Result<Quote> {
        self.quotes
            .lookup(symbol)
            .await
            .map_err(|source| Error::QuoteUnavailable {
                symbol: symbol.to_string(),
                source,
            })
    }

    async fn user(&self, user_id: &UserId) -> Result<User> {
        // a valid session for a user that no longer exists
        self.store
            .find_user(user_id)
            .await?
            .ok_or(Error::Unauthenticated)
    }

    async fn commit(&self, trade: TradeCommit) -> Result<()> {
        self.store.commit_trade(&trade).await.map_err(|e| {
            error!("Failed to commit trade for {}: {}", trade.user_id, e);
            Error::Storage(e)
        })
    }
}
