// src/tracker.rs
use crate::auth::AuthService;
use crate::error::Result;
use crate::models::{PortfolioView, Quote, SessionToken, Transaction};
use crate::trading::TradingEngine;

/// Caller-facing operations. Every trading call resolves its session token
/// to a user id first; the engine never sees a token.
pub struct FinanceTracker {
    auth: AuthService,
    engine: TradingEngine,
}

impl FinanceTracker {
    pub fn new(auth: AuthService, engine: TradingEngine) -> Self {
        FinanceTracker { auth, engine }
    }

    pub async fn register(
        &self,
        username: &str,
        password: &str,
        confirmation: &str,
    ) -> Result<SessionToken> {
        self.auth.register(username, password, confirmation).await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<SessionToken> {
        self.auth.login(username, password).await
    }

    pub async fn logout(&self, token: &SessionToken) {
        self.auth.logout(token).await
    }

    pub async fn quote(&self, token: &SessionToken, symbol: &str) -> Result<Quote> {
        self.auth.authenticate(token).await?;
        self.engine.quote(symbol).await
    }

    pub async fn buy(
        &self,
        token: &SessionToken,
        symbol: &str,
        shares: &str,
    ) -> Result<Transaction> {
        let user_id = self.auth.authenticate(token).await?;
        self.engine.buy(&user_id, symbol, shares).await
    }

    pub async fn sell(
        &self,
        token: &SessionToken,
        symbol: &str,
        shares: &str,
    ) -> Result<Transaction> {
        let user_id = self.auth.authenticate(token).await?;
        self.engine.sell(&user_id, symbol, shares).await
    }

    pub async fn get_portfolio(&self, token: &SessionToken) -> Result<PortfolioView> {
        let user_id = self.auth.authenticate(token).await?;
        self.engine.portfolio(&user_id).await
    }

    pub async fn get_history(&self, token: &SessionToken) -> Result<Vec<Transaction>> {
        let user_id = self.auth.authenticate(token).await?;
        self.engine.history(&user_id).await
    }
}
