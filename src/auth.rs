// src/auth.rs
use crate::db::Store;
use crate::error::{Error, Result};
use crate::models::{SessionToken, User, UserId, STARTING_CASH};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use lazy_static::lazy_static;
use log::{debug, error, info};
use rand::rngs::OsRng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

const USERNAME_LEN: (usize, usize) = (3, 16);
const PASSWORD_LEN: (usize, usize) = (6, 16);

lazy_static! {
    static ref USERNAME_PATTERN: Regex =
        Regex::new(r"^[A-Za-z0-9._-]{3,16}$").expect("Invalid regex pattern");
    static ref PASSWORD_PATTERN: Regex =
        Regex::new(r"^[A-Za-z0-9¡!¿?$+._-]{6,16}$").expect("Invalid regex pattern");
}

#[derive(Serialize, Deserialize)]
struct Claims {
    sub: String,
    jti: String,
    iat: usize,
    exp: usize,
}

pub fn validate_username(username: &str) -> Result<()> {
    let len = username.chars().count();
    if len < USERNAME_LEN.0 || len > USERNAME_LEN.1 {
        return Err(Error::Validation(
            "Username must be at least 3 characters, with a maximum of 16 characters.".into(),
        ));
    }
    if !USERNAME_PATTERN.is_match(username) {
        return Err(Error::Validation(
            "Invalid username. Please, use valid special characters (underscore, minus, and periods).".into(),
        ));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<()> {
    let len = password.chars().count();
    if len < PASSWORD_LEN.0 || len > PASSWORD_LEN.1 {
        return Err(Error::Validation(
            "Password must be at least 6 characters, with a maximum of 16 characters.".into(),
        ));
    }
    if !PASSWORD_PATTERN.is_match(password) {
        return Err(Error::Validation(
            "Invalid password. Please, use valid special characters.".into(),
        ));
    }
    Ok(())
}

/// Argon2id PHC string with a fresh random salt.
pub async fn hash_password(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| Error::Internal(format!("Failed to hash password: {}", e)))
    })
    .await
    .map_err(|e| Error::Internal(e.to_string()))?
}

pub async fn verify_password(password: String, stored_hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || match PasswordHash::new(&stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            error!("Stored password hash is unreadable: {}", e);
            false
        }
    })
    .await
    .map_err(|e| Error::Internal(e.to_string()))
}

struct ActiveSession {
    user_id: UserId,
    expires_at: DateTime<Utc>,
}

/// Maps session tokens to users. A token is a signed JWT whose `jti` must
/// still be in the session table, so logout takes effect immediately.
pub struct SessionManager {
    secret: Vec<u8>,
    ttl: Duration,
    sessions: RwLock<HashMap<String, ActiveSession>>,
}

impl SessionManager {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        SessionManager {
            secret: secret.as_bytes().to_vec(),
            ttl,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn issue(&self, user_id: &UserId) -> Result<SessionToken> {
        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| Error::Internal(format!("Session TTL {:?} is out of range", self.ttl)))?;
        let claims = Claims {
            sub: user_id.to_string(),
            jti: uuid::Uuid::new_v4().to_string(),
            iat: now.timestamp() as usize,
            exp: expires_at.timestamp() as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(&self.secret),
        )
        .map_err(|e| Error::Internal(format!("Failed to sign token: {}", e)))?;

        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, session| session.expires_at > now);
        sessions.insert(
            claims.jti,
            ActiveSession {
                user_id: user_id.clone(),
                expires_at,
            },
        );
        Ok(SessionToken(token))
    }

    pub async fn authenticate(&self, token: &SessionToken) -> Result<UserId> {
        let claims = self.decode(token, true)?;
        let sessions = self.sessions.read().await;
        match sessions.get(&claims.jti) {
            Some(session) if session.user_id.0 == claims.sub && session.expires_at > Utc::now() => {
                Ok(session.user_id.clone())
            }
            _ => Err(Error::Unauthenticated),
        }
    }

    /// Ends the session. Unknown or malformed tokens are ignored.
    pub async fn revoke(&self, token: &SessionToken) {
        if let Ok(claims) = self.decode(token, false) {
            self.sessions.write().await.remove(&claims.jti);
        }
    }

    fn decode(&self, token: &SessionToken, check_expiry: bool) -> Result<Claims> {
        let validation = Validation {
            validate_exp: check_expiry,
            ..Validation::default()
        };
        decode::<Claims>(
            token.as_str(),
            &DecodingKey::from_secret(&self.secret),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| {
            debug!("Rejected session token: {}", e);
            Error::Unauthenticated
        })
    }
}

/// Registration, login and the Anonymous/Authenticated session transitions.
pub struct AuthService {
    store: Arc<dyn Store>,
    sessions: SessionManager,
}

impl AuthService {
    pub fn new(store: Arc<dyn Store>, sessions: SessionManager) -> Self {
        AuthService { store, sessions }
    }

    pub async fn register(
        &self,
        username: &str,
        password: &str,
        confirmation: &str,
    ) -> Result<SessionToken> {
        validate_username(username)?;
        if password != confirmation {
            return Err(Error::Validation(
                "Password and confirmation does not match. Please, try again.".into(),
            ));
        }
        validate_password(password)?;

        if self.store.find_user_by_username(username).await?.is_some() {
            return Err(username_taken());
        }
        let user = User {
            id: UserId::generate(),
            username: username.to_string(),
            password_hash: hash_password(password.to_string()).await?,
            cash: STARTING_CASH,
        };
        let user = self.store.create_user(user).await?.ok_or_else(username_taken)?;

        info!("Registered user {} ({}).", user.username, user.id);
        self.sessions.issue(&user.id).await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<SessionToken> {
        if validate_username(username).is_err() || validate_password(password).is_err() {
            return Err(Error::InvalidCredentials);
        }
        let user = match self.store.find_user_by_username(username).await? {
            Some(user) => user,
            None => return Err(Error::InvalidCredentials),
        };
        if !verify_password(password.to_string(), user.password_hash.clone()).await? {
            return Err(Error::InvalidCredentials);
        }

        info!("User {} logged in.", user.username);
        self.sessions.issue(&user.id).await
    }

    pub async fn logout(&self, token: &SessionToken) {
        self.sessions.revoke(token).await;
    }

    pub async fn authenticate(&self, token: &SessionToken) -> Result<UserId> {
        self.sessions.authenticate(token).await
    }
}

fn username_taken() -> Error {
    Error::Validation("The username is already taken. Please, try again.".into())
}
