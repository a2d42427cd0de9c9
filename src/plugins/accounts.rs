/// Account table and the AUTHENTICATE PLAIN handler

use crate::error::HookError;
use crate::imap::{HookCall, HookContext, HookHandler, Outcome};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use base64::Engine;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Email accounts configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AccountsConfig {
    /// Map of login name to account info
    #[serde(default)]
    pub users: HashMap<String, AccountInfo>,
}

/// Individual account information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Argon2id hashed password
    pub password_hash: String,
}

impl AccountsConfig {
    /// Account for a login name, matched case-insensitively
    pub fn find(&self, user: &str) -> Option<&AccountInfo> {
        let user = user.to_lowercase();
        self.users
            .iter()
            .find(|(name, _)| name.to_lowercase() == user)
            .map(|(_, account)| account)
    }

    /// Verify a user's password
    pub fn verify_password(&self, user: &str, password: &str) -> bool {
        match self.find(user) {
            Some(account) => verify_password(password, &account.password_hash),
            None => {
                // Same work for unknown users so timing does not reveal them
                let _ = verify_password(
                    password,
                    "$argon2id$v=19$m=19456,t=2,p=1$dW5rbm93bg$0000000000000000000000000000000000000000000",
                );
                false
            }
        }
    }
}

/// Hash a password using Argon2id
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against an Argon2id hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Split a base64 SASL PLAIN response (`[authzid]\0authcid\0password`)
pub fn decode_plain(response: &str) -> Option<(String, String)> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(response.trim())
        .ok()?;

    let parts: Vec<&[u8]> = decoded.split(|&b| b == 0).collect();
    let (user, password) = match parts.as_slice() {
        [_authzid, authcid, password] => (authcid, password),
        [authcid, password] => (authcid, password),
        _ => return None,
    };
    if user.is_empty() {
        return None;
    }

    Some((
        String::from_utf8_lossy(user).into_owned(),
        String::from_utf8_lossy(password).into_owned(),
    ))
}

/// `auth_plain` handler backed by the account table
#[derive(Debug, Clone)]
pub struct PlainAuthenticator {
    accounts: Arc<AccountsConfig>,
}

impl PlainAuthenticator {
    pub fn new(accounts: AccountsConfig) -> Self {
        Self {
            accounts: Arc::new(accounts),
        }
    }

    async fn authenticate(&self, ctx: &HookContext, call: &HookCall) -> Outcome {
        // SASL-IR: the response may ride along with the command
        let response = match call.args.get(1) {
            Some(initial) => initial.clone(),
            None => match ctx.continuation("").await {
                Ok(answer) => answer,
                Err(e) => return Outcome::error(e),
            },
        };

        if response.trim() == "*" {
            return Outcome::bad("AUTHENTICATE aborted");
        }

        let Some((user, password)) = decode_plain(&response) else {
            return Outcome::no("[AUTHENTICATIONFAILED] Invalid PLAIN credentials");
        };

        // Argon2 is deliberately slow; keep it off the runtime threads
        let accounts = self.accounts.clone();
        let candidate = user.clone();
        let verified = tokio::task::spawn_blocking(move || accounts.verify_password(&candidate, &password)).await;

        match verified {
            Ok(true) => {
                tracing::info!("[{}] {} authenticated", ctx.peer(), user);
                ctx.set_note("user", user.to_lowercase()).await;
                Outcome::ok()
            }
            Ok(false) => {
                tracing::info!("[{}] failed login for {}", ctx.peer(), user);
                Outcome::no("[AUTHENTICATIONFAILED] Invalid credentials")
            }
            Err(e) => Outcome::error(HookError::handler(format!("password check failed: {}", e))),
        }
    }
}

impl HookHandler for PlainAuthenticator {
    fn name(&self) -> &str {
        "accounts"
    }

    fn handle<'a>(&'a self, ctx: &'a HookContext, call: &'a HookCall) -> BoxFuture<'a, Outcome> {
        Box::pin(self.authenticate(ctx, call))
    }
}
