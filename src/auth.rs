//! Account resolution for owner-facing operations
//!
//! Sessions live outside this crate. The embedding application supplies a
//! [`TokenResolver`] that turns a caller's token into the account id used for
//! ownership checks.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::types::AccountId;

/// Resolves an opaque caller token to an account
#[async_trait]
pub trait TokenResolver: Send + Sync {
    /// The account behind `token`, or [`Error::Unauthenticated`]
    async fn resolve(&self, token: &str) -> Result<AccountId>;
}

/// Fixed token table
#[derive(Debug, Clone, Default)]
pub struct StaticTokenResolver {
    tokens: HashMap<String, AccountId>,
}

impl StaticTokenResolver {
    /// Empty table: every token is rejected
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a token for `account`
    pub fn with_token(mut self, token: impl Into<String>, account: AccountId) -> Self {
        self.tokens.insert(token.into(), account);
        self
    }
}

#[async_trait]
impl TokenResolver for StaticTokenResolver {
    async fn resolve(&self, token: &str) -> Result<AccountId> {
        self.tokens
            .get(token)
            .copied()
            .ok_or_else(|| Error::Unauthenticated("unknown token".to_string()))
    }
}
