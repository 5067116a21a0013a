//! User lookup and token accounting.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::config::QuotaCfg;
use crate::error::{CoreError, CoreResult};
use crate::model::UserAccount;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn current_user(&self) -> CoreResult<UserAccount>;
}

#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Add `tokens` to the user's consumption counter.
    async fn record_usage(&self, user_id: &str, tokens: u64) -> CoreResult<()>;
}

/// Reject once consumption has reached the limit.
pub fn check_quota(user: &UserAccount) -> CoreResult<()> {
    if user.tokens_used >= user.tokens_limit {
        return Err(CoreError::QuotaExceeded {
            used: user.tokens_used,
            limit: user.tokens_limit,
        });
    }
    Ok(())
}

/// Single-account store seeded from configuration.
#[derive(Debug)]
pub struct InMemoryAccounts {
    account: Mutex<UserAccount>,
}

impl InMemoryAccounts {
    pub fn new(account: UserAccount) -> Self {
        Self {
            account: Mutex::new(account),
        }
    }

    pub fn from_config(cfg: &QuotaCfg) -> Self {
        Self::new(UserAccount {
            id: cfg.user_id.clone(),
            tokens_used: cfg.tokens_used,
            tokens_limit: cfg.tokens_limit,
        })
    }

    pub async fn snapshot(&self) -> UserAccount {
        self.account.lock().await.clone()
    }
}

#[async_trait]
impl UserStore for InMemoryAccounts {
    async fn current_user(&self) -> CoreResult<UserAccount> {
        Ok(self.snapshot().await)
    }
}

#[async_trait]
impl QuotaStore for InMemoryAccounts {
    async fn record_usage(&self, user_id: &str, tokens: u64) -> CoreResult<()> {
        let mut account = self.account.lock().await;
        if account.id != user_id {
            return Err(CoreError::Other(anyhow::anyhow!("unknown user {user_id}")));
        }
        account.tokens_used = account.tokens_used.saturating_add(tokens);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(used: u64, limit: u64) -> UserAccount {
        UserAccount {
            id: "u1".into(),
            tokens_used: used,
            tokens_limit: limit,
        }
    }

    #[test]
    fn gate_rejects_at_limit() {
        assert!(check_quota(&account(1000, 500_000)).is_ok());
        assert!(check_quota(&account(499_999, 500_000)).is_ok());
        match check_quota(&account(500_000, 500_000)) {
            Err(CoreError::QuotaExceeded { used, limit }) => assert_eq!((used, limit), (500_000, 500_000)),
            other => panic!("expected QuotaExceeded, got: {:?}", other),
        }
        assert!(check_quota(&account(7, 0)).is_err());
    }

    #[tokio::test]
    async fn record_usage_accumulates() {
        let store = InMemoryAccounts::new(account(10, 100));
        store.record_usage("u1", 5).await.unwrap();
        store.record_usage("u1", 7).await.unwrap();
        assert_eq!(store.current_user().await.unwrap().tokens_used, 22);
    }

    #[tokio::test]
    async fn unknown_user_is_rejected() {
        let store = InMemoryAccounts::new(account(0, 100));
        assert!(store.record_usage("someone-else", 5).await.is_err());
        assert_eq!(store.snapshot().await.tokens_used, 0);
    }

    #[tokio::test]
    async fn seeded_from_config() {
        let store = InMemoryAccounts::from_config(&QuotaCfg::default());
        let user = store.current_user().await.unwrap();
        assert_eq!(user.id, "local-user");
        assert_eq!(user.tokens_limit, 500_000);
    }
}
