use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A user's link to one streaming provider, including its token pair.
///
/// `token_expires_at` is an absolute epoch-seconds value; the token is
/// considered expired once `expires_at < now + safety_margin`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub provider_user_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub scope: Option<String>,
    pub token_expires_at: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// True when the access token is expired or inside the safety margin.
    pub fn token_expired(&self, now_epoch: i64, safety_margin_secs: i64) -> bool {
        self.token_expires_at < now_epoch + safety_margin_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(expires_at: i64) -> Account {
        Account {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            provider: "spotify".to_string(),
            provider_user_id: "user123".to_string(),
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            scope: None,
            token_expires_at: expires_at,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn token_expiry_includes_safety_margin() {
        let now = 1_000_000;
        assert!(account(now - 1).token_expired(now, 60));
        assert!(account(now + 59).token_expired(now, 60));
        assert!(!account(now + 60).token_expired(now, 60));
        assert!(!account(now + 3600).token_expired(now, 60));
    }
}
