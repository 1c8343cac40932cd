//! Spotify API client: player endpoints and the token lifecycle.
//!
//! Read-only against the provider. Token expiry is stored as an absolute
//! epoch-seconds value; a token inside the safety margin is refreshed via
//! the refresh-token grant before use, and the rotated pair is persisted.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use reqwest::StatusCode;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use crate::config::SpotifySettings;
use crate::models::spotify::{
    CurrentlyPlayingResponse, PlayHistoryItem, PollResult, RecentlyPlayedResponse,
    SpotifyTokenResponse,
};
use crate::models::Account;

pub const PROVIDER_SPOTIFY: &str = "spotify";

pub struct SpotifyClient {
    settings: SpotifySettings,
    http: reqwest::Client,
    pool: PgPool,
}

impl SpotifyClient {
    pub fn new(settings: SpotifySettings, pool: PgPool) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build Spotify HTTP client")?;

        Ok(Self {
            settings,
            http,
            pool,
        })
    }

    /// Accounts eligible for the ingestion loops.
    pub async fn accounts(&self) -> Result<Vec<Account>> {
        let accounts = sqlx::query_as(
            "SELECT * FROM accounts WHERE provider = $1 ORDER BY created_at",
        )
        .bind(PROVIDER_SPOTIFY)
        .fetch_all(&self.pool)
        .await?;
        Ok(accounts)
    }

    /// Return a live access token, refreshing and persisting first when
    /// the stored one is expired or inside the safety margin.
    pub async fn get_valid_access_token(&self, account: &mut Account) -> Result<String> {
        let now = Utc::now().timestamp();
        if !account.token_expired(now, self.settings.token_safety_margin_secs) {
            return Ok(account.access_token.clone());
        }

        let refreshed = self
            .refresh_access_token(&account.refresh_token)
            .await
            .with_context(|| format!("token refresh failed for account {}", account.id))?;

        // Spotify only sometimes rotates the refresh token.
        let refresh_token = refreshed
            .refresh_token
            .clone()
            .unwrap_or_else(|| account.refresh_token.clone());
        let expires_at = Utc::now().timestamp() + refreshed.expires_in;

        self.persist_tokens(
            account.id,
            &refreshed.access_token,
            &refresh_token,
            expires_at,
            refreshed.scope.as_deref(),
        )
        .await?;

        account.access_token = refreshed.access_token.clone();
        account.refresh_token = refresh_token;
        account.token_expires_at = expires_at;

        tracing::debug!(account_id = %account.id, "refreshed Spotify access token");
        Ok(refreshed.access_token)
    }

    /// Perform the refresh-token grant against the accounts service.
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<SpotifyTokenResponse> {
        let credentials = BASE64.encode(format!(
            "{}:{}",
            self.settings.client_id, self.settings.client_secret
        ));

        let response = self
            .http
            .post(&self.settings.token_url)
            .header("Authorization", format!("Basic {credentials}"))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .context("Spotify token request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Spotify token refresh rejected: {status} - {body}"));
        }

        response
            .json::<SpotifyTokenResponse>()
            .await
            .context("failed to parse Spotify token response")
    }

    async fn persist_tokens(
        &self,
        account_id: Uuid,
        access_token: &str,
        refresh_token: &str,
        expires_at: i64,
        scope: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET access_token = $2, refresh_token = $3, token_expires_at = $4,
                scope = COALESCE($5, scope), updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(account_id)
        .bind(access_token)
        .bind(refresh_token)
        .bind(expires_at)
        .bind(scope)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// One currently-playing poll. 204 means nothing playing; episodes,
    /// ads and other non-track payloads are rejected at the boundary.
    pub async fn currently_playing(&self, access_token: &str) -> Result<PollResult> {
        let url = format!("{}/me/player/currently-playing", self.settings.api_base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .context("Spotify currently-playing request failed")?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(PollResult::NoContent),
            status if status.is_success() => {
                let body: CurrentlyPlayingResponse = response
                    .json()
                    .await
                    .context("failed to parse currently-playing response")?;
                Ok(body.into_poll_result())
            }
            status => Err(anyhow!("Spotify currently-playing error: {status}")),
        }
    }

    /// Recent plays after `after_ms` (Unix millis, exclusive), newest
    /// first as the provider returns them. The provider caps `limit` at 50.
    pub async fn recently_played(
        &self,
        access_token: &str,
        after_ms: Option<i64>,
        limit: u32,
    ) -> Result<Vec<PlayHistoryItem>> {
        let mut url = format!(
            "{}/me/player/recently-played?limit={}",
            self.settings.api_base_url,
            limit.min(50)
        );
        if let Some(after) = after_ms {
            url.push_str(&format!("&after={after}"));
        }

        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .context("Spotify recently-played request failed")?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(Vec::new()),
            status if status.is_success() => {
                let body: RecentlyPlayedResponse = response
                    .json()
                    .await
                    .context("failed to parse recently-played response")?;
                Ok(body.items)
            }
            status => Err(anyhow!("Spotify recently-played error: {status}")),
        }
    }
}
