//! MusicBrainz API client.
//!
//! All requests funnel through one serialized gate so the process as a
//! whole stays under the upstream limit (1 request/second, enforced here
//! as a configurable minimum inter-request interval). 503s and transient
//! network failures retry with capped exponential backoff and jitter;
//! 404 is the domain value "not found", not an error.

use anyhow::{anyhow, Context, Result};
use rand::Rng;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::config::MusicBrainzSettings;
use crate::models::musicbrainz::{
    MbArtist, MbArtistSearchResponse, MbIsrcResponse, MbRecording, MbRecordingSearchResponse,
    MbRelease, MbReleaseSearchResponse,
};

/// Fraction applied on both sides of a computed backoff delay.
const BACKOFF_JITTER: f64 = 0.2;

pub struct MusicBrainzClient {
    http: reqwest::Client,
    base_url: String,
    min_interval: Duration,
    max_attempts: u32,
    backoff_base_ms: u64,
    backoff_cap_ms: u64,
    /// Serializes dispatch: held across the whole send, so at most one
    /// request is in flight and consecutive sends are spaced out.
    gate: Mutex<Option<Instant>>,
}

impl MusicBrainzClient {
    pub fn new(settings: &MusicBrainzSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .build()
            .context("failed to build MusicBrainz HTTP client")?;

        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            min_interval: Duration::from_millis(settings.min_interval_ms),
            max_attempts: settings.max_attempts.max(1),
            backoff_base_ms: settings.backoff_base_ms,
            backoff_cap_ms: settings.backoff_cap_ms,
            gate: Mutex::new(None),
        })
    }

    /// Look up recordings bearing an ISRC. `None` when the ISRC is unknown.
    pub async fn lookup_isrc(&self, isrc: &str) -> Result<Option<MbIsrcResponse>> {
        let url = format!(
            "{}/isrc/{}?inc=artist-credits+releases&fmt=json",
            self.base_url,
            urlencoding::encode(isrc)
        );
        self.get_json(&url).await
    }

    pub async fn get_recording(&self, mbid: &str) -> Result<Option<MbRecording>> {
        let url = format!(
            "{}/recording/{}?inc=artist-credits+releases+isrcs&fmt=json",
            self.base_url, mbid
        );
        self.get_json(&url).await
    }

    /// Full-text recording search; `query` must already be lucene-escaped
    /// where it embeds user-controlled values.
    pub async fn search_recordings(&self, query: &str, limit: u32) -> Result<Vec<MbRecording>> {
        let url = format!(
            "{}/recording?query={}&limit={}&fmt=json",
            self.base_url,
            urlencoding::encode(query),
            limit.min(100)
        );
        let response: Option<MbRecordingSearchResponse> = self.get_json(&url).await?;
        Ok(response.map(|r| r.recordings).unwrap_or_default())
    }

    pub async fn get_artist(&self, mbid: &str) -> Result<Option<MbArtist>> {
        let url = format!(
            "{}/artist/{}?inc=artist-rels&fmt=json",
            self.base_url, mbid
        );
        self.get_json(&url).await
    }

    pub async fn search_artists(&self, name: &str, limit: u32) -> Result<Vec<MbArtist>> {
        let query = format!("artist:\"{}\"", escape_lucene(name));
        let url = format!(
            "{}/artist?query={}&limit={}&fmt=json",
            self.base_url,
            urlencoding::encode(&query),
            limit.min(100)
        );
        let response: Option<MbArtistSearchResponse> = self.get_json(&url).await?;
        Ok(response.map(|r| r.artists).unwrap_or_default())
    }

    pub async fn get_release(&self, mbid: &str) -> Result<Option<MbRelease>> {
        let url = format!("{}/release/{}?fmt=json", self.base_url, mbid);
        self.get_json(&url).await
    }

    pub async fn search_releases(&self, title: &str, artist: &str, limit: u32) -> Result<Vec<MbRelease>> {
        let query = format!(
            "release:\"{}\" AND artist:\"{}\"",
            escape_lucene(title),
            escape_lucene(artist)
        );
        let url = format!(
            "{}/release?query={}&limit={}&fmt=json",
            self.base_url,
            urlencoding::encode(&query),
            limit.min(100)
        );
        let response: Option<MbReleaseSearchResponse> = self.get_json(&url).await?;
        Ok(response.map(|r| r.releases).unwrap_or_default())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            match self.dispatch(url).await {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::NOT_FOUND {
                        return Ok(None);
                    }
                    if status == StatusCode::SERVICE_UNAVAILABLE {
                        if attempt >= self.max_attempts {
                            return Err(anyhow!(
                                "MusicBrainz still unavailable after {attempt} attempts"
                            ));
                        }
                        let delay = self.retry_delay(attempt);
                        tracing::warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "MusicBrainz returned 503, backing off"
                        );
                        sleep(delay).await;
                        continue;
                    }
                    if !status.is_success() {
                        return Err(anyhow!("MusicBrainz API error: {status}"));
                    }
                    let parsed = response
                        .json::<T>()
                        .await
                        .context("failed to parse MusicBrainz response")?;
                    return Ok(Some(parsed));
                }
                // reqwest only errors at the transport level here
                // (connect/reset/timeout/DNS), all of which are transient.
                Err(err) => {
                    if attempt >= self.max_attempts {
                        return Err(err).with_context(|| {
                            format!("MusicBrainz request failed after {attempt} attempts")
                        });
                    }
                    let delay = self.retry_delay(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "MusicBrainz request failed, backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Send one request through the serial gate, spacing it at least
    /// `min_interval` after the previous send.
    async fn dispatch(&self, url: &str) -> reqwest::Result<reqwest::Response> {
        let mut last = self.gate.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        let result = self.http.get(url).send().await;
        *last = Some(Instant::now());
        result
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let ms = retry_backoff_ms(self.backoff_base_ms, self.backoff_cap_ms, attempt);
        Duration::from_millis(apply_jitter(ms, BACKOFF_JITTER))
    }
}

/// Backoff before retry number `attempt` (1-based): `min(base · 2^(n−1), cap)`.
pub fn retry_backoff_ms(base_ms: u64, cap_ms: u64, attempt: u32) -> u64 {
    let factor = 2_u64.saturating_pow(attempt.saturating_sub(1));
    base_ms.saturating_mul(factor).min(cap_ms)
}

/// Spread a delay uniformly over `[ms·(1−fraction), ms·(1+fraction)]`.
pub fn apply_jitter(ms: u64, fraction: f64) -> u64 {
    if ms == 0 {
        return 0;
    }
    let spread = (ms as f64 * fraction) as i64;
    if spread == 0 {
        return ms;
    }
    let offset = rand::thread_rng().gen_range(-spread..=spread);
    (ms as i64 + offset).max(0) as u64
}

/// Escape Lucene query syntax so literal values can be embedded in
/// search queries.
pub fn escape_lucene(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(
            c,
            '+' | '-'
                | '!'
                | '('
                | ')'
                | '{'
                | '}'
                | '['
                | ']'
                | '^'
                | '"'
                | '~'
                | '*'
                | '?'
                | ':'
                | '\\'
                | '/'
                | '&'
                | '|'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
