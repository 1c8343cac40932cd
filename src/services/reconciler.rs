//! Recently-played reconciler.
//!
//! The safety net under the session engine: a slower loop that pulls the
//! provider's recently-played history past a per-account cursor and
//! backfills anything the fast loop missed. The provider reports when a
//! play *ended*, so durations are estimated from inter-arrival gaps and
//! the cross-path dedupe window is wide (±10 minutes against the session
//! engine's start-anchored scrobbles).

use anyhow::Result;
use chrono::Duration;
use std::sync::Arc;

use crate::config::{EngineSettings, ReconcilerSettings};
use crate::models::{Account, PlayHistoryItem};
use crate::services::catalog::CatalogService;
use crate::services::ingest::PlayIngestor;
use crate::services::session_engine::meets_threshold;
use crate::services::spotify::{SpotifyClient, PROVIDER_SPOTIFY};

pub struct Reconciler {
    spotify: Arc<SpotifyClient>,
    ingestor: Arc<PlayIngestor>,
    catalog: Arc<CatalogService>,
    settings: ReconcilerSettings,
    engine_settings: EngineSettings,
}

impl Reconciler {
    pub fn new(
        spotify: Arc<SpotifyClient>,
        ingestor: Arc<PlayIngestor>,
        catalog: Arc<CatalogService>,
        settings: ReconcilerSettings,
        engine_settings: EngineSettings,
    ) -> Self {
        Self {
            spotify,
            ingestor,
            catalog,
            settings,
            engine_settings,
        }
    }

    pub async fn run_cycle(&self) -> Result<()> {
        let accounts = self.spotify.accounts().await?;
        for mut account in accounts {
            if let Err(err) = self.process_account(&mut account).await {
                tracing::warn!(
                    account_id = %account.id,
                    user_id = %account.user_id,
                    error = %err,
                    "recently-played reconciliation failed for account"
                );
            }
        }
        Ok(())
    }

    async fn process_account(&self, account: &mut Account) -> Result<()> {
        let token = match self.spotify.get_valid_access_token(account).await {
            Ok(token) => token,
            Err(err) => {
                tracing::warn!(
                    account_id = %account.id,
                    error = %err,
                    "token unavailable, skipping account this cycle"
                );
                return Ok(());
            }
        };

        let cursor = self
            .catalog
            .cursor(account.user_id, PROVIDER_SPOTIFY)
            .await?
            .map(|c| c.last_played_at);
        let after_ms = cursor.map(|c| c.timestamp_millis());

        let mut items = self.spotify.recently_played(&token, after_ms, 50).await?;
        if let Some(cursor) = cursor {
            // The provider's `after` is advisory; enforce it locally so a
            // replayed response cannot regress past the cursor.
            items.retain(|item| item.played_at > cursor);
        }
        if items.is_empty() {
            return Ok(());
        }

        items.sort_by_key(|item| item.played_at);
        let estimates = estimate_durations(&items);
        let max_played_at = items.last().map(|item| item.played_at);

        let mut backfilled = 0usize;
        for (item, estimated_ms) in items.iter().zip(estimates) {
            let duration_ms = item.track.duration_ms;
            if !meets_threshold(estimated_ms, duration_ms, &self.engine_settings) {
                continue;
            }

            if self.backfill_play(account, item, estimated_ms).await? {
                backfilled += 1;
            }
        }

        if backfilled > 0 {
            tracing::info!(
                user_id = %account.user_id,
                backfilled,
                "reconciler backfilled scrobbles"
            );
        }

        // The cursor covers the whole batch, below-threshold plays
        // included; they are final decisions, not retries.
        if let Some(max_played_at) = max_played_at {
            self.catalog
                .advance_cursor(account.user_id, PROVIDER_SPOTIFY, max_played_at)
                .await?;
        }

        Ok(())
    }

    /// Canonicalize one historical play and insert its scrobble unless an
    /// overlapping one exists. Links are ensured either way.
    async fn backfill_play(
        &self,
        account: &Account,
        item: &PlayHistoryItem,
        estimated_ms: i64,
    ) -> Result<bool> {
        let ingested = self.ingestor.ingest_track(&item.track).await?;

        let window = Duration::seconds(self.settings.dedupe_window_secs);
        if self
            .catalog
            .has_scrobble_for_track_near(account.user_id, ingested.track.id, item.played_at, window)
            .await?
        {
            tracing::debug!(
                user_id = %account.user_id,
                track = %item.track.name,
                played_at = %item.played_at,
                "play already covered inside dedupe window"
            );
            return Ok(false);
        }

        let skipped = reconciler_skipped(estimated_ms, item.track.duration_ms, &self.engine_settings);
        self.catalog
            .insert_scrobble(
                account.user_id,
                ingested.track.id,
                ingested.album.as_ref().map(|a| a.id),
                item.played_at,
                estimated_ms,
                skipped,
                PROVIDER_SPOTIFY,
            )
            .await
    }
}

/// Estimated listened duration per play: bounded by the gap to the next
/// play, with the final item credited its full track length.
pub fn estimate_durations(items: &[PlayHistoryItem]) -> Vec<i64> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| match items.get(i + 1) {
            Some(next) => {
                let gap_ms = (next.played_at - item.played_at).num_milliseconds();
                item.track.duration_ms.min(gap_ms)
            }
            None => item.track.duration_ms,
        })
        .collect()
}

/// Skip flag by symmetry with the session engine's rule, applied to the
/// estimate. Without a track duration there is no basis for the claim.
pub fn reconciler_skipped(estimated_ms: i64, duration_ms: i64, settings: &EngineSettings) -> bool {
    if duration_ms <= 0 {
        return false;
    }
    estimated_ms < duration_ms * settings.skip_threshold_percent / 100
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::spotify::SpotifyTrack;
    use chrono::{DateTime, Utc};

    fn item(played_at: DateTime<Utc>, duration_ms: i64) -> PlayHistoryItem {
        PlayHistoryItem {
            track: SpotifyTrack {
                id: None,
                uri: "spotify:track:x".to_string(),
                name: "Track".to_string(),
                duration_ms,
                explicit: false,
                artists: Vec::new(),
                album: None,
                external_ids: None,
                disc_number: None,
                track_number: None,
            },
            played_at,
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn durations_bounded_by_inter_arrival_gap() {
        let items = vec![
            item(at(0), 240_000),   // next play 60 s later: estimate 60 s
            item(at(60), 180_000),  // next play 400 s later: full track
            item(at(460), 200_000), // last item: full track
        ];
        assert_eq!(estimate_durations(&items), vec![60_000, 180_000, 200_000]);
    }

    #[test]
    fn single_item_gets_full_duration() {
        let items = vec![item(at(0), 123_000)];
        assert_eq!(estimate_durations(&items), vec![123_000]);
    }

    #[test]
    fn empty_batch_is_empty() {
        assert!(estimate_durations(&[]).is_empty());
    }

    #[test]
    fn skip_flag_mirrors_engine_rule() {
        let s = EngineSettings::default();
        assert!(reconciler_skipped(100_000, 200_000, &s));
        assert!(!reconciler_skipped(180_000, 200_000, &s));
        assert!(!reconciler_skipped(50_000, 0, &s));
    }
}
