//! Playback session engine.
//!
//! A per-(user, provider) state machine driven by currently-playing
//! polls. Listening time accumulates only while the previous observation
//! said "playing", per-poll deltas are capped so seeks cannot inflate a
//! play, and a large backward jump is read as the track wrapping around.
//! Scrobbles are emitted when a session is finalized: on track change,
//! on wrap, or when an idle session goes stale.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use sqlx::PgPool;
use std::sync::Arc;

use crate::config::EngineSettings;
use crate::models::spotify::SpotifyTrack;
use crate::models::{Account, PlaybackSession, PollResult, TrackSnapshot};
use crate::services::catalog::CatalogService;
use crate::services::ingest::PlayIngestor;
use crate::services::spotify::{SpotifyClient, PROVIDER_SPOTIFY};

/// Half-width of the started_at dedupe window applied at finalization.
const FINALIZE_DEDUPE_WINDOW_SECS: i64 = 5;

/// What a same-track poll does to the running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// Progress jumped backward past the wrap threshold: the track was
    /// restarted. Finalize the old play and begin a new one.
    Wrap,
    /// Keep the session, adding `add_ms` of listening time.
    Update { add_ms: i64 },
}

/// Backward-jump size that counts as a loop for a track of this length.
pub fn wrap_threshold_ms(duration_ms: i64, settings: &EngineSettings) -> i64 {
    settings
        .wrap_min_tolerance_ms
        .max(duration_ms * settings.wrap_threshold_percent / 100)
}

/// Decide how a same-track poll continues the session.
///
/// Accumulation requires the *previous* observation to have been playing;
/// a resume poll only updates position, so pause gaps contribute nothing.
pub fn continuation(
    was_playing: bool,
    prev_progress_ms: i64,
    new_progress_ms: i64,
    duration_ms: i64,
    settings: &EngineSettings,
) -> Continuation {
    if !was_playing {
        return Continuation::Update { add_ms: 0 };
    }

    let delta = new_progress_ms - prev_progress_ms;
    if delta < -wrap_threshold_ms(duration_ms, settings) {
        Continuation::Wrap
    } else if delta > settings.max_delta_ms {
        // Forward seek: credit at most one poll interval's worth.
        Continuation::Update {
            add_ms: settings.max_delta_ms,
        }
    } else if delta > 0 {
        Continuation::Update { add_ms: delta }
    } else {
        // Small backward drift or no movement.
        Continuation::Update { add_ms: 0 }
    }
}

/// The disjunctive scrobble threshold: an absolute floor, or a fraction
/// of the track for very short tracks.
pub fn meets_threshold(accumulated_ms: i64, duration_ms: i64, settings: &EngineSettings) -> bool {
    accumulated_ms >= settings.min_play_seconds * 1000
        || accumulated_ms >= duration_ms * settings.min_play_percent / 100
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalizeOutcome {
    pub effective_ms: i64,
    pub skipped: bool,
}

/// Effective duration and skip flag for a finalizing session, or `None`
/// when the play never met the threshold.
pub fn finalize_outcome(
    accumulated_ms: i64,
    duration_ms: i64,
    settings: &EngineSettings,
) -> Option<FinalizeOutcome> {
    if !meets_threshold(accumulated_ms, duration_ms, settings) {
        return None;
    }

    let effective_ms = if accumulated_ms + settings.end_margin_ms >= duration_ms {
        duration_ms
    } else {
        accumulated_ms
    };
    let skipped = effective_ms < duration_ms * settings.skip_threshold_percent / 100;

    Some(FinalizeOutcome {
        effective_ms,
        skipped,
    })
}

pub struct SessionEngine {
    pool: PgPool,
    spotify: Arc<SpotifyClient>,
    ingestor: Arc<PlayIngestor>,
    catalog: Arc<CatalogService>,
    settings: EngineSettings,
}

impl SessionEngine {
    pub fn new(
        pool: PgPool,
        spotify: Arc<SpotifyClient>,
        ingestor: Arc<PlayIngestor>,
        catalog: Arc<CatalogService>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            pool,
            spotify,
            ingestor,
            catalog,
            settings,
        }
    }

    /// One pass over all accounts, sequentially. A misbehaving account is
    /// logged and skipped; it never takes the cycle down.
    pub async fn run_cycle(&self) -> Result<()> {
        let accounts = self.spotify.accounts().await?;
        for mut account in accounts {
            if let Err(err) = self.process_account(&mut account).await {
                tracing::warn!(
                    account_id = %account.id,
                    user_id = %account.user_id,
                    error = %err,
                    "session poll failed for account"
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

        let poll = self.spotify.currently_playing(&token).await?;
        let session = self.load_session(account).await?;

        match (poll, session) {
            (PollResult::NoContent | PollResult::NotATrack, None) => Ok(()),

            (PollResult::NoContent | PollResult::NotATrack, Some(session)) => {
                let idle_ms = (Utc::now() - session.last_seen_at).num_milliseconds();
                if idle_ms >= self.settings.stale_session_ms {
                    tracing::debug!(
                        user_id = %session.user_id,
                        track_uri = %session.track_uri,
                        idle_ms,
                        "finalizing stale session"
                    );
                    self.finalize_session(&session).await?;
                    self.delete_session(&session).await?;
                }
                // Otherwise keep the session; the user may resume.
                Ok(())
            }

            (PollResult::Playing(snapshot), None) => self.create_session(account, &snapshot).await,

            (PollResult::Playing(snapshot), Some(session))
                if session.track_uri == snapshot.uri =>
            {
                self.continue_session(account, &session, &snapshot).await
            }

            (PollResult::Playing(snapshot), Some(session)) => {
                // Track change: close out the previous play first.
                if !session.scrobbled {
                    self.finalize_session(&session).await?;
                }
                self.replace_session(account, &snapshot).await
            }
        }
    }

    async fn continue_session(
        &self,
        account: &Account,
        session: &PlaybackSession,
        snapshot: &TrackSnapshot,
    ) -> Result<()> {
        let duration_ms = session.duration_ms.unwrap_or(snapshot.duration_ms);

        match continuation(
            session.is_playing,
            session.last_progress_ms,
            snapshot.progress_ms,
            duration_ms,
            &self.settings,
        ) {
            Continuation::Wrap => {
                tracing::debug!(
                    user_id = %session.user_id,
                    track_uri = %session.track_uri,
                    prev_progress_ms = session.last_progress_ms,
                    new_progress_ms = snapshot.progress_ms,
                    "wrap detected, restarting session"
                );
                self.finalize_session(session).await?;
                self.replace_session(account, snapshot).await
            }
            Continuation::Update { add_ms } => {
                sqlx::query(
                    r#"
                    UPDATE playback_sessions
                    SET accumulated_ms = accumulated_ms + $3,
                        last_progress_ms = $4,
                        is_playing = $5,
                        last_seen_at = now()
                    WHERE user_id = $1 AND provider = $2
                    "#,
                )
                .bind(session.user_id)
                .bind(&session.provider)
                .bind(add_ms)
                .bind(snapshot.progress_ms)
                .bind(snapshot.is_playing)
                .execute(&self.pool)
                .await?;
                Ok(())
            }
        }
    }

    /// Emit a scrobble for a session if it qualifies.
    ///
    /// Reads only the metadata snapshot captured at session start; by the
    /// time a transition is observed the previous item is gone from the
    /// provider's endpoint.
    async fn finalize_session(&self, session: &PlaybackSession) -> Result<()> {
        if session.scrobbled {
            return Ok(());
        }

        let track: SpotifyTrack = match serde_json::from_value(session.track_json.clone()) {
            Ok(track) => track,
            Err(err) => {
                tracing::warn!(
                    user_id = %session.user_id,
                    track_uri = %session.track_uri,
                    error = %err,
                    "session has no usable metadata snapshot, skipping"
                );
                return Ok(());
            }
        };

        let duration_ms = session.duration_ms.unwrap_or(track.duration_ms);
        let Some(outcome) = finalize_outcome(session.accumulated_ms, duration_ms, &self.settings)
        else {
            tracing::debug!(
                user_id = %session.user_id,
                track_uri = %session.track_uri,
                accumulated_ms = session.accumulated_ms,
                duration_ms,
                "session below scrobble threshold"
            );
            return Ok(());
        };

        let window = Duration::seconds(FINALIZE_DEDUPE_WINDOW_SECS);
        if self
            .catalog
            .has_scrobble_near(session.user_id, session.started_at, window)
            .await?
        {
            tracing::debug!(
                user_id = %session.user_id,
                started_at = %session.started_at,
                "similar scrobble already recorded, skipping"
            );
            self.mark_scrobbled(session).await?;
            return Ok(());
        }

        let ingested = self
            .ingestor
            .ingest_track(&track)
            .await
            .context("failed to canonicalize finalizing session")?;

        let inserted = self
            .catalog
            .insert_scrobble(
                session.user_id,
                ingested.track.id,
                ingested.album.as_ref().map(|a| a.id),
                session.started_at,
                outcome.effective_ms,
                outcome.skipped,
                PROVIDER_SPOTIFY,
            )
            .await?;

        if inserted {
            tracing::info!(
                user_id = %session.user_id,
                track = %track.name,
                played_ms = outcome.effective_ms,
                skipped = outcome.skipped,
                "scrobbled"
            );
        }

        self.mark_scrobbled(session).await?;
        Ok(())
    }

    async fn mark_scrobbled(&self, session: &PlaybackSession) -> Result<()> {
        sqlx::query(
            "UPDATE playback_sessions SET scrobbled = true WHERE user_id = $1 AND provider = $2",
        )
        .bind(session.user_id)
        .bind(&session.provider)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_session(&self, account: &Account) -> Result<Option<PlaybackSession>> {
        let session = sqlx::query_as(
            "SELECT * FROM playback_sessions WHERE user_id = $1 AND provider = $2",
        )
        .bind(account.user_id)
        .bind(&account.provider)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn create_session(&self, account: &Account, snapshot: &TrackSnapshot) -> Result<()> {
        self.replace_session(account, snapshot).await
    }

    /// Install a fresh session for this snapshot, displacing any old row.
    async fn replace_session(&self, account: &Account, snapshot: &TrackSnapshot) -> Result<()> {
        let track_json = serde_json::to_value(&snapshot.track)
            .context("failed to snapshot track metadata")?;

        sqlx::query(
            r#"
            INSERT INTO playback_sessions
                (user_id, provider, track_uri, started_at, last_seen_at, last_progress_ms,
                 accumulated_ms, is_playing, duration_ms, track_json, scrobbled)
            VALUES ($1, $2, $3, now(), now(), $4, 0, $5, $6, $7, false)
            ON CONFLICT (user_id, provider) DO UPDATE SET
                track_uri = EXCLUDED.track_uri,
                started_at = EXCLUDED.started_at,
                last_seen_at = EXCLUDED.last_seen_at,
                last_progress_ms = EXCLUDED.last_progress_ms,
                accumulated_ms = EXCLUDED.accumulated_ms,
                is_playing = EXCLUDED.is_playing,
                duration_ms = EXCLUDED.duration_ms,
                track_json = EXCLUDED.track_json,
                scrobbled = EXCLUDED.scrobbled
            "#,
        )
        .bind(account.user_id)
        .bind(&account.provider)
        .bind(&snapshot.uri)
        .bind(snapshot.progress_ms)
        .bind(snapshot.is_playing)
        .bind(snapshot.duration_ms)
        .bind(track_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_session(&self, session: &PlaybackSession) -> Result<()> {
        sqlx::query("DELETE FROM playback_sessions WHERE user_id = $1 AND provider = $2")
            .bind(session.user_id)
            .bind(&session.provider)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> EngineSettings {
        EngineSettings::default()
    }

    #[test]
    fn threshold_is_disjunctive() {
        let s = settings();
        // 30 s floor regardless of track length.
        assert!(meets_threshold(30_000, 600_000, &s));
        assert!(!meets_threshold(29_999, 600_000, &s));
        // Percent path catches short tracks.
        assert!(meets_threshold(20_000, 40_000, &s));
        assert!(!meets_threshold(19_999, 40_000, &s));
    }

    #[test]
    fn wrap_threshold_has_floor() {
        let s = settings();
        // 35% of a 200 s track is 70 s.
        assert_eq!(wrap_threshold_ms(200_000, &s), 70_000);
        // Short track: the 15 s floor wins over 35%.
        assert_eq!(wrap_threshold_ms(30_000, &s), 15_000);
    }

    #[test]
    fn forward_delta_accumulates() {
        let s = settings();
        assert_eq!(
            continuation(true, 10_000, 18_000, 200_000, &s),
            Continuation::Update { add_ms: 8_000 }
        );
    }

    #[test]
    fn forward_seek_is_capped() {
        let s = settings();
        assert_eq!(
            continuation(true, 10_000, 100_000, 200_000, &s),
            Continuation::Update { add_ms: 30_000 }
        );
    }

    #[test]
    fn small_backward_drift_does_not_accumulate() {
        let s = settings();
        assert_eq!(
            continuation(true, 18_000, 17_500, 200_000, &s),
            Continuation::Update { add_ms: 0 }
        );
        assert_eq!(
            continuation(true, 18_000, 18_000, 200_000, &s),
            Continuation::Update { add_ms: 0 }
        );
    }

    #[test]
    fn paused_previous_observation_never_accumulates() {
        let s = settings();
        // Even a big forward jump after a pause only updates position.
        assert_eq!(
            continuation(false, 18_000, 26_000, 200_000, &s),
            Continuation::Update { add_ms: 0 }
        );
    }

    #[test]
    fn wrap_requires_jump_past_threshold() {
        let s = settings();
        // duration 200 s, threshold max(15 000, 70 000) = 70 000.
        assert_eq!(
            continuation(true, 180_000, 5_000, 200_000, &s),
            Continuation::Wrap
        );
        // A backward jump smaller than the threshold is just drift.
        assert_eq!(
            continuation(true, 80_000, 15_000, 200_000, &s),
            Continuation::Update { add_ms: 0 }
        );
    }

    #[test]
    fn short_track_completes_once() {
        // duration 90 s, accumulated 48 s: threshold met via percent
        // (48 000 >= 45 000), end margin does not apply, skipped because
        // 48 000 < 81 000.
        let s = settings();
        let outcome = finalize_outcome(48_000, 90_000, &s).unwrap();
        assert_eq!(outcome.effective_ms, 48_000);
        assert!(outcome.skipped);
    }

    #[test]
    fn end_margin_promotes_to_full_play() {
        let s = settings();
        // accumulated 180 s of a 200 s track: 180 + 15 >= 200.
        let outcome = finalize_outcome(180_000, 200_000, &s).unwrap();
        assert_eq!(outcome.effective_ms, 200_000);
        assert!(!outcome.skipped);
    }

    #[test]
    fn below_threshold_yields_nothing() {
        let s = settings();
        assert_eq!(finalize_outcome(12_000, 200_000, &s), None);
    }

    #[test]
    fn boundary_one_ms_under_floor_with_four_minute_track() {
        let s = settings();
        let accumulated = s.min_play_seconds * 1000 - 1;
        let duration = 4 * 60 * 1000;
        // Floor misses by 1 ms and 50% of 4 min is 120 s, far above.
        assert!(!meets_threshold(accumulated, duration, &s));
    }

    #[test]
    fn pause_resume_sequence_accumulates_once() {
        // Five polls with a pause in the middle.
        let s = settings();
        let duration = 200_000;
        let mut accumulated = 0_i64;

        // Poll 2: previous observation playing, progress 10 000 -> 18 000.
        let mut was_playing = true;
        let mut progress = 10_000;
        for (new_playing, new_progress, expected_add) in [
            (false, 18_000, 8_000), // pause observed after 8 s of play
            (false, 18_000, 0),     // still paused
            (true, 18_000, 0),      // resume: previous was paused
            (true, 26_000, 8_000),  // playing again
        ] {
            match continuation(was_playing, progress, new_progress, duration, &s) {
                Continuation::Update { add_ms } => {
                    assert_eq!(add_ms, expected_add);
                    accumulated += add_ms;
                }
                Continuation::Wrap => panic!("unexpected wrap"),
            }
            was_playing = new_playing;
            progress = new_progress;
        }

        assert_eq!(accumulated, 16_000);
    }

    #[test]
    fn loop_scenario_finalizes_as_full_play() {
        // Track 200 s, progress 180 000 -> 5 000: wrap. The finalized
        // session accumulated 180 s, promoted to a full, unskipped play.
        let s = settings();
        assert_eq!(
            continuation(true, 180_000, 5_000, 200_000, &s),
            Continuation::Wrap
        );
        let outcome = finalize_outcome(180_000, 200_000, &s).unwrap();
        assert_eq!(outcome.effective_ms, 200_000);
        assert!(!outcome.skipped);
    }
}
