//! Recorded plays, the reconciler cursor, and the live playback session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One recorded listening event, keyed by (user, track, played_at).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Scrobble {
    pub id: Uuid,
    pub user_id: Uuid,
    pub track_id: Uuid,
    pub album_id: Option<Uuid>,
    pub played_at: DateTime<Utc>,
    pub played_duration_ms: i64,
    pub skipped: bool,
    pub source: String,
    /// Set when the scrobble arrived through a bulk import rather than
    /// one of the ingestion loops.
    pub import_batch_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// High-water mark of `played_at` values the reconciler has processed
/// for one (user, provider). Only ever moves forward.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScrobbleCursor {
    pub user_id: Uuid,
    pub provider: String,
    pub last_played_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persisted state of the currently playing track for one (user, provider).
///
/// `track_json` is the provider metadata snapshot taken when this play
/// instance began; by the time a track change is observed the previous
/// item is gone from the endpoint, so finalization must read the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PlaybackSession {
    pub user_id: Uuid,
    pub provider: String,
    pub track_uri: String,
    pub started_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub last_progress_ms: i64,
    pub accumulated_ms: i64,
    pub is_playing: bool,
    pub duration_ms: Option<i64>,
    pub track_json: serde_json::Value,
    pub scrobbled: bool,
}
