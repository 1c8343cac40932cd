//! Enrichment job queue rows and job/entity kind vocabulary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Job status matching the database enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// The work a job performs, stored as its dotted wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    ArtistResolveMbid,
    ArtistSyncRelationships,
    AlbumResolveMbid,
    AlbumSync,
    TrackResolveMbid,
    TrackSync,
}

impl JobKind {
    pub const ALL: [JobKind; 6] = [
        JobKind::ArtistResolveMbid,
        JobKind::ArtistSyncRelationships,
        JobKind::AlbumResolveMbid,
        JobKind::AlbumSync,
        JobKind::TrackResolveMbid,
        JobKind::TrackSync,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ArtistResolveMbid => "artist.resolve_mbid",
            Self::ArtistSyncRelationships => "artist.sync_relationships",
            Self::AlbumResolveMbid => "album.resolve_mbid",
            Self::AlbumSync => "album.sync",
            Self::TrackResolveMbid => "track.resolve_mbid",
            Self::TrackSync => "track.sync",
        }
    }

    pub fn entity_kind(&self) -> EntityKind {
        match self {
            Self::ArtistResolveMbid | Self::ArtistSyncRelationships => EntityKind::Artist,
            Self::AlbumResolveMbid | Self::AlbumSync => EntityKind::Album,
            Self::TrackResolveMbid | Self::TrackSync => EntityKind::Track,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "artist.resolve_mbid" => Ok(Self::ArtistResolveMbid),
            "artist.sync_relationships" => Ok(Self::ArtistSyncRelationships),
            "album.resolve_mbid" => Ok(Self::AlbumResolveMbid),
            "album.sync" => Ok(Self::AlbumSync),
            "track.resolve_mbid" => Ok(Self::TrackResolveMbid),
            "track.sync" => Ok(Self::TrackSync),
            other => Err(format!("unknown job kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Artist,
    Album,
    Track,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Artist => "artist",
            Self::Album => "album",
            Self::Track => "track",
        }
    }

    /// Table holding this entity's `last_enriched_at` column.
    pub fn table(&self) -> &'static str {
        match self {
            Self::Artist => "artists",
            Self::Album => "albums",
            Self::Track => "tracks",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "artist" => Ok(Self::Artist),
            "album" => Ok(Self::Album),
            "track" => Ok(Self::Track),
            other => Err(format!("unknown entity kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EnrichmentJob {
    pub id: Uuid,
    pub job_kind: String,
    pub entity_kind: String,
    pub entity_id: Uuid,
    pub status: JobStatus,
    pub priority: i64,
    pub attempts: i64,
    pub max_attempts: i64,
    pub run_after: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EnrichmentJob {
    pub fn kind(&self) -> Result<JobKind, String> {
        self.job_kind.parse()
    }
}

/// Result of an enqueue attempt. When an active job already covers the
/// (kind, entity) pair, the existing id is returned instead of a new row.
#[derive(Debug, Clone, Serialize)]
pub struct EnqueueResult {
    pub job_id: Uuid,
    pub created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

/// Aggregate queue counts for the stats endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub running: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub pending_by_kind: Vec<KindCount>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct KindCount {
    pub job_kind: String,
    pub count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_kind_round_trips_through_wire_form() {
        for kind in JobKind::ALL {
            assert_eq!(kind.as_str().parse::<JobKind>(), Ok(kind));
        }
        assert!("artist.destroy".parse::<JobKind>().is_err());
    }

    #[test]
    fn job_kind_maps_to_entity_kind() {
        assert_eq!(JobKind::ArtistResolveMbid.entity_kind(), EntityKind::Artist);
        assert_eq!(JobKind::AlbumSync.entity_kind(), EntityKind::Album);
        assert_eq!(JobKind::TrackSync.entity_kind(), EntityKind::Track);
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }
}
