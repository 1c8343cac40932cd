//! Manual enrichment triggers and job inspection.
//!
//! Sync endpoints are asynchronous by contract: they enqueue and answer
//! 202 with a job id; clients poll `/jobs/{id}` until the status is
//! terminal.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{EnqueueResult, EnrichmentJob, JobKind, QueueStats};
use crate::AppState;

/// Manual single-entity syncs jump the automatic work.
const MANUAL_PRIORITY: i64 = 10;
/// Bulk syncs sit between manual and automatic.
const BULK_PRIORITY: i64 = 5;

const MAX_BULK_LIMIT: i64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncType {
    #[default]
    Sync,
    Resolve,
}

#[derive(Debug, Deserialize)]
pub struct SyncQuery {
    #[serde(rename = "type", default)]
    pub sync_type: SyncType,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Copy)]
enum SyncTarget {
    Artist,
    Album,
    Track,
}

impl SyncTarget {
    fn job_kind(&self, sync_type: SyncType) -> JobKind {
        match (self, sync_type) {
            (Self::Artist, SyncType::Sync) => JobKind::ArtistSyncRelationships,
            (Self::Artist, SyncType::Resolve) => JobKind::ArtistResolveMbid,
            (Self::Album, SyncType::Sync) => JobKind::AlbumSync,
            (Self::Album, SyncType::Resolve) => JobKind::AlbumResolveMbid,
            (Self::Track, SyncType::Sync) => JobKind::TrackSync,
            (Self::Track, SyncType::Resolve) => JobKind::TrackResolveMbid,
        }
    }

    fn table(&self) -> &'static str {
        match self {
            Self::Artist => "artists",
            Self::Album => "albums",
            Self::Track => "tracks",
        }
    }

    fn resource(&self) -> &'static str {
        match self {
            Self::Artist => "Artist",
            Self::Album => "Album",
            Self::Track => "Track",
        }
    }
}

/// Look up whether the target row exists and carries an MBID.
async fn entity_mbid_state(
    state: &AppState,
    target: SyncTarget,
    entity_id: Uuid,
) -> Result<Option<bool>> {
    let query = format!(
        "SELECT mbid IS NOT NULL FROM {} WHERE id = $1",
        target.table()
    );
    let row: Option<(bool,)> = sqlx::query_as(&query)
        .bind(entity_id)
        .fetch_optional(&state.db_pool)
        .await?;
    Ok(row.map(|(has_mbid,)| has_mbid))
}

async fn enqueue_single(
    state: &AppState,
    target: SyncTarget,
    entity_id: Uuid,
    sync_type: SyncType,
) -> Result<(StatusCode, Json<EnqueueResult>)> {
    let has_mbid = entity_mbid_state(state, target, entity_id)
        .await?
        .ok_or_else(|| AppError::NotFound {
            resource: target.resource().to_string(),
        })?;

    if sync_type == SyncType::Sync && !has_mbid {
        return Err(AppError::PreconditionFailed {
            message: "sync requested but entity has no external id".to_string(),
        });
    }

    let result = state
        .queue
        .enqueue(target.job_kind(sync_type), entity_id, MANUAL_PRIORITY)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(result)))
}

pub async fn sync_artist(
    State(state): State<AppState>,
    Path(artist_id): Path<Uuid>,
    Query(query): Query<SyncQuery>,
) -> Result<(StatusCode, Json<EnqueueResult>)> {
    enqueue_single(&state, SyncTarget::Artist, artist_id, query.sync_type).await
}

pub async fn sync_album(
    State(state): State<AppState>,
    Path(album_id): Path<Uuid>,
    Query(query): Query<SyncQuery>,
) -> Result<(StatusCode, Json<EnqueueResult>)> {
    enqueue_single(&state, SyncTarget::Album, album_id, query.sync_type).await
}

pub async fn sync_track(
    State(state): State<AppState>,
    Path(track_id): Path<Uuid>,
    Query(query): Query<SyncQuery>,
) -> Result<(StatusCode, Json<EnqueueResult>)> {
    enqueue_single(&state, SyncTarget::Track, track_id, query.sync_type).await
}

#[derive(Debug, Serialize)]
pub struct BulkSyncResponse {
    pub requested: usize,
    pub jobs: Vec<EnqueueResult>,
}

/// Enqueue up to `limit` entities: unresolved rows for `resolve`,
/// resolved-but-stalest rows for `sync`.
async fn enqueue_bulk(
    state: &AppState,
    target: SyncTarget,
    query: &SyncQuery,
) -> Result<(StatusCode, Json<BulkSyncResponse>)> {
    let limit = query.limit.unwrap_or(MAX_BULK_LIMIT).clamp(1, MAX_BULK_LIMIT);

    let select = match query.sync_type {
        SyncType::Resolve => format!(
            "SELECT id FROM {} WHERE mbid IS NULL ORDER BY created_at LIMIT $1",
            target.table()
        ),
        SyncType::Sync => format!(
            "SELECT id FROM {} WHERE mbid IS NOT NULL ORDER BY last_enriched_at ASC NULLS FIRST LIMIT $1",
            target.table()
        ),
    };

    let ids: Vec<(Uuid,)> = sqlx::query_as(&select)
        .bind(limit)
        .fetch_all(&state.db_pool)
        .await?;

    let kind = target.job_kind(query.sync_type);
    let mut jobs = Vec::with_capacity(ids.len());
    for (entity_id,) in &ids {
        jobs.push(state.queue.enqueue(kind, *entity_id, BULK_PRIORITY).await?);
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(BulkSyncResponse {
            requested: ids.len(),
            jobs,
        }),
    ))
}

pub async fn sync_artists_bulk(
    State(state): State<AppState>,
    Query(query): Query<SyncQuery>,
) -> Result<(StatusCode, Json<BulkSyncResponse>)> {
    enqueue_bulk(&state, SyncTarget::Artist, &query).await
}

pub async fn sync_albums_bulk(
    State(state): State<AppState>,
    Query(query): Query<SyncQuery>,
) -> Result<(StatusCode, Json<BulkSyncResponse>)> {
    enqueue_bulk(&state, SyncTarget::Album, &query).await
}

pub async fn sync_tracks_bulk(
    State(state): State<AppState>,
    Query(query): Query<SyncQuery>,
) -> Result<(StatusCode, Json<BulkSyncResponse>)> {
    enqueue_bulk(&state, SyncTarget::Track, &query).await
}

pub async fn queue_stats(State(state): State<AppState>) -> Result<Json<QueueStats>> {
    let stats = state.queue.stats().await?;
    Ok(Json(stats))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<EnrichmentJob>> {
    let job = state
        .queue
        .get(job_id)
        .await?
        .ok_or_else(|| AppError::NotFound {
            resource: "Job".to_string(),
        })?;
    Ok(Json(job))
}
