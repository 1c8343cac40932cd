//! Read-side dashboard endpoints: the live session, listening history
//! and simple aggregates.

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::spotify::SpotifyTrack;
use crate::models::{Artist, ArtistType, AuthenticatedUser, PlaybackSession};
use crate::services::PROVIDER_SPOTIFY;
use crate::AppState;

const MAX_PAGE_SIZE: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
}

fn page_limit(query: &PageQuery, default: i64) -> i64 {
    query.limit.unwrap_or(default).clamp(1, MAX_PAGE_SIZE)
}

#[derive(Debug, Serialize)]
pub struct NowPlayingResponse {
    pub playing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<SpotifyTrack>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

/// Server-side view of the stored playback session; never proxies the
/// provider directly.
pub async fn now_playing(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<NowPlayingResponse>> {
    let session: Option<PlaybackSession> = sqlx::query_as(
        "SELECT * FROM playback_sessions WHERE user_id = $1 AND provider = $2",
    )
    .bind(user.id)
    .bind(PROVIDER_SPOTIFY)
    .fetch_optional(&state.db_pool)
    .await?;

    let response = match session {
        Some(session) if session.is_playing => NowPlayingResponse {
            playing: true,
            track: serde_json::from_value(session.track_json).ok(),
            progress_ms: Some(session.last_progress_ms),
            started_at: Some(session.started_at),
        },
        _ => NowPlayingResponse {
            playing: false,
            track: None,
            progress_ms: None,
            started_at: None,
        },
    };

    Ok(Json(response))
}

#[derive(Debug, Serialize, FromRow)]
pub struct RecentScrobble {
    pub id: Uuid,
    pub played_at: DateTime<Utc>,
    pub played_duration_ms: i64,
    pub skipped: bool,
    pub track_id: Uuid,
    pub track_title: String,
    pub album_title: Option<String>,
    pub album_image_url: Option<String>,
    pub artist_names: Vec<String>,
}

pub async fn recently_played(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<RecentScrobble>>> {
    let limit = page_limit(&query, 20);

    let scrobbles: Vec<RecentScrobble> = sqlx::query_as(
        r#"
        SELECT s.id, s.played_at, s.played_duration_ms, s.skipped,
               t.id AS track_id, t.title AS track_title,
               al.title AS album_title, al.image_url AS album_image_url,
               COALESCE(
                   array_agg(ar.name ORDER BY ta.position) FILTER (WHERE ar.name IS NOT NULL),
                   '{}'::text[]
               ) AS artist_names
        FROM scrobbles s
        JOIN tracks t ON t.id = s.track_id
        LEFT JOIN albums al ON al.id = s.album_id
        LEFT JOIN track_artists ta ON ta.track_id = t.id
        LEFT JOIN artists ar ON ar.id = ta.artist_id
        WHERE s.user_id = $1
        GROUP BY s.id, t.id, al.id
        ORDER BY s.played_at DESC
        LIMIT $2
        "#,
    )
    .bind(user.id)
    .bind(limit)
    .fetch_all(&state.db_pool)
    .await?;

    Ok(Json(scrobbles))
}

#[derive(Debug, Serialize, FromRow)]
pub struct TopArtistEntry {
    pub id: Uuid,
    pub name: String,
    pub image_url: Option<String>,
    pub play_count: i64,
}

async fn top_artists_by_type(
    state: &AppState,
    user_id: Uuid,
    artist_type: ArtistType,
    limit: i64,
) -> Result<Vec<TopArtistEntry>> {
    let entries = sqlx::query_as(
        r#"
        SELECT ar.id, ar.name, ar.image_url, COUNT(*) AS play_count
        FROM scrobbles s
        JOIN track_artists ta ON ta.track_id = s.track_id
        JOIN artists ar ON ar.id = ta.artist_id
        WHERE s.user_id = $1 AND ar.artist_type = $2
        GROUP BY ar.id
        ORDER BY play_count DESC, ar.name
        LIMIT $3
        "#,
    )
    .bind(user_id)
    .bind(artist_type)
    .bind(limit)
    .fetch_all(&state.db_pool)
    .await?;
    Ok(entries)
}

pub async fn top_groups(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<TopArtistEntry>>> {
    let limit = page_limit(&query, 10);
    let entries = top_artists_by_type(&state, user.id, ArtistType::Group, limit).await?;
    Ok(Json(entries))
}

pub async fn top_solo_artists(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<TopArtistEntry>>> {
    let limit = page_limit(&query, 10);
    let entries = top_artists_by_type(&state, user.id, ArtistType::Person, limit).await?;
    Ok(Json(entries))
}

#[derive(Debug, Serialize, FromRow)]
pub struct MembershipEntry {
    pub artist_id: Uuid,
    pub name: String,
    pub begin_date_raw: Option<String>,
    pub end_date_raw: Option<String>,
    pub ended: bool,
}

#[derive(Debug, Serialize)]
pub struct ArtistDetailResponse {
    #[serde(flatten)]
    pub artist: Artist,
    /// For groups: the member breakdown.
    pub members: Vec<MembershipEntry>,
    /// For persons: the groups they have been part of.
    pub groups: Vec<MembershipEntry>,
}

pub async fn artist_detail(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(artist_id): Path<Uuid>,
) -> Result<Json<ArtistDetailResponse>> {
    let artist: Artist = sqlx::query_as("SELECT * FROM artists WHERE id = $1")
        .bind(artist_id)
        .fetch_optional(&state.db_pool)
        .await?
        .ok_or_else(|| AppError::NotFound {
            resource: "Artist".to_string(),
        })?;

    let is_group = artist
        .artist_type
        .map(|t| t.is_group_like())
        .unwrap_or(false);

    let (members, groups) = if is_group {
        let members: Vec<MembershipEntry> = sqlx::query_as(
            r#"
            SELECT a.id AS artist_id, a.name, m.begin_date_raw, m.end_date_raw, m.ended
            FROM artist_group_memberships m
            JOIN artists a ON a.id = m.member_id
            WHERE m.group_id = $1
            ORDER BY m.begin_date NULLS FIRST, a.name
            "#,
        )
        .bind(artist_id)
        .fetch_all(&state.db_pool)
        .await?;
        (members, Vec::new())
    } else {
        let groups: Vec<MembershipEntry> = sqlx::query_as(
            r#"
            SELECT a.id AS artist_id, a.name, m.begin_date_raw, m.end_date_raw, m.ended
            FROM artist_group_memberships m
            JOIN artists a ON a.id = m.group_id
            WHERE m.member_id = $1
            ORDER BY m.begin_date NULLS FIRST, a.name
            "#,
        )
        .bind(artist_id)
        .fetch_all(&state.db_pool)
        .await?;
        (Vec::new(), groups)
    };

    Ok(Json(ArtistDetailResponse {
        artist,
        members,
        groups,
    }))
}
