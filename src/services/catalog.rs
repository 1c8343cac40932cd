//! Canonical store: idempotent upserts and link tables.
//!
//! Artists, albums and tracks are shared across users and never deleted.
//! Matching is by external id first, then by natural key; an MBID learned
//! later is attached to the existing row. Attaching an artist MBID also
//! enqueues a relationships sync, fire and forget.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{
    Album, Artist, ArtistCredit, ArtistGroupMembership, Scrobble, Track, TrackUpsert,
};
use crate::models::{JobKind, ScrobbleCursor};
use crate::services::job_queue::JobQueueService;

pub struct CatalogService {
    pool: PgPool,
    queue: Arc<JobQueueService>,
}

impl CatalogService {
    pub fn new(pool: PgPool, queue: Arc<JobQueueService>) -> Self {
        Self { pool, queue }
    }

    // ---- artists ----

    /// Upsert an artist by MBID, else by exact name. Attaching a newly
    /// learned MBID to an existing row triggers a relationships sync.
    pub async fn upsert_artist(&self, name: &str, mbid: Option<&str>) -> Result<Artist> {
        if let Some(mbid) = mbid {
            if let Some(artist) = self.artist_by_mbid(mbid).await? {
                return Ok(artist);
            }
        }

        let existing: Option<Artist> =
            sqlx::query_as("SELECT * FROM artists WHERE name = $1 ORDER BY created_at LIMIT 1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;

        if let Some(artist) = existing {
            if artist.mbid.is_none() {
                if let Some(mbid) = mbid {
                    self.attach_artist_mbid(artist.id, mbid).await?;
                    return self
                        .artist_by_id(artist.id)
                        .await?
                        .ok_or_else(|| anyhow!("artist {} vanished during upsert", artist.id));
                }
            }
            return Ok(artist);
        }

        let inserted: Option<Artist> = sqlx::query_as(
            r#"
            INSERT INTO artists (id, name, mbid)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(mbid)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(artist) => Ok(artist),
            // Lost a race on the mbid unique index; the winner has our row.
            None => {
                let mbid = mbid.ok_or_else(|| anyhow!("artist insert conflict without mbid"))?;
                self.artist_by_mbid(mbid)
                    .await?
                    .ok_or_else(|| anyhow!("artist with mbid {mbid} not found after conflict"))
            }
        }
    }

    pub async fn artist_by_id(&self, id: Uuid) -> Result<Option<Artist>> {
        let artist = sqlx::query_as("SELECT * FROM artists WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(artist)
    }

    pub async fn artist_by_mbid(&self, mbid: &str) -> Result<Option<Artist>> {
        let artist = sqlx::query_as("SELECT * FROM artists WHERE mbid = $1")
            .bind(mbid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(artist)
    }

    /// Attach an MBID to an artist that has none, then enqueue a
    /// relationships sync. The enqueue is fire-and-forget: a queue error
    /// is logged, never propagated.
    pub async fn attach_artist_mbid(&self, artist_id: Uuid, mbid: &str) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE artists SET mbid = $2, updated_at = now() WHERE id = $1 AND mbid IS NULL",
        )
        .bind(artist_id)
        .bind(mbid)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() > 0 {
            if let Err(err) = self
                .queue
                .enqueue(JobKind::ArtistSyncRelationships, artist_id, 0)
                .await
            {
                tracing::warn!(%artist_id, error = %err, "failed to enqueue relationships sync");
            }
        }
        Ok(())
    }

    /// Overwrite the MusicBrainz-sourced profile fields of an artist.
    pub async fn update_artist_profile(
        &self,
        artist_id: Uuid,
        artist_type: Option<crate::models::ArtistType>,
        gender: Option<&str>,
        begin_date_raw: Option<&str>,
        end_date_raw: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE artists
            SET artist_type = $2, gender = $3, begin_date_raw = $4, end_date_raw = $5,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(artist_id)
        .bind(artist_type)
        .bind(gender)
        .bind(begin_date_raw)
        .bind(end_date_raw)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ---- albums ----

    /// Upsert an album by MBID, else by (title, primary artist).
    pub async fn upsert_album(
        &self,
        title: &str,
        artist_id: Uuid,
        mbid: Option<&str>,
        release_date: Option<NaiveDate>,
        image_url: Option<&str>,
    ) -> Result<Album> {
        if let Some(mbid) = mbid {
            let found: Option<Album> = sqlx::query_as("SELECT * FROM albums WHERE mbid = $1")
                .bind(mbid)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(album) = found {
                return Ok(album);
            }
        }

        let existing: Option<Album> = sqlx::query_as(
            "SELECT * FROM albums WHERE title = $1 AND artist_id = $2 ORDER BY created_at LIMIT 1",
        )
        .bind(title)
        .bind(artist_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(album) = existing {
            // Back-attach the mbid and fill gaps learned since creation.
            let needs_mbid = album.mbid.is_none() && mbid.is_some();
            let needs_date = album.release_date.is_none() && release_date.is_some();
            let needs_image = album.image_url.is_none() && image_url.is_some();
            if needs_mbid || needs_date || needs_image {
                let updated: Album = sqlx::query_as(
                    r#"
                    UPDATE albums
                    SET mbid = COALESCE(mbid, $2),
                        release_date = COALESCE(release_date, $3),
                        image_url = COALESCE(image_url, $4),
                        updated_at = now()
                    WHERE id = $1
                    RETURNING *
                    "#,
                )
                .bind(album.id)
                .bind(mbid)
                .bind(release_date)
                .bind(image_url)
                .fetch_one(&self.pool)
                .await?;
                return Ok(updated);
            }
            return Ok(album);
        }

        let album: Album = sqlx::query_as(
            r#"
            INSERT INTO albums (id, artist_id, title, release_date, mbid, image_url)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(artist_id)
        .bind(title)
        .bind(release_date)
        .bind(mbid)
        .bind(image_url)
        .fetch_one(&self.pool)
        .await?;
        Ok(album)
    }

    pub async fn album_by_id(&self, id: Uuid) -> Result<Option<Album>> {
        let album = sqlx::query_as("SELECT * FROM albums WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(album)
    }

    // ---- tracks ----

    /// Upsert a track by ISRC, then by MBID, else insert. An MBID learned
    /// later is back-attached; missing duration and ISRC are filled in.
    pub async fn upsert_track(&self, upsert: &TrackUpsert) -> Result<Track> {
        if let Some(isrc) = upsert.isrc.as_deref() {
            let found: Option<Track> = sqlx::query_as("SELECT * FROM tracks WHERE isrc = $1")
                .bind(isrc)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(track) = found {
                return self.fill_track_gaps(track, upsert).await;
            }
        }

        if let Some(mbid) = upsert.mbid.as_deref() {
            let found: Option<Track> = sqlx::query_as("SELECT * FROM tracks WHERE mbid = $1")
                .bind(mbid)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(track) = found {
                return self.fill_track_gaps(track, upsert).await;
            }
        }

        let track: Track = sqlx::query_as(
            r#"
            INSERT INTO tracks (id, title, duration_ms, mbid, isrc, explicit)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&upsert.title)
        .bind(upsert.duration_ms)
        .bind(upsert.mbid.as_deref())
        .bind(upsert.isrc.as_deref())
        .bind(upsert.explicit)
        .fetch_one(&self.pool)
        .await?;
        Ok(track)
    }

    async fn fill_track_gaps(&self, track: Track, upsert: &TrackUpsert) -> Result<Track> {
        let needs_mbid = track.mbid.is_none() && upsert.mbid.is_some();
        let needs_isrc = track.isrc.is_none() && upsert.isrc.is_some();
        let needs_duration = track.duration_ms.is_none() && upsert.duration_ms.is_some();
        if !(needs_mbid || needs_isrc || needs_duration) {
            return Ok(track);
        }

        let updated: Track = sqlx::query_as(
            r#"
            UPDATE tracks
            SET mbid = COALESCE(mbid, $2),
                isrc = COALESCE(isrc, $3),
                duration_ms = COALESCE(duration_ms, $4),
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(track.id)
        .bind(upsert.mbid.as_deref())
        .bind(upsert.isrc.as_deref())
        .bind(upsert.duration_ms)
        .fetch_one(&self.pool)
        .await?;
        Ok(updated)
    }

    pub async fn track_by_id(&self, id: Uuid) -> Result<Option<Track>> {
        let track = sqlx::query_as("SELECT * FROM tracks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(track)
    }

    // ---- links ----

    /// Upsert each credited artist and insert any missing link rows.
    pub async fn link_track_artists(&self, track_id: Uuid, credits: &[ArtistCredit]) -> Result<()> {
        for credit in credits {
            let artist = self
                .upsert_artist(&credit.name, credit.mbid.as_deref())
                .await?;

            sqlx::query(
                r#"
                INSERT INTO track_artists (track_id, artist_id, is_primary, position, join_phrase)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (track_id, artist_id) DO NOTHING
                "#,
            )
            .bind(track_id)
            .bind(artist.id)
            .bind(credit.is_primary)
            .bind(credit.position)
            .bind(&credit.join_phrase)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn link_track_album(
        &self,
        track_id: Uuid,
        album_id: Uuid,
        disc_number: Option<i64>,
        track_number: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO track_albums (track_id, album_id, disc_number, track_number)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (track_id, album_id) DO NOTHING
            "#,
        )
        .bind(track_id)
        .bind(album_id)
        .bind(disc_number)
        .bind(track_number)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Primary artist name for a track, used to build search queries.
    pub async fn primary_artist_name(&self, track_id: Uuid) -> Result<Option<String>> {
        let name: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT a.name FROM track_artists ta
            JOIN artists a ON a.id = ta.artist_id
            WHERE ta.track_id = $1
            ORDER BY ta.is_primary DESC, ta.position ASC
            LIMIT 1
            "#,
        )
        .bind(track_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(name.map(|(n,)| n))
    }

    // ---- memberships ----

    pub async fn memberships_for_pair(
        &self,
        member_id: Uuid,
        group_id: Uuid,
    ) -> Result<Vec<ArtistGroupMembership>> {
        let stints = sqlx::query_as(
            r#"
            SELECT * FROM artist_group_memberships
            WHERE member_id = $1 AND group_id = $2
            ORDER BY created_at
            "#,
        )
        .bind(member_id)
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(stints)
    }

    pub async fn insert_membership(
        &self,
        member_id: Uuid,
        group_id: Uuid,
        begin_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        begin_date_raw: Option<&str>,
        end_date_raw: Option<&str>,
        ended: bool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO artist_group_memberships
                (id, member_id, group_id, begin_date, end_date, begin_date_raw, end_date_raw, ended)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (member_id, group_id, COALESCE(begin_date_raw, ''), COALESCE(end_date_raw, ''))
                DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(member_id)
        .bind(group_id)
        .bind(begin_date)
        .bind(end_date)
        .bind(begin_date_raw)
        .bind(end_date_raw)
        .bind(ended)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_membership(
        &self,
        id: Uuid,
        begin_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        begin_date_raw: Option<&str>,
        end_date_raw: Option<&str>,
        ended: bool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE artist_group_memberships
            SET begin_date = $2, end_date = $3, begin_date_raw = $4, end_date_raw = $5,
                ended = $6, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(begin_date)
        .bind(end_date)
        .bind(begin_date_raw)
        .bind(end_date_raw)
        .bind(ended)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ---- scrobbles ----

    /// Insert a scrobble; the (user, track, played_at) conflict is the
    /// dedupe key and is absorbed silently. Returns whether a row landed.
    pub async fn insert_scrobble(
        &self,
        user_id: Uuid,
        track_id: Uuid,
        album_id: Option<Uuid>,
        played_at: DateTime<Utc>,
        played_duration_ms: i64,
        skipped: bool,
        source: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO scrobbles
                (id, user_id, track_id, album_id, played_at, played_duration_ms, skipped, source)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (user_id, track_id, played_at) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(track_id)
        .bind(album_id)
        .bind(played_at)
        .bind(played_duration_ms)
        .bind(skipped)
        .bind(source)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Any scrobble for this user within `window` of `at`, regardless of
    /// track. Guards session finalization against pause/resume replays.
    pub async fn has_scrobble_near(
        &self,
        user_id: Uuid,
        at: DateTime<Utc>,
        window: Duration,
    ) -> Result<bool> {
        let found: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM scrobbles
            WHERE user_id = $1 AND played_at BETWEEN $2 AND $3
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(at - window)
        .bind(at + window)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    /// A scrobble of the same track within `window` of `at`. The wide
    /// cross-path window: the reconciler's played_at marks the end of a
    /// play while the session engine's marks the start.
    pub async fn has_scrobble_for_track_near(
        &self,
        user_id: Uuid,
        track_id: Uuid,
        at: DateTime<Utc>,
        window: Duration,
    ) -> Result<bool> {
        let found: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM scrobbles
            WHERE user_id = $1 AND track_id = $2 AND played_at BETWEEN $3 AND $4
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(track_id)
        .bind(at - window)
        .bind(at + window)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    pub async fn recent_scrobbles(&self, user_id: Uuid, limit: i64) -> Result<Vec<Scrobble>> {
        let scrobbles = sqlx::query_as(
            r#"
            SELECT * FROM scrobbles
            WHERE user_id = $1
            ORDER BY played_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(scrobbles)
    }

    // ---- reconciler cursor ----

    pub async fn cursor(&self, user_id: Uuid, provider: &str) -> Result<Option<ScrobbleCursor>> {
        let cursor = sqlx::query_as(
            "SELECT * FROM scrobble_cursors WHERE user_id = $1 AND provider = $2",
        )
        .bind(user_id)
        .bind(provider)
        .fetch_optional(&self.pool)
        .await?;
        Ok(cursor)
    }

    /// Move the cursor forward; GREATEST keeps it monotonic even if two
    /// writers race.
    pub async fn advance_cursor(
        &self,
        user_id: Uuid,
        provider: &str,
        to: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scrobble_cursors (user_id, provider, last_played_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, provider) DO UPDATE
                SET last_played_at = GREATEST(scrobble_cursors.last_played_at, EXCLUDED.last_played_at),
                    updated_at = now()
            "#,
        )
        .bind(user_id)
        .bind(provider)
        .bind(to)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
