//! Enrichment worker.
//!
//! Drains the job queue one claimed batch at a time, dispatching on the
//! job kind: MBID resolution for artists/albums/tracks, metadata syncs,
//! and group-membership derivation. Membership stints are upserted under
//! a precision-refinement rule: raw partial dates form a partial order by
//! prefix, and a longer (more precise) date replaces a shorter one for
//! the same stint instead of opening a new row.

use anyhow::{bail, Context, Result};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use uuid::Uuid;

use crate::config::WorkerSettings;
use crate::models::dates::{dates_compatible, date_refines, normalize_partial_date};
use crate::models::musicbrainz::{MbArtist, MEMBER_OF_BAND};
use crate::models::{ArtistGroupMembership, ArtistType, EnrichmentJob, JobKind};
use crate::services::catalog::CatalogService;
use crate::services::coverart::CoverArtClient;
use crate::services::job_queue::JobQueueService;
use crate::services::musicbrainz::MusicBrainzClient;
use crate::services::resolver::MetadataResolver;
use crate::services::scheduler::jittered;

/// Minimum search relevance score for an attachment to be trusted.
const MIN_MATCH_SCORE: i64 = 80;

/// What to do with an incoming membership stint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipAction {
    Noop,
    Update {
        id: Uuid,
        begin_raw: Option<String>,
        end_raw: Option<String>,
        ended: bool,
    },
    Insert,
}

#[derive(Debug, Clone)]
pub struct MembershipCandidate {
    pub begin_raw: Option<String>,
    pub end_raw: Option<String>,
    pub ended: bool,
}

fn raw(s: &Option<String>) -> Option<&str> {
    s.as_deref().filter(|s| !s.is_empty())
}

/// Decide how a candidate stint lands against the stints already stored
/// for the same (member, group).
///
/// Exact raw match only flips `ended`; a compatible stint (mutual prefix
/// on both ends) absorbs the candidate, refining whichever date got
/// strictly more precise; anything else is a new stint.
pub fn plan_membership_upsert(
    existing: &[ArtistGroupMembership],
    candidate: &MembershipCandidate,
) -> MembershipAction {
    let cand_begin = raw(&candidate.begin_raw);
    let cand_end = raw(&candidate.end_raw);

    if let Some(exact) = existing
        .iter()
        .find(|s| raw(&s.begin_date_raw) == cand_begin && raw(&s.end_date_raw) == cand_end)
    {
        if exact.ended != candidate.ended {
            return MembershipAction::Update {
                id: exact.id,
                begin_raw: exact.begin_date_raw.clone(),
                end_raw: exact.end_date_raw.clone(),
                ended: candidate.ended,
            };
        }
        return MembershipAction::Noop;
    }

    let compatible = existing.iter().find(|s| {
        dates_compatible(raw(&s.begin_date_raw), cand_begin)
            && dates_compatible(raw(&s.end_date_raw), cand_end)
    });

    if let Some(stint) = compatible {
        let begin_refines = date_refines(cand_begin, raw(&stint.begin_date_raw));
        let end_refines = date_refines(cand_end, raw(&stint.end_date_raw));

        if begin_refines || end_refines || stint.ended != candidate.ended {
            return MembershipAction::Update {
                id: stint.id,
                begin_raw: if begin_refines {
                    candidate.begin_raw.clone()
                } else {
                    stint.begin_date_raw.clone()
                },
                end_raw: if end_refines {
                    candidate.end_raw.clone()
                } else {
                    stint.end_date_raw.clone()
                },
                ended: candidate.ended,
            };
        }
        return MembershipAction::Noop;
    }

    MembershipAction::Insert
}

pub struct EnrichmentWorker {
    pool: PgPool,
    queue: Arc<JobQueueService>,
    catalog: Arc<CatalogService>,
    resolver: Arc<MetadataResolver>,
    mb: Arc<MusicBrainzClient>,
    coverart: Arc<CoverArtClient>,
    settings: WorkerSettings,
    worker_id: String,
}

impl EnrichmentWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        queue: Arc<JobQueueService>,
        catalog: Arc<CatalogService>,
        resolver: Arc<MetadataResolver>,
        mb: Arc<MusicBrainzClient>,
        coverart: Arc<CoverArtClient>,
        settings: WorkerSettings,
    ) -> Self {
        let worker_id = format!("worker-{}", Uuid::new_v4());
        Self {
            pool,
            queue,
            catalog,
            resolver,
            mb,
            coverart,
            settings,
            worker_id,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Claim and process one batch. Returns how many jobs were claimed so
    /// the caller can back off to the idle interval on an empty queue.
    pub async fn run_cycle(&self, shutdown: &mut watch::Receiver<bool>) -> Result<usize> {
        // The lookup cache is scoped to a worker cycle.
        self.resolver.cache().clear();

        let jobs = self
            .queue
            .claim(&self.worker_id, self.settings.batch_size)
            .await?;
        let claimed = jobs.len();

        for (index, job) in jobs.iter().enumerate() {
            if *shutdown.borrow() {
                tracing::info!(worker_id = %self.worker_id, "shutdown requested, leaving batch");
                break;
            }

            match self.handle_job(job).await {
                Ok(()) => self.queue.complete(job).await?,
                Err(err) => self.queue.fail(job, &format!("{err:#}")).await?,
            }

            // Pace between jobs to stay under the upstream rate limit
            // even with several workers running.
            if index + 1 < claimed {
                let delay = jittered(Duration::from_millis(self.settings.job_delay_ms), 0.1);
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }

        Ok(claimed)
    }

    async fn handle_job(&self, job: &EnrichmentJob) -> Result<()> {
        let kind = job
            .kind()
            .map_err(|err| anyhow::anyhow!("{err}"))
            .context("unroutable job")?;

        tracing::debug!(
            job_id = %job.id,
            kind = %kind,
            entity_id = %job.entity_id,
            attempts = job.attempts,
            "processing enrichment job"
        );

        match kind {
            JobKind::ArtistResolveMbid => self.resolve_artist_mbid(job.entity_id).await,
            JobKind::ArtistSyncRelationships => self.sync_artist_relationships(job.entity_id).await,
            JobKind::AlbumResolveMbid => self.resolve_album_mbid(job.entity_id).await,
            JobKind::AlbumSync => self.sync_album(job.entity_id).await,
            JobKind::TrackResolveMbid => self.resolve_track_mbid(job.entity_id).await,
            JobKind::TrackSync => self.sync_track(job.entity_id).await,
        }
    }

    // ---- artist jobs ----

    async fn resolve_artist_mbid(&self, artist_id: Uuid) -> Result<()> {
        let artist = self
            .catalog
            .artist_by_id(artist_id)
            .await?
            .context("artist not found")?;
        if artist.mbid.is_some() {
            return Ok(());
        }

        let results = self.mb.search_artists(&artist.name, 5).await?;
        let best = results
            .into_iter()
            .find(|candidate| candidate.score.unwrap_or(0) >= MIN_MATCH_SCORE);

        match best {
            Some(matched) => self.catalog.attach_artist_mbid(artist.id, &matched.id).await,
            None => bail!("no match for artist name \"{}\"", artist.name),
        }
    }

    async fn sync_artist_relationships(&self, artist_id: Uuid) -> Result<()> {
        let artist = self
            .catalog
            .artist_by_id(artist_id)
            .await?
            .context("artist not found")?;
        let mbid = artist.mbid.as_deref().context("artist has no mbid")?;

        let details = self
            .mb
            .get_artist(mbid)
            .await?
            .context("artist not found in metadata service")?;

        let artist_type = details
            .artist_type
            .as_deref()
            .map(ArtistType::from_musicbrainz);
        let (begin_raw, end_raw) = life_span_raw(&details);
        self.catalog
            .update_artist_profile(
                artist.id,
                artist_type,
                details.gender.as_deref(),
                begin_raw,
                end_raw,
            )
            .await?;

        let is_group = artist_type.map(|t| t.is_group_like()).unwrap_or(false);
        let relations = details.relations.unwrap_or_default();

        for relation in relations
            .iter()
            .filter(|r| r.relation_type == MEMBER_OF_BAND)
        {
            let Some(other) = relation.artist.as_ref() else {
                continue;
            };

            // Both edge endpoints must exist before the edge itself.
            let (member_id, group_id) = if is_group {
                if relation.direction != "backward" {
                    continue;
                }
                let member = self
                    .catalog
                    .upsert_artist(&other.name, Some(other.id.as_str()))
                    .await?;
                (member.id, artist.id)
            } else {
                if relation.direction != "forward" {
                    continue;
                }
                let group = self
                    .catalog
                    .upsert_artist(&other.name, Some(other.id.as_str()))
                    .await?;
                (artist.id, group.id)
            };

            self.upsert_membership(
                member_id,
                group_id,
                &MembershipCandidate {
                    begin_raw: relation.begin.clone(),
                    end_raw: relation.end.clone(),
                    ended: relation.ended.unwrap_or(false),
                },
            )
            .await?;
        }

        Ok(())
    }

    async fn upsert_membership(
        &self,
        member_id: Uuid,
        group_id: Uuid,
        candidate: &MembershipCandidate,
    ) -> Result<()> {
        let existing = self.catalog.memberships_for_pair(member_id, group_id).await?;

        match plan_membership_upsert(&existing, candidate) {
            MembershipAction::Noop => Ok(()),
            MembershipAction::Update {
                id,
                begin_raw,
                end_raw,
                ended,
            } => {
                let begin_date = begin_raw.as_deref().and_then(normalize_partial_date);
                let end_date = end_raw.as_deref().and_then(normalize_partial_date);
                self.catalog
                    .update_membership(
                        id,
                        begin_date,
                        end_date,
                        begin_raw.as_deref(),
                        end_raw.as_deref(),
                        ended,
                    )
                    .await
            }
            MembershipAction::Insert => {
                let begin_date = candidate.begin_raw.as_deref().and_then(normalize_partial_date);
                let end_date = candidate.end_raw.as_deref().and_then(normalize_partial_date);
                self.catalog
                    .insert_membership(
                        member_id,
                        group_id,
                        begin_date,
                        end_date,
                        candidate.begin_raw.as_deref(),
                        candidate.end_raw.as_deref(),
                        candidate.ended,
                    )
                    .await
            }
        }
    }

    // ---- album jobs ----

    async fn resolve_album_mbid(&self, album_id: Uuid) -> Result<()> {
        let album = self
            .catalog
            .album_by_id(album_id)
            .await?
            .context("album not found")?;
        if album.mbid.is_some() {
            return Ok(());
        }

        let artist = self
            .catalog
            .artist_by_id(album.artist_id)
            .await?
            .context("album's primary artist not found")?;

        let results = self.mb.search_releases(&album.title, &artist.name, 5).await?;
        let best = results
            .into_iter()
            .find(|candidate| candidate.score.unwrap_or(0) >= MIN_MATCH_SCORE);

        match best {
            Some(matched) => {
                sqlx::query(
                    "UPDATE albums SET mbid = $2, updated_at = now() WHERE id = $1 AND mbid IS NULL",
                )
                .bind(album.id)
                .bind(&matched.id)
                .execute(&self.pool)
                .await?;
                Ok(())
            }
            None => bail!("no match for album \"{}\" by \"{}\"", album.title, artist.name),
        }
    }

    async fn sync_album(&self, album_id: Uuid) -> Result<()> {
        let album = self
            .catalog
            .album_by_id(album_id)
            .await?
            .context("album not found")?;
        let mbid = album.mbid.as_deref().context("album has no mbid")?;

        let release = self
            .mb
            .get_release(mbid)
            .await?
            .context("release not found in metadata service")?;

        let release_date = release.date.as_deref().and_then(normalize_partial_date);
        if release.title != album.title || (release_date.is_some() && release_date != album.release_date)
        {
            sqlx::query(
                r#"
                UPDATE albums
                SET title = $2, release_date = COALESCE($3, release_date), updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(album.id)
            .bind(&release.title)
            .bind(release_date)
            .execute(&self.pool)
            .await?;
        }

        // Cover fetch failures have already been downgraded to None.
        if album.image_url.is_none() {
            if let Some(cover_url) = self.coverart.fetch_cover_url(mbid).await {
                sqlx::query(
                    "UPDATE albums SET image_url = $2, updated_at = now() WHERE id = $1 AND image_url IS NULL",
                )
                .bind(album.id)
                .bind(&cover_url)
                .execute(&self.pool)
                .await?;
            }
        }

        Ok(())
    }

    // ---- track jobs ----

    async fn resolve_track_mbid(&self, track_id: Uuid) -> Result<()> {
        let track = self
            .catalog
            .track_by_id(track_id)
            .await?
            .context("track not found")?;
        if track.mbid.is_some() {
            return Ok(());
        }

        if let Some(isrc) = track.isrc.as_deref() {
            if let Some(response) = self.mb.lookup_isrc(isrc).await? {
                if let Some(recording) = response.recordings.into_iter().next() {
                    return self.attach_track_mbid(track.id, &recording.id).await;
                }
            }
        }

        let artist_name = self
            .catalog
            .primary_artist_name(track.id)
            .await?
            .unwrap_or_default();
        let resolved = self
            .resolver
            .resolve_recording_id(&track.title, &artist_name, "", None)
            .await?;

        match resolved {
            Some(mbid) => self.attach_track_mbid(track.id, &mbid).await,
            None => bail!(
                "no match for track \"{}\" by \"{}\"",
                track.title,
                artist_name
            ),
        }
    }

    async fn attach_track_mbid(&self, track_id: Uuid, mbid: &str) -> Result<()> {
        sqlx::query("UPDATE tracks SET mbid = $2, updated_at = now() WHERE id = $1 AND mbid IS NULL")
            .bind(track_id)
            .bind(mbid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn sync_track(&self, track_id: Uuid) -> Result<()> {
        let track = self
            .catalog
            .track_by_id(track_id)
            .await?
            .context("track not found")?;
        let mbid = track.mbid.as_deref().context("track has no mbid")?;

        let recording = self
            .mb
            .get_recording(mbid)
            .await?
            .context("recording not found in metadata service")?;

        let isrc = recording
            .isrcs
            .as_ref()
            .and_then(|isrcs| isrcs.first())
            .cloned();

        sqlx::query(
            r#"
            UPDATE tracks
            SET title = $2,
                duration_ms = COALESCE($3, duration_ms),
                isrc = COALESCE(isrc, $4),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(track.id)
        .bind(&recording.title)
        .bind(recording.length)
        .bind(isrc)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn life_span_raw(details: &MbArtist) -> (Option<&str>, Option<&str>) {
    match details.life_span.as_ref() {
        Some(span) => (span.begin.as_deref(), span.end.as_deref()),
        None => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn stint(
        begin_raw: Option<&str>,
        end_raw: Option<&str>,
        ended: bool,
    ) -> ArtistGroupMembership {
        ArtistGroupMembership {
            id: Uuid::new_v4(),
            member_id: Uuid::new_v4(),
            group_id: Uuid::new_v4(),
            begin_date: begin_raw.and_then(normalize_partial_date),
            end_date: end_raw.and_then(normalize_partial_date),
            begin_date_raw: begin_raw.map(str::to_string),
            end_date_raw: end_raw.map(str::to_string),
            ended,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn candidate(begin: Option<&str>, end: Option<&str>, ended: bool) -> MembershipCandidate {
        MembershipCandidate {
            begin_raw: begin.map(str::to_string),
            end_raw: end.map(str::to_string),
            ended,
        }
    }

    #[test]
    fn exact_match_with_same_ended_is_noop() {
        let existing = vec![stint(Some("2001"), None, false)];
        let action = plan_membership_upsert(&existing, &candidate(Some("2001"), None, false));
        assert_eq!(action, MembershipAction::Noop);
    }

    #[test]
    fn exact_match_flips_ended_only() {
        let existing = vec![stint(Some("2001"), Some("2009"), false)];
        let action = plan_membership_upsert(&existing, &candidate(Some("2001"), Some("2009"), true));
        match action {
            MembershipAction::Update {
                begin_raw,
                end_raw,
                ended,
                ..
            } => {
                assert_eq!(begin_raw.as_deref(), Some("2001"));
                assert_eq!(end_raw.as_deref(), Some("2009"));
                assert!(ended);
            }
            other => panic!("expected Update, got {other:?}"),
        }
    }

    #[test]
    fn longer_raw_date_refines_compatible_stint() {
        // ("2001", null) refined by ("2001-06-15", null).
        let existing = vec![stint(Some("2001"), None, false)];
        let action =
            plan_membership_upsert(&existing, &candidate(Some("2001-06-15"), None, false));
        match action {
            MembershipAction::Update {
                id,
                begin_raw,
                end_raw,
                ended,
            } => {
                assert_eq!(id, existing[0].id);
                assert_eq!(begin_raw.as_deref(), Some("2001-06-15"));
                assert_eq!(end_raw, None);
                assert!(!ended);
            }
            other => panic!("expected Update, got {other:?}"),
        }
    }

    #[test]
    fn shorter_candidate_does_not_degrade_precision() {
        let existing = vec![stint(Some("2001-06-15"), None, false)];
        let action = plan_membership_upsert(&existing, &candidate(Some("2001"), None, false));
        assert_eq!(action, MembershipAction::Noop);
    }

    #[test]
    fn incompatible_dates_open_a_new_stint() {
        // Leave/rejoin: same pair, disjoint periods.
        let existing = vec![stint(Some("1995"), Some("1999"), true)];
        let action = plan_membership_upsert(&existing, &candidate(Some("2004"), None, false));
        assert_eq!(action, MembershipAction::Insert);
    }

    #[test]
    fn empty_queue_of_stints_inserts() {
        let action = plan_membership_upsert(&[], &candidate(Some("2001"), None, false));
        assert_eq!(action, MembershipAction::Insert);
    }

    #[test]
    fn refinement_on_end_date_keeps_begin() {
        let existing = vec![stint(Some("1987"), Some("1994"), true)];
        let action =
            plan_membership_upsert(&existing, &candidate(Some("1987"), Some("1994-04-05"), true));
        match action {
            MembershipAction::Update {
                begin_raw, end_raw, ..
            } => {
                assert_eq!(begin_raw.as_deref(), Some("1987"));
                assert_eq!(end_raw.as_deref(), Some("1994-04-05"));
            }
            other => panic!("expected Update, got {other:?}"),
        }
    }
}
