//! Shared resolve-then-upsert path for observed plays.
//!
//! Both ingestion loops funnel through here: resolve the play against
//! MusicBrainz (best effort), then canonicalize artists, album, track and
//! their links. Resolution failures degrade to provider metadata only;
//! a play is never dropped because enrichment was unavailable.

use anyhow::Result;
use std::sync::Arc;

use crate::models::dates::normalize_partial_date;
use crate::models::musicbrainz::MbRecording;
use crate::models::spotify::SpotifyTrack;
use crate::models::{Album, ArtistCredit, Track, TrackUpsert};
use crate::services::catalog::CatalogService;
use crate::services::resolver::MetadataResolver;

pub struct IngestedPlay {
    pub track: Track,
    pub album: Option<Album>,
}

pub struct PlayIngestor {
    resolver: Arc<MetadataResolver>,
    catalog: Arc<CatalogService>,
}

impl PlayIngestor {
    pub fn new(resolver: Arc<MetadataResolver>, catalog: Arc<CatalogService>) -> Self {
        Self { resolver, catalog }
    }

    /// Canonicalize one played track and ensure all its links exist.
    pub async fn ingest_track(&self, played: &SpotifyTrack) -> Result<IngestedPlay> {
        let artist_name = played.primary_artist_name().unwrap_or_default();
        let album_name = played
            .album
            .as_ref()
            .map(|a| a.name.as_str())
            .unwrap_or_default();

        let recording_id = match self
            .resolver
            .resolve_recording_id(&played.name, artist_name, album_name, played.isrc())
            .await
        {
            Ok(id) => id,
            Err(err) => {
                tracing::warn!(
                    track = %played.name,
                    error = %err,
                    "recording resolution failed, ingesting provider metadata only"
                );
                None
            }
        };

        let details = match recording_id.as_deref() {
            Some(mbid) => self.resolver.recording_details(mbid).await.unwrap_or_else(|err| {
                tracing::warn!(mbid, error = %err, "recording detail fetch failed");
                None
            }),
            None => None,
        };

        let credits = build_credits(played, details.as_ref());

        let primary = credits
            .first()
            .cloned()
            .unwrap_or_else(|| ArtistCredit {
                name: "Unknown Artist".to_string(),
                mbid: None,
                is_primary: true,
                position: 0,
                join_phrase: String::new(),
            });
        let primary_artist = self
            .catalog
            .upsert_artist(&primary.name, primary.mbid.as_deref())
            .await?;

        let album = match played.album.as_ref() {
            Some(album_ref) => {
                let release_date = album_ref
                    .release_date
                    .as_deref()
                    .and_then(normalize_partial_date);
                Some(
                    self.catalog
                        .upsert_album(
                            &album_ref.name,
                            primary_artist.id,
                            None,
                            release_date,
                            album_ref.cover_url(),
                        )
                        .await?,
                )
            }
            None => None,
        };

        let track = self
            .catalog
            .upsert_track(&TrackUpsert {
                title: played.name.clone(),
                duration_ms: Some(played.duration_ms),
                isrc: played.isrc().map(str::to_string),
                mbid: recording_id,
                explicit: played.explicit,
            })
            .await?;

        self.catalog.link_track_artists(track.id, &credits).await?;
        if let Some(album) = &album {
            self.catalog
                .link_track_album(track.id, album.id, played.disc_number, played.track_number)
                .await?;
        }

        Ok(IngestedPlay { track, album })
    }
}

/// Prefer MusicBrainz artist credits (they carry MBIDs and join phrases);
/// fall back to the provider's credit list.
fn build_credits(played: &SpotifyTrack, details: Option<&MbRecording>) -> Vec<ArtistCredit> {
    if let Some(mb_credits) = details.and_then(|d| d.artist_credit.as_ref()) {
        if !mb_credits.is_empty() {
            return mb_credits
                .iter()
                .enumerate()
                .map(|(position, credit)| ArtistCredit {
                    name: credit.artist.name.clone(),
                    mbid: Some(credit.artist.id.clone()),
                    is_primary: position == 0,
                    position: position as i64,
                    join_phrase: credit.joinphrase.clone().unwrap_or_default(),
                })
                .collect();
        }
    }

    played
        .artists
        .iter()
        .enumerate()
        .map(|(position, artist)| ArtistCredit {
            name: artist.name.clone(),
            mbid: None,
            is_primary: position == 0,
            position: position as i64,
            join_phrase: String::new(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::musicbrainz::{MbArtistCredit, MbArtistRef};
    use crate::models::spotify::SpotifyArtistRef;

    fn spotify_track() -> SpotifyTrack {
        SpotifyTrack {
            id: Some("track1".to_string()),
            uri: "spotify:track:track1".to_string(),
            name: "Song".to_string(),
            duration_ms: 200_000,
            explicit: false,
            artists: vec![
                SpotifyArtistRef {
                    id: None,
                    name: "Lead".to_string(),
                },
                SpotifyArtistRef {
                    id: None,
                    name: "Feature".to_string(),
                },
            ],
            album: None,
            external_ids: None,
            disc_number: None,
            track_number: None,
        }
    }

    #[test]
    fn provider_credits_used_without_resolution() {
        let credits = build_credits(&spotify_track(), None);
        assert_eq!(credits.len(), 2);
        assert!(credits[0].is_primary);
        assert_eq!(credits[0].name, "Lead");
        assert_eq!(credits[1].position, 1);
        assert!(!credits[1].is_primary);
    }

    #[test]
    fn musicbrainz_credits_take_precedence() {
        let recording = MbRecording {
            id: "rec1".to_string(),
            title: "Song".to_string(),
            length: Some(200_000),
            isrcs: None,
            artist_credit: Some(vec![MbArtistCredit {
                name: "Lead".to_string(),
                joinphrase: Some(" feat. ".to_string()),
                artist: MbArtistRef {
                    id: "mbid-lead".to_string(),
                    name: "Lead".to_string(),
                },
            }]),
            releases: None,
            score: None,
        };

        let credits = build_credits(&spotify_track(), Some(&recording));
        assert_eq!(credits.len(), 1);
        assert_eq!(credits[0].mbid.as_deref(), Some("mbid-lead"));
        assert_eq!(credits[0].join_phrase, " feat. ");
    }
}
