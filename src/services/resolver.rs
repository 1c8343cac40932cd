//! Metadata resolution with per-process memoization.
//!
//! Each lookup kind is memoized, negative results included, so repeated
//! plays of the same track cost one upstream call per worker cycle. The
//! cache is shared by the fast and slow loops and cleared at the start of
//! every enrichment-worker cycle.

use anyhow::Result;
use dashmap::DashMap;
use std::sync::Arc;

use crate::models::musicbrainz::MbRecording;
use crate::services::coverart::CoverArtClient;
use crate::services::musicbrainz::{escape_lucene, MusicBrainzClient};

/// Minimum search relevance score for a match to be trusted.
const MIN_SEARCH_SCORE: i64 = 80;

/// Memoized lookup results, living until the next cycle clear.
#[derive(Default)]
pub struct MetadataCache {
    isrc_to_recording: DashMap<String, Option<String>>,
    search_to_recording: DashMap<String, Option<String>>,
    recording_details: DashMap<String, Option<MbRecording>>,
    release_cover: DashMap<String, Option<String>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.isrc_to_recording.clear();
        self.search_to_recording.clear();
        self.recording_details.clear();
        self.release_cover.clear();
    }
}

pub struct MetadataResolver {
    mb: Arc<MusicBrainzClient>,
    coverart: Arc<CoverArtClient>,
    cache: Arc<MetadataCache>,
}

impl MetadataResolver {
    pub fn new(
        mb: Arc<MusicBrainzClient>,
        coverart: Arc<CoverArtClient>,
        cache: Arc<MetadataCache>,
    ) -> Self {
        Self { mb, coverart, cache }
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    /// Resolve a track to a recording MBID: ISRC lookup first, then a
    /// title/artist/album search gated on the relevance score.
    pub async fn resolve_recording_id(
        &self,
        title: &str,
        artist: &str,
        album: &str,
        isrc: Option<&str>,
    ) -> Result<Option<String>> {
        if let Some(isrc) = isrc {
            if let Some(id) = self.recording_id_by_isrc(isrc).await? {
                return Ok(Some(id));
            }
        }
        self.recording_id_by_search(title, artist, album).await
    }

    async fn recording_id_by_isrc(&self, isrc: &str) -> Result<Option<String>> {
        if let Some(cached) = self.cache.isrc_to_recording.get(isrc) {
            return Ok(cached.value().clone());
        }

        let result = self
            .mb
            .lookup_isrc(isrc)
            .await?
            .and_then(|response| response.recordings.into_iter().next())
            .map(|recording| recording.id);

        self.cache
            .isrc_to_recording
            .insert(isrc.to_string(), result.clone());
        Ok(result)
    }

    async fn recording_id_by_search(
        &self,
        title: &str,
        artist: &str,
        album: &str,
    ) -> Result<Option<String>> {
        let cache_key = search_cache_key(title, artist, album);
        if let Some(cached) = self.cache.search_to_recording.get(&cache_key) {
            return Ok(cached.value().clone());
        }

        let query = format!(
            "recording:\"{}\" AND artist:\"{}\" AND release:\"{}\"",
            escape_lucene(title),
            escape_lucene(artist),
            escape_lucene(album)
        );
        let recordings = self.mb.search_recordings(&query, 5).await?;

        let result = match recordings.into_iter().next() {
            Some(best) if best.score.unwrap_or(0) >= MIN_SEARCH_SCORE => Some(best.id),
            Some(best) => {
                tracing::info!(
                    title,
                    artist,
                    score = best.score.unwrap_or(0),
                    "discarding low-confidence recording match"
                );
                None
            }
            None => None,
        };

        self.cache
            .search_to_recording
            .insert(cache_key, result.clone());
        Ok(result)
    }

    pub async fn recording_details(&self, mbid: &str) -> Result<Option<MbRecording>> {
        if let Some(cached) = self.cache.recording_details.get(mbid) {
            return Ok(cached.value().clone());
        }

        let details = self.mb.get_recording(mbid).await?;
        self.cache
            .recording_details
            .insert(mbid.to_string(), details.clone());
        Ok(details)
    }

    /// Cover URL for a release; failures have already been downgraded to
    /// `None` by the cover art client.
    pub async fn cover_url(&self, release_mbid: &str) -> Option<String> {
        if let Some(cached) = self.cache.release_cover.get(release_mbid) {
            return cached.value().clone();
        }

        let url = self.coverart.fetch_cover_url(release_mbid).await;
        self.cache
            .release_cover
            .insert(release_mbid.to_string(), url.clone());
        url
    }
}

fn search_cache_key(title: &str, artist: &str, album: &str) -> String {
    format!(
        "{}|{}|{}",
        title.to_lowercase(),
        artist.to_lowercase(),
        album.to_lowercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_cache_key_is_case_insensitive() {
        assert_eq!(
            search_cache_key("Cut To The Feeling", "Carly Rae Jepsen", "Album"),
            search_cache_key("cut to the feeling", "carly rae jepsen", "album")
        );
    }

    #[test]
    fn cache_clear_empties_all_maps() {
        let cache = MetadataCache::new();
        cache
            .isrc_to_recording
            .insert("USUM71703861".to_string(), Some("abc".to_string()));
        cache
            .search_to_recording
            .insert("a|b|c".to_string(), None);
        cache
            .release_cover
            .insert("rel".to_string(), Some("url".to_string()));
        cache.clear();
        assert!(cache.isrc_to_recording.is_empty());
        assert!(cache.search_to_recording.is_empty());
        assert!(cache.release_cover.is_empty());
    }
}
