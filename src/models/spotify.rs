//! Spotify wire formats.
//!
//! The player endpoints return heterogeneous payloads (tracks, episodes,
//! ads); everything non-track is rejected at this boundary so the rest of
//! the system only ever sees [`TrackSnapshot`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Response of the token endpoint for the refresh-token grant.
#[derive(Debug, Clone, Deserialize)]
pub struct SpotifyTokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    /// Spotify may rotate the refresh token; absent means keep the old one.
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
}

/// Raw body of `GET /me/player/currently-playing` (when not 204).
#[derive(Debug, Clone, Deserialize)]
pub struct CurrentlyPlayingResponse {
    pub item: Option<SpotifyTrack>,
    pub progress_ms: Option<i64>,
    pub is_playing: bool,
    pub currently_playing_type: String,
    pub timestamp: i64,
}

/// Raw body of `GET /me/player/recently-played`.
#[derive(Debug, Clone, Deserialize)]
pub struct RecentlyPlayedResponse {
    pub items: Vec<PlayHistoryItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayHistoryItem {
    pub track: SpotifyTrack,
    pub played_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyTrack {
    pub id: Option<String>,
    pub uri: String,
    pub name: String,
    pub duration_ms: i64,
    #[serde(default)]
    pub explicit: bool,
    #[serde(default)]
    pub artists: Vec<SpotifyArtistRef>,
    pub album: Option<SpotifyAlbumRef>,
    pub external_ids: Option<SpotifyExternalIds>,
    pub disc_number: Option<i64>,
    pub track_number: Option<i64>,
}

impl SpotifyTrack {
    pub fn isrc(&self) -> Option<&str> {
        self.external_ids.as_ref().and_then(|ids| ids.isrc.as_deref())
    }

    pub fn primary_artist_name(&self) -> Option<&str> {
        self.artists.first().map(|a| a.name.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyArtistRef {
    pub id: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyAlbumRef {
    pub id: Option<String>,
    pub name: String,
    pub release_date: Option<String>,
    #[serde(default)]
    pub images: Vec<SpotifyImage>,
}

impl SpotifyAlbumRef {
    /// Largest cover image, which Spotify lists first.
    pub fn cover_url(&self) -> Option<&str> {
        self.images.first().map(|i| i.url.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyImage {
    pub url: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyExternalIds {
    pub isrc: Option<String>,
}

/// Outcome of one currently-playing poll, after boundary filtering.
#[derive(Debug, Clone)]
pub enum PollResult {
    /// 204: nothing playing.
    NoContent,
    /// Something playing but not a track (episode, ad, unknown).
    NotATrack,
    Playing(TrackSnapshot),
}

/// A playing track as observed by one poll.
#[derive(Debug, Clone)]
pub struct TrackSnapshot {
    pub uri: String,
    pub progress_ms: i64,
    pub is_playing: bool,
    pub duration_ms: i64,
    pub track: SpotifyTrack,
}

impl CurrentlyPlayingResponse {
    /// Collapse the union payload into a [`PollResult`].
    pub fn into_poll_result(self) -> PollResult {
        if self.currently_playing_type != "track" {
            return PollResult::NotATrack;
        }
        let Some(track) = self.item else {
            return PollResult::NotATrack;
        };
        PollResult::Playing(TrackSnapshot {
            uri: track.uri.clone(),
            progress_ms: self.progress_ms.unwrap_or(0),
            is_playing: self.is_playing,
            duration_ms: track.duration_ms,
            track,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track_json() -> serde_json::Value {
        serde_json::json!({
            "id": "11dFghVXANMlKmJXsNCbNl",
            "uri": "spotify:track:11dFghVXANMlKmJXsNCbNl",
            "name": "Cut To The Feeling",
            "duration_ms": 207959,
            "explicit": false,
            "artists": [{"id": "6sFIWsNpZYqfjUpaCgueju", "name": "Carly Rae Jepsen"}],
            "album": {
                "id": "0tGPJ0bkWOUmH7MEOR77qc",
                "name": "Cut To The Feeling",
                "release_date": "2017-05-26",
                "images": [
                    {"url": "https://i.scdn.co/image/big", "width": 640, "height": 640},
                    {"url": "https://i.scdn.co/image/small", "width": 300, "height": 300}
                ]
            },
            "external_ids": {"isrc": "USUM71703861"}
        })
    }

    #[test]
    fn episode_payload_is_not_a_track() {
        let body = serde_json::json!({
            "item": null,
            "progress_ms": 1000,
            "is_playing": true,
            "currently_playing_type": "episode",
            "timestamp": 1_700_000_000_000_i64
        });
        let parsed: CurrentlyPlayingResponse = serde_json::from_value(body).unwrap();
        assert!(matches!(parsed.into_poll_result(), PollResult::NotATrack));
    }

    #[test]
    fn track_payload_becomes_snapshot() {
        let body = serde_json::json!({
            "item": track_json(),
            "progress_ms": 44272,
            "is_playing": true,
            "currently_playing_type": "track",
            "timestamp": 1_700_000_000_000_i64
        });
        let parsed: CurrentlyPlayingResponse = serde_json::from_value(body).unwrap();
        match parsed.into_poll_result() {
            PollResult::Playing(snap) => {
                assert_eq!(snap.uri, "spotify:track:11dFghVXANMlKmJXsNCbNl");
                assert_eq!(snap.progress_ms, 44272);
                assert_eq!(snap.duration_ms, 207959);
                assert_eq!(snap.track.isrc(), Some("USUM71703861"));
                assert_eq!(
                    snap.track.primary_artist_name(),
                    Some("Carly Rae Jepsen")
                );
            }
            other => panic!("expected Playing, got {other:?}"),
        }
    }

    #[test]
    fn missing_item_on_track_type_is_not_a_track() {
        let body = serde_json::json!({
            "item": null,
            "progress_ms": null,
            "is_playing": false,
            "currently_playing_type": "track",
            "timestamp": 1_700_000_000_000_i64
        });
        let parsed: CurrentlyPlayingResponse = serde_json::from_value(body).unwrap();
        assert!(matches!(parsed.into_poll_result(), PollResult::NotATrack));
    }

    #[test]
    fn album_cover_prefers_first_image() {
        let track: SpotifyTrack = serde_json::from_value(track_json()).unwrap();
        assert_eq!(
            track.album.unwrap().cover_url(),
            Some("https://i.scdn.co/image/big")
        );
    }
}
