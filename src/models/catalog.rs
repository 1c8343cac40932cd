//! Canonical catalog rows: artists, albums, tracks and their link tables.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Artist type as reported by MusicBrainz, matching the database enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "artist_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ArtistType {
    Person,
    Group,
    Orchestra,
    Choir,
    Character,
    Other,
}

impl ArtistType {
    /// Map a MusicBrainz `type` string; unknown values collapse to `Other`.
    pub fn from_musicbrainz(raw: &str) -> Self {
        match raw {
            "Person" => Self::Person,
            "Group" => Self::Group,
            "Orchestra" => Self::Orchestra,
            "Choir" => Self::Choir,
            "Character" => Self::Character,
            _ => Self::Other,
        }
    }

    pub fn is_group_like(&self) -> bool {
        matches!(self, Self::Group | Self::Orchestra | Self::Choir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Artist {
    pub id: Uuid,
    pub name: String,
    pub mbid: Option<String>,
    pub artist_type: Option<ArtistType>,
    pub gender: Option<String>,
    pub begin_date_raw: Option<String>,
    pub end_date_raw: Option<String>,
    pub image_url: Option<String>,
    pub last_enriched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One contiguous period of a member artist's participation in a group.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ArtistGroupMembership {
    pub id: Uuid,
    pub member_id: Uuid,
    pub group_id: Uuid,
    pub begin_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub begin_date_raw: Option<String>,
    pub end_date_raw: Option<String>,
    pub ended: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Album {
    pub id: Uuid,
    pub artist_id: Uuid,
    pub title: String,
    pub release_date: Option<NaiveDate>,
    pub mbid: Option<String>,
    pub image_url: Option<String>,
    pub last_enriched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Track {
    pub id: Uuid,
    pub title: String,
    pub duration_ms: Option<i64>,
    pub mbid: Option<String>,
    pub isrc: Option<String>,
    pub explicit: bool,
    pub last_enriched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One credited artist on a track, as passed to the upsert layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtistCredit {
    pub name: String,
    pub mbid: Option<String>,
    pub is_primary: bool,
    pub position: i64,
    pub join_phrase: String,
}

/// Input to the track upsert: everything known about a play's track.
#[derive(Debug, Clone)]
pub struct TrackUpsert {
    pub title: String,
    pub duration_ms: Option<i64>,
    pub isrc: Option<String>,
    pub mbid: Option<String>,
    pub explicit: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artist_type_mapping_covers_unknowns() {
        assert_eq!(ArtistType::from_musicbrainz("Group"), ArtistType::Group);
        assert_eq!(ArtistType::from_musicbrainz("Person"), ArtistType::Person);
        assert_eq!(
            ArtistType::from_musicbrainz("Special Purpose"),
            ArtistType::Other
        );
    }

    #[test]
    fn group_like_types() {
        assert!(ArtistType::Group.is_group_like());
        assert!(ArtistType::Orchestra.is_group_like());
        assert!(!ArtistType::Person.is_group_like());
        assert!(!ArtistType::Character.is_group_like());
    }
}
