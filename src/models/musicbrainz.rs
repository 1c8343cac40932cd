//! MusicBrainz and Cover Art Archive wire formats.

use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize)]
pub struct MbRecording {
    pub id: String,
    pub title: String,
    /// Duration in milliseconds.
    pub length: Option<i64>,
    pub isrcs: Option<Vec<String>>,
    #[serde(rename = "artist-credit")]
    pub artist_credit: Option<Vec<MbArtistCredit>>,
    pub releases: Option<Vec<MbRelease>>,
    pub score: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MbArtistCredit {
    /// Credited name, which may differ from the artist's canonical name.
    pub name: String,
    pub joinphrase: Option<String>,
    pub artist: MbArtistRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MbArtistRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MbArtist {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub artist_type: Option<String>,
    pub gender: Option<String>,
    #[serde(rename = "life-span")]
    pub life_span: Option<MbLifeSpan>,
    pub relations: Option<Vec<MbRelation>>,
    pub score: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MbLifeSpan {
    pub begin: Option<String>,
    pub end: Option<String>,
    pub ended: Option<bool>,
}

/// Artist-artist relation. For "member of band", direction "backward" on a
/// group carries the member; direction "forward" on a person carries the
/// group.
#[derive(Debug, Clone, Deserialize)]
pub struct MbRelation {
    #[serde(rename = "type")]
    pub relation_type: String,
    pub direction: String,
    pub artist: Option<MbArtistRef>,
    pub begin: Option<String>,
    pub end: Option<String>,
    pub ended: Option<bool>,
}

pub const MEMBER_OF_BAND: &str = "member of band";

#[derive(Debug, Clone, Deserialize)]
pub struct MbRelease {
    pub id: String,
    pub title: String,
    pub date: Option<String>,
    pub score: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MbRecordingSearchResponse {
    pub recordings: Vec<MbRecording>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MbArtistSearchResponse {
    pub artists: Vec<MbArtist>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MbReleaseSearchResponse {
    pub releases: Vec<MbRelease>,
}

/// Body of `GET /isrc/{isrc}`: the recordings bearing that ISRC.
#[derive(Debug, Clone, Deserialize)]
pub struct MbIsrcResponse {
    pub isrc: String,
    pub recordings: Vec<MbRecording>,
}

/// Body of the Cover Art Archive `GET /release/{mbid}` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct CoverArtResponse {
    pub images: Vec<CoverArtImage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoverArtImage {
    #[serde(default)]
    pub front: bool,
    pub image: String,
    #[serde(default)]
    pub thumbnails: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_parses_with_hyphenated_keys() {
        let body = serde_json::json!({
            "id": "b9ad642e-b012-41c7-b72a-42cf4911f9ff",
            "title": "Something in the Way",
            "length": 235000,
            "isrcs": ["USGF19942501"],
            "artist-credit": [{
                "name": "Nirvana",
                "joinphrase": "",
                "artist": {"id": "5b11f4ce-a62d-471e-81fc-a69a8278c7da", "name": "Nirvana"}
            }],
            "releases": [{"id": "rel-1", "title": "Nevermind", "date": "1991-09-24"}]
        });
        let rec: MbRecording = serde_json::from_value(body).unwrap();
        assert_eq!(rec.length, Some(235000));
        assert_eq!(rec.artist_credit.unwrap()[0].artist.name, "Nirvana");
        assert_eq!(rec.releases.unwrap()[0].date.as_deref(), Some("1991-09-24"));
    }

    #[test]
    fn artist_relations_parse() {
        let body = serde_json::json!({
            "id": "5b11f4ce-a62d-471e-81fc-a69a8278c7da",
            "name": "Nirvana",
            "type": "Group",
            "gender": null,
            "life-span": {"begin": "1987", "end": "1994-04-05", "ended": true},
            "relations": [{
                "type": "member of band",
                "direction": "backward",
                "artist": {"id": "67f66c07-6e61-4026-ade5-7e782fad3a5d", "name": "Kurt Cobain"},
                "begin": "1987",
                "end": "1994-04-05",
                "ended": true
            }]
        });
        let artist: MbArtist = serde_json::from_value(body).unwrap();
        let relations = artist.relations.unwrap();
        assert_eq!(relations[0].relation_type, MEMBER_OF_BAND);
        assert_eq!(relations[0].direction, "backward");
        assert_eq!(relations[0].artist.as_ref().unwrap().name, "Kurt Cobain");
    }
}
