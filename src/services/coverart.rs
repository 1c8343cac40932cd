//! Cover Art Archive client.
//!
//! Cover fetches bypass the MusicBrainz serial queue (the archive has its
//! own, gentler limits) and never fail loudly: any error downgrades to
//! "no image".

use anyhow::{Context, Result};
use std::time::Duration;

use crate::config::MusicBrainzSettings;
use crate::models::musicbrainz::{CoverArtImage, CoverArtResponse};

/// Thumbnail sizes in preference order, before falling back to the full image.
const THUMBNAIL_PREFERENCE: [&str; 4] = ["1200", "500", "large", "250"];

pub struct CoverArtClient {
    http: reqwest::Client,
    base_url: String,
}

impl CoverArtClient {
    pub fn new(settings: &MusicBrainzSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(Duration::from_secs(15))
            .build()
            .context("failed to build Cover Art Archive HTTP client")?;

        Ok(Self {
            http,
            base_url: settings.coverart_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Best cover URL for a release, or `None` when the release has no
    /// art or the archive is unreachable.
    pub async fn fetch_cover_url(&self, release_mbid: &str) -> Option<String> {
        let url = format!("{}/release/{}", self.base_url, release_mbid);

        let response = match self.http.get(&url).send().await {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!(release_mbid, error = %err, "cover art fetch failed");
                return None;
            }
        };

        if !response.status().is_success() {
            if response.status() != reqwest::StatusCode::NOT_FOUND {
                tracing::debug!(
                    release_mbid,
                    status = %response.status(),
                    "cover art fetch returned non-success"
                );
            }
            return None;
        }

        match response.json::<CoverArtResponse>().await {
            Ok(body) => select_cover_url(&body.images),
            Err(err) => {
                tracing::debug!(release_mbid, error = %err, "cover art response unparsable");
                None
            }
        }
    }
}

/// Pick the front cover (else the first image) and its best thumbnail.
pub fn select_cover_url(images: &[CoverArtImage]) -> Option<String> {
    let image = images.iter().find(|i| i.front).or_else(|| images.first())?;
    for size in THUMBNAIL_PREFERENCE {
        if let Some(url) = image.thumbnails.get(size) {
            return Some(url.clone());
        }
    }
    Some(image.image.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn image(front: bool, thumbnails: &[(&str, &str)]) -> CoverArtImage {
        CoverArtImage {
            front,
            image: "https://archive.example/full.jpg".to_string(),
            thumbnails: thumbnails
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn empty_image_list_yields_none() {
        assert_eq!(select_cover_url(&[]), None);
    }

    #[test]
    fn prefers_front_image_over_first() {
        let images = vec![
            image(false, &[("500", "https://archive.example/back-500.jpg")]),
            image(true, &[("500", "https://archive.example/front-500.jpg")]),
        ];
        assert_eq!(
            select_cover_url(&images),
            Some("https://archive.example/front-500.jpg".to_string())
        );
    }

    #[test]
    fn thumbnail_preference_order() {
        let images = vec![image(
            true,
            &[
                ("250", "https://archive.example/250.jpg"),
                ("large", "https://archive.example/large.jpg"),
                ("1200", "https://archive.example/1200.jpg"),
            ],
        )];
        assert_eq!(
            select_cover_url(&images),
            Some("https://archive.example/1200.jpg".to_string())
        );
    }

    #[test]
    fn falls_back_to_full_image() {
        let images = vec![image(true, &[])];
        assert_eq!(
            select_cover_url(&images),
            Some("https://archive.example/full.jpg".to_string())
        );
    }
}
