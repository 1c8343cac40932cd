//! Resolver behavior through the public API: ISRC-first resolution
//! order, the relevance-score gate on search results, and memoization of
//! both positive and negative lookups.

use std::sync::Arc;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use playlog::config::MusicBrainzSettings;
use playlog::services::{CoverArtClient, MetadataCache, MetadataResolver, MusicBrainzClient};

fn settings(base_url: &str) -> MusicBrainzSettings {
    MusicBrainzSettings {
        user_agent: "playlog-tests/0.1 (dev@playlog.example)".to_string(),
        base_url: base_url.to_string(),
        coverart_base_url: base_url.to_string(),
        min_interval_ms: 1,
        max_attempts: 2,
        backoff_base_ms: 10,
        backoff_cap_ms: 50,
    }
}

fn resolver_for(server: &MockServer) -> MetadataResolver {
    let settings = settings(&server.uri());
    let mb = Arc::new(MusicBrainzClient::new(&settings).unwrap());
    let coverart = Arc::new(CoverArtClient::new(&settings).unwrap());
    MetadataResolver::new(mb, coverart, Arc::new(MetadataCache::new()))
}

#[tokio::test]
async fn isrc_hit_short_circuits_search() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/isrc/USUM71703861"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "isrc": "USUM71703861",
            "recordings": [{"id": "rec-by-isrc", "title": "Cut To The Feeling"}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    // The search endpoint must never be consulted when the ISRC resolves.
    Mock::given(method("GET"))
        .and(path("/recording"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "recordings": []
        })))
        .expect(0)
        .mount(&server)
        .await;

    let resolver = resolver_for(&server);
    let id = resolver
        .resolve_recording_id(
            "Cut To The Feeling",
            "Carly Rae Jepsen",
            "Cut To The Feeling",
            Some("USUM71703861"),
        )
        .await
        .unwrap();

    assert_eq!(id.as_deref(), Some("rec-by-isrc"));
    server.verify().await;
}

#[tokio::test]
async fn isrc_lookup_is_memoized() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/isrc/USUM71703861"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "isrc": "USUM71703861",
            "recordings": [{"id": "rec-by-isrc", "title": "Cut To The Feeling"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = resolver_for(&server);
    for _ in 0..3 {
        let id = resolver
            .resolve_recording_id("Cut To The Feeling", "Carly Rae Jepsen", "Album", Some("USUM71703861"))
            .await
            .unwrap();
        assert_eq!(id.as_deref(), Some("rec-by-isrc"));
    }

    server.verify().await;
}

#[tokio::test]
async fn low_confidence_search_resolves_to_none_and_is_cached() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/recording"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "recordings": [{"id": "rec-weak", "title": "Something Else", "score": 50}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = resolver_for(&server);
    for _ in 0..2 {
        let id = resolver
            .resolve_recording_id("Obscure Title", "Unknown Artist", "Unknown Album", None)
            .await
            .unwrap();
        assert_eq!(id, None);
    }

    server.verify().await;
}

#[tokio::test]
async fn confident_search_match_is_accepted() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/recording"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "recordings": [{"id": "rec-strong", "title": "Song", "score": 97}]
        })))
        .mount(&server)
        .await;

    let resolver = resolver_for(&server);
    let id = resolver
        .resolve_recording_id("Song", "Artist", "Album", None)
        .await
        .unwrap();
    assert_eq!(id.as_deref(), Some("rec-strong"));
}

#[tokio::test]
async fn missing_cover_is_cached_as_negative() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/release/no-art"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = resolver_for(&server);
    assert_eq!(resolver.cover_url("no-art").await, None);
    assert_eq!(resolver.cover_url("no-art").await, None);

    server.verify().await;
}

#[tokio::test]
async fn cache_clear_forces_refetch() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/recording/rec-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "rec-1",
            "title": "Song",
            "length": 180000
        })))
        .expect(2)
        .mount(&server)
        .await;

    let resolver = resolver_for(&server);
    resolver.recording_details("rec-1").await.unwrap();
    resolver.recording_details("rec-1").await.unwrap();
    resolver.cache().clear();
    resolver.recording_details("rec-1").await.unwrap();

    server.verify().await;
}
