//! Cover Art Archive client behavior: failures of any shape degrade to
//! "no image", and thumbnail selection prefers the front cover.

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use playlog::config::MusicBrainzSettings;
use playlog::services::CoverArtClient;

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

#[tokio::test]
async fn missing_art_is_none() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/release/no-art"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = CoverArtClient::new(&settings(&server.uri())).unwrap();
    assert_eq!(client.fetch_cover_url("no-art").await, None);
}

#[tokio::test]
async fn server_error_degrades_to_none() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/release/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = CoverArtClient::new(&settings(&server.uri())).unwrap();
    assert_eq!(client.fetch_cover_url("broken").await, None);
}

#[tokio::test]
async fn unreachable_archive_degrades_to_none() {
    let client = CoverArtClient::new(&settings("http://127.0.0.1:1")).unwrap();
    assert_eq!(client.fetch_cover_url("any").await, None);
}

#[tokio::test]
async fn front_cover_thumbnail_is_selected() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/release/with-art"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "images": [
                {
                    "front": false,
                    "image": "https://archive.example/back.jpg",
                    "thumbnails": {"500": "https://archive.example/back-500.jpg"}
                },
                {
                    "front": true,
                    "image": "https://archive.example/front.jpg",
                    "thumbnails": {
                        "250": "https://archive.example/front-250.jpg",
                        "500": "https://archive.example/front-500.jpg"
                    }
                }
            ]
        })))
        .mount(&server)
        .await;

    let client = CoverArtClient::new(&settings(&server.uri())).unwrap();
    assert_eq!(
        client.fetch_cover_url("with-art").await,
        Some("https://archive.example/front-500.jpg".to_string())
    );
}
