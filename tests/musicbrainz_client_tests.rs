//! Behavior of the rate-limited MusicBrainz client against a mock server:
//! retry on 503, no retry on client errors, 404 as a domain value, the
//! mandatory User-Agent, and serialized request pacing.

use std::time::{Duration, Instant};

use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use playlog::config::MusicBrainzSettings;
use playlog::services::MusicBrainzClient;

fn settings(base_url: &str, min_interval_ms: u64) -> MusicBrainzSettings {
    MusicBrainzSettings {
        user_agent: "playlog-tests/0.1 (dev@playlog.example)".to_string(),
        base_url: base_url.to_string(),
        coverart_base_url: base_url.to_string(),
        min_interval_ms,
        max_attempts: 4,
        backoff_base_ms: 10,
        backoff_cap_ms: 50,
    }
}

fn recording_body() -> serde_json::Value {
    serde_json::json!({
        "id": "b9ad642e-b012-41c7-b72a-42cf4911f9ff",
        "title": "Something in the Way",
        "length": 235000
    })
}

#[tokio::test]
async fn retries_on_503_until_success() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/recording/abc"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/recording/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(recording_body()))
        .mount(&server)
        .await;

    let client = MusicBrainzClient::new(&settings(&server.uri(), 1)).unwrap();
    let recording = client.get_recording("abc").await.unwrap().unwrap();
    assert_eq!(recording.title, "Something in the Way");

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 3);
}

#[tokio::test]
async fn gives_up_after_max_attempts_of_503() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/recording/abc"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = MusicBrainzClient::new(&settings(&server.uri(), 1)).unwrap();
    let error = client.get_recording("abc").await.unwrap_err();
    assert!(error.to_string().contains("unavailable"));

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 4);
}

#[tokio::test]
async fn not_found_is_a_domain_value() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/recording/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = MusicBrainzClient::new(&settings(&server.uri(), 1)).unwrap();
    assert!(client.get_recording("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn client_errors_do_not_retry() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/recording/bad"))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;

    let client = MusicBrainzClient::new(&settings(&server.uri(), 1)).unwrap();
    let error = client.get_recording("bad").await.unwrap_err();
    assert!(error.to_string().contains("400"));

    server.verify().await;
}

#[tokio::test]
async fn sends_the_configured_user_agent() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/recording/abc"))
        .and(header(
            "user-agent",
            "playlog-tests/0.1 (dev@playlog.example)",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(recording_body()))
        .expect(1)
        .mount(&server)
        .await;

    let client = MusicBrainzClient::new(&settings(&server.uri(), 1)).unwrap();
    client.get_recording("abc").await.unwrap();

    server.verify().await;
}

#[tokio::test]
async fn concurrent_requests_are_serialized_and_paced() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(recording_body()))
        .mount(&server)
        .await;

    let client = MusicBrainzClient::new(&settings(&server.uri(), 150)).unwrap();

    let start = Instant::now();
    let (a, b, c) = tokio::join!(
        client.get_recording("one"),
        client.get_recording("two"),
        client.get_recording("three"),
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();

    // Three serialized requests spaced 150 ms apart take at least 300 ms.
    assert!(
        start.elapsed() >= Duration::from_millis(300),
        "requests were not paced: {:?}",
        start.elapsed()
    );
}

#[tokio::test]
async fn isrc_lookup_parses_recordings() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/isrc/USUM71703861"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "isrc": "USUM71703861",
            "recordings": [recording_body()]
        })))
        .mount(&server)
        .await;

    let client = MusicBrainzClient::new(&settings(&server.uri(), 1)).unwrap();
    let response = client.lookup_isrc("USUM71703861").await.unwrap().unwrap();
    assert_eq!(response.recordings.len(), 1);
    assert_eq!(response.recordings[0].length, Some(235000));
}
