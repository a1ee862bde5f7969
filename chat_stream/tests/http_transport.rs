use std::sync::Arc;
use std::time::Duration;

use chat_stream::{
    ClientError, ClientEvent, ControllerConfig, HttpTransport, Mode, StreamController,
    StreamRequest, Transport, WireEvent,
};
use futures::StreamExt;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn event_stream(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/event-stream")
}

#[tokio::test]
async fn test_open_stream_decodes_frames_and_skips_comments() {
    let server = MockServer::start().await;
    let body = concat!(
        ": keep-alive\n\n",
        "data: {\"type\":\"chunk\",\"text\":\"Hello world.\"}\n\n",
        "data: {not json}\n\n",
        "data: {\"type\":\"audio\",\"chunk\":\"AAEC\"}\n\n",
        "data: {\"type\":\"end\"}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/chat/stream"))
        .and(body_partial_json(serde_json::json!({"message": "hi", "mode": "voice"})))
        .respond_with(event_stream(body))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::new(server.uri());
    let mut request = StreamRequest::new("hi");
    request.mode = Mode::Voice;
    let events: Vec<WireEvent> = transport
        .open_stream(&request)
        .await
        .unwrap()
        .map(|e| e.unwrap())
        .collect()
        .await;

    assert_eq!(
        events,
        vec![WireEvent::chunk("Hello world."), WireEvent::audio(&[0, 1, 2]), WireEvent::End]
    );
}

#[tokio::test]
async fn test_open_stream_rejects_status_and_content_type() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/stream"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let transport = HttpTransport::new(server.uri());
    let err = transport.open_stream(&StreamRequest::new("hi")).await.err().unwrap();
    assert!(matches!(err, ClientError::Status(502)));

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/stream"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"oops": true})))
        .mount(&server)
        .await;

    let transport = HttpTransport::new(server.uri());
    let err = transport.open_stream(&StreamRequest::new("hi")).await.err().unwrap();
    assert!(matches!(err, ClientError::ContentType(ct) if ct.starts_with("application/json")));
}

#[tokio::test]
async fn test_controller_falls_back_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/stream"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "reply": "Full reply.",
            "conversation_id": "abc"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = ControllerConfig {
        retry_delay: Duration::from_millis(5),
        ..ControllerConfig::default()
    };
    let transport = Arc::new(HttpTransport::new(server.uri()));
    let mut controller = StreamController::new(transport).with_config(config);
    let request = StreamRequest::new("hi").with_conversation("abc");
    let mut events = controller.start(Mode::Text, request);

    let mut out = Vec::new();
    while let Some(event) = events.next().await {
        out.push(event);
    }
    assert_eq!(
        out,
        vec![
            ClientEvent::Fallback,
            ClientEvent::TextChunk("Full reply.".into()),
            ClientEvent::StreamEnd,
        ]
    );
}
