//! # Streaming Session Lifecycle Tests
//!
//! Drives a [`Session`](dfegrpc::Session) through full streaming
//! interactions against the scripted transport in `common`.
//!
//! ## Key Test Scenarios
//!
//! 1. **Happy path**: config frame first, audio accounting, Result Model
//!    built from the final query result and transcription.
//! 2. **Write failures**: a failed config or audio write moves the session to
//!    `Error`, and a later stop still brings it back to `Ready`.
//! 3. **Stop semantics**: concurrent stops finalize the RPC exactly once, and
//!    a non-OK final status replaces the results with error records.
//! 4. **Connection caching**: the connection survives interactions and is
//!    dropped when the endpoint changes.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test session_lifecycle
//! ```

mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::{MockProvider, MockStream, client, final_result, query_result, slots, transcript};
use dfegrpc::core::dialogflow::{InputAudioEncoding, StreamingFrame};
use dfegrpc::{DialogflowError, RpcStatus, Session, SessionState};

fn configure(session: &Session) {
    session.set_project_id("acme-ivr");
    session.set_session_id("call-42");
}

async fn wait_for_state(session: &Session, state: SessionState) {
    for _ in 0..200 {
        if session.state() == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("session never reached {state}, still {}", session.state());
}

#[tokio::test]
async fn test_write_before_start_is_ignored() {
    let provider = Arc::new(MockProvider::new());
    let (client, _logger) = client(provider.clone());
    let session = client.create_session(None);

    let state = session.write_audio(Bytes::from_static(&[0xff; 160])).await;

    assert_eq!(state, SessionState::Ready);
    assert_eq!(session.bytes_written(), 0);
    assert_eq!(provider.connects(), 0);
}

#[tokio::test]
async fn test_streaming_hello() {
    let provider = Arc::new(MockProvider::new());
    let stream = provider.service.push_stream(MockStream::replaying(vec![
        transcript("hel", false, 0.0),
        transcript("hello", true, 0.9),
        final_result("resp-1", query_result("hello", 0.82)),
    ]));
    let (client, logger) = client(provider.clone());
    let session = client.create_session(None);
    configure(&session);

    session.start_recognition(None, false, &[]).await.unwrap();
    wait_for_state(&session, SessionState::Finished).await;

    // The reader already ended the interaction; writes are refused.
    let state = session.write_audio(Bytes::from_static(&[0xff; 160])).await;
    assert_eq!(state, SessionState::Finished);

    session.stop_recognition().await.unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(stream.finish_calls(), 1);
    assert_eq!(session.response_count(), 3);

    let results = session.results();
    assert_eq!(results[0].slot, "response_id");
    assert_eq!(results[0].value_text(), "resp-1");
    assert!(results.iter().all(|r| r.score == 82));

    let query_text = results.iter().find(|r| r.slot == "query_text").unwrap();
    assert_eq!(query_text.value_text(), "hello");

    let last = results.last().unwrap();
    assert_eq!(last.slot, "speech_score");
    assert_eq!(last.value_text(), "0.900000");

    assert_eq!(
        provider.service.opened_paths(),
        ["projects/acme-ivr/agent/sessions/call-42"]
    );

    let events = logger.events();
    for expected in [
        "create",
        "connect",
        "start",
        "transcription",
        "final_transcription",
        "query_result_received",
        "results",
        "stopping",
        "stop",
    ] {
        assert!(events.iter().any(|e| e == expected), "missing {expected} in {events:?}");
    }
}

#[tokio::test]
async fn test_config_frame_comes_first() {
    let provider = Arc::new(MockProvider::new());
    let stream = provider.service.push_stream(MockStream::held_open(Vec::new()));
    let (client, _logger) = client(provider);
    let session = client.create_session(None);
    configure(&session);
    session.set_model("phone_call");
    session.set_sentiment_analysis(true);

    let hints = vec!["balance".to_string(), "agent".to_string()];
    session
        .start_recognition(Some("en-GB"), true, &hints)
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Started);

    for _ in 0..3 {
        let state = session.write_audio(Bytes::from_static(&[0x7f; 160])).await;
        assert_eq!(state, SessionState::Started);
    }
    assert_eq!(session.bytes_written(), 480);
    assert_eq!(session.packets_written(), 4);

    session.stop_recognition().await.unwrap();

    let frames = stream.frames();
    assert_eq!(frames.len(), 4);
    let StreamingFrame::Config(config) = &frames[0] else {
        panic!("first frame must be the config, got {:?}", frames[0]);
    };
    assert_eq!(config.language_code, "en-GB");
    assert_eq!(config.audio_encoding, InputAudioEncoding::Mulaw);
    assert_eq!(config.sample_rate_hertz, 8000);
    assert!(config.single_utterance);
    assert!(config.output_audio);
    assert!(config.sentiment_analysis);
    assert_eq!(config.model.as_deref(), Some("phone_call"));
    assert_eq!(config.phrase_hints, hints);
    assert!(frames[1..].iter().all(|f| matches!(f, StreamingFrame::Audio(a) if a.len() == 160)));
}

#[tokio::test]
async fn test_default_language_and_external_endpointer() {
    let provider = Arc::new(MockProvider::new());
    let stream = provider.service.push_stream(MockStream::held_open(Vec::new()));
    let (client, _logger) = client(provider);
    let session = client.create_session(None);
    configure(&session);
    session.set_external_endpointer(true);

    session.start_recognition(Some(""), false, &[]).await.unwrap();
    session.stop_recognition().await.unwrap();

    let frames = stream.frames();
    let StreamingFrame::Config(config) = &frames[0] else {
        panic!("missing config frame");
    };
    assert_eq!(config.language_code, "en-US");
    assert!(!config.single_utterance);
    assert!(config.model.is_none());
}

#[tokio::test]
async fn test_stop_without_final_result_leaves_empty_results() {
    let provider = Arc::new(MockProvider::new());
    provider
        .service
        .push_stream(MockStream::held_open(vec![transcript("hel", false, 0.0)]));
    let (client, logger) = client(provider);
    let session = client.create_session(None);
    configure(&session);

    session.start_recognition(None, false, &[]).await.unwrap();
    session.stop_recognition().await.unwrap();

    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.result_count(), 0);
    assert!(session.result(0).is_none());
    assert!(logger.events().iter().any(|e| e == "results"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_stops_finish_once() {
    let provider = Arc::new(MockProvider::new());
    let stream = provider.service.push_stream(MockStream::held_open(vec![final_result(
        "resp-2",
        query_result("operator", 0.5),
    )]));
    let (client, _logger) = client(provider);
    let session = Arc::new(client.create_session(None));
    configure(&session);

    session.start_recognition(None, false, &[]).await.unwrap();

    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.stop_recognition().await })
    };
    let second = {
        let session = session.clone();
        tokio::spawn(async move { session.stop_recognition().await })
    };

    assert!(first.await.unwrap().is_ok());
    assert!(second.await.unwrap().is_ok());
    assert_eq!(stream.finish_calls(), 1);
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.result(0).unwrap().value_text(), "resp-2");
}

#[tokio::test]
async fn test_config_write_failure() {
    let provider = Arc::new(MockProvider::new());
    let stream = provider
        .service
        .push_stream(MockStream::held_open(Vec::new()).accepting(0));
    let (client, logger) = client(provider);
    let session = client.create_session(None);
    configure(&session);

    let err = session.start_recognition(None, false, &[]).await.unwrap_err();
    assert_eq!(err, DialogflowError::WriteFailed);
    assert_eq!(session.state(), SessionState::Error);
    assert!(logger.events().iter().any(|e| e == "write_error"));

    let state = session.write_audio(Bytes::from_static(&[0xff; 160])).await;
    assert_eq!(state, SessionState::Error);

    session.stop_recognition().await.unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(stream.finish_calls(), 1);
}

#[tokio::test]
async fn test_audio_write_failure() {
    let provider = Arc::new(MockProvider::new());
    provider
        .service
        .push_stream(MockStream::held_open(Vec::new()).accepting(2));
    let (client, logger) = client(provider);
    let session = client.create_session(None);
    configure(&session);

    session.start_recognition(None, false, &[]).await.unwrap();

    let ok = session.write_audio(Bytes::from_static(&[0xff; 160])).await;
    assert_eq!(ok, SessionState::Started);
    let failed = session.write_audio(Bytes::from_static(&[0xff; 160])).await;
    assert_eq!(failed, SessionState::Error);
    assert_eq!(session.bytes_written(), 160);
    assert!(logger.events().iter().any(|e| e == "write_error"));

    session.stop_recognition().await.unwrap();
    // The reader keeps an Error state; stop still returns to Ready.
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_reader_end_keeps_error_state() {
    let provider = Arc::new(MockProvider::new());
    provider
        .service
        .push_stream(MockStream::replaying(Vec::new()).accepting(1));
    let (client, logger) = client(provider);
    let session = client.create_session(None);
    configure(&session);

    session.start_recognition(None, false, &[]).await.unwrap();

    // The current-thread runtime has not polled the reader yet.
    let failed = session.write_audio(Bytes::from_static(&[0xff; 160])).await;
    assert_eq!(failed, SessionState::Error);

    for _ in 0..200 {
        if logger.events().iter().any(|e| e == "results") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(logger.events().iter().any(|e| e == "results"));
    assert_eq!(session.state(), SessionState::Error);

    session.stop_recognition().await.unwrap();
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_failed_final_status_replaces_results() {
    let provider = Arc::new(MockProvider::new());
    provider.service.push_stream(
        MockStream::replaying(vec![final_result("resp-3", query_result("hello", 0.9))])
            .finishing_with(RpcStatus::new(3, "Invalid audio encoding", "expected MULAW")),
    );
    let (client, logger) = client(provider);
    let session = client.create_session(None);
    configure(&session);

    session.start_recognition(None, false, &[]).await.unwrap();
    let err = session.stop_recognition().await.unwrap_err();

    assert!(matches!(err, DialogflowError::Rpc(ref status) if status.code == 3));
    assert_eq!(session.state(), SessionState::Ready);

    let results = session.results();
    assert_eq!(slots(&results), ["error", "error_details", "error_code"]);
    assert_eq!(results[0].value_text(), "Invalid audio encoding");
    assert_eq!(results[1].value_text(), "expected MULAW");
    assert_eq!(results[2].value_text(), "3");
    assert!(results.iter().all(|r| r.score == 100));

    let events = logger.events();
    let tail: Vec<&str> = events.iter().rev().take(2).rev().map(String::as_str).collect();
    assert_eq!(tail, ["error", "stop"]);
}

#[tokio::test]
async fn test_stream_refused() {
    let provider = Arc::new(MockProvider::new());
    provider
        .service
        .refuse_streams(RpcStatus::new(7, "Permission denied", ""));
    let (client, _logger) = client(provider);
    let session = client.create_session(None);
    configure(&session);

    let err = session.start_recognition(None, false, &[]).await.unwrap_err();
    assert!(matches!(err, DialogflowError::Rpc(_)));
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.result_count(), 3);
    assert_eq!(session.result(2).unwrap().value_text(), "7");
}

#[tokio::test]
async fn test_start_connection_failure() {
    let provider = Arc::new(MockProvider::unreachable());
    let (client, logger) = client(provider);
    let session = client.create_session(None);
    configure(&session);

    let err = session.start_recognition(None, false, &[]).await.unwrap_err();
    assert!(matches!(err, DialogflowError::ConnectionFailed(_)));
    assert_eq!(session.state(), SessionState::Ready);
    assert!(!session.is_connected());

    let results = session.results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].slot, "error");
    assert_eq!(results[0].value_text(), "Failed to connect");
    assert_eq!(results[0].score, 100);
    assert!(!logger.events().iter().any(|e| e == "connect"));
}

#[tokio::test]
async fn test_explicit_connect_is_reused() {
    let provider = Arc::new(MockProvider::new());
    let (client, logger) = client(provider.clone());
    let session = client.create_session(None);
    configure(&session);

    session.connect().await.unwrap();
    assert!(session.is_connected());
    session.connect().await.unwrap();

    session.start_recognition(None, false, &[]).await.unwrap();
    session.stop_recognition().await.unwrap();

    assert_eq!(provider.connects(), 1);
    let connects = logger.events().iter().filter(|e| *e == "connect").count();
    assert_eq!(connects, 1);
}

#[tokio::test]
async fn test_explicit_connect_failure() {
    let provider = Arc::new(MockProvider::unreachable());
    let (client, _logger) = client(provider);
    let session = client.create_session(None);

    let err = session.connect().await.unwrap_err();
    assert!(matches!(err, DialogflowError::ConnectionFailed(_)));
    assert!(!session.is_connected());
}

#[tokio::test]
async fn test_restart_stops_previous_interaction() {
    let provider = Arc::new(MockProvider::new());
    let first = provider.service.push_stream(MockStream::held_open(Vec::new()));
    let second = provider.service.push_stream(MockStream::held_open(Vec::new()));
    let (client, _logger) = client(provider.clone());
    let session = client.create_session(None);
    configure(&session);

    session.start_recognition(None, false, &[]).await.unwrap();
    session.write_audio(Bytes::from_static(&[0xff; 160])).await;
    session.start_recognition(None, false, &[]).await.unwrap();

    assert!(first.is_closed());
    assert_eq!(first.finish_calls(), 1);
    assert_eq!(session.state(), SessionState::Started);
    // Counters restart with the new interaction.
    assert_eq!(session.bytes_written(), 0);
    assert_eq!(session.packets_written(), 1);
    // One connection serves both interactions.
    assert_eq!(provider.connects(), 1);

    session.close_session().await;
    assert_eq!(second.finish_calls(), 1);
}

#[tokio::test]
async fn test_endpoint_change_drops_connection() {
    let provider = Arc::new(MockProvider::new());
    let (client, _logger) = client(provider.clone());
    let session = client.create_session(None);
    configure(&session);

    session.start_recognition(None, false, &[]).await.unwrap();
    session.stop_recognition().await.unwrap();
    assert!(session.is_connected());

    // Same endpoint, different case: the connection stays.
    session.set_endpoint("DIALOGFLOW.googleapis.com");
    assert!(session.is_connected());

    session.set_endpoint("europe-west2-dialogflow.googleapis.com");
    assert!(!session.is_connected());

    session.start_recognition(None, false, &[]).await.unwrap();
    session.stop_recognition().await.unwrap();

    assert_eq!(provider.connects(), 2);
    assert_eq!(
        provider.endpoints(),
        [
            "dialogflow.googleapis.com",
            "europe-west2-dialogflow.googleapis.com"
        ]
    );
}

#[tokio::test]
async fn test_drop_logs_destroy() {
    let provider = Arc::new(MockProvider::new());
    let stream = provider.service.push_stream(MockStream::held_open(Vec::new()));
    let (client, logger) = client(provider);
    let session = client.create_session(None);
    configure(&session);

    session.start_recognition(None, false, &[]).await.unwrap();
    drop(session);

    assert!(stream.is_closed());
    assert_eq!(logger.events().last().map(String::as_str), Some("destroy"));
}
