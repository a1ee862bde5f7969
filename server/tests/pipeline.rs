//! Session orchestration against scripted generation and synthesis.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use chat_stream::{Mode, Subtitle, WireEvent};
use llm_core::LlmError;
use server::channel::DeliveryChannel;
use server::pipeline::{
    run_session, SessionOutcome, SessionRequest, CANCELLED_MESSAGE, GENERATION_FAILED_MESSAGE,
    SYNTHESIS_FAILED_MESSAGE,
};
use server::store::Sender;
use tokio_util::sync::CancellationToken;

use common::*;

fn request(mode: Mode, wants_timing: bool) -> SessionRequest {
    SessionRequest {
        conversation_id: "conv-1".into(),
        user_text: "How are you?".into(),
        mode,
        wants_timing,
    }
}

async fn run(h: &Harness, req: SessionRequest) -> (SessionOutcome, Vec<WireEvent>) {
    let (channel, mut rx) = DeliveryChannel::new(256);
    let outcome = run_session(&h.deps, req, channel, CancellationToken::new()).await;
    (outcome, drain(&mut rx))
}

fn assert_single_terminal_last(events: &[WireEvent]) {
    let terminals = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminals, 1, "events: {events:?}");
    assert!(events.last().unwrap().is_terminal());
}

async fn assistant_messages(h: &Harness) -> Vec<String> {
    h.store
        .messages("conv-1")
        .await
        .into_iter()
        .filter(|m| m.sender == Sender::Assistant)
        .map(|m| m.content)
        .collect()
}

#[tokio::test]
async fn test_text_mode_emits_sentences_then_end() {
    let h = harness(
        ScriptedGeneration::deltas(&["Hello ", "world. ", "How are you", "?"]),
        MockSynthesis::default(),
    );

    let (outcome, events) = run(&h, request(Mode::Text, false)).await;

    assert_eq!(outcome, SessionOutcome::Completed);
    assert_eq!(
        events,
        vec![WireEvent::chunk("Hello world."), WireEvent::chunk("How are you?"), WireEvent::End]
    );
    assert!(h.synthesis.received.lock().unwrap().is_empty());

    let stored = h.store.messages("conv-1").await;
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].sender, Sender::User);
    assert_eq!(stored[1].content, "Hello world. How are you?");

    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.sessions.completed, 1);
    assert_eq!(snapshot.first_chunk_text.count, 1);
    assert_eq!(snapshot.generation.success_count, 1);
}

#[tokio::test]
async fn test_voice_mode_orders_audio_by_sentence() {
    let h = harness(
        ScriptedGeneration::deltas(&["First one. Second", " one! Third ", "one"]),
        MockSynthesis::default(),
    );

    let (outcome, events) = run(&h, request(Mode::Voice, false)).await;

    assert_eq!(outcome, SessionOutcome::Completed);
    assert_single_terminal_last(&events);
    assert_eq!(events.last(), Some(&WireEvent::End));
    assert_eq!(
        audio_labels(&events),
        vec![
            "First one.#0",
            "First one.#1",
            "Second one!#0",
            "Second one!#1",
            "Third one#0",
            "Third one#1",
        ]
    );
    assert!(!events.iter().any(|e| matches!(e, WireEvent::Subtitle { .. })));

    // Text chunks still go out in voice mode, each before its own audio.
    let first_chunk = events.iter().position(|e| *e == WireEvent::chunk("First one.")).unwrap();
    let first_audio = events.iter().position(|e| matches!(e, WireEvent::Audio { .. })).unwrap();
    assert!(first_chunk < first_audio);

    assert_eq!(
        *h.synthesis.received.lock().unwrap(),
        vec!["First one.", "Second one!", "Third one"]
    );
    assert_eq!(assistant_messages(&h).await, vec!["First one. Second one! Third one"]);
    assert_eq!(h.metrics.snapshot().synthesis.success_count, 1);
}

#[tokio::test]
async fn test_voice_mode_subtitles_are_monotonic() {
    let h = harness(
        ScriptedGeneration::deltas(&["One. ", "Two. ", "Three."]),
        MockSynthesis::default(),
    );

    let (_, events) = run(&h, request(Mode::Voice, true)).await;

    let subtitles: Vec<Subtitle> = events
        .into_iter()
        .filter_map(|e| match e {
            WireEvent::Subtitle { subtitle } => Some(subtitle),
            _ => None,
        })
        .collect();
    assert_eq!(subtitles.len(), 3);
    assert_eq!(subtitles[0].text, "One.");
    assert!(subtitles.windows(2).all(|w| w[0].start_time <= w[1].start_time));
    assert_eq!(subtitles[2].start_time, 400);
}

#[tokio::test]
async fn test_empty_reply_ends_cleanly_in_voice_mode() {
    let h = harness(ScriptedGeneration::deltas(&[]), MockSynthesis::default());

    let (outcome, events) = run(&h, request(Mode::Voice, true)).await;

    assert_eq!(outcome, SessionOutcome::Completed);
    assert_eq!(events, vec![WireEvent::End]);
    assert!(assistant_messages(&h).await.is_empty());
}

#[tokio::test]
async fn test_mid_stream_generation_error_is_terminal() {
    let h = harness(
        ScriptedGeneration::new(vec![
            Step::Delta("Hi there. "),
            Step::Delta("And"),
            Step::Fail("overloaded"),
        ]),
        MockSynthesis::default(),
    );

    let (outcome, events) = run(&h, request(Mode::Text, false)).await;

    assert_eq!(outcome, SessionOutcome::Failed);
    assert_eq!(
        events,
        vec![WireEvent::chunk("Hi there."), WireEvent::error(GENERATION_FAILED_MESSAGE)]
    );
    assert!(assistant_messages(&h).await.is_empty());
    assert_eq!(h.generation.opens.load(Ordering::SeqCst), 1);
    assert_eq!(h.metrics.snapshot().sessions.failed, 1);
}

#[tokio::test]
async fn test_generation_start_failure_after_retries() {
    let mut generation = ScriptedGeneration::deltas(&["never"]);
    generation.open_error = Some(|| LlmError::Status { status: 503, body: "busy".into() });
    let h = harness(generation, MockSynthesis::default());

    let (outcome, events) = run(&h, request(Mode::Text, false)).await;

    assert_eq!(outcome, SessionOutcome::Failed);
    assert_eq!(events, vec![WireEvent::error(GENERATION_FAILED_MESSAGE)]);
    assert_eq!(h.generation.opens.load(Ordering::SeqCst), 3);
    assert_eq!(h.metrics.snapshot().generation.failure_count, 1);
}

#[tokio::test]
async fn test_synthesis_failure_cancels_generation() {
    let generation = ScriptedGeneration::new(vec![Step::Delta("Hello there. "), Step::Hang]);
    let synthesis = MockSynthesis {
        fail_connect: true,
        ..MockSynthesis::default()
    };
    let h = harness(generation, synthesis);

    let (outcome, events) = run(&h, request(Mode::Voice, false)).await;

    assert_eq!(outcome, SessionOutcome::Failed);
    assert_eq!(
        events,
        vec![WireEvent::chunk("Hello there."), WireEvent::error(SYNTHESIS_FAILED_MESSAGE)]
    );
    assert!(h.generation.stream_dropped.load(Ordering::SeqCst));
    assert_eq!(h.metrics.snapshot().synthesis.failure_count, 1);
}

#[tokio::test]
async fn test_completed_reply_persists_when_last_unit_fails_synthesis() {
    let synthesis = MockSynthesis {
        fail_connect: true,
        ..MockSynthesis::default()
    };
    let h = harness(ScriptedGeneration::deltas(&["Hello ", "there"]), synthesis);

    let (outcome, events) = run(&h, request(Mode::Voice, false)).await;

    assert_eq!(outcome, SessionOutcome::Failed);
    assert_eq!(
        events,
        vec![WireEvent::chunk("Hello there"), WireEvent::error(SYNTHESIS_FAILED_MESSAGE)]
    );
    assert_eq!(assistant_messages(&h).await, vec!["Hello there"]);
}

#[tokio::test]
async fn test_disconnect_cancels_generation_and_persists_partial_once() {
    let h = harness(
        ScriptedGeneration::new(vec![
            Step::Delta("Hello world. "),
            Step::Delta("How are"),
            Step::Hang,
        ]),
        MockSynthesis::default(),
    );
    let hang_reached = h.generation.hang_reached.clone();

    let (channel, mut rx) = DeliveryChannel::new(16);
    let deps = h.deps.clone();
    let session = tokio::spawn(async move {
        run_session(&deps, request(Mode::Voice, false), channel, CancellationToken::new()).await
    });

    assert_eq!(rx.recv().await, Some(WireEvent::chunk("Hello world.")));
    hang_reached.notified().await;
    drop(rx);

    let outcome = tokio::time::timeout(Duration::from_secs(5), session)
        .await
        .expect("session should end after disconnect")
        .unwrap();

    assert_eq!(outcome, SessionOutcome::Disconnected);
    assert!(h.generation.stream_dropped.load(Ordering::SeqCst));
    assert_eq!(assistant_messages(&h).await, vec!["Hello world. How are"]);
    assert_eq!(h.metrics.snapshot().sessions.disconnected, 1);
}

#[tokio::test]
async fn test_cancellation_sends_error_and_keeps_partial() {
    let h = harness(
        ScriptedGeneration::new(vec![Step::Delta("Working on it. "), Step::Hang]),
        MockSynthesis::default(),
    );
    let hang_reached = h.generation.hang_reached.clone();
    let cancel = CancellationToken::new();

    let (channel, mut rx) = DeliveryChannel::new(16);
    let deps = h.deps.clone();
    let token = cancel.clone();
    let session = tokio::spawn(async move {
        run_session(&deps, request(Mode::Text, false), channel, token).await
    });

    hang_reached.notified().await;
    cancel.cancel();
    let outcome = session.await.unwrap();

    assert_eq!(outcome, SessionOutcome::Cancelled);
    assert_eq!(
        drain(&mut rx),
        vec![WireEvent::chunk("Working on it."), WireEvent::error(CANCELLED_MESSAGE)]
    );
    assert!(h.generation.stream_dropped.load(Ordering::SeqCst));
    assert_eq!(assistant_messages(&h).await, vec!["Working on it."]);
}

#[tokio::test]
async fn test_history_feeds_follow_up_turns() {
    let h = harness(ScriptedGeneration::deltas(&["Sure."]), MockSynthesis::default());

    run(&h, request(Mode::Text, false)).await;
    run(&h, request(Mode::Text, false)).await;

    let stored = h.store.messages("conv-1").await;
    let senders: Vec<Sender> = stored.iter().map(|m| m.sender).collect();
    assert_eq!(senders, vec![Sender::User, Sender::Assistant, Sender::User, Sender::Assistant]);
}
