//! End-to-end scenarios against a scripted in-process transport.

mod common;

use common::{BrokenBuilder, FetchAttributes, Reply, ScriptedTransport};
use mirrorstore::{
    Credentials, EventKind, Executor, LocationMode, ManualClock, OperationContext,
    RecordingSleeper, RequestOptions, RetryPolicyFactory, Sleeper, StorageLocation, StorageUri,
    MIN_BACKOFF,
};
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn endpoints() -> StorageUri {
    StorageUri::with_secondary(
        "https://acct.blob.example.net/".parse().unwrap(),
        "https://acct-secondary.blob.example.net/".parse().unwrap(),
    )
}

fn endpoints_without_secondary() -> StorageUri {
    StorageUri::new("https://acct.blob.example.net/".parse().unwrap())
}

fn linear(delta: Duration, max_attempts: u32) -> RequestOptions {
    RequestOptions {
        retry: RetryPolicyFactory::linear(delta, max_attempts),
        ..RequestOptions::default()
    }
}

#[tokio::test]
async fn no_retry_surfaces_404_after_one_attempt() {
    let transport = Arc::new(ScriptedTransport::replying(&[404]));
    let exec = Executor::builder(transport.clone(), endpoints()).build();
    let mut ctx = OperationContext::new();

    let err = exec
        .execute(&mut FetchAttributes, &RequestOptions::no_retry(), &mut ctx)
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(404));
    let info = err.service_info().expect("a service failure carries detail");
    assert_eq!(info.status, 404);
    assert_eq!(info.request_id.as_deref(), Some("srv-0001"));
    assert_eq!(info.location, StorageLocation::Primary);
    assert_eq!(ctx.attempt_count(), 1);
    assert_eq!(transport.hit_count(), 1);
    let attempt = ctx.last_attempt().unwrap();
    assert_eq!(attempt.status, Some(404));
    assert_eq!(attempt.service_request_id.as_deref(), Some("srv-0001"));
}

#[tokio::test]
async fn linear_retry_recovers_after_two_server_errors() {
    let transport = Arc::new(ScriptedTransport::replying(&[500, 500, 200]));
    let sleeper = RecordingSleeper::new();
    let exec = Executor::builder(transport.clone(), endpoints())
        .with_sleeper(sleeper.clone())
        .build();
    let mut ctx = OperationContext::new();

    let result = exec
        .execute(&mut FetchAttributes, &linear(Duration::from_secs(1), 2), &mut ctx)
        .await
        .unwrap();

    assert_eq!(result, 200);
    assert_eq!(ctx.attempt_count(), 3);
    assert_eq!(transport.hit_count(), 3);

    // Two pauses, one per granted retry, each clamped up to the floor and
    // therefore at least the configured second apart.
    let pauses = sleeper.pauses();
    assert_eq!(pauses, vec![MIN_BACKOFF, MIN_BACKOFF]);
    assert!(pauses.iter().all(|p| *p >= Duration::from_secs(1)));
}

#[tokio::test(start_paused = true)]
async fn budget_expires_during_a_slow_attempt() {
    let transport = Arc::new(ScriptedTransport::new(vec![Reply::DelayThen(
        Duration::from_millis(2500),
        200,
    )]));
    let exec = Executor::builder(transport.clone(), endpoints()).build();
    let options = RequestOptions {
        retry: RetryPolicyFactory::linear(Duration::from_secs(1), 5),
        max_execution_time: Some(Duration::from_secs(2)),
        ..RequestOptions::default()
    };
    let mut ctx = OperationContext::new();

    let err = exec
        .execute(&mut FetchAttributes, &options, &mut ctx)
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(ctx.attempt_count(), 1);
    assert_eq!(transport.hit_count(), 1);
}

#[tokio::test]
async fn secondary_only_without_secondary_records_no_attempts() {
    let transport = Arc::new(ScriptedTransport::replying(&[]));
    let exec = Executor::builder(transport.clone(), endpoints_without_secondary()).build();
    let options = RequestOptions {
        location_mode: Some(LocationMode::SecondaryOnly),
        ..RequestOptions::no_retry()
    };
    let mut ctx = OperationContext::new();

    let err = exec
        .execute(&mut FetchAttributes, &options, &mut ctx)
        .await
        .unwrap_err();

    assert!(err.is_config());
    assert_eq!(ctx.attempt_count(), 0);
    assert_eq!(transport.hit_count(), 0);
}

#[tokio::test]
async fn failover_moves_to_secondary_and_sticks() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        Reply::ConnectionError,
        Reply::Status(500),
        Reply::Status(200),
    ]));
    let exec = Executor::builder(transport.clone(), endpoints())
        .with_sleeper(RecordingSleeper::new())
        .build();
    let options = RequestOptions {
        location_mode: Some(LocationMode::PrimaryThenSecondary),
        ..linear(Duration::from_secs(1), 4)
    };
    let mut ctx = OperationContext::new();

    let result = exec
        .execute(&mut FetchAttributes, &options, &mut ctx)
        .await
        .unwrap();
    assert_eq!(result, 200);

    let targets: Vec<_> = ctx.attempts().iter().map(|a| a.target).collect();
    assert_eq!(
        targets,
        vec![
            StorageLocation::Primary,
            StorageLocation::Secondary,
            StorageLocation::Secondary,
        ]
    );
    let hosts: Vec<_> = transport
        .hits()
        .iter()
        .map(|h| h.uri.host().unwrap().to_string())
        .collect();
    assert_eq!(
        hosts,
        vec![
            "acct.blob.example.net",
            "acct-secondary.blob.example.net",
            "acct-secondary.blob.example.net",
        ]
    );
}

#[tokio::test]
async fn secondary_404_demotes_the_operation_to_primary() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        Reply::ConnectionError, // primary
        Reply::Status(404),     // secondary has not replicated yet
        Reply::Status(200),     // primary again, after demotion
    ]));
    let exec = Executor::builder(transport.clone(), endpoints())
        .with_sleeper(RecordingSleeper::new())
        .build();
    let options = RequestOptions {
        location_mode: Some(LocationMode::PrimaryThenSecondary),
        ..linear(Duration::from_secs(1), 4)
    };
    let mut ctx = OperationContext::new();

    let result = exec
        .execute(&mut FetchAttributes, &options, &mut ctx)
        .await
        .unwrap();
    assert_eq!(result, 200);

    let targets: Vec<_> = ctx.attempts().iter().map(|a| a.target).collect();
    assert_eq!(
        targets,
        vec![
            StorageLocation::Primary,
            StorageLocation::Secondary,
            StorageLocation::Primary,
        ]
    );
}

#[tokio::test]
async fn events_pair_per_attempt_even_when_an_attempt_throws() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        Reply::Status(500),
        Reply::ConnectionError,
        Reply::Status(200),
    ]));
    let exec = Executor::builder(transport.clone(), endpoints())
        .with_sleeper(RecordingSleeper::new())
        .build();
    let mut ctx = OperationContext::new();

    let seen: Arc<Mutex<Vec<(EventKind, u32)>>> = Arc::new(Mutex::new(Vec::new()));
    for kind in [
        EventKind::Sending,
        EventKind::ResponseReceived,
        EventKind::Retrying,
        EventKind::RequestCompleted,
    ] {
        let seen = seen.clone();
        ctx.events().subscribe(kind, move |event| {
            seen.lock()
                .unwrap()
                .push((event.kind(), event.payload().attempt_index));
        });
    }

    exec.execute(&mut FetchAttributes, &linear(Duration::from_secs(1), 4), &mut ctx)
        .await
        .unwrap();

    let seen = seen.lock().unwrap().clone();
    let sends: Vec<_> = seen
        .iter()
        .filter(|(k, _)| *k == EventKind::Sending)
        .collect();
    let completions: Vec<_> = seen
        .iter()
        .filter(|(k, _)| *k == EventKind::RequestCompleted)
        .collect();
    assert_eq!(sends.len(), 3);
    assert_eq!(completions.len(), 3);

    // Exactly one Sending before exactly one RequestCompleted, per attempt,
    // including the attempt that failed at the connection level.
    for attempt in 0u32..3 {
        let send_pos = seen
            .iter()
            .position(|e| *e == (EventKind::Sending, attempt))
            .unwrap();
        let completed_pos = seen
            .iter()
            .position(|e| *e == (EventKind::RequestCompleted, attempt))
            .unwrap();
        assert!(send_pos < completed_pos, "attempt {attempt} pair out of order");
    }

    // The connection-error attempt produced no response event.
    let responses: Vec<_> = seen
        .iter()
        .filter(|(k, _)| *k == EventKind::ResponseReceived)
        .map(|(_, i)| *i)
        .collect();
    assert_eq!(responses, vec![0, 2]);
}

#[tokio::test]
async fn build_failure_sends_nothing_but_still_pairs_events() {
    let transport = Arc::new(ScriptedTransport::replying(&[]));
    let exec = Executor::builder(transport.clone(), endpoints()).build();
    let mut ctx = OperationContext::new();

    let seen: Arc<Mutex<Vec<EventKind>>> = Arc::new(Mutex::new(Vec::new()));
    for kind in [EventKind::Sending, EventKind::RequestCompleted] {
        let seen = seen.clone();
        ctx.events().subscribe(kind, move |event| {
            seen.lock().unwrap().push(event.kind());
        });
    }

    let err = exec
        .execute(&mut BrokenBuilder, &linear(Duration::from_secs(1), 4), &mut ctx)
        .await
        .unwrap_err();

    assert!(matches!(err, mirrorstore::StorageError::Build { .. }));
    assert_eq!(transport.hit_count(), 0, "nothing may be sent");
    assert_eq!(ctx.attempt_count(), 1);
    assert_eq!(
        seen.lock().unwrap().clone(),
        vec![EventKind::Sending, EventKind::RequestCompleted]
    );
}

#[tokio::test]
async fn backoff_larger_than_remaining_budget_fails_without_sleeping() {
    let transport = Arc::new(ScriptedTransport::replying(&[500]));
    let clock = ManualClock::new();
    let sleeper = RecordingSleeper::new();
    let exec = Executor::builder(transport.clone(), endpoints())
        .with_clock(clock.clone())
        .with_sleeper(sleeper.clone())
        .build();
    let mut ctx = OperationContext::new();

    // Each response costs two simulated seconds.
    let advance = clock.clone();
    ctx.events().subscribe(EventKind::ResponseReceived, move |_| {
        advance.advance(Duration::from_secs(2));
    });

    let options = RequestOptions {
        max_execution_time: Some(Duration::from_secs(5)),
        ..linear(Duration::from_secs(4), 4)
    };
    let err = exec
        .execute(&mut FetchAttributes, &options, &mut ctx)
        .await
        .unwrap_err();

    // 2 s elapsed + 4 s backoff > 5 s budget: fail now rather than oversleep.
    assert!(err.is_timeout());
    assert_eq!(ctx.attempt_count(), 1);
    assert_eq!(sleeper.pause_count(), 0);
}

/// Sleeper that moves a manual clock three times the requested pause, so the
/// budget can expire while an operation is "asleep".
#[derive(Debug, Clone)]
struct OversleepingSleeper {
    clock: ManualClock,
}

impl Sleeper for OversleepingSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.clock.advance(duration * 3);
        Box::pin(async {})
    }
}

#[tokio::test]
async fn budget_is_checked_again_before_the_next_dispatch() {
    let transport = Arc::new(ScriptedTransport::replying(&[500, 500]));
    let clock = ManualClock::new();
    let exec = Executor::builder(transport.clone(), endpoints())
        .with_clock(clock.clone())
        .with_sleeper(OversleepingSleeper { clock: clock.clone() })
        .build();
    let options = RequestOptions {
        max_execution_time: Some(Duration::from_secs(10)),
        ..linear(Duration::from_secs(4), 4)
    };
    let mut ctx = OperationContext::new();

    let err = exec
        .execute(&mut FetchAttributes, &options, &mut ctx)
        .await
        .unwrap_err();

    // The pre-sleep check passed (4 s fits in 10 s), but the pause overran
    // the budget; the pre-send check catches it and nothing else goes out.
    assert!(err.is_timeout());
    assert_eq!(ctx.attempt_count(), 2);
    assert_eq!(transport.hit_count(), 1);
}

#[tokio::test]
async fn sas_credentials_rewrite_the_uri_instead_of_signing() {
    let transport = Arc::new(ScriptedTransport::replying(&[200]));
    let exec = Executor::builder(transport.clone(), endpoints())
        .credentials(Credentials::with_sas_token("sig=abc123&se=2026-01-01"))
        .build();
    let mut ctx = OperationContext::new();

    exec.execute(&mut FetchAttributes, &RequestOptions::no_retry(), &mut ctx)
        .await
        .unwrap();

    let hit = &transport.hits()[0];
    let query = hit.uri.query().unwrap();
    assert!(query.contains("sig=abc123"));
    assert!(query.contains("se=2026-01-01"));
    assert!(hit.headers.get(http::header::AUTHORIZATION).is_none());
}

#[tokio::test]
async fn shared_key_credentials_sign_every_attempt() {
    let transport = Arc::new(ScriptedTransport::replying(&[500, 200]));
    let exec = Executor::builder(transport.clone(), endpoints())
        .credentials(Credentials::with_shared_key("acct", "dGVzdC1rZXk=").unwrap())
        .with_sleeper(RecordingSleeper::new())
        .build();
    let mut ctx = OperationContext::new();

    exec.execute(&mut FetchAttributes, &linear(Duration::from_secs(1), 2), &mut ctx)
        .await
        .unwrap();

    for hit in transport.hits() {
        let auth = hit
            .headers
            .get(http::header::AUTHORIZATION)
            .expect("every attempt is signed")
            .to_str()
            .unwrap();
        assert!(auth.starts_with("SharedKey acct:"));
        assert!(hit.headers.get("x-ms-date").is_some());
    }
}
