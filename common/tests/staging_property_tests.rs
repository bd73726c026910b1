// Property-based tests for staging dispatch and reply reconciliation
// Covers supersession by token, failure and success replies, and the reply window

use bytes::Bytes;
use common::bus::{InMemoryBus, Reactor};
use common::config::{Settings, StagingConfig};
use common::staging::{
    App, BlobstoreUrls, BusLogEmitter, CompletionCallback, InMemoryAppRepository, PackageState,
    Resolution, StaticBuildpackCatalog, Stager, StagingCompletion, StagingResponse,
};
use futures::FutureExt;
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

const APP_GUID: &str = "app-1";

// ============================================================================
// Test Harness
// ============================================================================

struct Harness {
    bus: Arc<InMemoryBus>,
    apps: Arc<InMemoryAppRepository>,
    stager: Stager,
    subject: String,
}

/// Must be called inside a runtime: the reactor is spawned on it
fn harness(config: &StagingConfig) -> Harness {
    let bus = Arc::new(InMemoryBus::new());
    let apps = Arc::new(InMemoryAppRepository::new());
    apps.add_app(APP_GUID);
    let (reactor, _handle) = Reactor::spawn();
    let stager = Stager::new(
        bus.clone(),
        reactor,
        apps.clone(),
        Arc::new(StaticBuildpackCatalog::default()),
        Arc::new(BlobstoreUrls::new("http://blobstore")),
        Arc::new(BusLogEmitter::new(bus.clone())),
        config,
    );
    Harness {
        bus,
        apps,
        stager,
        subject: config.subject.clone(),
    }
}

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap()
}

fn counting_callback(calls: &Arc<AtomicUsize>) -> CompletionCallback {
    let calls = Arc::clone(calls);
    Box::new(move |_: StagingCompletion| {
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
        }
        .boxed()
    })
}

fn app_logs(h: &Harness) -> Vec<serde_json::Value> {
    h.bus
        .published(&format!("logs.app.{}", APP_GUID))
        .iter()
        .map(|payload| serde_json::from_slice(payload).unwrap())
        .collect()
}

// ============================================================================
// Property Generators
// ============================================================================

fn arb_buildpack() -> impl Strategy<Value = Option<String>> {
    prop::option::of("[a-z]{3,12}(_buildpack)?")
}

fn arb_task_log() -> impl Strategy<Value = Option<String>> {
    prop::option::of("[a-zA-Z0-9 ]{0,40}")
}

/// Any reply body the stager might send, successful or not
fn arb_response() -> impl Strategy<Value = StagingResponse> {
    (
        arb_buildpack(),
        prop::option::of("[a-zA-Z ]{1,30}"),
        prop::option::of(any::<bool>()),
        arb_task_log(),
    )
        .prop_map(|(detected_buildpack, error, timeout, task_log)| StagingResponse {
            detected_buildpack,
            error,
            timeout,
            task_log,
        })
}

/// A reply carrying an error, a timeout flag, or both
fn arb_failed_response() -> impl Strategy<Value = StagingResponse> {
    arb_response().prop_filter("error or timeout flag", |r| {
        r.error.is_some() || r.timed_out()
    })
}

fn to_body(response: &StagingResponse) -> Bytes {
    Bytes::from(serde_json::to_vec(response).unwrap())
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// A reply for any superseded dispatch changes nothing and fires no callback,
    /// while the reply for the latest dispatch is still honored
    #[test]
    fn property_superseded_replies_are_discarded(
        dispatches in 2usize..6,
        stale_index in 0usize..5,
        stale_reply in arb_response(),
        buildpack in arb_buildpack(),
    ) {
        let stale_index = stale_index % (dispatches - 1);
        let rt = paused_runtime();
        rt.block_on(async {
            let h = harness(&Settings::default().staging);
            let app = App::new(APP_GUID, "dora");
            let calls = Arc::new(AtomicUsize::new(0));

            let mut dispatched = Vec::new();
            for _ in 0..dispatches {
                dispatched.push(
                    h.stager
                        .stage(&app, Some(counting_callback(&calls)))
                        .await
                        .unwrap(),
                );
            }
            let before = h.apps.state(APP_GUID);
            let mut requests = h.bus.take_requests(&h.subject);
            prop_assert_eq!(requests.len(), dispatches);

            let latest_request = requests.pop().unwrap();
            let latest = dispatched.pop().unwrap();
            let stale = dispatched.remove(stale_index);

            requests.remove(stale_index).respond(to_body(&stale_reply));
            prop_assert_eq!(stale.resolution().await, Resolution::Superseded);
            tokio::task::yield_now().await;

            prop_assert_eq!(h.apps.state(APP_GUID), before);
            prop_assert!(app_logs(&h).is_empty());
            prop_assert_eq!(calls.load(Ordering::SeqCst), 0);

            let success = StagingResponse {
                detected_buildpack: buildpack.clone(),
                ..StagingResponse::default()
            };
            latest_request.respond(to_body(&success));
            prop_assert_eq!(latest.resolution().await, Resolution::Staged);
            prop_assert_eq!(h.apps.state(APP_GUID).unwrap().detected_buildpack, buildpack);
            Ok(())
        })?;
    }

    /// An error or timeout flag always marks the app failed and never fires the callback
    #[test]
    fn property_flagged_reply_marks_failed(response in arb_failed_response()) {
        let rt = paused_runtime();
        rt.block_on(async {
            let h = harness(&Settings::default().staging);
            let calls = Arc::new(AtomicUsize::new(0));
            let dispatched = h
                .stager
                .stage(&App::new(APP_GUID, "dora"), Some(counting_callback(&calls)))
                .await
                .unwrap();

            h.bus.take_requests(&h.subject).remove(0).respond(to_body(&response));

            let expected = if response.error.is_some() {
                Resolution::Failed
            } else {
                Resolution::TimedOut
            };
            prop_assert_eq!(dispatched.resolution().await, expected);
            tokio::task::yield_now().await;

            let state = h.apps.state(APP_GUID).unwrap();
            prop_assert_eq!(state.package_state, PackageState::Failed);
            prop_assert_eq!(state.detected_buildpack, None);
            prop_assert_eq!(calls.load(Ordering::SeqCst), 0);

            let logs = app_logs(&h);
            prop_assert_eq!(logs.len(), 1);
            let message = logs[0]["message"].as_str().unwrap().to_string();
            prop_assert!(message.starts_with("Failed to stage application:\n"));
            if let Some(log) = &response.task_log {
                prop_assert!(message.ends_with(log.as_str()));
            }
            Ok(())
        })?;
    }

    /// A reply with neither flag records the buildpack and runs the callback exactly once,
    /// without holding up the reply handler
    #[test]
    fn property_clean_reply_completes_once(
        buildpack in arb_buildpack(),
        task_log in arb_task_log(),
    ) {
        let rt = paused_runtime();
        rt.block_on(async {
            let h = harness(&Settings::default().staging);
            let calls = Arc::new(AtomicUsize::new(0));
            let (gate_tx, gate_rx) = oneshot::channel::<()>();
            let (done_tx, done_rx) = oneshot::channel();
            let counter = Arc::clone(&calls);
            let callback: CompletionCallback = Box::new(move |completion: StagingCompletion| {
                async move {
                    // Parked until the test has seen the handler finish
                    let _ = gate_rx.await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    let _ = done_tx.send(completion);
                }
                .boxed()
            });

            let dispatched = h
                .stager
                .stage(&App::new(APP_GUID, "dora"), Some(callback))
                .await
                .unwrap();
            let response = StagingResponse {
                detected_buildpack: buildpack.clone(),
                task_log,
                ..StagingResponse::default()
            };
            h.bus.take_requests(&h.subject).remove(0).respond(to_body(&response));

            let resolution = tokio::time::timeout(Duration::from_secs(1), dispatched.resolution())
                .await;
            prop_assert_eq!(resolution, Ok(Resolution::Staged));

            let state = h.apps.state(APP_GUID).unwrap();
            prop_assert_eq!(state.package_state, PackageState::Staged);
            prop_assert_eq!(&state.detected_buildpack, &buildpack);

            gate_tx.send(()).unwrap();
            let completion = done_rx.await.unwrap();
            prop_assert_eq!(completion.app_guid.as_str(), APP_GUID);
            prop_assert_eq!(completion.detected_buildpack, buildpack);
            prop_assert_eq!(calls.load(Ordering::SeqCst), 1);
            prop_assert!(app_logs(&h).is_empty());
            Ok(())
        })?;
    }

    /// With no reply inside the window the app is marked failed with a timeout message
    /// and no log excerpt, once the full window has elapsed
    #[test]
    fn property_silence_times_out_after_window(window_secs in 1u64..600) {
        let rt = paused_runtime();
        rt.block_on(async {
            let config = StagingConfig {
                timeout_seconds: window_secs,
                ..Settings::default().staging
            };
            let h = harness(&config);
            let calls = Arc::new(AtomicUsize::new(0));
            let start = tokio::time::Instant::now();

            let dispatched = h
                .stager
                .stage(&App::new(APP_GUID, "dora"), Some(counting_callback(&calls)))
                .await
                .unwrap();

            prop_assert_eq!(dispatched.resolution().await, Resolution::TimedOut);
            prop_assert!(start.elapsed() >= Duration::from_secs(window_secs));
            prop_assert_eq!(h.apps.state(APP_GUID).unwrap().package_state, PackageState::Failed);
            prop_assert_eq!(calls.load(Ordering::SeqCst), 0);

            let logs = app_logs(&h);
            prop_assert_eq!(logs.len(), 1);
            prop_assert_eq!(
                logs[0]["message"].as_str(),
                Some("Failed to stage application:\nRequest to stage timed out\n")
            );
            Ok(())
        })?;
    }
}

/// T dispatches A, then B; a successful reply for A leaves T's metadata alone
#[test]
fn test_success_for_superseded_token_leaves_metadata_unchanged() {
    let rt = paused_runtime();
    rt.block_on(async {
        let h = harness(&Settings::default().staging);
        let app = App::new(APP_GUID, "dora");

        let token_a = h.stager.stage(&app, None).await.unwrap();
        let token_b = h.stager.stage(&app, None).await.unwrap();
        assert_ne!(token_a.token, token_b.token);
        assert!(token_b.token.sequence > token_a.token.sequence);

        let mut requests = h.bus.take_requests(&h.subject);
        let success = StagingResponse {
            detected_buildpack: Some("ruby_buildpack".to_string()),
            ..StagingResponse::default()
        };
        requests.remove(0).respond(to_body(&success));

        assert_eq!(token_a.resolution().await, Resolution::Superseded);
        let state = h.apps.state(APP_GUID).unwrap();
        assert_eq!(state.detected_buildpack, None);
        assert_eq!(state.package_state, PackageState::Pending);
        assert_eq!(state.staging_token, Some(token_b.token));
    });
}

/// A 60-second window with no reply marks the app failed with a timeout message
#[test]
fn test_sixty_second_window_without_reply() {
    let rt = paused_runtime();
    rt.block_on(async {
        let config = StagingConfig {
            timeout_seconds: 60,
            ..Settings::default().staging
        };
        let h = harness(&config);
        let start = tokio::time::Instant::now();

        let dispatched = h.stager.stage(&App::new(APP_GUID, "dora"), None).await.unwrap();
        assert_eq!(dispatched.resolution().await, Resolution::TimedOut);

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(60));
        assert!(elapsed < Duration::from_secs(61));
        assert_eq!(
            h.apps.state(APP_GUID).unwrap().package_state,
            PackageState::Failed
        );
        let logs = app_logs(&h);
        assert_eq!(
            logs[0]["message"],
            "Failed to stage application:\nRequest to stage timed out\n"
        );
    });
}
