//! Tests for the continuous capture pipelines
//!
//! These drive real fetch/transcode child processes and verify registry
//! invariants, stop semantics and exit-triggered cleanup.

use std::sync::Arc;
use std::time::Duration;

use super::common::{
    ScriptToolchain, content_archive, file_name, key, recording_archive, test_config, wait_for_event,
};
use crate::error::SupervisorError;
use crate::events::{EventBus, SupervisorEvent};
use crate::services::pipeline::CapturePipelines;
use crate::services::upload::UploadReconciler;
use crate::traits::{StartOutcome, StopOutcome};

fn pipelines(toolchain: ScriptToolchain, config: crate::config::SupervisorConfig, events: &EventBus) -> CapturePipelines {
    CapturePipelines::new(Arc::new(config), Arc::new(toolchain), None, events.clone())
}

/// Concurrent starts for one key must yield exactly one pipeline
#[tokio::test]
async fn test_concurrent_start_registers_single_handle() {
    let (_dir, config) = test_config();
    let events = EventBus::default();
    let pipelines = pipelines(ScriptToolchain::new(), config, &events);
    let chan = key("chan");

    let (a, b, c) = tokio::join!(pipelines.start(&chan), pipelines.start(&chan), pipelines.start(&chan));
    let outcomes = [a.unwrap(), b.unwrap(), c.unwrap()];

    let started = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, StartOutcome::Started { .. }))
        .count();
    assert_eq!(started, 1, "Exactly one start should win: {outcomes:?}");
    assert_eq!(pipelines.active().await.len(), 1);

    assert_eq!(pipelines.stop(&chan).await.unwrap(), StopOutcome::Stopped);
}

#[tokio::test]
async fn test_stop_unknown_key_is_not_found() {
    let (_dir, config) = test_config();
    let pipelines = pipelines(ScriptToolchain::new(), config, &EventBus::default());

    assert_eq!(pipelines.stop(&key("nobody")).await.unwrap(), StopOutcome::NotFound);
}

/// Output lands in the per-source directory and survives the stop
#[tokio::test]
async fn test_stop_closes_input_and_keeps_output() {
    let (dir, config) = test_config();
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let pipelines = pipelines(ScriptToolchain::new(), config, &events);
    let chan = key("chan");

    let StartOutcome::Started { output } = pipelines.start(&chan).await.unwrap() else {
        panic!("pipeline should start");
    };
    assert!(output.starts_with(dir.path().join("chan")));
    let name = output.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("twitch-chan-") && name.ends_with(".mp4"), "{name}");

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(pipelines.stop(&chan).await.unwrap(), StopOutcome::Stopped);
    assert!(!pipelines.is_recording(&chan).await, "Stop removes the handle synchronously");

    wait_for_event(&mut rx, |e| matches!(e, SupervisorEvent::TranscodeExited { .. })).await;
    let written = std::fs::read_to_string(&output).unwrap();
    assert!(written.contains("chunk"), "Transcode should have received fetch output");
}

/// Fetch ending on its own ends the pipeline and flushes transcode
#[tokio::test]
async fn test_fetch_exit_removes_handle() {
    let (_dir, config) = test_config();
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let toolchain = ScriptToolchain::new().fetch("printf 'whole stream'");
    let pipelines = pipelines(toolchain, config, &events);
    let chan = key("chan");

    let StartOutcome::Started { output } = pipelines.start(&chan).await.unwrap() else {
        panic!("pipeline should start");
    };

    // Both stages end; their events may arrive in either order
    let mut ended = None;
    let mut transcode_done = false;
    while ended.is_none() || !transcode_done {
        let event = wait_for_event(&mut rx, |e| {
            matches!(
                e,
                SupervisorEvent::RecordingEnded { .. } | SupervisorEvent::TranscodeExited { .. }
            )
        })
        .await;
        match event {
            SupervisorEvent::RecordingEnded { source, exit } => ended = Some((source, exit)),
            _ => transcode_done = true,
        }
    }

    let (source, exit) = ended.unwrap();
    assert_eq!(source, chan);
    assert!(exit.success());
    assert!(!pipelines.is_recording(&chan).await);
    assert_eq!(std::fs::read_to_string(&output).unwrap(), "whole stream");
}

/// A late exit of a stopped pipeline must not remove its successor
#[tokio::test]
async fn test_restart_after_stop_keeps_new_handle() {
    let (_dir, config) = test_config();
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let pipelines = pipelines(ScriptToolchain::new(), config, &events);
    let chan = key("chan");

    pipelines.start(&chan).await.unwrap();
    pipelines.stop(&chan).await.unwrap();
    assert!(matches!(pipelines.start(&chan).await.unwrap(), StartOutcome::Started { .. }));

    // The first pipeline's fetch exit arrives after the second start
    wait_for_event(&mut rx, |e| matches!(e, SupervisorEvent::RecordingEnded { .. })).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(pipelines.is_recording(&chan).await);

    pipelines.stop(&chan).await.unwrap();
}

#[tokio::test]
async fn test_spawn_failure_registers_nothing() {
    let (_dir, config) = test_config();
    let events = EventBus::default();

    let mut toolchain = ScriptToolchain::new();
    toolchain.missing_fetch = true;
    let failing_fetch = pipelines(toolchain, config.clone(), &events);
    let err = failing_fetch.start(&key("chan")).await.unwrap_err();
    assert!(matches!(err, SupervisorError::SpawnFailed { .. }));
    assert!(failing_fetch.active().await.is_empty());

    let mut toolchain = ScriptToolchain::new();
    toolchain.missing_transcode = true;
    let failing_transcode = pipelines(toolchain, config, &events);
    let err = failing_transcode.start(&key("chan")).await.unwrap_err();
    assert!(matches!(err, SupervisorError::SpawnFailed { .. }));
    assert!(!failing_transcode.is_recording(&key("chan")).await);
}

/// Transcode dying while fetch still runs stops the whole pipeline
#[tokio::test]
async fn test_transcode_failure_stops_pipeline() {
    let (_dir, config) = test_config();
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let toolchain = ScriptToolchain::new().transcode("sleep 0.2; exit 1");
    let pipelines = pipelines(toolchain, config, &events);
    let chan = key("chan");

    pipelines.start(&chan).await.unwrap();
    let exited = wait_for_event(&mut rx, |e| matches!(e, SupervisorEvent::TranscodeExited { .. })).await;
    if let SupervisorEvent::TranscodeExited { exit, .. } = exited {
        assert!(!exit.success());
    }
    assert!(!pipelines.is_recording(&chan).await);
}

/// Fetch exit triggers an upload of the source directory
#[tokio::test]
async fn test_fetch_exit_triggers_upload() {
    let (_dir, config) = test_config();
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let (archive, copies) = recording_archive();
    let uploads = UploadReconciler::new(Arc::new(archive), "mp4").with_events(events.clone());
    let toolchain = ScriptToolchain::new().fetch("printf data");
    let pipelines = CapturePipelines::new(Arc::new(config), Arc::new(toolchain), Some(uploads), events.clone());

    let StartOutcome::Started { output } = pipelines.start(&key("chan")).await.unwrap() else {
        panic!("pipeline should start");
    };

    let finished = wait_for_event(&mut rx, |e| matches!(e, SupervisorEvent::UploadFinished { .. })).await;
    if let SupervisorEvent::UploadFinished {
        remote_target,
        uploaded,
        failed,
    } = finished
    {
        assert_eq!(remote_target, "remote:streams/chan");
        assert_eq!(uploaded, vec![output.file_name().unwrap().to_string_lossy().to_string()]);
        assert!(failed.is_empty());
    }
    let copies = copies.lock().unwrap();
    assert_eq!(copies.len(), 1);
    assert_eq!(copies[0], (output, true));
}

#[tokio::test]
async fn test_stop_all() {
    let (_dir, config) = test_config();
    let pipelines = pipelines(ScriptToolchain::new(), config, &EventBus::default());

    pipelines.start(&key("a")).await.unwrap();
    pipelines.start(&key("b")).await.unwrap();
    let active: Vec<_> = pipelines.active().await.into_iter().map(|info| info.source).collect();
    assert_eq!(active, vec![key("a"), key("b")]);

    assert_eq!(pipelines.stop_all().await, 2);
    assert!(pipelines.active().await.is_empty());
}

/// The upload after a stop leaves out the file of a pipeline started meanwhile
#[tokio::test]
async fn test_upload_after_restart_skips_new_recording() {
    let (_dir, config) = test_config();
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let (archive, remote) = content_archive();
    let uploads = UploadReconciler::new(Arc::new(archive), "mp4").with_events(events.clone());
    // Ignores SIGTERM and lingers after its input ends, like a muxer writing the trailer
    let toolchain = ScriptToolchain::new().transcode(r#"trap '' TERM; cat > "$1"; sleep 0.5"#);
    let pipelines = CapturePipelines::new(Arc::new(config), Arc::new(toolchain), Some(uploads), events.clone());
    let chan = key("chan");

    let StartOutcome::Started { output: first } = pipelines.start(&chan).await.unwrap() else {
        panic!("pipeline should start");
    };
    tokio::time::sleep(Duration::from_millis(300)).await;
    pipelines.stop(&chan).await.unwrap();
    let StartOutcome::Started { output: second } = pipelines.start(&chan).await.unwrap() else {
        panic!("pipeline should restart");
    };
    assert_ne!(first, second);

    wait_for_event(&mut rx, |e| matches!(e, SupervisorEvent::UploadFinished { .. })).await;
    let archived: Vec<_> = remote.lock().unwrap().keys().cloned().collect();
    assert_eq!(archived, vec![file_name(&first)]);

    pipelines.stop(&chan).await.unwrap();
    wait_for_event(&mut rx, |e| matches!(e, SupervisorEvent::UploadFinished { .. })).await;
    assert!(remote.lock().unwrap().contains_key(&file_name(&second)));
}
