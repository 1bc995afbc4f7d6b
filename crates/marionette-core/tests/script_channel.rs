//! Integration tests for the script engine channel.
//!
//! A POSIX shell stands in for the script engine: it reads statements from
//! stdin and executes them one at a time, just like an interactive
//! automation interpreter.

#![cfg(unix)]

use std::time::{Duration, Instant};

use marionette_core::{Error, ErrorClass, ScriptChannel, ScriptEngineConfig, ScriptMode};

fn shell_config() -> ScriptEngineConfig {
    ScriptEngineConfig {
        program: "sh".to_string(),
        args: Vec::new(),
        one_shot_args: vec!["-c".to_string()],
        sentinel_template: "echo {marker}".to_string(),
        stderr_grace_ms: 50,
        ..ScriptEngineConfig::default()
    }
}

fn shell_channel() -> ScriptChannel {
    ScriptChannel::new(shell_config())
}

#[tokio::test]
async fn test_returns_output_before_sentinel() {
    let channel = shell_channel();
    let output = channel.execute("echo hello; echo world").await.unwrap();
    assert_eq!(output, "hello\nworld");
    assert!(!output.contains("__MARIONETTE_DONE__"));
}

#[tokio::test]
async fn test_interpreter_is_reused_across_calls() {
    let channel = shell_channel();
    channel.execute("GREETING=persisted").await.unwrap();
    let output = channel.execute("echo $GREETING").await.unwrap();
    assert_eq!(output, "persisted");
    assert_eq!(channel.spawn_count().await, 1);
}

#[tokio::test]
async fn test_sequential_calls_do_not_see_each_other() {
    let channel = shell_channel();
    assert_eq!(channel.execute("echo one").await.unwrap(), "one");
    assert_eq!(channel.execute("echo two").await.unwrap(), "two");
    assert_eq!(channel.execute("true").await.unwrap(), "");
}

#[tokio::test]
async fn test_concurrent_callers_are_serialized() {
    let channel = shell_channel();
    let (a, b, c) = tokio::join!(
        channel.execute("sleep 0.1; echo alpha"),
        channel.execute("echo beta"),
        channel.execute("echo gamma"),
    );
    assert_eq!(a.unwrap(), "alpha");
    assert_eq!(b.unwrap(), "beta");
    assert_eq!(c.unwrap(), "gamma");
}

#[tokio::test]
async fn test_diagnostics_reject_even_with_sentinel() {
    let channel = shell_channel();
    let err = channel
        .execute("echo some output; echo 'execution error: osascript is not allowed assistive access. (-1719)' >&2")
        .await
        .unwrap_err();

    match err {
        Error::Script { class, message } => {
            assert_eq!(class, ErrorClass::AccessibilityDenied);
            assert!(message.contains("not allowed assistive access"));
        }
        other => panic!("Expected script error, got {:?}", other),
    }

    // The diagnostic belonged to that call only.
    assert_eq!(channel.execute("echo clean").await.unwrap(), "clean");
}

#[tokio::test]
async fn test_timeout_kills_and_next_call_respawns() {
    let channel = shell_channel();
    channel.execute("echo warm").await.unwrap();
    let first_pid = channel.pid().await;

    let start = Instant::now();
    let err = channel
        .execute_with_timeout("sleep 30", Duration::from_millis(300))
        .await
        .unwrap_err();
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(err.class(), ErrorClass::Timeout);
    assert!(matches!(err, Error::Timeout { .. }));
    assert!(channel.kill_handle().is_none());

    let output = channel.execute("echo recovered").await.unwrap();
    assert_eq!(output, "recovered");
    assert_eq!(channel.spawn_count().await, 2);
    assert_ne!(channel.pid().await, first_pid);
}

#[tokio::test]
async fn test_natural_exit_then_respawn() {
    let channel = shell_channel();
    let err = channel.execute("exit 0").await.unwrap_err();
    assert!(matches!(err, Error::ProcessExited { .. }), "{:?}", err);

    assert_eq!(channel.execute("echo again").await.unwrap(), "again");
    assert_eq!(channel.spawn_count().await, 2);
}

#[tokio::test]
async fn test_kill_handle_interrupts_running_call() {
    let channel = shell_channel();
    channel.prewarm().await.unwrap();
    let handle = channel.kill_handle().expect("interpreter should be live");

    let start = Instant::now();
    let (result, _) = tokio::join!(
        channel.execute_with_timeout("sleep 30", Duration::from_secs(20)),
        async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            handle.kill();
        }
    );

    assert!(start.elapsed() < Duration::from_secs(10));
    assert!(matches!(result, Err(Error::ProcessExited { .. })), "{:?}", result);
    assert_eq!(channel.execute("echo alive").await.unwrap(), "alive");
}

#[tokio::test]
async fn test_kill_while_idle_does_not_fail_next_call() {
    let channel = shell_channel();
    channel.prewarm().await.unwrap();
    let first = channel.pid().await;
    channel.kill_handle().expect("interpreter should be live").kill();

    // No pause: the killed child may not be reapable yet.
    assert_eq!(channel.execute("echo hi").await.unwrap(), "hi");
    assert_eq!(channel.spawn_count().await, 2);
    assert_ne!(channel.pid().await, first);
}

#[tokio::test]
async fn test_abandoned_call_does_not_leak_into_next() {
    let channel = shell_channel();

    // Drop the call future while the interpreter is still producing output.
    let abandoned = tokio::time::timeout(
        Duration::from_millis(100),
        channel.execute("sleep 0.3; echo stale"),
    )
    .await;
    assert!(abandoned.is_err());

    let output = channel.execute("echo fresh").await.unwrap();
    assert_eq!(output, "fresh");
}

#[tokio::test]
async fn test_prewarm_spawns_once() {
    let channel = shell_channel();
    channel.prewarm().await.unwrap();
    channel.prewarm().await.unwrap();
    assert_eq!(channel.spawn_count().await, 1);
    assert!(channel.kill_handle().is_some());

    channel.shutdown().await;
    assert!(channel.kill_handle().is_none());
    assert!(channel.pid().await.is_none());
}

#[tokio::test]
async fn test_spawn_failure_is_reported_and_recoverable() {
    let channel = ScriptChannel::new(ScriptEngineConfig {
        program: "marionette-no-such-interpreter".to_string(),
        ..shell_config()
    });
    let err = channel.execute("echo hi").await.unwrap_err();
    assert!(matches!(err, Error::Spawn { .. }));
    // Still usable: the next call simply tries again.
    assert!(matches!(
        channel.execute("echo hi").await,
        Err(Error::Spawn { .. })
    ));
}

#[tokio::test]
async fn test_one_shot_execution() {
    let channel = shell_channel();
    assert_eq!(channel.execute_once("echo once").await.unwrap(), "once");

    let err = channel
        .execute_once("echo \"Application isn't running\" >&2")
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::AppNotRunning);

    let err = channel.execute_once("exit 4").await.unwrap_err();
    assert!(err.to_string().contains("exited with"), "{}", err);

    let err = channel
        .execute_once_with_timeout("sleep 30", Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));
}

#[tokio::test]
async fn test_one_shot_mode_routes_execute() {
    let channel = ScriptChannel::new(ScriptEngineConfig {
        mode: ScriptMode::OneShot,
        ..shell_config()
    });
    channel.execute("X=1").await.unwrap();
    // Nothing persists between one-shot calls.
    assert_eq!(channel.execute("echo ${X:-unset}").await.unwrap(), "unset");
    assert_eq!(channel.spawn_count().await, 0);
}
