//! End-to-end channel behavior against the simulated interpreter.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use remote_interp_channel::{
    ChannelConfig, ChannelError, ExecutionError, InterpreterSession, ScriptInterpreter,
};
use remote_interp_core::{ExecutionOutcome, ResultSink, StaticSetup};
use remote_interp_sim::SimServer;

fn config_for(server: &SimServer) -> ChannelConfig {
    ChannelConfig::new("127.0.0.1").with_port(server.addr().port())
}

async fn connect(server: &SimServer) -> InterpreterSession {
    InterpreterSession::connect(config_for(server)).await.unwrap()
}

#[tokio::test]
async fn test_refusal_raises_before_any_submission() {
    let server = SimServer::builder().refuse().spawn().await.unwrap();

    let err = InterpreterSession::connect(config_for(&server))
        .await
        .err()
        .expect("refused session must not connect");
    assert!(matches!(err, ChannelError::Refused { .. }));
    assert!(server.executed().is_empty());
}

#[tokio::test]
async fn test_output_is_marker_stripped() {
    let server = SimServer::builder()
        .reply(|code| {
            assert_eq!(code, "print('hi')");
            "hi\n".to_string()
        })
        .spawn()
        .await
        .unwrap();

    let session = connect(&server).await;
    let output = session.execute("print('hi')").await.unwrap();
    assert_eq!(output, "hi\n");
}

#[tokio::test]
async fn test_output_is_idempotent() {
    let server = SimServer::builder()
        .reply(|_| "stable\n".to_string())
        .spawn()
        .await
        .unwrap();

    let session = connect(&server).await;
    let handle = session.submit("x = 1").await.unwrap();

    let first = handle.output().await.unwrap();
    let second = handle.output().await.unwrap();
    assert_eq!(first, "stable\n");
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_is_running_between_submit_and_completion() {
    let server = SimServer::builder()
        .reply_delay(Duration::from_millis(200))
        .reply(|_| "done\n".to_string())
        .spawn()
        .await
        .unwrap();

    let session = connect(&server).await;
    let handle = session.submit("sleepy()").await.unwrap();

    // Before any output bytes arrive.
    assert!(handle.is_running());

    assert_eq!(handle.output().await.unwrap(), "done\n");
    assert!(!handle.is_running());
}

#[tokio::test]
async fn test_back_to_back_submissions_execute_in_order() {
    let server = SimServer::builder()
        .reply_delay(Duration::from_millis(100))
        .reply(|code| match code {
            "a = 1" => "alpha\n".to_string(),
            "b = 2" => "beta\n".to_string(),
            other => panic!("unexpected payload: {other}"),
        })
        .spawn()
        .await
        .unwrap();

    let session = Arc::new(connect(&server).await);

    let first = session.submit("a = 1").await.unwrap();
    let second_session = Arc::clone(&session);
    let second = tokio::spawn(async move { second_session.submit("b = 2").await.unwrap() });

    // The second submission is parked on channel ownership until the
    // first request completes; reading outputs in reverse order must
    // not change what either request observed.
    let second = second.await.unwrap();
    assert_eq!(second.output().await.unwrap(), "beta\n");
    assert_eq!(first.output().await.unwrap(), "alpha\n");

    assert_eq!(server.executed(), vec!["a = 1", "b = 2"]);
}

#[tokio::test]
async fn test_transport_failure_surfaces_and_poisons() {
    let server = SimServer::builder()
        .reply(|_| "partial".to_string())
        .disconnect_mid_execution()
        .spawn()
        .await
        .unwrap();

    let session = connect(&server).await;
    let handle = session.submit("boom()").await.unwrap();

    assert!(matches!(
        handle.output().await,
        Err(ExecutionError::Transport(_))
    ));

    // Requests queued behind the failure fail fast.
    let err = session.submit("next()").await.err().unwrap();
    assert!(matches!(err, ChannelError::Poisoned));
}

#[tokio::test]
async fn test_missing_completion_marker_is_bounded() {
    let server = SimServer::builder()
        .reply(|_| "orphan output\n".to_string())
        .suppress_completion()
        .spawn()
        .await
        .unwrap();

    let config = config_for(&server).with_completion_timeout(Duration::from_millis(100));
    let session = InterpreterSession::connect(config).await.unwrap();
    let handle = session.submit("dies_midway()").await.unwrap();

    assert_eq!(
        handle.output().await,
        Err(ExecutionError::CompletionTimeout)
    );
}

#[tokio::test]
async fn test_abandoned_wait_leaves_listener_draining() {
    let server = SimServer::builder()
        .reply_delay(Duration::from_millis(200))
        .reply(|_| "slow\n".to_string())
        .spawn()
        .await
        .unwrap();

    let session = connect(&server).await;
    let handle = session.submit("slow()").await.unwrap();

    assert_eq!(
        handle.output_timeout(Duration::from_millis(20)).await,
        Err(ExecutionError::WaitTimeout)
    );
    assert!(handle.is_running());

    // The listener kept consuming the stream, so the request still
    // completes and the channel stays usable for the next one.
    assert_eq!(handle.output().await.unwrap(), "slow\n");
    assert_eq!(session.execute("after()").await.unwrap(), "slow\n");
}

#[tokio::test]
async fn test_streamed_chunks_reassemble_to_output() {
    let server = SimServer::builder()
        .reply(|_| "line one\nline two\n".to_string())
        .spawn()
        .await
        .unwrap();

    let session = connect(&server).await;
    let handle = session.submit("chatty()").await.unwrap();

    let chunks = handle.chunk_stream();
    let output = handle.output().await.unwrap();
    let streamed: String = chunks.collect::<Vec<_>>().await.concat();

    assert_eq!(output, "line one\nline two\n");
    assert_eq!(streamed, output);
}

#[tokio::test]
async fn test_connect_named_registers_interpreter() {
    let server = SimServer::spawn().await.unwrap();

    let _session = InterpreterSession::connect_named(config_for(&server), "bench\n3")
        .await
        .unwrap();

    assert_eq!(server.executed(), vec!["initializeInterpreter bench3"]);
}

#[tokio::test]
async fn test_setup_statements_precede_script() {
    let server = SimServer::spawn().await.unwrap();
    let session = connect(&server).await;

    let script = temp_script("ccs-setup-order", "run_acquisition()\n");
    let setup = vec!["a = 1".to_string(), "b = 2".to_string()];
    session.execute_script(&script, &setup).await.unwrap();
    std::fs::remove_file(&script).unwrap();

    assert_eq!(
        server.executed(),
        vec!["a = 1", "b = 2", "run_acquisition()"]
    );
}

#[tokio::test]
async fn test_run_script_job_records_outcome() {
    #[derive(Default)]
    struct CapturingSink(Mutex<Vec<ExecutionOutcome>>);

    impl ResultSink for CapturingSink {
        fn record(&self, outcome: &ExecutionOutcome) {
            self.0.lock().unwrap().push(outcome.clone());
        }
    }

    let server = SimServer::builder()
        .reply(|code| {
            if code.starts_with("configure") {
                String::new()
            } else {
                "acquired 25 frames\n".to_string()
            }
        })
        .spawn()
        .await
        .unwrap();

    let session = connect(&server).await;
    let script = temp_script("ccs-job-outcome", "acquire()\n");
    let provider = StaticSetup(vec!["configure(bench)".to_string()]);
    let sink = CapturingSink::default();

    let output = session
        .run_script_job(&provider, &sink, &script)
        .await
        .unwrap();
    std::fs::remove_file(&script).unwrap();

    assert_eq!(output, "acquired 25 frames\n");
    let recorded = sink.0.into_inner().unwrap();
    assert_eq!(recorded.len(), 1);
    assert!(recorded[0].success);
    assert_eq!(recorded[0].output, "acquired 25 frames\n");
}

fn temp_script(tag: &str, content: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("{tag}-{}.py", std::process::id()));
    std::fs::write(&path, content).unwrap();
    path
}
