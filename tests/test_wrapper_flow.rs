//! In-process wrapper tests
//!
//! Exercises the two-stage evaluation with a compiled-in local hook,
//! the way an embedder's custom wrapper binary would run it.

mod helpers;

use cmdhooks::interceptor::Interceptor;
use cmdhooks::wrapper::WrapperCommand;
use cmdhooks::HookPhase;
use helpers::TestHook;
use std::sync::Arc;
use tempfile::tempdir;

#[tokio::test]
async fn local_metadata_is_handed_to_the_remote_stage() {
    let dir = tempdir().unwrap();
    let socket = dir.path().join("ipc.sock");

    let remote = Arc::new(TestHook::new("remote", &["echo"]).with_remote());
    let interceptor = Interceptor::new(&socket, false, remote.clone());
    interceptor.start().await.unwrap();

    let local: Arc<dyn cmdhooks::Hook> = Arc::new(
        TestHook::new("local", &["echo"])
            .with_local()
            .with_local_metadata("local_check", "passed"),
    );
    let mut wrapper = WrapperCommand::new(Some(local));
    wrapper.set_socket_path(&socket);

    let code = wrapper
        .run(&helpers::command(&["echo", "handoff"]))
        .await
        .unwrap();
    assert_eq!(code, 0);

    let seen = remote.seen.lock().unwrap();
    assert_eq!(seen.len(), 2, "pre-run and post-run requests expected");
    assert_eq!(seen[0].phase, HookPhase::PreRun);
    assert_eq!(seen[1].phase, HookPhase::PostRun);
    for request in seen.iter() {
        assert_eq!(
            request.metadata.get("local_check"),
            Some(&serde_json::json!("passed")),
            "local metadata missing from {:?} request",
            request.phase
        );
    }
    assert_eq!(seen[1].exit_code, Some(0));
    assert!(seen[1].duration.is_some());
    assert!(seen[1].metadata.contains_key("stdout_file"));
    assert!(seen[1].metadata.contains_key("stderr_file"));
    assert!(seen[1].metadata.contains_key("execution_duration"));
    drop(seen);

    interceptor.stop().await;
}

#[tokio::test]
async fn local_denial_blocks_the_invocation() {
    let dir = tempdir().unwrap();
    let marker = dir.path().join("ran.txt");

    let local: Arc<dyn cmdhooks::Hook> = Arc::new(TestHook::new("deny", &["touch"]).with_local().block("touch"));
    let wrapper = WrapperCommand::new(Some(local));

    let err = wrapper
        .run(&helpers::command(&["touch", marker.to_str().unwrap()]))
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("process termination requested"));
    assert!(!marker.exists(), "denied program must not run");
}

#[tokio::test]
async fn local_denial_skips_the_remote_stage() {
    let dir = tempdir().unwrap();
    let socket = dir.path().join("ipc.sock");

    let remote = Arc::new(TestHook::new("remote", &["sleep"]).with_remote());
    let interceptor = Interceptor::new(&socket, false, remote.clone());
    interceptor.start().await.unwrap();

    let local: Arc<dyn cmdhooks::Hook> = Arc::new(TestHook::new("deny", &["sleep"]).with_local().block("sleep"));
    let mut wrapper = WrapperCommand::new(Some(local));
    wrapper.set_socket_path(&socket);

    wrapper
        .run(&helpers::command(&["sleep", "1"]))
        .await
        .unwrap_err();
    assert!(
        remote.seen.lock().unwrap().is_empty(),
        "remote stage must not run after a local exit verdict"
    );

    interceptor.stop().await;
}

#[tokio::test]
async fn unmatched_commands_skip_the_local_stage() {
    // The hook blocks curl but the invocation is echo, so the local
    // stage never runs and the command executes normally
    let local: Arc<dyn cmdhooks::Hook> = Arc::new(TestHook::new("curl-only", &["curl"]).with_local().block("curl"));
    let wrapper = WrapperCommand::new(Some(local));

    let code = wrapper
        .run(&helpers::command(&["echo", "untouched"]))
        .await
        .unwrap();
    assert_eq!(code, 0);
}

#[tokio::test]
async fn wildcard_commands_match_any_invocation() {
    let dir = tempdir().unwrap();
    let marker = dir.path().join("blocked.txt");

    let local: Arc<dyn cmdhooks::Hook> = Arc::new(TestHook::new("all", &["*"]).with_local().block("touch"));
    let wrapper = WrapperCommand::new(Some(local));

    wrapper
        .run(&helpers::command(&["touch", marker.to_str().unwrap()]))
        .await
        .unwrap_err();
    assert!(!marker.exists());
}

#[tokio::test]
async fn missing_program_reports_exit_one() {
    let wrapper = WrapperCommand::new(None);
    let code = wrapper
        .run(&helpers::command(&["cmdhooks-no-such-program-xyz"]))
        .await
        .unwrap();
    assert_eq!(code, 1);
}

#[tokio::test]
async fn real_exit_status_is_returned_verbatim() {
    let wrapper = WrapperCommand::new(None);
    let code = wrapper
        .run(&helpers::command(&["bash", "-c", "exit 5"]))
        .await
        .unwrap();
    assert_eq!(code, 5);
}

#[tokio::test]
async fn remote_denial_fails_the_post_run_phase() {
    let dir = tempdir().unwrap();
    let socket = dir.path().join("ipc.sock");

    // Allow pre_run, deny post_run: the real program runs but the
    // wrapper still exits with a failure
    struct PostRunDeny {
        commands: Vec<String>,
    }

    impl cmdhooks::Hook for PostRunDeny {
        fn name(&self) -> &str {
            "post-run-deny"
        }
        fn commands(&self) -> &[String] {
            &self.commands
        }
        fn as_remote(&self) -> Option<&dyn cmdhooks::RemoteHook> {
            Some(self)
        }
    }

    #[async_trait::async_trait]
    impl cmdhooks::RemoteHook for PostRunDeny {
        async fn evaluate_remote(
            &self,
            request: &cmdhooks::Request,
        ) -> anyhow::Result<cmdhooks::Response> {
            Ok(cmdhooks::Response {
                exit: request.phase == HookPhase::PostRun,
                metadata: cmdhooks::Metadata::new(),
            })
        }
    }

    let interceptor = Interceptor::new(
        &socket,
        false,
        Arc::new(PostRunDeny {
            commands: vec!["echo".to_string()],
        }),
    );
    interceptor.start().await.unwrap();

    let mut exit_signal = interceptor.exit_signal();
    let mut wrapper = WrapperCommand::new(None);
    wrapper.set_socket_path(&socket);

    let err = wrapper
        .run(&helpers::command(&["echo", "done"]))
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("process termination requested"));

    // Post-run denial aborts the session, symmetric with pre-run
    tokio::time::timeout(
        std::time::Duration::from_secs(1),
        exit_signal.wait_for(|raised| *raised),
    )
    .await
    .expect("abort signal not raised")
    .unwrap();

    interceptor.stop().await;
}
