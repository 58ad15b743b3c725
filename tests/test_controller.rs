//! Controller construction and lifecycle tests
//!
//! Covers builder validation, socket-path generation, hook swapping,
//! and close idempotence.

mod helpers;

use cmdhooks::{execute_with_hook, CmdHooks};
use helpers::TestHook;
use std::sync::Arc;

#[test]
fn builder_requires_a_hook() {
    let err = CmdHooks::builder().build().unwrap_err();
    assert!(err.to_string().contains("must provide hook"));
}

#[test]
fn builder_rejects_an_empty_wrapper_command() {
    let err = CmdHooks::builder()
        .hook(TestHook::new("h", &[]))
        .wrapper_command(Vec::new())
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("wrapper command cannot be empty"));
}

#[test]
fn builder_rejects_blank_wrapper_command_elements() {
    let err = CmdHooks::builder()
        .hook(TestHook::new("h", &[]))
        .wrapper_command(vec!["cmdhooks".to_string(), "  ".to_string()])
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("element 1 is empty"));
}

#[test]
fn socket_path_is_generated_and_pre_removed() {
    let cmdhooks = CmdHooks::builder()
        .hook(TestHook::new("h", &[]))
        .build()
        .unwrap();

    let name = cmdhooks
        .socket_path()
        .file_name()
        .unwrap()
        .to_string_lossy()
        .to_string();
    assert!(name.starts_with("cmdhooks-"));
    assert!(name.ends_with(".sock"));
    // The placeholder is removed so the listener can bind
    assert!(!cmdhooks.socket_path().exists());
}

#[test]
fn explicit_socket_path_is_honored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fixed.sock");
    let cmdhooks = CmdHooks::builder()
        .hook(TestHook::new("h", &[]))
        .socket_path(&path)
        .build()
        .unwrap();
    assert_eq!(cmdhooks.socket_path(), path);
}

#[test]
fn set_hook_replaces_the_current_hook() {
    let cmdhooks = CmdHooks::builder()
        .hook(TestHook::new("first", &["echo"]))
        .build()
        .unwrap();
    assert_eq!(cmdhooks.hook().name(), "first");

    cmdhooks.set_hook(Arc::new(TestHook::new("second", &["curl"])));
    assert_eq!(cmdhooks.hook().name(), "second");
    assert_eq!(cmdhooks.hook().commands(), ["curl".to_string()]);
}

#[tokio::test]
async fn execute_rejects_an_empty_command() {
    let cmdhooks = CmdHooks::builder()
        .hook(TestHook::new("h", &[]))
        .build()
        .unwrap();
    let err = cmdhooks.execute(&[]).await.unwrap_err();
    assert!(err.to_string().contains("command cannot be empty"));
}

#[tokio::test]
async fn close_is_idempotent_and_removes_the_socket() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.sock");
    let cmdhooks = CmdHooks::builder()
        .hook(TestHook::new("h", &[]))
        .socket_path(&path)
        .build()
        .unwrap();

    cmdhooks.close().await;
    assert!(!path.exists());
    cmdhooks.close().await;
    assert!(!path.exists());
}

#[tokio::test]
async fn default_wrapper_command_requires_an_installed_binary() {
    // Without an explicit wrapper command the controller looks up the
    // installed cmdhooks binary, which a test environment lacks
    let err = execute_with_hook(
        &helpers::command(&["true"]),
        TestHook::new("h", &["echo"]).with_remote(),
    )
    .await
    .unwrap_err();
    assert!(format!("{err:#}").contains("cmdhooks binary not found in PATH"));
}
