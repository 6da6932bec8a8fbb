//! Behavioural contracts of the port traits, checked against the fakes.
//!
//! The pipeline relies on these semantics; a real adapter that breaks one of
//! them breaks a deploy.

use chrono::{Duration, Utc};
use cloud_bridge::fakes::{
    FakeImageBuilder, FakeRemoteHost, MemoryBucket, MemoryRegistry, MemoryStackProvider,
};
use cloud_bridge::*;
use std::path::PathBuf;

fn request(name: &str, db: &str) -> StackRequest {
    StackRequest {
        name: name.to_string(),
        template: PathBuf::from("infra/template.yaml"),
        parameters: vec![StackParameter::new("MongoDb", db)],
        capabilities: vec!["CAPABILITY_IAM".to_string()],
    }
}

fn target() -> RemoteTarget {
    RemoteTarget {
        host: "203.0.113.7".to_string(),
        user: "ec2-user".to_string(),
        identity_file: PathBuf::from("/keys/deploy"),
    }
}

fn launch(name: &str, port: u16) -> ContainerLaunch {
    ContainerLaunch {
        name: name.to_string(),
        image: "registry.example/app:1".to_string(),
        host_port: port,
        container_port: 8000,
        restart_policy: "always".to_string(),
        env_file: "/home/ec2-user/app.env".to_string(),
    }
}

// ===========================================================================
// StackProvider
// ===========================================================================

#[tokio::test]
async fn stack_absent_describes_as_none() {
    let stacks = MemoryStackProvider::new(&[]);
    assert!(stacks.describe_stack("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn stack_create_twice_is_rejected() {
    let stacks = MemoryStackProvider::new(&[]);
    stacks.create_stack(&request("s", "a")).await.unwrap();
    let err = stacks.create_stack(&request("s", "a")).await.unwrap_err();
    assert!(err.to_string().contains("already exists"));
}

#[tokio::test]
async fn stack_update_without_changes_reports_no_changes() {
    let stacks = MemoryStackProvider::new(&[("Out", "v")]);
    stacks.create_stack(&request("s", "a")).await.unwrap();

    assert_eq!(
        stacks.update_stack(&request("s", "a")).await.unwrap(),
        StackChange::NoChanges
    );
    assert_eq!(
        stacks.update_stack(&request("s", "b")).await.unwrap(),
        StackChange::Started
    );
}

#[tokio::test]
async fn stack_reports_in_progress_until_converged() {
    let stacks = MemoryStackProvider::new(&[]).converging_after(2);
    stacks.create_stack(&request("s", "a")).await.unwrap();

    let statuses: Vec<String> = poll_statuses(&stacks, 3).await;
    assert_eq!(
        statuses,
        vec!["CREATE_IN_PROGRESS", "CREATE_IN_PROGRESS", "CREATE_COMPLETE"]
    );
}

async fn poll_statuses(stacks: &MemoryStackProvider, n: usize) -> Vec<String> {
    let mut out = Vec::new();
    for _ in 0..n {
        let description = stacks.describe_stack("s").await.unwrap().unwrap();
        out.push(description.status.to_string());
    }
    out
}

// ===========================================================================
// ContainerRegistry / ImageBuilder
// ===========================================================================

#[tokio::test]
async fn registry_ensure_is_idempotent() {
    let registry = MemoryRegistry::new();
    assert_eq!(
        registry.ensure_repository("app").await.unwrap(),
        RepositoryState::Created
    );
    assert_eq!(
        registry.ensure_repository("app").await.unwrap(),
        RepositoryState::Existing
    );
}

#[tokio::test]
async fn push_requires_login() {
    let context = tempfile::tempdir().unwrap();
    let images = FakeImageBuilder::new();
    images.build(context.path(), "app:1").await.unwrap();
    images.tag("app:1", "registry.example/app:1").await.unwrap();

    assert!(images.push("registry.example/app:1").await.is_err());

    images.login("registry.example", "AWS", "token").await.unwrap();
    images.push("registry.example/app:1").await.unwrap();
    assert_eq!(images.pushed(), vec!["registry.example/app:1".to_string()]);
}

// ===========================================================================
// RemoteConnector / RemoteSession
// ===========================================================================

#[tokio::test]
async fn remote_name_and_port_conflicts_are_errors() {
    let host = FakeRemoteHost::new();
    host.seed_container("app", "old:1", 8000);
    let session = host.connect(&target()).await.unwrap();
    session
        .upload(b"K=V\n", "/home/ec2-user/app.env", 0o600)
        .await
        .unwrap();

    let err = session
        .run(&[RemoteCommand::RunContainer(launch("app", 9000))])
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::Conflict(_)));

    let err = session
        .run(&[RemoteCommand::RunContainer(launch("other", 8000))])
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::Conflict(_)));
}

#[tokio::test]
async fn remote_run_stops_at_first_failure() {
    let host = FakeRemoteHost::new();
    let session = host.connect(&target()).await.unwrap();

    // pull without a registry login fails; the container must not start
    let err = session
        .run(&[
            RemoteCommand::PullImage {
                image: "registry.example/app:1".to_string(),
            },
            RemoteCommand::RunContainer(launch("app", 8000)),
        ])
        .await;
    assert!(err.is_err());
    assert_eq!(host.executed().len(), 1);
    assert!(host.containers().is_empty());
}

#[tokio::test]
async fn unreachable_host_fails_on_connect() {
    let host = FakeRemoteHost::unreachable();
    let err = host.connect(&target()).await.err().unwrap();
    assert!(matches!(err, CloudError::Unreachable { .. }));
}

// ===========================================================================
// ObjectStore
// ===========================================================================

#[tokio::test]
async fn object_put_list_delete() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("index.html");
    std::fs::write(&file, "<html>").unwrap();

    let store = MemoryBucket::new();
    store.seed("site", "old.js", b"x", Utc::now() - Duration::days(1));
    store.put_object("site", "index.html", &file).await.unwrap();

    let listed = store.list_objects("site").await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].key, "index.html");
    assert_eq!(listed[0].size, 6);

    store.delete_object("site", "old.js").await.unwrap();
    store.delete_object("site", "never-existed").await.unwrap();
    assert_eq!(store.keys("site"), vec!["index.html".to_string()]);
}
