mod common;

use common::{TestApp, FAKE_OWNER};
use serde_json::Value;
use std::time::Duration;

#[tokio::test]
async fn build_without_configured_secret_returns_500() {
    let app = TestApp::spawn_with_secret(None).await;

    let response = app.post_build(&app.build_body("greet-1", 1)).await;

    assert_eq!(response.status().as_u16(), 500);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Configuration error");
    assert_eq!(body["details"], "Server configuration error");
}

#[tokio::test]
async fn build_with_wrong_secret_returns_401() {
    let app = TestApp::spawn().await;

    let mut body = app.build_body("greet-1", 1);
    body["secret"] = Value::from("not-the-secret");
    let response = app.post_build(&body).await;

    assert_eq!(response.status().as_u16(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Invalid secret");
    assert_eq!(app.llm.prompts().len(), 0);
}

#[tokio::test]
async fn build_with_invalid_fields_returns_422() {
    let app = TestApp::spawn().await;

    let mut body = app.build_body("greet-1", 1);
    body["email"] = Value::from("not-an-email");
    body["round"] = Value::from(0);
    let response = app.post_build(&body).await;

    assert_eq!(response.status().as_u16(), 422);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Validation error");
}

#[tokio::test]
async fn build_with_unsafe_task_id_returns_400() {
    let app = TestApp::spawn().await;

    let response = app.post_build(&app.build_body("../etc/passwd", 1)).await;

    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn malformed_json_is_rejected() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .post(format!("{}/build", app.address))
        .header("Content-Type", "application/json")
        .body("{\"email\": ")
        .send()
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn first_round_publishes_repo_and_notifies_evaluator() {
    let app = TestApp::spawn().await;

    let response = app.post_build(&app.build_body("greet-1", 1)).await;
    assert_eq!(response.status().as_u16(), 200);
    let accepted: Value = response.json().await.unwrap();
    assert_eq!(accepted["status"], "accepted");
    assert_eq!(accepted["task"], "greet-1");
    assert_eq!(accepted["round"], 1);

    let evaluations = app.wait_for_evaluations(1).await;
    let payload = &evaluations[0];
    assert_eq!(payload.email, "student@example.com");
    assert_eq!(payload.task, "greet-1");
    assert_eq!(payload.round, 1);
    assert_eq!(payload.nonce, "nonce-greet-1-1");
    assert_eq!(
        payload.repo_url,
        format!("https://github.com/{}/app-greet-1", FAKE_OWNER)
    );
    assert_eq!(
        payload.pages_url,
        format!("https://{}.github.io/app-greet-1/", FAKE_OWNER)
    );
    assert_eq!(Some(payload.commit_sha.clone()), app.github.head("app-greet-1"));

    let html = app.github.file("app-greet-1", "index.html").unwrap();
    assert!(html.starts_with("<!DOCTYPE html>"));
    assert!(html.contains("Version 1"));
    assert!(app
        .github
        .file("app-greet-1", "LICENSE")
        .unwrap()
        .starts_with("MIT License"));
    assert!(app
        .github
        .file("app-greet-1", "README.md")
        .unwrap()
        .contains("Create a page that shows a greeting"));
    assert!(app.github.pages_enabled("app-greet-1"));

    let prompt = &app.llm.prompts()[0];
    assert!(prompt.contains("Create a page that shows a greeting"));
    assert!(prompt.contains("- Page has an h1"));
    assert!(prompt.contains("Hello there"));
}

#[tokio::test]
async fn second_round_updates_the_same_repo() {
    let app = TestApp::spawn().await;

    app.post_build(&app.build_body("greet-2", 1)).await;
    let first = app.wait_for_evaluations(1).await[0].clone();

    let response = app.post_build(&app.build_body("greet-2", 2)).await;
    assert_eq!(response.status().as_u16(), 200);
    let evaluations = app.wait_for_evaluations(2).await;
    let second = &evaluations[1];

    assert_eq!(second.round, 2);
    assert_eq!(second.repo_url, first.repo_url);
    assert_eq!(second.pages_url, first.pages_url);
    assert_ne!(second.commit_sha, first.commit_sha);
    assert_eq!(app.github.repo_count(), 1);

    let html = app.github.file("app-greet-2", "index.html").unwrap();
    assert!(html.contains("Version 2"));

    let prompts = app.llm.prompts();
    assert!(prompts[1].contains("Revision (round 2)"));
    assert!(prompts[1].contains("<h1>Version 1</h1>"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn back_to_back_revision_runs_after_its_first_round() {
    let app = TestApp::spawn().await;
    let tasks: Vec<String> = (0..5).map(|i| format!("burst-{}", i)).collect();

    for task in &tasks {
        let first = app.post_build(&app.build_body(task, 1)).await;
        assert_eq!(first.status().as_u16(), 200);
        let second = app.post_build(&app.build_body(task, 2)).await;
        assert_eq!(second.status().as_u16(), 200);
    }

    let evaluations = app.wait_for_evaluations(tasks.len() * 2).await;
    for task in &tasks {
        let for_task: Vec<_> = evaluations.iter().filter(|e| &e.task == task).collect();
        let rounds: Vec<u32> = for_task.iter().map(|e| e.round).collect();
        assert_eq!(rounds, vec![1, 2], "task {}", task);
        assert_eq!(for_task[0].repo_url, for_task[1].repo_url);
    }
    assert_eq!(app.github.repo_count(), tasks.len());
}

#[tokio::test]
async fn repeated_first_round_reuses_existing_repo() {
    let app = TestApp::spawn().await;

    app.post_build(&app.build_body("greet-dup", 1)).await;
    let first = app.wait_for_evaluations(1).await[0].clone();

    let response = app.post_build(&app.build_body("greet-dup", 1)).await;
    assert_eq!(response.status().as_u16(), 200);
    let evaluations = app.wait_for_evaluations(2).await;
    let second = &evaluations[1];

    assert_eq!(app.github.repo_count(), 1);
    assert_eq!(second.round, 1);
    assert_eq!(second.repo_url, first.repo_url);
    assert_ne!(second.commit_sha, first.commit_sha);
    assert_eq!(second.commit_sha, app.github.head("app-greet-dup").unwrap());

    let html = app.github.file("app-greet-dup", "index.html").unwrap();
    assert!(html.contains("Version 2"));
}

#[tokio::test]
async fn revision_for_unknown_task_is_accepted_but_never_evaluated() {
    let app = TestApp::spawn().await;

    let response = app.post_build(&app.build_body("never-built", 2)).await;
    assert_eq!(response.status().as_u16(), 200);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(app.evaluations.received().is_empty());
    assert!(app.llm.prompts().is_empty());
    assert_eq!(app.github.repo_count(), 0);
}

#[tokio::test]
async fn evaluation_callback_carries_build_request_id() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .post(format!("{}/build", app.address))
        .header("x-request-id", "build-req-42")
        .json(&app.build_body("greet-3", 1))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.headers()["x-request-id"], "build-req-42");

    app.wait_for_evaluations(1).await;
    assert_eq!(
        app.evaluations.request_ids(),
        vec![Some("build-req-42".to_string())]
    );
}

#[tokio::test]
async fn build_endpoint_is_rate_limited() {
    let app = TestApp::spawn_with_rate_limit(1).await;

    let first = app.post_build(&app.build_body("greet-4", 1)).await;
    assert_eq!(first.status().as_u16(), 200);

    let second = app.post_build(&app.build_body("greet-5", 1)).await;
    assert_eq!(second.status().as_u16(), 429);
    assert!(second.headers().contains_key("retry-after"));

    // Only /build is limited
    assert_eq!(app.get("/health").await.status().as_u16(), 200);
}
