//! End-to-end cycles against a local HTTP planner and trace sink.
//!
//! Each test starts an axum server on an ephemeral port that plays both the
//! planning service (`/invocations`) and the telemetry sink (`/trace/push`),
//! then drives `Agent::from_config` through the real HTTP client.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent::io::config::AgentConfig;
use agent::orchestrator::{Agent, RunOptions};
use agent::test_support::TestProject;
use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::routing::post;
use serde_json::{Value, json};

type Pushed = Arc<Mutex<Vec<Value>>>;

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{addr}")
}

fn with_trace_sink(app: Router, pushed: &Pushed) -> Router {
    let pushed = pushed.clone();
    app.route(
        "/trace/push",
        post(move |Json(event): Json<Value>| {
            let pushed = pushed.clone();
            async move {
                pushed.lock().expect("lock").push(event);
                StatusCode::NO_CONTENT
            }
        }),
    )
}

fn agent_for(project: &TestProject, planner_url: &str, planning_timeout_secs: u64) -> Agent {
    let config = AgentConfig {
        planner_url: planner_url.to_string(),
        planning_timeout_secs,
        ..AgentConfig::default()
    };
    Agent::from_config(project.root(), config).expect("agent")
}

fn session(id: &str) -> RunOptions {
    RunOptions {
        session_id: Some(id.to_string()),
        planner_url: None,
    }
}

#[tokio::test]
async fn applies_plan_from_http_planner_and_pushes_trace() {
    let project = TestProject::new();
    project.write("package.json", "{\"name\":\"demo\"}");
    let seen: Pushed = Arc::default();
    let pushed: Pushed = Arc::default();

    let seen_requests = seen.clone();
    let app = Router::new().route(
        "/invocations",
        post(move |Json(body): Json<Value>| {
            let seen_requests = seen_requests.clone();
            async move {
                seen_requests.lock().expect("lock").push(body);
                Json(json!({
                    "assistant_message": "Added a hello page.",
                    "actions": [
                        {"type": "create_file", "path": "app/hello/page.tsx", "contents": "hi"}
                    ]
                }))
            }
        }),
    );
    let base = serve(with_trace_sink(app, &pushed)).await;
    let agent = agent_for(&project, &format!("{base}/"), 5);

    let response = agent.run_agent("add a hello page", session("http-1")).await;

    assert_eq!(response.error, None);
    assert_eq!(response.assistant, "Added a hello page.");
    assert_eq!(response.preview_path, "/hello");
    assert_eq!(project.read("app/hello/page.tsx").as_deref(), Some("hi"));

    let requests = seen.lock().expect("lock").clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["input"], "add a hello page");
    assert_eq!(requests[0]["session_id"], "http-1");
    assert_eq!(requests[0]["context"]["files"]["package.json"], "{\"name\":\"demo\"}");

    let events = pushed.lock().expect("lock").clone();
    let kinds: Vec<&str> = events.iter().filter_map(|e| e["kind"].as_str()).collect();
    assert_eq!(kinds.first(), Some(&"step"));
    assert!(kinds.contains(&"bedrock.call"));
    assert!(kinds.contains(&"fileOp.start"));
    assert_eq!(kinds.last(), Some(&"done"));
    assert!(events.iter().all(|e| e["session_id"] == "http-1"));
}

#[tokio::test]
async fn slow_planner_degrades_to_timeout() {
    let project = TestProject::new();
    let app = Router::new().route(
        "/invocations",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Json(json!({"actions": []}))
        }),
    );
    let base = serve(app).await;
    let agent = agent_for(&project, &base, 1);

    let response = agent.run_agent("slow", session("slow")).await;

    assert_eq!(response.error.as_deref(), Some("timeout"));
    assert!(response.plan.is_empty());
    assert_eq!(response.preview_path, "/");
}

#[tokio::test]
async fn non_success_status_fails_the_cycle() {
    let project = TestProject::new();
    let app = Router::new().route(
        "/invocations",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "model exploded") }),
    );
    let base = serve(app).await;
    let agent = agent_for(&project, &base, 5);

    let response = agent.run_agent("x", session("500")).await;

    let error = response.error.expect("error");
    assert!(error.contains("HTTP 500"), "{error}");
    assert!(error.contains("model exploded"), "{error}");
    assert!(response.plan.is_empty());
}

#[tokio::test]
async fn non_json_reply_fails_the_cycle() {
    let project = TestProject::new();
    let app = Router::new().route("/invocations", post(|| async { "not json" }));
    let base = serve(app).await;
    let agent = agent_for(&project, &base, 5);

    let response = agent.run_agent("x", session("garbage")).await;

    let error = response.error.expect("error");
    assert!(error.contains("not valid JSON"), "{error}");
}

/// The planner host has no `/trace/push` route; every push gets a 404.
#[tokio::test]
async fn missing_trace_sink_does_not_affect_result() {
    let project = TestProject::new();
    let app = Router::new().route(
        "/invocations",
        post(|| async {
            Json(json!({"actions": [{"type": "delete_file", "path": "gone.txt"}]}))
        }),
    );
    let base = serve(app).await;
    let agent = agent_for(&project, &base, 5);

    let response = agent.run_agent("remove it", session("no-sink")).await;

    assert_eq!(response.error, None);
    assert_eq!(response.logs, ["delete file gone.txt"]);
}

#[tokio::test]
async fn unreachable_planner_degrades() {
    let project = TestProject::new();
    let agent = agent_for(&project, "http://127.0.0.1:9", 5);

    let response = agent.run_agent("x", session("down")).await;

    let error = response.error.expect("error");
    assert!(error.starts_with("planner unreachable"), "{error}");
    assert_eq!(response.preview_path, "/");
}
