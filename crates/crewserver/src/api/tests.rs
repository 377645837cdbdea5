use super::*;
use actix_web::{http::StatusCode, test, App};
use crewruntime::{InvokerRegistry, RuntimeConfig};
use serde_json::{json, Value};
use std::time::Duration;

fn state() -> web::Data<AppState> {
    let mut registry = InvokerRegistry::new();
    crewinvokers::register_all(&mut registry, None);
    web::Data::new(AppState {
        runtime: Arc::new(CrewRuntime::in_memory(
            Arc::new(registry),
            RuntimeConfig::default(),
        )),
    })
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(App::new().app_data($state.clone()).configure(configure)).await
    };
}

#[actix_web::test]
async fn test_health_reports_invokers() {
    let state = state();
    let app = app!(state);

    let body: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get().uri("/health").to_request(),
    )
    .await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["invokers"], json!(["echo"]));
}

#[actix_web::test]
async fn test_agent_crud_and_filters() {
    let state = state();
    let app = app!(state);

    let created = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/agents")
            .set_json(json!({"name": "Content Writer", "role": "Creative writer", "goal": "Write posts"}))
            .to_request(),
    )
    .await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let agent: Value = test::read_body_json(created).await;
    let id = agent["id"].as_str().unwrap().to_string();
    assert_eq!(agent["model"], "llama-4-maverick-17b-128e-instruct");

    let invalid = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/agents")
            .set_json(json!({"name": "", "role": "x", "goal": "y"}))
            .to_request(),
    )
    .await;
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

    let deactivated = test::call_service(
        &app,
        test::TestRequest::post()
            .uri(&format!("/api/agents/{}/deactivate", id))
            .to_request(),
    )
    .await;
    assert_eq!(deactivated.status(), StatusCode::OK);

    let page: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get()
            .uri("/api/agents?status=inactive&search=writer")
            .to_request(),
    )
    .await;
    assert_eq!(page["total"], 1);
    assert!(page["next_cursor"].is_null());

    let bad_cursor = test::call_service(
        &app,
        test::TestRequest::get().uri("/api/agents?cursor=nope").to_request(),
    )
    .await;
    assert_eq!(bad_cursor.status(), StatusCode::BAD_REQUEST);

    let deleted = test::call_service(
        &app,
        test::TestRequest::delete()
            .uri(&format!("/api/agents/{}", id))
            .to_request(),
    )
    .await;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let missing = test::call_service(
        &app,
        test::TestRequest::get()
            .uri(&format!("/api/agents/{}", id))
            .to_request(),
    )
    .await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(missing).await;
    assert_eq!(body["kind"], "not_found");
}

#[actix_web::test]
async fn test_run_workflow_and_read_results() {
    let state = state();
    let app = app!(state);

    let agent: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::post()
            .uri("/api/agents")
            .set_json(json!({"name": "Analyst", "role": "Data analyst", "goal": "Find trends"}))
            .to_request(),
    )
    .await;
    let agent_id = agent["id"].as_str().unwrap();

    let cyclic = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/workflows")
            .set_json(json!({
                "name": "Broken",
                "mode": {"type": "parallel"},
                "tasks": [
                    {"id": "a", "name": "A", "agent_id": agent_id, "depends_on": ["b"]},
                    {"id": "b", "name": "B", "agent_id": agent_id, "depends_on": ["a"]}
                ]
            }))
            .to_request(),
    )
    .await;
    assert_eq!(cyclic.status(), StatusCode::BAD_REQUEST);

    let workflow: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::post()
            .uri("/api/workflows")
            .set_json(json!({
                "name": "Data Analysis Pipeline",
                "mode": {"type": "linear"},
                "tasks": [
                    {"id": "collect", "name": "Collect", "agent_id": agent_id, "input": "gather sales"},
                    {"id": "report", "name": "Report", "agent_id": agent_id, "depends_on": ["collect"]}
                ]
            }))
            .to_request(),
    )
    .await;
    let workflow_id = workflow["id"].as_str().unwrap().to_string();
    assert_eq!(workflow["version"], 1);

    let started = test::call_service(
        &app,
        test::TestRequest::post()
            .uri(&format!("/api/workflows/{}/run", workflow_id))
            .to_request(),
    )
    .await;
    assert_eq!(started.status(), StatusCode::ACCEPTED);
    let execution: Value = test::read_body_json(started).await;
    let execution_id = execution["id"].as_str().unwrap().to_string();

    let mut status = Value::Null;
    for _ in 0..200 {
        let current: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get()
                .uri(&format!("/api/executions/{}", execution_id))
                .to_request(),
        )
        .await;
        status = current["status"].clone();
        if status == "completed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, "completed");

    let log: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get()
            .uri(&format!("/api/executions/{}/log", execution_id))
            .to_request(),
    )
    .await;
    assert!(log.as_array().unwrap().len() >= 2);

    let metrics: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get()
            .uri(&format!("/api/executions/{}/metrics", execution_id))
            .to_request(),
    )
    .await;
    assert_eq!(metrics["total_runs"], 2);
    assert_eq!(metrics["completed_runs"], 2);
    assert_eq!(metrics["success_rate"], 100.0);

    let cancel = test::call_service(
        &app,
        test::TestRequest::post()
            .uri(&format!("/api/executions/{}/cancel", execution_id))
            .to_request(),
    )
    .await;
    assert_eq!(cancel.status(), StatusCode::CONFLICT);

    let summary: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get().uri("/api/stats/summary?days=7").to_request(),
    )
    .await;
    assert_eq!(summary["total"], 1);
    assert_eq!(summary["by_day"].as_array().unwrap().len(), 7);

    let paused = test::call_service(
        &app,
        test::TestRequest::post()
            .uri(&format!("/api/workflows/{}/pause", workflow_id))
            .to_request(),
    )
    .await;
    assert_eq!(paused.status(), StatusCode::OK);
    let blocked = test::call_service(
        &app,
        test::TestRequest::post()
            .uri(&format!("/api/workflows/{}/run", workflow_id))
            .set_json(json!({"input": {"quarter": "Q3"}}))
            .to_request(),
    )
    .await;
    assert_eq!(blocked.status(), StatusCode::CONFLICT);
}

#[actix_web::test]
async fn test_agent_prompt_and_capabilities() {
    let state = state();
    let app = app!(state);

    let agent: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::post()
            .uri("/api/agents")
            .set_json(json!({
                "name": "Research Assistant",
                "role": "Researcher",
                "goal": "Summarize sources",
                "capabilities": ["web_research"],
                "tools": ["search"]
            }))
            .to_request(),
    )
    .await;
    let id = agent["id"].as_str().unwrap().to_string();

    let sheet: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get()
            .uri(&format!("/api/agents/{}/capabilities", id))
            .to_request(),
    )
    .await;
    assert_eq!(sheet["capabilities"], json!(["web_research"]));
    assert_eq!(sheet["tools"], json!(["search"]));

    let result: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::post()
            .uri(&format!("/api/agents/{}/test", id))
            .set_json(json!({"input": "find rust articles"}))
            .to_request(),
    )
    .await;
    assert_eq!(result["success"], true);
    assert_eq!(result["output"]["response"], "Researcher: find rust articles");
    assert!(result["tokens_used"].as_u64().unwrap() > 0);

    let empty = test::call_service(
        &app,
        test::TestRequest::post()
            .uri(&format!("/api/agents/{}/test", id))
            .set_json(json!({"input": "  "}))
            .to_request(),
    )
    .await;
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
}
