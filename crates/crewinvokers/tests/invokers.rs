use crewcore::{
    Agent, AgentInvoker, EventBus, ExecutionMode, ExecutionStatus, InvocationContext, InvokeError,
    TaskSpec, Workflow,
};
use crewinvokers::{register_all, HttpInvoker, HttpSettings};
use crewruntime::{CrewRuntime, InvokerRegistry, RuntimeConfig};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Serve one canned HTTP response per connection and keep the raw requests
async fn mock_endpoint(status: u16, body: serde_json::Value) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&seen);

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap_or(0);
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                if request_complete(&raw) {
                    break;
                }
            }
            captured
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(&raw).to_string());

            let payload = body.to_string();
            let response = format!(
                "HTTP/1.1 {} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                payload.len(),
                payload
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    (format!("http://{}/v1", addr), seen)
}

fn request_complete(raw: &[u8]) -> bool {
    let text = String::from_utf8_lossy(raw);
    let Some(split) = text.find("\r\n\r\n") else {
        return false;
    };
    let length = text[..split]
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    raw.len() >= split + 4 + length
}

fn context(input: serde_json::Value) -> InvocationContext {
    let bus = EventBus::new(16);
    let execution_id = uuid::Uuid::new_v4();
    let agent = Agent::new("Data Analyst", "Sales analyst", "Find trends")
        .with_backstory("Ten years in retail analytics");
    InvocationContext {
        execution_id,
        run_id: uuid::Uuid::new_v4(),
        task_id: "analyze".to_string(),
        task_name: "Analyze".to_string(),
        attempt: 1,
        iteration: 0,
        agent,
        input,
        workflow_input: json!({"quarter": "Q3"}),
        upstream: BTreeMap::from([("collect".to_string(), json!({"rows": 120}))]),
        deadline: Duration::from_secs(5),
        events: bus.create_emitter(execution_id, "analyze".to_string()),
        cancellation: CancellationToken::new(),
    }
}

#[tokio::test]
async fn test_http_invoker_sends_persona_and_context() {
    let (base, seen) = mock_endpoint(
        200,
        json!({
            "choices": [{"message": {"role": "assistant", "content": "Sales rose 4%"}, "finish_reason": "stop"}],
            "usage": {"total_tokens": 42}
        }),
    )
    .await;
    let invoker = HttpInvoker::new(HttpSettings::new(base).with_api_key("secret"));

    let result = invoker.invoke(context(json!("summarize the quarter"))).await.unwrap();
    assert_eq!(result.tokens_used, 42);
    assert_eq!(result.output["response"], "Sales rose 4%");
    assert_eq!(result.output["finish_reason"], "stop");

    let requests = seen.lock().unwrap();
    let request = &requests[0];
    assert!(request.starts_with("POST /v1/chat/completions"));
    assert!(request.to_lowercase().contains("authorization: bearer secret"));
    assert!(request.contains("llama-4-maverick-17b-128e-instruct"));
    assert!(request.contains("Ten years in retail analytics"));
    assert!(request.contains("previous_results"));
    assert!(request.contains("summarize the quarter"));
}

#[tokio::test]
async fn test_http_invoker_classifies_failures() {
    let (base, _) = mock_endpoint(503, json!({"error": "overloaded"})).await;
    let err = HttpInvoker::new(HttpSettings::new(base))
        .invoke(context(json!("go")))
        .await
        .unwrap_err();
    assert!(matches!(err, InvokeError::Dispatch(_)));

    let (base, _) = mock_endpoint(400, json!({"error": "unknown model"})).await;
    let err = HttpInvoker::new(HttpSettings::new(base))
        .invoke(context(json!("go")))
        .await
        .unwrap_err();
    assert!(matches!(err, InvokeError::Task(ref m) if m.contains("unknown model")));
}

#[tokio::test]
async fn test_empty_completion_reports_spent_tokens() {
    let (base, _) = mock_endpoint(200, json!({"choices": [], "usage": {"total_tokens": 9}})).await;
    let err = HttpInvoker::new(HttpSettings::new(base))
        .invoke(context(json!("go")))
        .await
        .unwrap_err();
    assert!(!err.is_transient());
    assert_eq!(err.tokens_used(), 9);
    assert!(err.to_string().contains("no choices"));
}

#[tokio::test]
async fn test_unreachable_endpoint_is_transient() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = HttpInvoker::new(HttpSettings::new(format!("http://{}", addr)))
        .invoke(context(json!("go")))
        .await
        .unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_echo_runs_a_workflow_end_to_end() {
    let mut registry = InvokerRegistry::new();
    register_all(&mut registry, None);
    assert_eq!(registry.list_invokers(), vec!["echo".to_string()]);

    let runtime = CrewRuntime::in_memory(Arc::new(registry), RuntimeConfig::default());
    let writer = runtime
        .create_agent(Agent::new("Writer", "Content writer", "Write posts"))
        .await
        .unwrap();
    let editor = runtime
        .create_agent(Agent::new("Editor", "Copy editor", "Polish posts"))
        .await
        .unwrap();
    let workflow = runtime
        .create_workflow(
            Workflow::new("Blog Post Creation", ExecutionMode::Linear)
                .with_task(TaskSpec::new("draft", writer.id).with_input(json!("draft the post")))
                .with_task(TaskSpec::new("edit", editor.id).depends_on("draft")),
        )
        .await
        .unwrap();

    let started = runtime.run(workflow.id, json!({})).await.unwrap();
    let mut execution = started;
    for _ in 0..200 {
        execution = runtime.get_execution(execution.id).await.unwrap();
        if execution.is_terminal() && execution.is_quiescent() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.completed_tasks, 2);
    assert!(execution.tokens_used > 0);
    let edit = execution.task_runs.iter().find(|r| r.task_id == "edit").unwrap();
    assert_eq!(
        edit.output.as_ref().unwrap()["upstream"]["draft"]["response"],
        "Content writer: draft the post"
    );
}

#[test]
fn test_http_is_default_when_configured() {
    let mut registry = InvokerRegistry::new();
    register_all(&mut registry, Some(HttpSettings::new("http://localhost:9/v1")));
    let agent = Agent::new("Writer", "Content writer", "Write posts");
    assert_eq!(registry.resolve(&agent).unwrap().name(), "http");
    assert_eq!(registry.list_invokers(), vec!["echo".to_string(), "http".to_string()]);
}
