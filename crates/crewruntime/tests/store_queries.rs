use crewcore::{
    Agent, AgentStatus, Cursor, ExecutionMode, ListQuery, Workflow,
};
use crewruntime::{MemoryStore, Store};

async fn seeded() -> MemoryStore {
    let store = MemoryStore::new();
    let agents = [
        ("Content Writer", "Creative writer", "llama-4-maverick-17b-128e-instruct", AgentStatus::Active),
        ("Data Analyst", "Analyses sales data", "llama-4-scout-17b-16e-instruct", AgentStatus::Active),
        ("Email Specialist", "Writes email campaigns", "llama-4-maverick-17b-128e-instruct", AgentStatus::Inactive),
        ("Research Assistant", "Finds sources", "qwen-3-32b", AgentStatus::Active),
    ];
    for (i, (name, role, model, status)) in agents.into_iter().enumerate() {
        let mut agent = Agent::new(name, role, "Help the team").with_model(model);
        agent.status = status;
        agent.created_at = agent.created_at - chrono::Duration::minutes(i as i64);
        store.put_agent(&agent).await.unwrap();
    }
    store
}

#[tokio::test]
async fn test_filters_are_a_conjunction() {
    let store = seeded().await;

    let writers = store
        .list_agents(&ListQuery::new().with_text("WRIT"))
        .await
        .unwrap();
    assert_eq!(writers.total, 2);

    let active_writers = store
        .list_agents(&ListQuery::new().with_text("writ").with_status("active"))
        .await
        .unwrap();
    assert_eq!(active_writers.total, 1);
    assert_eq!(active_writers.items[0].name, "Content Writer");

    let maverick = store
        .list_agents(
            &ListQuery::new()
                .with_kind("llama-4-maverick-17b-128e-instruct")
                .with_status("all"),
        )
        .await
        .unwrap();
    assert_eq!(maverick.total, 2);
}

#[tokio::test]
async fn test_pagination_is_newest_first_and_stable() {
    let store = seeded().await;

    let first = store
        .list_agents(&ListQuery::new().with_limit(3))
        .await
        .unwrap();
    assert_eq!(first.total, 4);
    assert_eq!(first.items.len(), 3);
    assert_eq!(first.items[0].name, "Content Writer");
    assert!(first
        .items
        .windows(2)
        .all(|w| w[0].created_at >= w[1].created_at));

    let cursor = first.next_cursor.unwrap();
    let parsed: Cursor = cursor.to_string().parse().unwrap();
    assert_eq!(parsed, cursor);

    let second = store
        .list_agents(&ListQuery::new().with_limit(3).after(parsed))
        .await
        .unwrap();
    assert_eq!(second.items.len(), 1);
    assert_eq!(second.items[0].name, "Research Assistant");
    assert!(second.next_cursor.is_none());
}

#[tokio::test]
async fn test_workflow_listing_by_mode_and_text() {
    let store = MemoryStore::new();
    let agent = Agent::new("Writer", "Writer", "Write");
    for (name, mode) in [
        ("Blog Post Creation", ExecutionMode::Linear),
        ("Data Analysis Pipeline", ExecutionMode::Parallel),
        ("Email Automation", ExecutionMode::Linear),
    ] {
        let workflow = Workflow::new(name, mode)
            .with_description(format!("{} for the marketing team", name))
            .with_task(crewcore::TaskSpec::new("step", agent.id));
        store.put_workflow(&workflow).await.unwrap();
    }

    let linear = store
        .list_workflows(&ListQuery::new().with_kind("linear"))
        .await
        .unwrap();
    assert_eq!(linear.total, 2);

    let marketing = store
        .list_workflows(&ListQuery::new().with_text("marketing").with_kind("parallel"))
        .await
        .unwrap();
    assert_eq!(marketing.total, 1);
    assert_eq!(marketing.items[0].name, "Data Analysis Pipeline");
}
