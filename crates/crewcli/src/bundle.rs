use anyhow::{anyhow, Context, Result};
use crewcore::{Agent, ExecutionMode, Predicate, TaskSpec, Workflow};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::path::Path;

/// Agents and the workflow that uses them, as stored in one JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    #[serde(default)]
    pub agents: Vec<Agent>,
    pub workflow: Workflow,
}

impl Bundle {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Agent definitions, the task graph and every agent reference
    pub fn validate(&self) -> Result<()> {
        for agent in &self.agents {
            agent
                .validate()
                .map_err(|e| anyhow!("agent '{}': {}", agent.name, e))?;
        }
        self.workflow.validate()?;

        let known: HashSet<_> = self.agents.iter().map(|a| a.id).collect();
        for task in &self.workflow.tasks {
            if !known.contains(&task.agent_id) {
                return Err(anyhow!(
                    "task '{}' references agent {} which is not in the bundle",
                    task.id,
                    task.agent_id
                ));
            }
        }
        Ok(())
    }

    /// Research, then a draft reviewed for approval
    pub fn example() -> Self {
        let researcher = Agent::new(
            "Research Assistant",
            "Research analyst",
            "Collect accurate sources on the topic",
        )
        .with_backstory("Former librarian who checks every citation");
        let writer = Agent::new(
            "Content Writer",
            "Creative writer",
            "Turn research into an engaging blog post",
        );

        let mut workflow = Workflow::new("Blog Post Creation", ExecutionMode::Conditional)
            .with_description("Researches a topic, drafts a post and publishes it when approved")
            .with_task(
                TaskSpec::new("research", researcher.id)
                    .with_name("Research topic")
                    .with_input(json!("Find three sources about the topic")),
            )
            .with_task(
                TaskSpec::new("draft", writer.id)
                    .with_name("Draft post")
                    .with_input(json!("Write a 500 word post from the research"))
                    .depends_on("research"),
            )
            .with_task(
                TaskSpec::new("publish", writer.id)
                    .with_name("Publish post")
                    .depends_on("draft")
                    .with_condition(Predicate::Exists {
                        task: "draft".to_string(),
                        path: "/response".to_string(),
                    }),
            );
        workflow.settings.max_parallel_tasks = Some(2);

        Self {
            agents: vec![researcher, writer],
            workflow,
        }
    }
}
