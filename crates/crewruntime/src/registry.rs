use crewcore::{Agent, AgentInvoker};
use std::collections::HashMap;
use std::sync::Arc;

/// Metadata about an invoker
#[derive(Debug, Clone)]
pub struct InvokerMetadata {
    pub description: String,
    pub category: String,
}

impl Default for InvokerMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}

/// Registry of agent invocation capabilities.
///
/// Agents are routed by model: the longest registered model prefix wins,
/// otherwise the default invoker (the first one registered unless set).
pub struct InvokerRegistry {
    invokers: HashMap<String, Arc<dyn AgentInvoker>>,
    metadata: HashMap<String, InvokerMetadata>,
    routes: Vec<(String, String)>,
    default: Option<String>,
}

impl InvokerRegistry {
    pub fn new() -> Self {
        Self {
            invokers: HashMap::new(),
            metadata: HashMap::new(),
            routes: Vec::new(),
            default: None,
        }
    }

    pub fn register(&mut self, invoker: Arc<dyn AgentInvoker>) {
        self.register_with_metadata(invoker, InvokerMetadata::default());
    }

    pub fn register_with_metadata(&mut self, invoker: Arc<dyn AgentInvoker>, metadata: InvokerMetadata) {
        let name = invoker.name().to_string();
        tracing::info!("Registering invoker: {}", name);
        if self.default.is_none() {
            self.default = Some(name.clone());
        }
        self.metadata.insert(name.clone(), metadata);
        self.invokers.insert(name, invoker);
    }

    /// Send agents whose model starts with `model_prefix` to `invoker`
    pub fn route(&mut self, model_prefix: impl Into<String>, invoker: impl Into<String>) {
        self.routes.push((model_prefix.into(), invoker.into()));
        self.routes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    }

    pub fn set_default(&mut self, invoker: impl Into<String>) {
        self.default = Some(invoker.into());
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AgentInvoker>> {
        self.invokers.get(name).cloned()
    }

    /// Invoker responsible for an agent's model
    pub fn resolve(&self, agent: &Agent) -> Option<Arc<dyn AgentInvoker>> {
        let routed = self
            .routes
            .iter()
            .find(|(prefix, _)| agent.model.starts_with(prefix.as_str()))
            .map(|(_, name)| name.as_str());
        routed
            .or(self.default.as_deref())
            .and_then(|name| self.get(name))
    }

    pub fn list_invokers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.invokers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get_metadata(&self, name: &str) -> Option<InvokerMetadata> {
        self.metadata.get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.invokers.is_empty()
    }
}

impl Default for InvokerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crewcore::{Invocation, InvocationContext, InvokeError};

    struct Named(&'static str);

    #[async_trait]
    impl AgentInvoker for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn invoke(&self, _ctx: InvocationContext) -> Result<Invocation, InvokeError> {
            Ok(Invocation::new(serde_json::Value::Null, 0))
        }
    }

    #[test]
    fn routes_by_longest_prefix_then_default() {
        let mut registry = InvokerRegistry::new();
        registry.register(Arc::new(Named("echo")));
        registry.register(Arc::new(Named("http")));
        registry.register(Arc::new(Named("local")));
        registry.route("llama", "http");
        registry.route("llama-local", "local");

        let agent = |model: &str| Agent::new("a", "b", "c").with_model(model);
        assert_eq!(registry.resolve(&agent("llama-4-scout")).unwrap().name(), "http");
        assert_eq!(registry.resolve(&agent("llama-local-7b")).unwrap().name(), "local");
        assert_eq!(registry.resolve(&agent("gpt-oss")).unwrap().name(), "echo");

        registry.set_default("missing");
        assert!(registry.resolve(&agent("gpt-oss")).is_none());
        assert_eq!(registry.list_invokers(), vec!["echo", "http", "local"]);
    }
}
