//! Standard invoker library
//!
//! Built-in capabilities that carry a task's input through an agent

mod echo;
mod http;

pub use echo::EchoInvoker;
pub use http::{HttpInvoker, HttpSettings};
use crewruntime::{InvokerMetadata, InvokerRegistry};

use std::sync::Arc;

/// Register all standard invokers with a registry.
///
/// `echo` is always available. `http` is registered and becomes the default
/// when an LLM endpoint is configured.
pub fn register_all(registry: &mut InvokerRegistry, http: Option<HttpSettings>) {
    registry.register_with_metadata(
        Arc::new(EchoInvoker::new()),
        InvokerMetadata {
            description: "Answers offline by echoing the task input".to_string(),
            category: "local".to_string(),
        },
    );
    if let Some(settings) = http {
        registry.register_with_metadata(
            Arc::new(HttpInvoker::new(settings)),
            InvokerMetadata {
                description: "OpenAI-compatible chat completions endpoint".to_string(),
                category: "llm".to_string(),
            },
        );
        registry.set_default("http");
    }
}
