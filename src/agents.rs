//! Boundary to the external analysis agents.
//!
//! The agents' business logic (market analysis, content strategy, ...) is
//! out of this crate's hands: each one is an opaque task handler behind
//! `AgentTask`. The registry invokes a handler with a deadline and, on
//! success, publishes its output into the context cache under the agent's
//! namespace so later agents can build on it without recomputation.

use crate::context::ContextCache;
use crate::error::{NadimError, NadimResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Result shape returned to collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutput {
    pub output_data: Value,
    pub status: String,
    /// Seconds spent inside the handler
    pub execution_time: f64,
}

/// An opaque task handler provided by an external analysis agent.
#[async_trait]
pub trait AgentTask: Send + Sync {
    fn agent_id(&self) -> &str;
    fn task_type(&self) -> &str;
    async fn run(&self, input_data: Value) -> anyhow::Result<Value>;
}

/// Registry of collaborator task handlers, keyed by (agent id, task type).
pub struct AgentTaskRegistry {
    tasks: RwLock<HashMap<(String, String), Arc<dyn AgentTask>>>,
    context: Arc<ContextCache>,
    task_timeout: Duration,
}

impl AgentTaskRegistry {
    pub fn new(context: Arc<ContextCache>, task_timeout: Duration) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            context,
            task_timeout,
        }
    }

    pub fn register(&self, task: Arc<dyn AgentTask>) {
        let key = (task.agent_id().to_string(), task.task_type().to_string());
        tracing::info!(agent_id = %key.0, task_type = %key.1, "registered agent task");
        self.tasks.write().unwrap().insert(key, task);
    }

    pub fn registered_agents(&self) -> Vec<String> {
        let tasks = self.tasks.read().unwrap();
        let mut ids: Vec<String> = tasks.keys().map(|(agent, _)| agent.clone()).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Invoke a handler with the configured deadline. Success publishes the
    /// output into the agent's context namespace (allowlist compression
    /// applies there); a publish failure degrades the sharing, not the task.
    pub async fn invoke(
        &self,
        agent_id: &str,
        task_type: &str,
        input_data: Value,
    ) -> NadimResult<TaskOutput> {
        let task = {
            let tasks = self.tasks.read().unwrap();
            tasks
                .get(&(agent_id.to_string(), task_type.to_string()))
                .cloned()
        }
        .ok_or_else(|| NadimError::AgentNotFound(agent_id.to_string()))?;

        let started = Instant::now();
        let result = tokio::time::timeout(self.task_timeout, task.run(input_data)).await;
        let execution_time = started.elapsed().as_secs_f64();

        let output_data = match result {
            Err(_) => {
                return Err(NadimError::AgentTask {
                    agent_id: agent_id.to_string(),
                    reason: format!("timed out after {:.1}s", execution_time),
                })
            }
            Ok(Err(e)) => {
                return Err(NadimError::AgentTask {
                    agent_id: agent_id.to_string(),
                    reason: e.to_string(),
                })
            }
            Ok(Ok(output)) => output,
        };

        if let Err(e) = self.context.publish(agent_id, output_data.clone()) {
            tracing::warn!(agent_id, error = %e, "could not share task output into context");
        }

        Ok(TaskOutput {
            output_data,
            status: "success".to_string(),
            execution_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoAnalysis;

    #[async_trait]
    impl AgentTask for EchoAnalysis {
        fn agent_id(&self) -> &str {
            "m1"
        }
        fn task_type(&self) -> &str {
            "seo_audit"
        }
        async fn run(&self, input_data: Value) -> anyhow::Result<Value> {
            Ok(json!({"summary": "audit done", "input": input_data}))
        }
    }

    struct StuckAnalysis;

    #[async_trait]
    impl AgentTask for StuckAnalysis {
        fn agent_id(&self) -> &str {
            "m3"
        }
        fn task_type(&self) -> &str {
            "optimize"
        }
        async fn run(&self, _input_data: Value) -> anyhow::Result<Value> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(json!({}))
        }
    }

    fn registry(timeout: Duration) -> (Arc<ContextCache>, AgentTaskRegistry) {
        let context = Arc::new(ContextCache::new(16 * 1024));
        let registry = AgentTaskRegistry::new(Arc::clone(&context), timeout);
        (context, registry)
    }

    #[tokio::test]
    async fn test_invoke_publishes_output_to_context() {
        let (context, registry) = registry(Duration::from_secs(5));
        registry.register(Arc::new(EchoAnalysis));

        let output = registry
            .invoke("m1", "seo_audit", json!({"domain": "example.com"}))
            .await
            .unwrap();
        assert_eq!(output.status, "success");
        assert!(output.execution_time >= 0.0);

        // Later agents can read m1's published result.
        let shared = context.read("m1").unwrap();
        assert_eq!(shared["summary"], "audit done");
    }

    #[tokio::test]
    async fn test_unknown_agent_is_a_distinct_error() {
        let (_context, registry) = registry(Duration::from_secs(5));
        let err = registry.invoke("m9", "anything", json!({})).await.unwrap_err();
        assert!(matches!(err, NadimError::AgentNotFound(_)));
    }

    #[tokio::test]
    async fn test_task_timeout_is_reported() {
        let (_context, registry) = registry(Duration::from_millis(20));
        registry.register(Arc::new(StuckAnalysis));

        let err = registry.invoke("m3", "optimize", json!({})).await.unwrap_err();
        match err {
            NadimError::AgentTask { agent_id, reason } => {
                assert_eq!(agent_id, "m3");
                assert!(reason.contains("timed out"));
            }
            other => panic!("expected task error, got {other:?}"),
        }
    }
}
