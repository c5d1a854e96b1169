//! Task dispatch
//!
//! The language model picks a task by name; the registry routes the task
//! content to its handler and returns the text to speak.

mod handlers;
mod loader;

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

pub use handlers::{NormalTask, ThoughtTask};
pub use loader::{TaskManifest, TemplateTask, discover_tasks};

use crate::Result;
use crate::chat::TaskContent;

/// A task the language model can select
pub trait TaskHandler: Send + Sync {
    /// Name the model uses as the reply `type`
    fn name(&self) -> &str;

    /// What the task does
    fn description(&self) -> &str;

    /// When the model should choose it
    fn trigger(&self) -> &str;

    /// Example reply selecting it
    fn example(&self) -> &str;

    /// Produce the reply text for `content`
    ///
    /// # Errors
    ///
    /// Returns error if the content is missing what the task needs
    fn execute(&self, content: &TaskContent) -> Result<String>;
}

/// Registered task handlers by name
#[derive(Default, Clone)]
pub struct TaskRegistry {
    handlers: BTreeMap<String, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in tasks
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(NormalTask));
        registry.register(Arc::new(ThoughtTask));
        registry
    }

    /// Add a handler, replacing any with the same name
    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        let name = handler.name().to_string();
        if self.handlers.insert(name.clone(), handler).is_some() {
            tracing::warn!(task = %name, "task handler replaced");
        }
    }

    /// Register every task manifest found under `dir`
    ///
    /// Manifests never replace a built-in task. Returns how many loaded.
    pub fn load_dir(&mut self, dir: &Path) -> usize {
        let mut loaded = 0;
        for task in discover_tasks(dir) {
            if self.handlers.contains_key(task.name()) {
                tracing::warn!(task = %task.name(), "task name already registered, skipping manifest");
                continue;
            }
            self.register(Arc::new(task));
            loaded += 1;
        }
        loaded
    }

    /// Handler registered as `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn TaskHandler>> {
        self.handlers.get(name)
    }

    /// Registered task names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the task named `kind`
    ///
    /// Never fails: unknown tasks and handler errors become a descriptive
    /// reply so the user still hears something.
    #[must_use]
    pub fn dispatch(&self, kind: &str, content: &TaskContent) -> String {
        let Some(handler) = self.handlers.get(kind) else {
            tracing::warn!(task = %kind, "unknown task type");
            return format!("Unknown task type: {kind}");
        };

        match handler.execute(content) {
            Ok(reply) => {
                tracing::debug!(task = %kind, "task executed");
                reply
            }
            Err(e) => {
                tracing::warn!(task = %kind, error = %e, "task failed");
                format!("Error executing task {kind}: {e}")
            }
        }
    }

    /// Base prompt followed by each task's description, trigger, and example
    #[must_use]
    pub fn system_prompt(&self, base: &str) -> String {
        let mut prompt = format!("{base}\n\nThe available tasks are:\n");
        for (name, handler) in &self.handlers {
            let _ = write!(
                prompt,
                "\nTask: {name}\nDescription: {}\nTrigger: {}\nExample: {}\n",
                handler.description(),
                handler.trigger(),
                handler.example()
            );
        }
        prompt
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatResponse;

    fn content(json: &str) -> TaskContent {
        ChatResponse::parse(json).unwrap().content
    }

    #[test]
    fn test_builtins_registered() {
        let registry = TaskRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["handle_normal", "handle_pensamento"]);
    }

    #[test]
    fn test_dispatch_normal_returns_answer() {
        let registry = TaskRegistry::with_builtins();
        let c = content(r#"{"type": "handle_normal", "content": {"question": "q", "answer": "Oi!"}}"#);
        assert_eq!(registry.dispatch("handle_normal", &c), "Oi!");
    }

    #[test]
    fn test_unknown_task_gets_fallback() {
        let registry = TaskRegistry::with_builtins();
        let reply = registry.dispatch("launch_rocket", &TaskContent::Text("go".to_string()));
        assert_eq!(reply, "Unknown task type: launch_rocket");
    }

    #[test]
    fn test_handler_error_becomes_reply() {
        let registry = TaskRegistry::with_builtins();
        let c = content(r#"{"type": "handle_pensamento", "content": {"other": 1}}"#);
        let reply = registry.dispatch("handle_pensamento", &c);
        assert!(reply.starts_with("Error executing task handle_pensamento"));
    }

    #[test]
    fn test_system_prompt_lists_tasks() {
        let prompt = TaskRegistry::with_builtins().system_prompt("Base.");
        assert!(prompt.starts_with("Base.\n\nThe available tasks are:"));
        assert!(prompt.contains("Task: handle_normal\n"));
        assert!(prompt.contains("Task: handle_pensamento\n"));
    }
}
