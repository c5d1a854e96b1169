//! Task manifest discovery and loading
//!
//! Each subdirectory holding a `TASK.toml` declares one task whose reply is
//! a template filled from the content object.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use super::TaskHandler;
use crate::chat::TaskContent;
use crate::{Error, Result};

/// `{field}` placeholders in reply templates
static PLACEHOLDER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").ok());

/// Contents of a `TASK.toml`
#[derive(Debug, Clone, Deserialize)]
pub struct TaskManifest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub trigger: String,
    #[serde(default)]
    pub example: String,
    /// Reply with `{field}` placeholders; `{content}` is the whole text payload
    pub reply: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

const fn default_enabled() -> bool {
    true
}

/// A task declared by a manifest
#[derive(Debug, Clone)]
pub struct TemplateTask {
    manifest: TaskManifest,
    path: PathBuf,
}

impl TemplateTask {
    /// Directory the manifest was loaded from
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fill the reply template from `content`
    ///
    /// # Errors
    ///
    /// Returns error if a placeholder has no matching field
    pub fn render(&self, content: &TaskContent) -> Result<String> {
        let Some(re) = PLACEHOLDER.as_ref() else {
            return Ok(self.manifest.reply.clone());
        };

        let mut out = String::with_capacity(self.manifest.reply.len());
        let mut last = 0;
        for caps in re.captures_iter(&self.manifest.reply) {
            let (Some(whole), Some(field)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let value = match (content, field.as_str()) {
                (TaskContent::Text(text), "content") => text.clone(),
                _ => content.field_text(field.as_str()).ok_or_else(|| {
                    Error::Task(format!("content has no '{}'", field.as_str()))
                })?,
            };
            out.push_str(&self.manifest.reply[last..whole.start()]);
            out.push_str(&value);
            last = whole.end();
        }
        out.push_str(&self.manifest.reply[last..]);
        Ok(out)
    }
}

impl TaskHandler for TemplateTask {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    fn description(&self) -> &str {
        &self.manifest.description
    }

    fn trigger(&self) -> &str {
        &self.manifest.trigger
    }

    fn example(&self) -> &str {
        &self.manifest.example
    }

    fn execute(&self, content: &TaskContent) -> Result<String> {
        self.render(content)
    }
}

/// Load tasks from a directory
///
/// Looks for subdirectories containing TASK.toml
#[must_use]
pub fn discover_tasks(tasks_dir: &Path) -> Vec<TemplateTask> {
    let mut tasks = Vec::new();

    if !tasks_dir.exists() {
        tracing::debug!(path = %tasks_dir.display(), "tasks directory does not exist");
        return tasks;
    }

    let entries = match std::fs::read_dir(tasks_dir) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(
                path = %tasks_dir.display(),
                error = %e,
                "failed to read tasks directory"
            );
            return tasks;
        }
    };

    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();

    for path in dirs {
        match load_task(&path) {
            Ok(Some(task)) => {
                tracing::info!(name = %task.manifest.name, "discovered task");
                tasks.push(task);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to load task");
            }
        }
    }

    tasks
}

fn load_task(dir: &Path) -> Result<Option<TemplateTask>> {
    let manifest_path = dir.join("TASK.toml");
    if !manifest_path.exists() {
        return Ok(None);
    }

    let manifest_content = std::fs::read_to_string(&manifest_path)?;
    let manifest: TaskManifest = toml::from_str(&manifest_content)?;

    if !manifest.enabled {
        tracing::debug!(name = %manifest.name, "task disabled, skipping");
        return Ok(None);
    }
    if manifest.name.trim().is_empty() {
        return Err(Error::Task("TASK.toml has an empty name".to_string()));
    }

    Ok(Some(TemplateTask {
        manifest,
        path: dir.to_path_buf(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_task(root: &Path, dir: &str, manifest: &str) {
        let task_dir = root.join(dir);
        fs::create_dir(&task_dir).unwrap();
        fs::write(task_dir.join("TASK.toml"), manifest).unwrap();
    }

    #[test]
    fn test_discover_empty_dir() {
        let dir = TempDir::new().unwrap();
        assert!(discover_tasks(dir.path()).is_empty());
        assert!(discover_tasks(&dir.path().join("missing")).is_empty());
    }

    #[test]
    fn test_discover_valid_task() {
        let dir = TempDir::new().unwrap();
        write_task(
            dir.path(),
            "weather",
            r#"
name = "handle_weather"
description = "Tells the weather"
trigger = "When asked about the weather, the type is 'handle_weather'."
example = "{'type': 'handle_weather', 'content': {'city': 'Recife', 'summary': 'sunny'}}"
reply = "Em {city} o tempo está {summary}."
"#,
        );

        let tasks = discover_tasks(dir.path());
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name(), "handle_weather");

        let content: TaskContent =
            serde_json::from_str(r#"{"city": "Recife", "summary": "ensolarado"}"#).unwrap();
        assert_eq!(
            tasks[0].execute(&content).unwrap(),
            "Em Recife o tempo está ensolarado."
        );
    }

    #[test]
    fn test_render_text_and_numbers() {
        let dir = TempDir::new().unwrap();
        write_task(dir.path(), "echo", "name = \"echo\"\nreply = \"Você disse: {content}\"\n");
        write_task(dir.path(), "area", "name = \"area\"\nreply = \"Área: {area}\"\n");
        let tasks = discover_tasks(dir.path());
        assert_eq!(tasks.len(), 2);

        let area = tasks.iter().find(|t| t.name() == "area").unwrap();
        let echo = tasks.iter().find(|t| t.name() == "echo").unwrap();
        assert_eq!(
            echo.execute(&TaskContent::Text("oi".to_string())).unwrap(),
            "Você disse: oi"
        );
        let content: TaskContent = serde_json::from_str(r#"{"area": 12.5}"#).unwrap();
        assert_eq!(area.execute(&content).unwrap(), "Área: 12.5");
        assert!(area.execute(&TaskContent::Text("x".to_string())).is_err());
    }

    #[test]
    fn test_skip_disabled_and_malformed() {
        let dir = TempDir::new().unwrap();
        write_task(
            dir.path(),
            "off",
            "name = \"off\"\nreply = \"x\"\nenabled = false\n",
        );
        write_task(dir.path(), "broken", "name = ");
        fs::create_dir(dir.path().join("no-manifest")).unwrap();
        assert!(discover_tasks(dir.path()).is_empty());
    }
}
