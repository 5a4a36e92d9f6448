//! Registry of callable functions, addressable by structured name or tag.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::dynamic::{DynamicToolAdapter, DynamicToolProvider};
use super::schema::ToolSchema;
use super::tool::Tool;
use crate::error::RuntimeError;

/// A registered function: the tool that serves it plus its schema.
#[derive(Clone)]
pub struct RegisteredFunction {
    pub tool: Arc<dyn Tool>,
    pub schema: ToolSchema,
}

impl std::fmt::Debug for RegisteredFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredFunction")
            .field("tool", &self.tool.name())
            .field("function", &self.schema.name)
            .finish()
    }
}

#[derive(Default)]
struct Inner {
    by_name: BTreeMap<String, RegisteredFunction>,
    /// tag -> structured name
    by_tag: BTreeMap<String, String>,
}

/// Shared, read-mostly registry of tools for a run.
///
/// Cloning the `Arc` around a registry shares it; registering through any
/// handle makes the function visible to the next provider call.
#[derive(Default)]
pub struct ToolRegistry {
    inner: RwLock<Inner>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("ToolRegistry")
            .field("functions", &inner.by_name.keys().collect::<Vec<_>>())
            .field("tags", &inner.by_tag.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool's functions, or only `functions` when given.
    ///
    /// Returns how many functions were registered. A structured name or tag
    /// that is already taken is rebound to the new function.
    pub fn register(
        &self,
        tool: Arc<dyn Tool>,
        functions: Option<&[&str]>,
    ) -> Result<usize, RuntimeError> {
        let mut schemas = tool.schemas();
        if let Some(wanted) = functions {
            if let Some(unknown) = wanted
                .iter()
                .find(|name| !schemas.iter().any(|s| s.name == **name))
            {
                return Err(RuntimeError::Configuration(format!(
                    "tool '{}' has no function '{unknown}'",
                    tool.name()
                )));
            }
            schemas.retain(|s| wanted.contains(&s.name.as_str()));
        }

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let count = schemas.len();
        for schema in schemas {
            inner.insert(RegisteredFunction {
                tool: tool.clone(),
                schema,
            });
        }
        tracing::debug!(tool = tool.name(), functions = count, "tool registered");
        Ok(count)
    }

    /// Discover tools from an external protocol adapter and register them.
    pub async fn register_dynamic(
        &self,
        provider: Arc<dyn DynamicToolProvider>,
    ) -> Result<usize, RuntimeError> {
        let discovered = provider.list_tools().await?;
        let mut count = 0;
        for schema in discovered {
            let adapter = DynamicToolAdapter::new(provider.clone(), schema);
            count += self.register(Arc::new(adapter), None)?;
        }
        tracing::debug!(
            provider = provider.provider_name(),
            functions = count,
            "dynamic tools registered"
        );
        Ok(count)
    }

    pub fn lookup_by_structured_name(&self, name: &str) -> Option<RegisteredFunction> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_name
            .get(name)
            .cloned()
    }

    pub fn lookup_by_tag(&self, tag: &str) -> Option<RegisteredFunction> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let name = inner.by_tag.get(tag)?;
        inner.by_name.get(name).cloned()
    }

    /// Function definitions for every registered function, ordered by name.
    pub fn all_structured_schemas(&self) -> Vec<serde_json::Value> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_name
            .values()
            .map(|f| f.schema.function_definition())
            .collect()
    }

    /// Usage examples for every function reachable by tag, ordered by tag.
    pub fn all_tagged_examples(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .by_tag
            .values()
            .filter_map(|name| inner.by_name.get(name))
            .filter_map(|f| f.schema.tagged.as_ref())
            .map(|t| t.example.clone())
            .filter(|example| !example.is_empty())
            .collect()
    }

    /// Every tag currently bound.
    pub fn tag_names(&self) -> Vec<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_tag
            .keys()
            .cloned()
            .collect()
    }

    /// System-prompt section teaching the model the tagged syntax.
    pub fn tagged_prompt_section(&self) -> Option<String> {
        let examples = self.all_tagged_examples();
        if examples.is_empty() {
            return None;
        }
        let mut section = String::from(
            "In this environment you can call tools by writing tagged blocks in your reply. \
             Use exactly the formats below.\n\n<tool_examples>\n",
        );
        for example in examples {
            section.push_str(&example);
            section.push('\n');
        }
        section.push_str("</tool_examples>");
        Some(section)
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_name
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Inner {
    fn insert(&mut self, function: RegisteredFunction) {
        let name = function.schema.name.clone();
        let new_tag = function.schema.tagged.as_ref().map(|t| t.tag_name.clone());

        if let Some(previous) = self.by_name.get(&name) {
            tracing::warn!(
                function = %name,
                previous_tool = previous.tool.name(),
                tool = function.tool.name(),
                "structured name already registered; replacing"
            );
            let stale_tag = previous
                .schema
                .tagged
                .as_ref()
                .map(|t| t.tag_name.clone())
                .filter(|old| Some(old) != new_tag.as_ref());
            if let Some(old) = stale_tag {
                if self.by_tag.get(&old) == Some(&name) {
                    self.by_tag.remove(&old);
                }
            }
        }

        if let Some(tag) = new_tag {
            if let Some(previous) = self.by_tag.get(&tag).filter(|p| **p != name) {
                tracing::warn!(
                    tag = %tag,
                    previous_function = %previous,
                    function = %name,
                    "tag already registered; replacing"
                );
            }
            self.by_tag.insert(tag, name.clone());
        }

        self.by_name.insert(name, function);
    }
}
