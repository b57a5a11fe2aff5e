// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tool/resource/prompt registry.
//!
//! Three ordered maps keyed by the exported (namespaced) name. Handlers
//! are first-class async closures so local and proxied entries dispatch
//! identically. Read locks are released before any handler runs — no lock
//! is ever held across I/O.

use std::future::Future;
use std::pin::Pin;

use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::protocol::{PromptInfo, ResourceInfo, ToolInfo};

/// Result of a handler: a JSON result or a `(code, message)` error pair.
pub type HandlerResult = Result<Value, (i64, String)>;
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

pub type ToolHandler = std::sync::Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;
pub type ResourceReader = std::sync::Arc<dyn Fn() -> HandlerFuture + Send + Sync>;
pub type PromptHandler = std::sync::Arc<dyn Fn(Option<Value>) -> HandlerFuture + Send + Sync>;

/// A registered tool. `instance` is `None` for hub-local entries.
#[derive(Clone)]
pub struct ToolEntry {
    pub info: ToolInfo,
    pub handler: ToolHandler,
    pub instance: Option<String>,
}

#[derive(Clone)]
pub struct ResourceEntry {
    pub info: ResourceInfo,
    pub reader: ResourceReader,
    pub instance: Option<String>,
}

#[derive(Clone)]
pub struct PromptEntry {
    pub info: PromptInfo,
    pub handler: PromptHandler,
    pub instance: Option<String>,
}

/// Namespaced key for a proxied tool or prompt.
pub fn proxied_name(instance: &str, name: &str) -> String {
    format!("{instance}/{name}")
}

/// Namespaced key for a proxied resource URI.
pub fn proxied_uri(instance: &str, uri: &str) -> String {
    format!("{instance}_{uri}")
}

/// Registry of everything the hub exports over `/mcp`.
#[derive(Default)]
pub struct Registry {
    tools: RwLock<IndexMap<String, ToolEntry>>,
    resources: RwLock<IndexMap<String, ResourceEntry>>,
    prompts: RwLock<IndexMap<String, PromptEntry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Tools -----------------------------------------------------------------

    /// Insert a tool keyed by its (already namespaced) name.
    pub async fn register_tool(&self, entry: ToolEntry) {
        self.tools.write().await.insert(entry.info.name.clone(), entry);
    }

    pub async fn get_tool(&self, name: &str) -> Option<ToolEntry> {
        self.tools.read().await.get(name).cloned()
    }

    pub async fn list_tools(&self) -> Vec<ToolInfo> {
        self.tools.read().await.values().map(|e| e.info.clone()).collect()
    }

    // -- Resources -------------------------------------------------------------

    pub async fn register_resource(&self, entry: ResourceEntry) {
        self.resources.write().await.insert(entry.info.uri.clone(), entry);
    }

    pub async fn get_resource(&self, uri: &str) -> Option<ResourceEntry> {
        self.resources.read().await.get(uri).cloned()
    }

    pub async fn has_resource(&self, uri: &str) -> bool {
        self.resources.read().await.contains_key(uri)
    }

    pub async fn list_resources(&self) -> Vec<ResourceInfo> {
        self.resources.read().await.values().map(|e| e.info.clone()).collect()
    }

    // -- Prompts ---------------------------------------------------------------

    pub async fn register_prompt(&self, entry: PromptEntry) {
        self.prompts.write().await.insert(entry.info.name.clone(), entry);
    }

    pub async fn get_prompt(&self, name: &str) -> Option<PromptEntry> {
        self.prompts.read().await.get(name).cloned()
    }

    pub async fn list_prompts(&self) -> Vec<PromptInfo> {
        self.prompts.read().await.values().map(|e| e.info.clone()).collect()
    }

    // -- Instance lifecycle ----------------------------------------------------

    /// Drop every entry owned by `instance`. Returns which of the three
    /// catalogs changed, in (tools, resources, prompts) order.
    pub async fn unregister_instance(&self, instance: &str) -> (bool, bool, bool) {
        let owned =
            |owner: &Option<String>| owner.as_deref().map(|i| i == instance).unwrap_or(false);

        let tools = {
            let mut map = self.tools.write().await;
            let before = map.len();
            map.retain(|_, e| !owned(&e.instance));
            map.len() != before
        };
        let resources = {
            let mut map = self.resources.write().await;
            let before = map.len();
            map.retain(|_, e| !owned(&e.instance));
            map.len() != before
        };
        let prompts = {
            let mut map = self.prompts.write().await;
            let before = map.len();
            map.retain(|_, e| !owned(&e.instance));
            map.len() != before
        };
        (tools, resources, prompts)
    }

    /// Instance IDs currently owning proxied entries (for diagnostics).
    pub async fn proxied_instances(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .tools
            .read()
            .await
            .values()
            .filter_map(|e| e.instance.clone())
            .collect();
        ids.extend(self.resources.read().await.values().filter_map(|e| e.instance.clone()));
        ids.extend(self.prompts.read().await.values().filter_map(|e| e.instance.clone()));
        ids.sort();
        ids.dedup();
        ids
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
