// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Proxied catalog management.
//!
//! A bridge task follows the manager's lifecycle events: when an instance
//! becomes Active its tool/resource/prompt catalogs are fetched and
//! installed under namespaced keys; when it leaves Active they are
//! removed. Proxied handlers resolve the owning instance's client at call
//! time, so a call against a demoted instance fails cleanly instead of
//! using a stale transport. Handlers hold only a weak reference to the
//! server state — the registry never keeps the hub alive.

use std::sync::{Arc, Weak};

use serde_json::Value;

use crate::events::HubEvent;
use crate::manager::ManagerEvent;
use crate::protocol::{ToolInfo, APPLICATION_ERROR};
use crate::server::registry::{
    proxied_name, proxied_uri, PromptEntry, PromptHandler, ResourceEntry, ResourceReader,
    ToolEntry, ToolHandler,
};
use crate::server::ServerState;

/// Spawn the bridge between manager lifecycle events and the registry.
pub fn spawn_proxy_bridge(state: Arc<ServerState>) {
    tokio::spawn(async move {
        let mut events = state.manager.subscribe_events();
        loop {
            let event = tokio::select! {
                _ = state.shutdown.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(ManagerEvent::InstanceActive { id }) => {
                    install_catalogs(&state, &id).await;
                }
                Ok(ManagerEvent::InstanceInactive { id, reason }) => {
                    remove_catalogs(&state, &id, &reason).await;
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "proxy bridge lagged, resyncing registry");
                    resync(&state).await;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Fetch an Active instance's catalogs and install namespaced entries.
pub async fn install_catalogs(state: &Arc<ServerState>, id: &str) {
    let Some(client) = state.manager.get_instance_client(id).await else {
        // Already demoted between the event and now.
        return;
    };
    let cancel = &state.shutdown;

    let tools = client.list_tools(cancel).await.unwrap_or_else(|e| {
        tracing::warn!(instance_id = %id, err = %e, "tools/list failed during proxy install");
        Vec::new()
    });
    let resources = client.list_resources(cancel).await.unwrap_or_else(|e| {
        tracing::warn!(instance_id = %id, err = %e, "resources/list failed during proxy install");
        Vec::new()
    });
    let prompts = client.list_prompts(cancel).await.unwrap_or_else(|e| {
        tracing::warn!(instance_id = %id, err = %e, "prompts/list failed during proxy install");
        Vec::new()
    });
    tracing::info!(
        instance_id = %id,
        tools = tools.len(),
        resources = resources.len(),
        prompts = prompts.len(),
        "installing proxied catalogs"
    );

    let weak = Arc::downgrade(state);
    for tool in &tools {
        let entry = ToolEntry {
            info: ToolInfo {
                name: proxied_name(id, &tool.name),
                description: tool.description.clone(),
                input_schema: tool.input_schema.clone(),
            },
            handler: tool_handler(weak.clone(), id.to_owned(), tool.name.clone()),
            instance: Some(id.to_owned()),
        };
        state.registry.register_tool(entry).await;
    }
    for resource in &resources {
        let mut info = resource.clone();
        info.uri = proxied_uri(id, &resource.uri);
        let entry = ResourceEntry {
            info,
            reader: resource_reader(weak.clone(), id.to_owned(), resource.uri.clone()),
            instance: Some(id.to_owned()),
        };
        state.registry.register_resource(entry).await;
    }
    for prompt in &prompts {
        let mut info = prompt.clone();
        info.name = proxied_name(id, &prompt.name);
        let entry = PromptEntry {
            info,
            handler: prompt_handler(weak.clone(), id.to_owned(), prompt.name.clone()),
            instance: Some(id.to_owned()),
        };
        state.registry.register_prompt(entry).await;
    }

    if !tools.is_empty() {
        state.bus.publish(HubEvent::ToolsChanged);
    }
    if !resources.is_empty() {
        state.bus.publish(HubEvent::ResourcesChanged);
    }
    if !prompts.is_empty() {
        state.bus.publish(HubEvent::PromptsChanged);
    }
    state.bus.publish(HubEvent::InstanceActive { instance: id.to_owned() });
}

/// Remove everything an instance exported.
pub async fn remove_catalogs(state: &Arc<ServerState>, id: &str, reason: &str) {
    let (tools, resources, prompts) = state.registry.unregister_instance(id).await;
    if tools {
        state.bus.publish(HubEvent::ToolsChanged);
    }
    if resources {
        state.bus.publish(HubEvent::ResourcesChanged);
    }
    if prompts {
        state.bus.publish(HubEvent::PromptsChanged);
    }
    if tools || resources || prompts {
        tracing::info!(instance_id = %id, reason, "removed proxied catalogs");
    }
    state
        .bus
        .publish(HubEvent::InstanceInactive { instance: id.to_owned(), reason: reason.to_owned() });
}

/// Restore the invariant that proxied entries mirror exactly the Active
/// instances. Used after event loss.
async fn resync(state: &Arc<ServerState>) {
    let Ok(instances) = state.manager.list_instances().await else {
        return;
    };
    let active: std::collections::HashSet<String> = instances
        .iter()
        .filter(|s| s.state == crate::manager::ConnectionState::Active)
        .map(|s| s.id.clone())
        .collect();

    for stale in state.registry.proxied_instances().await {
        if !active.contains(&stale) {
            remove_catalogs(state, &stale, "resync").await;
        }
    }
    let registered: std::collections::HashSet<String> =
        state.registry.proxied_instances().await.into_iter().collect();
    for id in active {
        if !registered.contains(&id) {
            install_catalogs(state, &id).await;
        }
    }
}

// -- Proxied handlers ----------------------------------------------------------

fn tool_handler(state: Weak<ServerState>, instance: String, name: String) -> ToolHandler {
    Arc::new(move |arguments: Value| {
        let state = state.clone();
        let instance = instance.clone();
        let name = name.clone();
        Box::pin(async move {
            let (state, client) = resolve(&state, &instance).await?;
            client
                .call_tool(&name, arguments, state.config.request_timeout(), &state.shutdown)
                .await
                .map_err(|e| e.to_rpc_error())
        })
    })
}

fn resource_reader(state: Weak<ServerState>, instance: String, uri: String) -> ResourceReader {
    Arc::new(move || {
        let state = state.clone();
        let instance = instance.clone();
        let uri = uri.clone();
        Box::pin(async move {
            let (state, client) = resolve(&state, &instance).await?;
            client
                .read_resource(&uri, state.config.request_timeout(), &state.shutdown)
                .await
                .map_err(|e| e.to_rpc_error())
        })
    })
}

fn prompt_handler(state: Weak<ServerState>, instance: String, name: String) -> PromptHandler {
    Arc::new(move |arguments: Option<Value>| {
        let state = state.clone();
        let instance = instance.clone();
        let name = name.clone();
        Box::pin(async move {
            let (state, client) = resolve(&state, &instance).await?;
            client
                .get_prompt(&name, arguments, state.config.request_timeout(), &state.shutdown)
                .await
                .map_err(|e| e.to_rpc_error())
        })
    })
}

/// Upgrade the state handle and resolve the owning instance's Active
/// client, or fail the call with an application error.
async fn resolve(
    state: &Weak<ServerState>,
    instance: &str,
) -> Result<(Arc<ServerState>, Arc<crate::client::Client>), (i64, String)> {
    let Some(state) = state.upgrade() else {
        return Err((APPLICATION_ERROR, "hub is shutting down".to_owned()));
    };
    let Some(client) = state.manager.get_instance_client(instance).await else {
        return Err((
            APPLICATION_ERROR,
            format!("instance not connected: {instance} (it may be restarting; retry shortly)"),
        ));
    };
    Ok((state, client))
}
