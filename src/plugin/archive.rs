//! Binds an [`ArchiveStore`] to the last-value archive hooks

use crate::archive::ArchiveStore;
use crate::bus::{EventBus, HandlerId, HookHandler, HookReturn};
use crate::error::Result;
use crate::events::{HookPayload, LAST_VALUE_GET, LAST_VALUE_SAVE};
use async_trait::async_trait;
use std::sync::Arc;

/// Answers `plugin/last-value/report/get` and persists on `.../save`
///
/// Store errors are logged and answered as "no archive"; they never fail
/// the run. With command prefixes configured, other commands are ignored.
#[derive(Clone)]
pub struct ArchivePlugin {
    store: Arc<dyn ArchiveStore>,
    command_prefixes: Vec<String>,
}

impl std::fmt::Debug for ArchivePlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchivePlugin")
            .field("command_prefixes", &self.command_prefixes)
            .finish()
    }
}

impl ArchivePlugin {
    pub fn new(store: Arc<dyn ArchiveStore>) -> Self {
        Self {
            store,
            command_prefixes: Vec::new(),
        }
    }

    /// Only archive commands starting with one of `prefixes`
    pub fn with_command_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.command_prefixes = prefixes;
        self
    }

    fn handles(&self, command: &str) -> bool {
        self.command_prefixes.is_empty()
            || self
                .command_prefixes
                .iter()
                .any(|prefix| command.starts_with(prefix.as_str()))
    }

    /// Subscribe the get and save handlers on `bus`
    pub fn register(self, bus: &EventBus) -> Result<Vec<HandlerId>> {
        let plugin = Arc::new(self);
        let get = bus.on(LAST_VALUE_GET, plugin.clone(), None)?;
        let save = bus.on(LAST_VALUE_SAVE, plugin, None)?;
        Ok(vec![get, save])
    }
}

#[async_trait]
impl HookHandler for ArchivePlugin {
    async fn handle(
        &self,
        _bus: &EventBus,
        _event: &str,
        payload: &mut HookPayload,
    ) -> Result<HookReturn> {
        match payload {
            HookPayload::Get(get) if self.handles(&get.command) => {
                match self.store.get(&get.command).await {
                    Ok(Some(record)) => Ok(Some(serde_json::to_value(&record)?)),
                    Ok(None) => Ok(None),
                    Err(e) => {
                        tracing::warn!(command = %get.command, error = %e, "Archive read failed");
                        Ok(None)
                    }
                }
            }
            HookPayload::Save(save) if self.handles(&save.command) => {
                match self.store.save(&save.command, &save.report).await {
                    Ok(()) => {
                        tracing::info!(command = %save.command, "Report archived");
                    }
                    Err(e) => {
                        tracing::warn!(command = %save.command, error = %e, "Archive write failed");
                    }
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }
}
