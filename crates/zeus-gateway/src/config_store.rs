//! Per-provider runtime configuration.
//!
//! The store owns the mutable [`ProviderConfig`] records, seeded from the
//! static provider table. The one runtime-visible knob is the system prompt:
//! it is materialized to a shared file the provider's workers read, so a
//! change only takes effect when those workers restart. `update` reports
//! which worker ids that is; the caller orchestrates the restarts.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::registry::WorkerRegistry;
use zeus_core::{GatewayConfig, Result, WorkerId, ZeusError};

/// Runtime configuration for one provider.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    pub default_inner_port: u16,
    pub env_keys: Vec<String>,
    pub system_prompt: String,
    pub auto_spawn: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip)]
    pub command: Option<PathBuf>,
}

/// Partial update applied by the config endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfigPatch {
    pub system_prompt: Option<String>,
    pub default_model: Option<String>,
    pub auto_spawn: Option<bool>,
}

/// Result of an update: the new config, whether the prompt file changed,
/// and the workers whose runtime depends on the change.
#[derive(Debug)]
pub struct ConfigUpdate {
    pub config: ProviderConfig,
    pub prompt_changed: bool,
    pub affected: Vec<WorkerId>,
}

/// Store of per-provider runtime configuration.
pub struct ConfigStore {
    prompts_dir: PathBuf,
    configs: RwLock<HashMap<String, ProviderConfig>>,
}

impl ConfigStore {
    /// Seed the store from the static provider table.
    pub fn from_config(config: &GatewayConfig) -> Self {
        let configs = config
            .providers
            .iter()
            .map(|(provider, defaults)| {
                (
                    provider.clone(),
                    ProviderConfig {
                        provider: provider.clone(),
                        default_model: defaults.default_model.clone(),
                        default_inner_port: defaults.default_inner_port,
                        env_keys: defaults.env_keys.clone(),
                        system_prompt: defaults.system_prompt.clone(),
                        auto_spawn: defaults.auto_spawn,
                        image: defaults.image.clone(),
                        command: defaults.command.clone(),
                    },
                )
            })
            .collect();
        Self {
            prompts_dir: config.prompts_dir.clone(),
            configs: RwLock::new(configs),
        }
    }

    /// Current config for a provider.
    pub fn get(&self, provider: &str) -> Result<ProviderConfig> {
        let configs = self.configs.read().unwrap_or_else(|e| e.into_inner());
        configs
            .get(provider)
            .cloned()
            .ok_or_else(|| ZeusError::UnknownProvider {
                provider: provider.to_string(),
            })
    }

    /// All configured provider tags, sorted.
    pub fn providers(&self) -> Vec<String> {
        let configs = self.configs.read().unwrap_or_else(|e| e.into_inner());
        let mut providers: Vec<String> = configs.keys().cloned().collect();
        providers.sort();
        providers
    }

    /// Path of the shared prompt file workers of this provider read.
    pub fn prompt_path(&self, provider: &str) -> PathBuf {
        self.prompts_dir.join(format!("{provider}-system-prompt.md"))
    }

    /// Write the current config onto disk so a launching worker sees it.
    /// Returns the config used for the launch.
    pub async fn materialize(&self, provider: &str) -> Result<ProviderConfig> {
        let config = self.get(provider)?;
        self.write_prompt_file(provider, &config.system_prompt)
            .await?;
        Ok(config)
    }

    /// Apply a patch. If the system prompt changes, the prompt file is
    /// rewritten before returning and `affected` lists the live workers
    /// that must restart for the change to take effect.
    pub async fn update(
        &self,
        registry: &WorkerRegistry,
        provider: &str,
        patch: ProviderConfigPatch,
    ) -> Result<ConfigUpdate> {
        let (config, prompt_changed) = {
            let mut configs = self.configs.write().unwrap_or_else(|e| e.into_inner());
            let config = configs
                .get_mut(provider)
                .ok_or_else(|| ZeusError::UnknownProvider {
                    provider: provider.to_string(),
                })?;

            let mut prompt_changed = false;
            if let Some(prompt) = patch.system_prompt {
                if prompt != config.system_prompt {
                    config.system_prompt = prompt;
                    prompt_changed = true;
                }
            }
            if let Some(model) = patch.default_model {
                config.default_model = Some(model);
            }
            if let Some(auto_spawn) = patch.auto_spawn {
                config.auto_spawn = auto_spawn;
            }
            (config.clone(), prompt_changed)
        };

        if prompt_changed {
            self.write_prompt_file(provider, &config.system_prompt)
                .await?;
            info!(provider, "system prompt updated");
        }

        let affected = if prompt_changed {
            registry.list(Some(provider)).into_iter().map(|w| w.id).collect()
        } else {
            Vec::new()
        };

        Ok(ConfigUpdate {
            config,
            prompt_changed,
            affected,
        })
    }

    async fn write_prompt_file(&self, provider: &str, prompt: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.prompts_dir)
            .await
            .map_err(|e| ZeusError::DirectoryCreation {
                path: self.prompts_dir.clone(),
                source: e,
            })?;
        let path = self.prompt_path(provider);
        tokio::fs::write(&path, prompt)
            .await
            .map_err(|e| ZeusError::io("writing prompt file", &path, e))?;
        debug!(provider, path = %path.display(), "prompt file materialized");
        Ok(())
    }
}
