use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use athena_protocol::KnowledgeTier;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_LOG_FILTER: &str = "info";
pub const SETTINGS_DIRECTORY_NAME: &str = "athena";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "ATHENA_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub default_knowledge_tier: KnowledgeTier,
    #[serde(default)]
    pub default_search_all: bool,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            connect_timeout_secs: default_connect_timeout_secs(),
            default_knowledge_tier: KnowledgeTier::default(),
            default_search_all: false,
            log_filter: default_log_filter(),
        }
    }
}

impl ClientSettings {
    pub fn normalized(mut self) -> Self {
        let base_url = self.base_url.trim().trim_end_matches('/');
        self.base_url = if base_url.is_empty() {
            default_base_url()
        } else {
            base_url.to_string()
        };
        if self.connect_timeout_secs == 0 {
            self.connect_timeout_secs = default_connect_timeout_secs();
        }
        self.log_filter = match self.log_filter.trim() {
            "" => default_log_filter(),
            filter => filter.to_string(),
        };
        self
    }

    /// Layers defaults, the settings file, and `ATHENA_*` environment variables.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX))
    }
}

/// Live client settings backed by a JSON file.
pub struct SettingsStore {
    settings: ArcSwap<ClientSettings>,
    config_path: PathBuf,
}

impl SettingsStore {
    /// `<platform config dir>/athena/settings.json`, or `./.athena/settings.json`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .map_or_else(|| PathBuf::from(".athena"), |dir| dir.join(SETTINGS_DIRECTORY_NAME))
            .join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        Self {
            settings: ArcSwap::from_pointee(Self::read(&config_path)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<ClientSettings> {
        self.settings.load_full()
    }

    /// Normalizes, writes to disk, then publishes to readers.
    pub fn update(&self, settings: ClientSettings) -> Result<(), SettingsError> {
        let settings = settings.normalized();
        self.persist(&settings)?;
        self.settings.store(Arc::new(settings));
        Ok(())
    }

    fn read(path: &Path) -> ClientSettings {
        let extracted = ClientSettings::figment(path).extract::<ClientSettings>();
        extracted.map(ClientSettings::normalized).unwrap_or_else(|error| {
            tracing::warn!(path = %path.display(), error = %error, "unreadable settings; falling back to defaults");
            ClientSettings::default()
        })
    }

    fn persist(&self, settings: &ClientSettings) -> Result<(), SettingsError> {
        let body = serde_json::to_vec_pretty(settings).context(EncodeSnafu {
            stage: "encode-settings",
        })?;

        let dir = match self.config_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).context(WriteSnafu {
            stage: "ensure-settings-dir",
            path: dir.to_path_buf(),
        })?;

        // Readers never observe a half-written file.
        let staging = self.config_path.with_extension("json.partial");
        std::fs::write(&staging, body).context(WriteSnafu {
            stage: "write-staged-settings",
            path: staging.clone(),
        })?;
        std::fs::rename(&staging, &self.config_path).context(WriteSnafu {
            stage: "swap-in-settings",
            path: self.config_path.clone(),
        })?;

        tracing::debug!(path = %self.config_path.display(), "settings persisted");
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("could not encode settings on `{stage}`: {source}"))]
    Encode {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("settings i/o failed for {} on `{stage}`: {source}", path.display()))]
    Write {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn file_and_environment_layer_over_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                SETTINGS_FILE_NAME,
                r#"{ "base_url": "https://athena.example/ ", "default_knowledge_tier": "persistent" }"#,
            )?;
            jail.set_env("ATHENA_CONNECT_TIMEOUT_SECS", "3");

            let settings = SettingsStore::new(jail.directory().join(SETTINGS_FILE_NAME)).settings();
            assert_eq!(settings.base_url, "https://athena.example");
            assert_eq!(settings.default_knowledge_tier, KnowledgeTier::Persistent);
            assert_eq!(settings.connect_timeout_secs, 3);
            assert_eq!(settings.log_filter, DEFAULT_LOG_FILTER);
            Ok(())
        });
    }

    #[test]
    fn unparseable_file_falls_back_to_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(SETTINGS_FILE_NAME, "{ not json")?;
            let settings = SettingsStore::new(jail.directory().join(SETTINGS_FILE_NAME)).settings();
            assert_eq!(*settings, ClientSettings::default());
            Ok(())
        });
    }

    #[test]
    fn update_persists_normalized_settings() {
        Jail::expect_with(|jail| {
            let path = jail.directory().join("nested").join(SETTINGS_FILE_NAME);
            let store = SettingsStore::new(path.clone());

            let mut settings = ClientSettings::default();
            settings.base_url = "http://10.0.0.2:8000///".to_string();
            settings.default_search_all = true;
            store.update(settings).map_err(|error| error.to_string())?;

            assert_eq!(store.settings().base_url, "http://10.0.0.2:8000");
            let reloaded = SettingsStore::new(path).settings();
            assert!(reloaded.default_search_all);
            assert_eq!(reloaded.base_url, "http://10.0.0.2:8000");
            Ok(())
        });
    }
}
