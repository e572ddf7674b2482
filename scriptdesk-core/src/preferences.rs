//! User preferences
//!
//! The explicit value object handed to the orchestrator at construction:
//! sampling parameters, the target environment, the preferred artifact kind
//! and device settings. Loaded once at startup and written on every change.
//!
//! Target and artifact kind are coupled: picking a device target switches to
//! device commands, leaving it switches back to a local script kind, and
//! interactive mode only exists for device targets. The setters enforce this
//! so a `Preferences` value is always consistent.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{ArtifactKind, TargetEnvironment};

/// Device commands gathered as context for device-related requests.
pub const DEFAULT_CONTEXT_COMMANDS: &[&str] = &[
    "get system status",
    "get system performance status",
    "show system interface",
    "show firewall policy",
    "show firewall address",
    "show firewall vip",
    "show firewall ippool",
    "show firewall service custom",
    "show firewall service group",
    "get router info routing-table all",
    "diagnose log display event --view-limit 20",
    "get system dns",
    "get system dhcp server",
    "diagnose sys session list",
    "get system admin list",
    "show vpn ssl settings",
    "get vpn ipsec tunnel summary",
    "show user local",
    "show user group",
    "get system ha status",
    "diagnose hardware deviceinfo nic",
    "get webfilter profile",
    "get application list",
    "show log setting",
];

/// Prompt words that make a generate request device related.
const DEVICE_PROMPT_HINTS: &[&str] = &["fortigate", "fortios"];

/// Prefix of `set` keys addressing a single context command.
pub const CONTEXT_KEY_PREFIX: &str = "context:";

// ============================================
// Sections
// ============================================

/// Sampling parameters sent with every model request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_safety_setting")]
    pub safety_setting: String,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_name: default_model_name(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            safety_setting: default_safety_setting(),
        }
    }
}

fn default_model_name() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    0.95
}

fn default_top_k() -> u32 {
    40
}

fn default_safety_setting() -> String {
    "BLOCK_MEDIUM_AND_ABOVE".to_string()
}

/// SSH connection details of the network device.
///
/// The password is not a preference; it comes from [`crate::config`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    #[serde(default = "default_username")]
    pub username: String,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            host: String::new(),
            ssh_port: default_ssh_port(),
            username: default_username(),
        }
    }
}

fn default_ssh_port() -> u16 {
    22
}

fn default_username() -> String {
    "admin".to_string()
}

impl DeviceProfile {
    /// Host and username are both required to reach the device.
    pub fn is_complete(&self) -> bool {
        !self.host.trim().is_empty() && !self.username.trim().is_empty()
    }
}

fn default_context_commands() -> BTreeMap<String, bool> {
    DEFAULT_CONTEXT_COMMANDS
        .iter()
        .map(|c| (c.to_string(), true))
        .collect()
}

// ============================================
// Preferences
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    pub target: TargetEnvironment,
    pub artifact_kind: ArtifactKind,
    pub interactive_mode: bool,
    pub model: ModelSettings,
    pub device: DeviceProfile,
    pub context_commands: BTreeMap<String, bool>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            target: TargetEnvironment::default(),
            artifact_kind: ArtifactKind::default(),
            interactive_mode: false,
            model: ModelSettings::default(),
            device: DeviceProfile::default(),
            context_commands: default_context_commands(),
        }
    }
}

impl Preferences {
    pub fn targets_device(&self) -> bool {
        self.target == TargetEnvironment::Device
    }

    /// Change the target, adjusting the artifact kind and interactive mode.
    pub fn set_target(&mut self, target: TargetEnvironment) {
        self.target = target;
        if target == TargetEnvironment::Device {
            if !matches!(self.artifact_kind, ArtifactKind::DeviceCli | ArtifactKind::Text) {
                self.artifact_kind = ArtifactKind::DeviceCli;
            }
        } else {
            if self.artifact_kind.is_device_cli() {
                self.artifact_kind = target.default_artifact_kind();
            }
            self.interactive_mode = false;
        }
    }

    /// Change the artifact kind; device commands imply a device target.
    pub fn set_artifact_kind(&mut self, kind: ArtifactKind) {
        if kind.is_device_cli() {
            self.target = TargetEnvironment::Device;
        }
        self.artifact_kind = kind;
    }

    /// Turn interactive mode on or off. Returns the resulting value, which
    /// is always false for non-device targets.
    pub fn set_interactive_mode(&mut self, enabled: bool) -> bool {
        self.interactive_mode = enabled && self.targets_device();
        self.interactive_mode
    }

    /// Whether a submitted prompt is answered as a device chat.
    pub fn routes_to_chat(&self) -> bool {
        self.targets_device() && !self.interactive_mode
    }

    /// Context commands to send; an empty selection means all defaults.
    pub fn selected_context_commands(&self) -> Vec<String> {
        let selected: Vec<String> = self
            .context_commands
            .iter()
            .filter(|(_, on)| **on)
            .map(|(cmd, _)| cmd.clone())
            .collect();
        if selected.is_empty() {
            DEFAULT_CONTEXT_COMMANDS.iter().map(|c| c.to_string()).collect()
        } else {
            selected
        }
    }

    pub fn select_all_context_commands(&mut self, selected: bool) {
        self.context_commands = DEFAULT_CONTEXT_COMMANDS
            .iter()
            .map(|c| (c.to_string(), selected))
            .collect();
    }

    /// Whether a generate request concerns the device and needs device context.
    pub fn is_device_related(&self, prompt: &str) -> bool {
        if self.targets_device() || self.artifact_kind.is_device_cli() {
            return true;
        }
        let lower = prompt.to_lowercase();
        DEVICE_PROMPT_HINTS.iter().any(|hint| lower.contains(hint))
    }

    /// Re-establish the coupling rules after loading independent keys.
    pub fn normalized(mut self) -> Self {
        if self.artifact_kind.is_device_cli() {
            self.target = TargetEnvironment::Device;
        }
        let interactive = self.interactive_mode;
        self.set_interactive_mode(interactive);
        self
    }

    /// Update one preference from its textual form.
    ///
    /// Keys: `model`, `temperature`, `top_p`, `top_k`, `safety`, `target`,
    /// `artifact_kind`, `interactive`, `device.host`, `device.port`,
    /// `device.username`, `context` (`all`/`none`) and `context:<command>`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            "model" | "model_name" => {
                if value.is_empty() {
                    return Err(Error::Validation("model name cannot be empty".to_string()));
                }
                self.model.model_name = value.to_string();
            }
            "temperature" => self.model.temperature = parse_number(key, value)?,
            "top_p" => self.model.top_p = parse_number(key, value)?,
            "top_k" => self.model.top_k = parse_number(key, value)?,
            "safety" | "safety_setting" => self.model.safety_setting = value.to_uppercase(),
            "target" => {
                let target = value.parse::<TargetEnvironment>().map_err(Error::Validation)?;
                self.set_target(target);
            }
            "artifact_kind" | "kind" => self.set_artifact_kind(ArtifactKind::from_wire(value)),
            "interactive" | "interactive_mode" => {
                let requested = parse_bool(key, value)?;
                if requested && !self.set_interactive_mode(true) {
                    return Err(Error::Validation(
                        "interactive mode requires the device target".to_string(),
                    ));
                }
                self.set_interactive_mode(requested);
            }
            "device.host" => self.device.host = value.to_string(),
            "device.port" | "device.ssh_port" => self.device.ssh_port = parse_number(key, value)?,
            "device.username" => self.device.username = value.to_string(),
            "context" => match value {
                "all" => self.select_all_context_commands(true),
                "none" => self.select_all_context_commands(false),
                _ => {
                    return Err(Error::Validation(format!(
                        "context expects 'all' or 'none', got {:?}",
                        value
                    )))
                }
            },
            _ => match key.strip_prefix(CONTEXT_KEY_PREFIX) {
                Some(command) if !command.trim().is_empty() => {
                    let selected = parse_bool(key, value)?;
                    self.context_commands
                        .insert(command.trim().to_string(), selected);
                }
                _ => return Err(Error::Validation(format!("unknown preference: {}", key))),
            },
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| Error::Validation(format!("{} expects a number, got {:?}", key, value)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => Err(Error::Validation(format!(
            "{} expects on/off, got {:?}",
            key, value
        ))),
    }
}

// ============================================
// Persistence
// ============================================

/// Load/save boundary for preferences.
pub trait PreferenceStore: Send + Sync {
    /// Never fails: missing or unreadable values fall back to defaults.
    fn load(&self) -> Preferences;

    fn save(&self, preferences: &Preferences) -> Result<()>;
}

/// Preferences stored as TOML, read key by key.
#[derive(Debug, Clone)]
pub struct TomlPreferenceStore {
    path: PathBuf,
}

impl TomlPreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `$XDG_CONFIG_HOME/scriptdesk/preferences.toml`
    pub fn default_location() -> Self {
        Self::new(crate::config::Config::preferences_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_table(&self) -> Option<toml::Table> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read preferences");
                return None;
            }
        };
        match content.parse::<toml::Table>() {
            Ok(table) => Some(table),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Preferences file is not valid TOML, using defaults");
                None
            }
        }
    }
}

/// Read `key` from `table`, logging and discarding values of the wrong shape.
fn read_key<T: DeserializeOwned>(table: &toml::Table, key: &str) -> Option<T> {
    let value = table.get(key)?;
    match value.clone().try_into::<T>() {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::warn!(key, error = %e, "Ignoring invalid preference value");
            None
        }
    }
}

fn read_section(table: &toml::Table, key: &str) -> toml::Table {
    match table.get(key) {
        Some(toml::Value::Table(section)) => section.clone(),
        _ => toml::Table::new(),
    }
}

impl PreferenceStore for TomlPreferenceStore {
    fn load(&self) -> Preferences {
        let Some(table) = self.read_table() else {
            return Preferences::default();
        };

        let defaults = Preferences::default();
        let model = read_section(&table, "model");
        let device = read_section(&table, "device");

        let preferences = Preferences {
            target: read_key(&table, "target").unwrap_or(defaults.target),
            artifact_kind: read_key(&table, "artifact_kind").unwrap_or(defaults.artifact_kind),
            interactive_mode: read_key(&table, "interactive_mode").unwrap_or(defaults.interactive_mode),
            model: ModelSettings {
                model_name: read_key(&model, "model_name").unwrap_or(defaults.model.model_name),
                temperature: read_key(&model, "temperature").unwrap_or(defaults.model.temperature),
                top_p: read_key(&model, "top_p").unwrap_or(defaults.model.top_p),
                top_k: read_key(&model, "top_k").unwrap_or(defaults.model.top_k),
                safety_setting: read_key(&model, "safety_setting")
                    .unwrap_or(defaults.model.safety_setting),
            },
            device: DeviceProfile {
                host: read_key(&device, "host").unwrap_or(defaults.device.host),
                ssh_port: read_key(&device, "ssh_port").unwrap_or(defaults.device.ssh_port),
                username: read_key(&device, "username").unwrap_or(defaults.device.username),
            },
            context_commands: read_key(&table, "context_commands")
                .unwrap_or(defaults.context_commands),
        };

        tracing::debug!(path = %self.path.display(), "Loaded preferences");
        preferences.normalized()
    }

    fn save(&self, preferences: &Preferences) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(preferences)?;
        std::fs::write(&self.path, content)?;
        tracing::debug!(path = %self.path.display(), "Saved preferences");
        Ok(())
    }
}

/// In-memory store, for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    saved: Mutex<Option<Preferences>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(preferences: Preferences) -> Self {
        Self {
            saved: Mutex::new(Some(preferences)),
        }
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn load(&self) -> Preferences {
        self.saved
            .lock()
            .ok()
            .and_then(|saved| saved.clone())
            .unwrap_or_default()
    }

    fn save(&self, preferences: &Preferences) -> Result<()> {
        let mut saved = self
            .saved
            .lock()
            .map_err(|_| Error::Config("preference store lock poisoned".to_string()))?;
        *saved = Some(preferences.clone());
        Ok(())
    }
}
