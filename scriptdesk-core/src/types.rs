//! Core domain types for scriptdesk
//!
//! A conversation is an ordered sequence of [`Block`]s. Every block carries a
//! kind-specific [`BlockPayload`]; consumers match on the payload instead of
//! probing for optional fields.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Block** | One atomic entry in the conversation (request, artifact, result, error) |
//! | **Artifact** | Generated code or device commands the user can review, run or edit |
//! | **Round** | A user request plus every block produced in response to it |
//! | **Anchor** | The block a new result is inserted after |
//! | **Thought** | One agentic tool call or tool result reported by the backend |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation::Provenance;

/// Payload text used when the backend omitted the field a result block needs.
pub const NO_CONTENT: &str = "(no content)";

// ============================================
// Identifiers
// ============================================

/// Opaque, never-reused block identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(Uuid);

impl BlockId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, for log lines and compact rendering.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for BlockId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for BlockId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| format!("invalid block id '{}': {}", s, e))
    }
}

// ============================================
// Artifact and target kinds
// ============================================

/// File or command type of a generated artifact.
///
/// Serialized as the file extension the backend expects (`py`, `sh`,
/// `fortios`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ArtifactKind {
    #[default]
    Python,
    Shell,
    Batch,
    PowerShell,
    /// Commands sent to a network device over its CLI
    DeviceCli,
    Text,
    /// Any other extension, stored lowercase without the leading dot
    Other(String),
}

impl ArtifactKind {
    /// Extension used on the wire and in preferences.
    pub fn as_str(&self) -> &str {
        match self {
            ArtifactKind::Python => "py",
            ArtifactKind::Shell => "sh",
            ArtifactKind::Batch => "bat",
            ArtifactKind::PowerShell => "ps1",
            ArtifactKind::DeviceCli => "fortios",
            ArtifactKind::Text => "txt",
            ArtifactKind::Other(ext) => ext,
        }
    }

    /// Returns the display name for this kind
    pub fn display_name(&self) -> &str {
        match self {
            ArtifactKind::Python => "python",
            ArtifactKind::Shell => "shell",
            ArtifactKind::Batch => "batch",
            ArtifactKind::PowerShell => "powershell",
            ArtifactKind::DeviceCli => "device-cli",
            ArtifactKind::Text => "text",
            ArtifactKind::Other(ext) => ext,
        }
    }

    /// Parse an extension, a file name or a display name.
    ///
    /// `script.sh` and `sh` both map to [`ArtifactKind::Shell`]; an empty
    /// string maps to the default kind.
    pub fn from_wire(value: &str) -> Self {
        let trimmed = value.trim();
        let ext = trimmed
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .unwrap_or(trimmed)
            .to_lowercase();
        match ext.as_str() {
            "" | "py" | "python" => ArtifactKind::Python,
            "sh" | "bash" | "shell" => ArtifactKind::Shell,
            "bat" | "cmd" | "batch" => ArtifactKind::Batch,
            "ps1" | "powershell" => ArtifactKind::PowerShell,
            "fortios" | "device-cli" => ArtifactKind::DeviceCli,
            "txt" | "text" => ArtifactKind::Text,
            _ => ArtifactKind::Other(ext),
        }
    }

    pub fn is_device_cli(&self) -> bool {
        matches!(self, ArtifactKind::DeviceCli)
    }
}

impl From<String> for ArtifactKind {
    fn from(value: String) -> Self {
        ArtifactKind::from_wire(&value)
    }
}

impl From<ArtifactKind> for String {
    fn from(value: ArtifactKind) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Environment the generated artifact is meant to run in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetEnvironment {
    /// Whatever OS the backend runs on
    #[default]
    Auto,
    Windows,
    Linux,
    Macos,
    /// A network device reached over SSH
    #[serde(rename = "fortios", alias = "device")]
    Device,
}

impl TargetEnvironment {
    /// Identifier used on the wire and in preferences
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetEnvironment::Auto => "auto",
            TargetEnvironment::Windows => "windows",
            TargetEnvironment::Linux => "linux",
            TargetEnvironment::Macos => "macos",
            TargetEnvironment::Device => "fortios",
        }
    }

    /// Artifact kind a local target falls back to when leaving device mode.
    pub fn default_artifact_kind(&self) -> ArtifactKind {
        match self {
            TargetEnvironment::Auto => ArtifactKind::Python,
            TargetEnvironment::Windows => ArtifactKind::Batch,
            TargetEnvironment::Linux | TargetEnvironment::Macos => ArtifactKind::Shell,
            TargetEnvironment::Device => ArtifactKind::DeviceCli,
        }
    }
}

impl std::str::FromStr for TargetEnvironment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(TargetEnvironment::Auto),
            "windows" => Ok(TargetEnvironment::Windows),
            "linux" => Ok(TargetEnvironment::Linux),
            "macos" => Ok(TargetEnvironment::Macos),
            "fortios" | "device" => Ok(TargetEnvironment::Device),
            _ => Err(format!("unknown target environment: {}", s)),
        }
    }
}

impl std::fmt::Display for TargetEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================
// Actions
// ============================================

/// Asynchronous action kinds, each with its own busy flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Generate an artifact or chat; opens a new round
    Generate,
    Review,
    Execute,
    Debug,
    Install,
    Explain,
}

impl ActionKind {
    pub const ALL: [ActionKind; 6] = [
        ActionKind::Generate,
        ActionKind::Review,
        ActionKind::Execute,
        ActionKind::Debug,
        ActionKind::Install,
        ActionKind::Explain,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Generate => "generate",
            ActionKind::Review => "review",
            ActionKind::Execute => "execute",
            ActionKind::Debug => "debug",
            ActionKind::Install => "install",
            ActionKind::Explain => "explain",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            ActionKind::Generate => 0,
            ActionKind::Review => 1,
            ActionKind::Execute => 2,
            ActionKind::Debug => 3,
            ActionKind::Install => 4,
            ActionKind::Explain => 5,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================
// Tool invocation records
// ============================================

/// Whether a thought is the agent's tool call or the tool's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThoughtKind {
    #[serde(rename = "function_call_request")]
    CallRequest,
    #[serde(rename = "function_call_result")]
    CallResult,
}

/// One entry of an agentic tool-use audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thought {
    #[serde(rename = "type")]
    pub kind: ThoughtKind,
    pub tool_name: String,
    #[serde(default, rename = "tool_args", skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    /// Backend-supplied timestamp, kept verbatim
    #[serde(default)]
    pub timestamp: String,
}

impl Thought {
    /// One-line rendering used by transcripts and the CLI.
    pub fn summary(&self) -> String {
        match self.kind {
            ThoughtKind::CallRequest => {
                let args = self
                    .arguments
                    .as_ref()
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "{}".to_string());
                format!("call {} with {}", self.tool_name, args)
            }
            ThoughtKind::CallResult => {
                let status = if self.is_error.unwrap_or(false) {
                    "ERROR"
                } else {
                    "OK"
                };
                let data = match &self.result_data {
                    Some(serde_json::Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                let preview: String = data.chars().take(100).collect();
                format!("result {}: {} - {}", self.tool_name, status, preview)
            }
        }
    }
}

// ============================================
// Result payloads
// ============================================

/// How an execution finished, as judged from exit code and captured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Succeeded,
    /// Exit code 0 but the output reads like an error
    SucceededWithIssues,
    Failed,
}

impl ExecutionOutcome {
    /// Whether debugging this execution makes sense.
    pub fn needs_attention(&self) -> bool {
        !matches!(self, ExecutionOutcome::Succeeded)
    }
}

/// Captured result of running an artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub message: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_kind: Option<ArtifactKind>,
    pub outcome: ExecutionOutcome,
    /// Text that was actually run; omitted when the result is sent for explanation
    #[serde(skip)]
    pub code: String,
}

/// Backend analysis of a failed execution.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DebugResult {
    pub explanation: Option<String>,
    pub corrected_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_package: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_kind: Option<ArtifactKind>,
}

/// Outcome of installing a dependency suggested by a debug result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstallationResult {
    pub success: bool,
    pub message: String,
    pub stdout: String,
    pub stderr: String,
    pub package: String,
}

/// A failed remote action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorDetail {
    pub message: String,
    pub action: ActionKind,
    pub timed_out: bool,
}

// ============================================
// Blocks
// ============================================

/// Kind tag of a block, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    UserRequest,
    GeneratedArtifact,
    ReviewResult,
    ExecutionResult,
    DebugResult,
    InstallationResult,
    Explanation,
    LoadingPlaceholder,
    Error,
    ThinkingTrace,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::UserRequest => "user-request",
            BlockKind::GeneratedArtifact => "generated-artifact",
            BlockKind::ReviewResult => "review-result",
            BlockKind::ExecutionResult => "execution-result",
            BlockKind::DebugResult => "debug-result",
            BlockKind::InstallationResult => "installation-result",
            BlockKind::Explanation => "explanation",
            BlockKind::LoadingPlaceholder => "loading-placeholder",
            BlockKind::Error => "error",
            BlockKind::ThinkingTrace => "thinking-trace",
        }
    }
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind-specific block data.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockPayload {
    UserRequest { prompt: String },
    GeneratedArtifact { code: String },
    ReviewResult { review: String },
    ExecutionResult(ExecutionResult),
    DebugResult(DebugResult),
    InstallationResult(InstallationResult),
    Explanation { text: String },
    LoadingPlaceholder { label: String },
    Error(ErrorDetail),
    ThinkingTrace,
}

impl BlockPayload {
    pub fn kind(&self) -> BlockKind {
        match self {
            BlockPayload::UserRequest { .. } => BlockKind::UserRequest,
            BlockPayload::GeneratedArtifact { .. } => BlockKind::GeneratedArtifact,
            BlockPayload::ReviewResult { .. } => BlockKind::ReviewResult,
            BlockPayload::ExecutionResult(_) => BlockKind::ExecutionResult,
            BlockPayload::DebugResult(_) => BlockKind::DebugResult,
            BlockPayload::InstallationResult(_) => BlockKind::InstallationResult,
            BlockPayload::Explanation { .. } => BlockKind::Explanation,
            BlockPayload::LoadingPlaceholder { .. } => BlockKind::LoadingPlaceholder,
            BlockPayload::Error(_) => BlockKind::Error,
            BlockPayload::ThinkingTrace => BlockKind::ThinkingTrace,
        }
    }

    /// Text that can be opened in the editing overlay.
    pub fn editable_text(&self) -> Option<&str> {
        match self {
            BlockPayload::GeneratedArtifact { code } => Some(code),
            BlockPayload::DebugResult(DebugResult {
                corrected_code: Some(code),
                ..
            }) => Some(code),
            _ => None,
        }
    }

    /// Copy of this payload with its editable text replaced.
    ///
    /// Returns `None` for payloads that have nothing to edit.
    pub fn with_edited_text(&self, text: String) -> Option<BlockPayload> {
        match self {
            BlockPayload::GeneratedArtifact { .. } => {
                Some(BlockPayload::GeneratedArtifact { code: text })
            }
            BlockPayload::DebugResult(result) if result.corrected_code.is_some() => {
                Some(BlockPayload::DebugResult(DebugResult {
                    corrected_code: Some(text),
                    ..result.clone()
                }))
            }
            _ => None,
        }
    }
}

/// One entry of the conversation.
#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub payload: BlockPayload,
    pub created_at: DateTime<Utc>,
    /// Drives the one-shot entrance animation only
    pub is_recently_created: bool,
    pub artifact_kind: Option<ArtifactKind>,
    pub thoughts: Vec<Thought>,
    /// Stamped by the block store on insertion
    pub provenance: Provenance,
}

impl Block {
    /// Create a detached block; it gains its provenance when inserted.
    pub fn new(payload: BlockPayload) -> Self {
        Self {
            id: BlockId::new(),
            payload,
            created_at: Utc::now(),
            is_recently_created: true,
            artifact_kind: None,
            thoughts: Vec::new(),
            provenance: Provenance::default(),
        }
    }

    pub fn user_request(prompt: impl Into<String>) -> Self {
        Self::new(BlockPayload::UserRequest {
            prompt: prompt.into(),
        })
    }

    pub fn artifact(code: impl Into<String>, kind: ArtifactKind) -> Self {
        Self::new(BlockPayload::GeneratedArtifact { code: code.into() }).with_artifact_kind(kind)
    }

    pub fn placeholder(label: impl Into<String>) -> Self {
        Self::new(BlockPayload::LoadingPlaceholder {
            label: label.into(),
        })
    }

    pub fn thinking_trace(thoughts: Vec<Thought>) -> Self {
        Self::new(BlockPayload::ThinkingTrace).with_thoughts(thoughts)
    }

    pub fn with_artifact_kind(mut self, kind: ArtifactKind) -> Self {
        self.artifact_kind = Some(kind);
        self
    }

    pub fn with_thoughts(mut self, thoughts: Vec<Thought>) -> Self {
        self.thoughts = thoughts;
        self
    }

    pub fn kind(&self) -> BlockKind {
        self.payload.kind()
    }

    pub fn is_user_request(&self) -> bool {
        self.kind() == BlockKind::UserRequest
    }

    /// Artifact kind, defaulting to python when absent.
    pub fn effective_artifact_kind(&self) -> ArtifactKind {
        self.artifact_kind.clone().unwrap_or_default()
    }

    /// First line of the block's main text, truncated for one-line display.
    pub fn summary(&self, max_chars: usize) -> String {
        let text = match &self.payload {
            BlockPayload::UserRequest { prompt } => prompt.as_str(),
            BlockPayload::GeneratedArtifact { code } => code.as_str(),
            BlockPayload::ReviewResult { review } => review.as_str(),
            BlockPayload::ExecutionResult(result) => result.message.as_str(),
            BlockPayload::DebugResult(result) => result
                .explanation
                .as_deref()
                .or(result.error.as_deref())
                .unwrap_or(NO_CONTENT),
            BlockPayload::InstallationResult(result) => result.message.as_str(),
            BlockPayload::Explanation { text } => text.as_str(),
            BlockPayload::LoadingPlaceholder { label } => label.as_str(),
            BlockPayload::Error(detail) => detail.message.as_str(),
            BlockPayload::ThinkingTrace => "tool calls",
        };
        let first_line = text.lines().next().unwrap_or("").trim();
        if first_line.chars().count() > max_chars {
            let truncated: String = first_line.chars().take(max_chars.saturating_sub(3)).collect();
            format!("{}...", truncated)
        } else {
            first_line.to_string()
        }
    }
}
