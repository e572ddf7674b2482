//! Assistant backend boundary
//!
//! Every asynchronous action maps to one remote operation on
//! [`AssistantApi`]. Responses deserialize straight from the backend's JSON;
//! failures are [`ApiFailure`] values that keep any tool-invocation records
//! the backend attached, so the thinking trace survives a failed call.
//!
//! [`dispatch`] routes an [`ActionRequest`] to the matching operation under a
//! deadline.

mod client;

pub use client::HttpAssistantApi;

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::preferences::{DeviceProfile, ModelSettings};
use crate::types::{ArtifactKind, TargetEnvironment, Thought};

/// Result of a remote operation.
pub type ApiResult<T> = std::result::Result<T, ApiFailure>;

/// A remote call that did not produce a usable response.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct ApiFailure {
    pub message: String,
    /// Tool invocations made before the failure
    pub thoughts: Vec<Thought>,
    pub timed_out: bool,
    /// HTTP status, when the backend answered at all
    pub status: Option<u16>,
}

impl ApiFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            thoughts: Vec::new(),
            timed_out: false,
            status: None,
        }
    }

    pub fn timeout(deadline: Duration) -> Self {
        Self {
            timed_out: true,
            ..Self::new(format!(
                "no response within {} seconds",
                deadline.as_secs()
            ))
        }
    }

    pub fn with_thoughts(mut self, thoughts: Vec<Thought>) -> Self {
        self.thoughts = thoughts;
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

// ============================================
// Requests
// ============================================

/// Device connection and the context commands to gather from it.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceContext {
    pub profile: DeviceProfile,
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub prompt: String,
    pub target: TargetEnvironment,
    pub artifact_kind: ArtifactKind,
    pub model: ModelSettings,
    /// Present when the prompt concerns the device
    pub device: Option<DeviceContext>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub prompt: String,
    /// Rendered recent history, see [`crate::conversation::chat_transcript`]
    pub history: String,
    pub model: ModelSettings,
    pub device: DeviceContext,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewRequest {
    pub code: String,
    pub artifact_kind: ArtifactKind,
    pub model: ModelSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteRequest {
    pub code: String,
    pub artifact_kind: ArtifactKind,
    /// Local targets only
    pub run_elevated: bool,
    /// Device targets only
    pub device: Option<DeviceProfile>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DebugRequest {
    /// Prompt that produced the failing artifact
    pub prompt: String,
    pub code: String,
    pub stdout: String,
    pub stderr: String,
    pub artifact_kind: ArtifactKind,
    pub model: ModelSettings,
    pub device: Option<DeviceContext>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstallRequest {
    pub package: String,
}

/// What kind of content is being explained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplainContext {
    Code,
    ExecutionResult,
    DebugResult,
    Review,
    Explanation,
    UserPrompt,
    Error,
}

impl ExplainContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExplainContext::Code => "code",
            ExplainContext::ExecutionResult => "execution_result",
            ExplainContext::DebugResult => "debug_result",
            ExplainContext::Review => "review",
            ExplainContext::Explanation => "explanation",
            ExplainContext::UserPrompt => "user_prompt",
            ExplainContext::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExplainRequest {
    /// Plain text, or pretty-printed JSON for structured results
    pub content: String,
    pub context: ExplainContext,
    /// Only sent for code
    pub artifact_kind: Option<ArtifactKind>,
    pub model: ModelSettings,
}

// ============================================
// Responses
// ============================================

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default, rename = "generated_for_type")]
    pub generated_for: Option<ArtifactKind>,
    #[serde(default)]
    pub thoughts: Vec<Thought>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ChatResponse {
    #[serde(default, rename = "chat_response")]
    pub answer: Option<String>,
    #[serde(default)]
    pub thoughts: Vec<Thought>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ReviewResponse {
    #[serde(default)]
    pub review: Option<String>,
    #[serde(default)]
    pub thoughts: Vec<Thought>,
}

/// Raw execution outcome as reported by the backend.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ExecutionReport {
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "output")]
    pub stdout: String,
    #[serde(default, rename = "error")]
    pub stderr: String,
    /// `None` when the backend omitted the code
    #[serde(default, rename = "return_code")]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub warning: Option<String>,
    #[serde(default, rename = "executed_file_type")]
    pub executed_kind: Option<ArtifactKind>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct DebugResponse {
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub corrected_code: Option<String>,
    #[serde(default)]
    pub suggested_package: Option<String>,
    #[serde(default, rename = "original_language")]
    pub source_kind: Option<ArtifactKind>,
    #[serde(default)]
    pub thoughts: Vec<Thought>,
}

/// Install outcome; the backend reports failed installs in the same shape.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct InstallReport {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "output")]
    pub stdout: String,
    #[serde(default, rename = "error")]
    pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ExplainResponse {
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub thoughts: Vec<Thought>,
}

// ============================================
// API trait
// ============================================

/// Remote inference and execution service.
#[async_trait]
pub trait AssistantApi: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> ApiResult<GenerateResponse>;

    /// Conversational device question, answered in prose
    async fn chat(&self, request: ChatRequest) -> ApiResult<ChatResponse>;

    async fn review(&self, request: ReviewRequest) -> ApiResult<ReviewResponse>;

    async fn execute(&self, request: ExecuteRequest) -> ApiResult<ExecutionReport>;

    async fn debug(&self, request: DebugRequest) -> ApiResult<DebugResponse>;

    async fn install(&self, request: InstallRequest) -> ApiResult<InstallReport>;

    async fn explain(&self, request: ExplainRequest) -> ApiResult<ExplainResponse>;

    /// Most recent backend log lines, oldest first
    async fn backend_logs(&self, lines: usize) -> ApiResult<Vec<String>>;
}

/// A request for one of the orchestrated operations.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionRequest {
    Generate(GenerateRequest),
    Chat(ChatRequest),
    Review(ReviewRequest),
    Execute(ExecuteRequest),
    Debug(DebugRequest),
    Install(InstallRequest),
    Explain(ExplainRequest),
}

impl ActionRequest {
    /// Endpoint name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ActionRequest::Generate(_) => "generate",
            ActionRequest::Chat(_) => "chat",
            ActionRequest::Review(_) => "review",
            ActionRequest::Execute(_) => "execute",
            ActionRequest::Debug(_) => "debug",
            ActionRequest::Install(_) => "install",
            ActionRequest::Explain(_) => "explain",
        }
    }
}

/// Successful response to an [`ActionRequest`].
#[derive(Debug, Clone, PartialEq)]
pub enum ActionResponse {
    Generate(GenerateResponse),
    Chat(ChatResponse),
    Review(ReviewResponse),
    Execute(ExecutionReport),
    Debug(DebugResponse),
    Install(InstallReport),
    Explain(ExplainResponse),
}

/// Send `request` and wait at most `deadline` for the response.
///
/// Hitting the deadline drops the in-flight call and yields a failure with
/// `timed_out` set.
pub async fn dispatch(
    api: &dyn AssistantApi,
    request: ActionRequest,
    deadline: Duration,
) -> ApiResult<ActionResponse> {
    let name = request.name();
    tracing::debug!(action = name, deadline_secs = deadline.as_secs(), "Dispatching request");

    let call = async {
        match request {
            ActionRequest::Generate(r) => api.generate(r).await.map(ActionResponse::Generate),
            ActionRequest::Chat(r) => api.chat(r).await.map(ActionResponse::Chat),
            ActionRequest::Review(r) => api.review(r).await.map(ActionResponse::Review),
            ActionRequest::Execute(r) => api.execute(r).await.map(ActionResponse::Execute),
            ActionRequest::Debug(r) => api.debug(r).await.map(ActionResponse::Debug),
            ActionRequest::Install(r) => api.install(r).await.map(ActionResponse::Install),
            ActionRequest::Explain(r) => api.explain(r).await.map(ActionResponse::Explain),
        }
    };

    match tokio::time::timeout(deadline, call).await {
        Ok(result) => {
            if let Err(failure) = &result {
                tracing::warn!(action = name, error = %failure.message, status = ?failure.status, "Request failed");
            }
            result
        }
        Err(_) => {
            tracing::warn!(action = name, deadline_secs = deadline.as_secs(), "Request timed out");
            Err(ApiFailure::timeout(deadline))
        }
    }
}

/// Fetch the backend's recent log lines, waiting at most `deadline`.
pub async fn fetch_backend_logs(
    api: &dyn AssistantApi,
    lines: usize,
    deadline: Duration,
) -> ApiResult<Vec<String>> {
    match tokio::time::timeout(deadline, api.backend_logs(lines)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(deadline_secs = deadline.as_secs(), "Log request timed out");
            Err(ApiFailure::timeout(deadline))
        }
    }
}
