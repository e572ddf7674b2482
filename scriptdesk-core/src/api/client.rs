//! HTTP client for the assistant backend
//!
//! Speaks the backend's JSON protocol: `POST {base_url}/api/{endpoint}` for
//! every action and `GET {base_url}/api/backend_logs?lines=N` for the log
//! tail. Credentials come from configuration and are attached here, so
//! requests built by the orchestrator never carry them.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::preferences::{DeviceProfile, ModelSettings};
use crate::types::Thought;

use super::{
    ApiFailure, ApiResult, AssistantApi, ChatRequest, ChatResponse, DebugRequest, DebugResponse,
    DeviceContext, ExecuteRequest, ExecutionReport, ExplainRequest, ExplainResponse,
    GenerateRequest, GenerateResponse, InstallReport, InstallRequest, ReviewRequest,
    ReviewResponse,
};

/// `model_config` object, camelCase as the backend expects.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModelConfigBody<'a> {
    model_name: &'a str,
    temperature: f32,
    top_p: f32,
    top_k: u32,
    safety_setting: &'a str,
    #[serde(rename = "api_key", skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

/// Device connection object.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceBody<'a> {
    ip_host: &'a str,
    port_ssh: u16,
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    prompt: &'a str,
    target_os: &'a str,
    file_type: &'a str,
    model_config: ModelConfigBody<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fortigate_selected_context_commands: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fortigate_config: Option<DeviceBody<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatBody<'a> {
    prompt: &'a str,
    conversation_history_for_chat_context: &'a str,
    model_config: ModelConfigBody<'a>,
    fortigate_selected_context_commands: &'a [String],
    fortigate_config: DeviceBody<'a>,
}

#[derive(Debug, Serialize)]
struct ReviewBody<'a> {
    code: &'a str,
    file_type: &'a str,
    model_config: ModelConfigBody<'a>,
}

#[derive(Debug, Serialize)]
struct ExecuteBody<'a> {
    code: &'a str,
    file_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    run_as_admin: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fortigate_config: Option<DeviceBody<'a>>,
}

#[derive(Debug, Serialize)]
struct DebugBody<'a> {
    prompt: &'a str,
    code: &'a str,
    stdout: &'a str,
    stderr: &'a str,
    file_type: &'a str,
    model_config: ModelConfigBody<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fortigate_selected_context_commands: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fortigate_config_for_context: Option<DeviceBody<'a>>,
}

#[derive(Debug, Serialize)]
struct InstallBody<'a> {
    package_name: &'a str,
}

#[derive(Debug, Serialize)]
struct ExplainBody<'a> {
    content: &'a str,
    context: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_type: Option<&'a str>,
    model_config: ModelConfigBody<'a>,
}

/// Error fields present in any non-2xx body.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    thoughts: Vec<Thought>,
}

#[derive(Debug, Deserialize)]
struct LogsBody {
    #[serde(default)]
    logs: Vec<String>,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP implementation of [`AssistantApi`]
pub struct HttpAssistantApi {
    http_client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    device_password: Option<String>,
}

impl HttpAssistantApi {
    /// Create a client from backend configuration
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: &BackendConfig) -> Result<Self> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        // Deadlines come from `dispatch` and `fetch_backend_logs`.
        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
            api_key: config.resolved_api_key(),
            device_password: config.resolved_device_password(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/api/{}", self.base_url, endpoint)
    }

    fn model_config<'a>(&'a self, model: &'a ModelSettings, with_key: bool) -> ModelConfigBody<'a> {
        ModelConfigBody {
            model_name: &model.model_name,
            temperature: model.temperature,
            top_p: model.top_p,
            top_k: model.top_k,
            safety_setting: &model.safety_setting,
            api_key: if with_key {
                self.api_key.as_deref()
            } else {
                None
            },
        }
    }

    fn device<'a>(&'a self, profile: &'a DeviceProfile) -> DeviceBody<'a> {
        DeviceBody {
            ip_host: &profile.host,
            port_ssh: profile.ssh_port,
            username: &profile.username,
            password: self.device_password.as_deref().unwrap_or(""),
        }
    }

    fn device_context<'a>(
        &'a self,
        context: Option<&'a DeviceContext>,
    ) -> (Option<&'a [String]>, Option<DeviceBody<'a>>) {
        match context {
            Some(ctx) => (Some(ctx.commands.as_slice()), Some(self.device(&ctx.profile))),
            None => (None, None),
        }
    }

    /// POST `body` and return the status with the parsed JSON body.
    async fn post_raw<B: Serialize>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> ApiResult<(reqwest::StatusCode, serde_json::Value)> {
        let response = self
            .http_client
            .post(self.url(endpoint))
            .json(body)
            .send()
            .await
            .map_err(|e| ApiFailure::new(format!("request to /api/{} failed: {}", endpoint, e)))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            ApiFailure::new(format!("failed to read response from /api/{}: {}", endpoint, e))
                .with_status(status.as_u16())
        })?;

        // Error pages are not always JSON; keep the status in that case.
        let value = serde_json::from_str(&text).unwrap_or(serde_json::Value::Null);
        tracing::debug!(endpoint, status = status.as_u16(), "Backend responded");
        Ok((status, value))
    }

    /// POST `body`, treating any non-2xx status as a failure.
    async fn post<B: Serialize, T: DeserializeOwned>(&self, endpoint: &str, body: &B) -> ApiResult<T> {
        let (status, value) = self.post_raw(endpoint, body).await?;
        if !status.is_success() {
            return Err(failure_from_body(endpoint, status.as_u16(), value));
        }
        parse_body(endpoint, value)
    }
}

fn parse_body<T: DeserializeOwned>(endpoint: &str, value: serde_json::Value) -> ApiResult<T> {
    serde_json::from_value(value)
        .map_err(|e| ApiFailure::new(format!("invalid response from /api/{}: {}", endpoint, e)))
}

fn failure_from_body(endpoint: &str, status: u16, value: serde_json::Value) -> ApiFailure {
    let body: ErrorBody = serde_json::from_value(value).unwrap_or_default();
    let message = body
        .error
        .filter(|e| !e.trim().is_empty())
        .unwrap_or_else(|| format!("error {} from /api/{}", status, endpoint));
    ApiFailure::new(message)
        .with_status(status)
        .with_thoughts(body.thoughts)
}

#[async_trait]
impl AssistantApi for HttpAssistantApi {
    async fn generate(&self, request: GenerateRequest) -> ApiResult<GenerateResponse> {
        let (commands, device) = self.device_context(request.device.as_ref());
        let body = GenerateBody {
            prompt: &request.prompt,
            target_os: request.target.as_str(),
            file_type: request.artifact_kind.as_str(),
            model_config: self.model_config(&request.model, true),
            fortigate_selected_context_commands: commands,
            fortigate_config: device,
        };
        self.post("generate", &body).await
    }

    async fn chat(&self, request: ChatRequest) -> ApiResult<ChatResponse> {
        let body = ChatBody {
            prompt: &request.prompt,
            conversation_history_for_chat_context: &request.history,
            model_config: self.model_config(&request.model, true),
            fortigate_selected_context_commands: &request.device.commands,
            fortigate_config: self.device(&request.device.profile),
        };
        self.post("fortigate_chat", &body).await
    }

    async fn review(&self, request: ReviewRequest) -> ApiResult<ReviewResponse> {
        let body = ReviewBody {
            code: &request.code,
            file_type: request.artifact_kind.as_str(),
            model_config: self.model_config(&request.model, true),
        };
        self.post("review", &body).await
    }

    async fn execute(&self, request: ExecuteRequest) -> ApiResult<ExecutionReport> {
        let body = ExecuteBody {
            code: &request.code,
            file_type: request.artifact_kind.as_str(),
            run_as_admin: request.device.is_none().then_some(request.run_elevated),
            fortigate_config: request.device.as_ref().map(|p| self.device(p)),
        };
        self.post("execute", &body).await
    }

    async fn debug(&self, request: DebugRequest) -> ApiResult<DebugResponse> {
        let (commands, device) = self.device_context(request.device.as_ref());
        let body = DebugBody {
            prompt: &request.prompt,
            code: &request.code,
            stdout: &request.stdout,
            stderr: &request.stderr,
            file_type: request.artifact_kind.as_str(),
            model_config: self.model_config(&request.model, true),
            fortigate_selected_context_commands: commands,
            fortigate_config_for_context: device,
        };
        self.post("debug", &body).await
    }

    async fn install(&self, request: InstallRequest) -> ApiResult<InstallReport> {
        let body = InstallBody {
            package_name: &request.package,
        };
        let (status, value) = self.post_raw("install_package", &body).await?;

        // Failed installs come back as non-2xx with the same report shape.
        let is_report = value.get("success").is_some();
        if !status.is_success() && !is_report {
            return Err(failure_from_body("install_package", status.as_u16(), value));
        }
        parse_body("install_package", value)
    }

    async fn explain(&self, request: ExplainRequest) -> ApiResult<ExplainResponse> {
        let body = ExplainBody {
            content: &request.content,
            context: request.context.as_str(),
            file_type: request.artifact_kind.as_ref().map(|k| k.as_str()),
            model_config: self.model_config(&request.model, true),
        };
        self.post("explain", &body).await
    }

    async fn backend_logs(&self, lines: usize) -> ApiResult<Vec<String>> {
        let response = self
            .http_client
            .get(self.url("backend_logs"))
            .query(&[("lines", lines)])
            .send()
            .await
            .map_err(|e| ApiFailure::new(format!("request to /api/backend_logs failed: {}", e)))?;

        let status = response.status();
        let body: LogsBody = response.json().await.map_err(|e| {
            ApiFailure::new(format!("invalid response from /api/backend_logs: {}", e))
                .with_status(status.as_u16())
        })?;

        if status.is_success() {
            Ok(body.logs)
        } else {
            let message = body
                .error
                .unwrap_or_else(|| format!("error {} from /api/backend_logs", status.as_u16()));
            Err(ApiFailure::new(message).with_status(status.as_u16()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ArtifactKind;

    fn client(api_key: Option<&str>, password: Option<&str>) -> HttpAssistantApi {
        let config = BackendConfig {
            base_url: "http://localhost:5001/".to_string(),
            api_key: api_key.map(str::to_string),
            device_password: password.map(str::to_string),
            ..Default::default()
        };
        let mut api = HttpAssistantApi::new(&config).unwrap();
        // Ignore whatever the environment sets.
        api.api_key = api_key.map(str::to_string);
        api.device_password = password.map(str::to_string);
        api
    }

    #[test]
    fn test_client_requires_valid_config() {
        let config = BackendConfig {
            base_url: "localhost".to_string(),
            ..Default::default()
        };
        assert!(HttpAssistantApi::new(&config).is_err());
    }

    #[test]
    fn test_url_strips_trailing_slash() {
        let api = client(None, None);
        assert_eq!(api.base_url(), "http://localhost:5001");
        assert_eq!(api.url("generate"), "http://localhost:5001/api/generate");
    }

    #[test]
    fn test_model_config_uses_camel_case_and_optional_key() {
        let api = client(Some("secret"), None);
        let model = ModelSettings::default();

        let with_key = serde_json::to_value(api.model_config(&model, true)).unwrap();
        assert_eq!(with_key["modelName"], "gemini-1.5-flash");
        assert_eq!(with_key["topK"], 40);
        assert_eq!(with_key["safetySetting"], "BLOCK_MEDIUM_AND_ABOVE");
        assert_eq!(with_key["api_key"], "secret");

        let without_key = serde_json::to_value(api.model_config(&model, false)).unwrap();
        assert!(without_key.get("api_key").is_none());
    }

    #[test]
    fn test_execute_body_for_local_and_device_targets() {
        let api = client(None, Some("pw"));

        let local = ExecuteBody {
            code: "ls",
            file_type: ArtifactKind::Shell.as_str(),
            run_as_admin: Some(true),
            fortigate_config: None,
        };
        let local = serde_json::to_value(local).unwrap();
        assert_eq!(local["run_as_admin"], true);
        assert!(local.get("fortigate_config").is_none());

        let profile = DeviceProfile {
            host: "192.0.2.1".to_string(),
            ..Default::default()
        };
        let device = ExecuteBody {
            code: "get system status",
            file_type: ArtifactKind::DeviceCli.as_str(),
            run_as_admin: None,
            fortigate_config: Some(api.device(&profile)),
        };
        let device = serde_json::to_value(device).unwrap();
        assert_eq!(device["file_type"], "fortios");
        assert_eq!(device["fortigate_config"]["ipHost"], "192.0.2.1");
        assert_eq!(device["fortigate_config"]["portSsh"], 22);
        assert_eq!(device["fortigate_config"]["password"], "pw");
        assert!(device.get("run_as_admin").is_none());
    }

    #[test]
    fn test_failure_from_body_prefers_backend_message() {
        let body = serde_json::json!({
            "error": "quota exceeded",
            "thoughts": [{
                "type": "function_call_request",
                "tool_name": "get_status",
                "timestamp": "t"
            }]
        });
        let failure = failure_from_body("generate", 500, body);
        assert_eq!(failure.message, "quota exceeded");
        assert_eq!(failure.status, Some(500));
        assert_eq!(failure.thoughts.len(), 1);

        let failure = failure_from_body("review", 502, serde_json::Value::Null);
        assert_eq!(failure.message, "error 502 from /api/review");
        assert!(failure.thoughts.is_empty());
    }

    #[test]
    fn test_parse_body_reports_shape_errors() {
        let failure =
            parse_body::<InstallReport>("install_package", serde_json::json!({"success": "maybe"}))
                .unwrap_err();
        assert!(failure.message.starts_with("invalid response from /api/install_package"));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_a_failure() {
        let config = BackendConfig {
            // Port 9 (discard) on localhost is not expected to accept HTTP.
            base_url: "http://127.0.0.1:9".to_string(),
            ..Default::default()
        };
        let api = HttpAssistantApi::new(&config).unwrap();
        let failure = api.backend_logs(10).await.unwrap_err();
        assert!(failure.message.contains("/api/backend_logs"));
        assert!(!failure.timed_out);
    }
}
