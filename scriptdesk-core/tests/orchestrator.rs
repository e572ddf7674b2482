//! Integration tests for the action orchestrator
//!
//! A scripted in-memory backend answers each request with the next queued
//! response, so every scenario can control completion order explicitly.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use scriptdesk_core::api::{
    ActionRequest, ActionResponse, ApiFailure, ApiResult, AssistantApi, ChatRequest, ChatResponse,
    DebugRequest, DebugResponse, ExecuteRequest, ExecutionReport, ExplainRequest,
    ExplainResponse, GenerateRequest, GenerateResponse, InstallReport, InstallRequest,
    ReviewRequest, ReviewResponse,
};
use scriptdesk_core::logging;
use scriptdesk_core::notify::{NotificationLog, Severity};
use scriptdesk_core::orchestrator::{
    perform, ActionKind, ActionPhase, CompletedAction, Orchestrator,
};
use scriptdesk_core::preferences::Preferences;
use scriptdesk_core::types::{
    ArtifactKind, BlockId, BlockKind, BlockPayload, ExecutionOutcome, TargetEnvironment, Thought,
};

// ============================================
// Scripted backend
// ============================================

#[derive(Default)]
struct ScriptedApi {
    responses: Mutex<VecDeque<ApiResult<ActionResponse>>>,
    requests: Mutex<Vec<ActionRequest>>,
    delay: Option<Duration>,
}

impl ScriptedApi {
    fn new() -> Self {
        Self::default()
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn respond(&self, response: ApiResult<ActionResponse>) {
        self.responses.lock().unwrap().push_back(response);
    }

    fn requests(&self) -> Vec<ActionRequest> {
        self.requests.lock().unwrap().clone()
    }

    async fn answer(&self, request: ActionRequest) -> ApiResult<ActionResponse> {
        self.requests.lock().unwrap().push(request);
        let next = self.responses.lock().unwrap().pop_front();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        next.unwrap_or_else(|| Err(ApiFailure::new("no scripted response")))
    }
}

#[async_trait]
impl AssistantApi for ScriptedApi {
    async fn generate(&self, request: GenerateRequest) -> ApiResult<GenerateResponse> {
        match self.answer(ActionRequest::Generate(request)).await? {
            ActionResponse::Generate(r) => Ok(r),
            other => panic!("scripted {:?} for generate", other),
        }
    }

    async fn chat(&self, request: ChatRequest) -> ApiResult<ChatResponse> {
        match self.answer(ActionRequest::Chat(request)).await? {
            ActionResponse::Chat(r) => Ok(r),
            other => panic!("scripted {:?} for chat", other),
        }
    }

    async fn review(&self, request: ReviewRequest) -> ApiResult<ReviewResponse> {
        match self.answer(ActionRequest::Review(request)).await? {
            ActionResponse::Review(r) => Ok(r),
            other => panic!("scripted {:?} for review", other),
        }
    }

    async fn execute(&self, request: ExecuteRequest) -> ApiResult<ExecutionReport> {
        match self.answer(ActionRequest::Execute(request)).await? {
            ActionResponse::Execute(r) => Ok(r),
            other => panic!("scripted {:?} for execute", other),
        }
    }

    async fn debug(&self, request: DebugRequest) -> ApiResult<DebugResponse> {
        match self.answer(ActionRequest::Debug(request)).await? {
            ActionResponse::Debug(r) => Ok(r),
            other => panic!("scripted {:?} for debug", other),
        }
    }

    async fn install(&self, request: InstallRequest) -> ApiResult<InstallReport> {
        match self.answer(ActionRequest::Install(request)).await? {
            ActionResponse::Install(r) => Ok(r),
            other => panic!("scripted {:?} for install", other),
        }
    }

    async fn explain(&self, request: ExplainRequest) -> ApiResult<ExplainResponse> {
        match self.answer(ActionRequest::Explain(request)).await? {
            ActionResponse::Explain(r) => Ok(r),
            other => panic!("scripted {:?} for explain", other),
        }
    }

    async fn backend_logs(&self, lines: usize) -> ApiResult<Vec<String>> {
        Ok((0..lines).map(|i| format!("line {}", i)).collect())
    }
}

// ============================================
// Helpers
// ============================================

fn orchestrator() -> (Orchestrator, NotificationLog) {
    logging::init_test();
    let log = NotificationLog::new();
    let orch = Orchestrator::new(Preferences::default(), Arc::new(log.clone()));
    (orch, log)
}

fn generated(code: &str, kind: ArtifactKind) -> ApiResult<ActionResponse> {
    Ok(ActionResponse::Generate(GenerateResponse {
        code: Some(code.to_string()),
        generated_for: Some(kind),
        thoughts: Vec::new(),
    }))
}

fn executed(exit_code: i32, stdout: &str, stderr: &str) -> ApiResult<ActionResponse> {
    Ok(ActionResponse::Execute(ExecutionReport {
        message: "Execution finished".to_string(),
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        exit_code: Some(exit_code),
        warning: None,
        executed_kind: None,
    }))
}

fn thought(tool: &str) -> Thought {
    serde_json::from_value(serde_json::json!({
        "type": "function_call_request",
        "tool_name": tool,
        "tool_args": {"command": "get system status"},
        "timestamp": "2025-01-01T00:00:00"
    }))
    .unwrap()
}

/// Submit `prompt` and complete it with `code`. Returns the artifact id.
async fn generate_artifact(orch: &mut Orchestrator, api: &ScriptedApi, prompt: &str, code: &str) -> BlockId {
    api.respond(generated(code, ArtifactKind::Python));
    let pending = orch.submit_prompt(prompt).unwrap();
    let ids = orch.run(api, pending).await;
    assert_eq!(ids.len(), 1);
    ids[0]
}

fn kinds(orch: &Orchestrator) -> Vec<BlockKind> {
    orch.blocks().iter().map(|b| b.kind()).collect()
}

fn position(orch: &Orchestrator, id: &BlockId) -> usize {
    orch.store().position(id).unwrap()
}

// ============================================
// Execution scenarios
// ============================================

#[tokio::test]
async fn test_successful_execution_adds_one_result() {
    let api = ScriptedApi::new();
    let (mut orch, log) = orchestrator();
    let artifact = generate_artifact(&mut orch, &api, "print hello", "print('hello')").await;
    log.clear();

    api.respond(executed(0, "hello\n", ""));
    let pending = orch.execute(&artifact).unwrap();
    assert!(orch.is_kind_busy(ActionKind::Execute));
    let before = orch.blocks().len();
    let ids = orch.run(&api, pending).await;

    assert_eq!(ids.len(), 1);
    assert_eq!(orch.blocks().len(), before + 1);
    assert_eq!(position(&orch, &ids[0]), position(&orch, &artifact) + 1);
    match &orch.get(&ids[0]).unwrap().payload {
        BlockPayload::ExecutionResult(result) => {
            assert_eq!(result.outcome, ExecutionOutcome::Succeeded);
            assert_eq!(result.code, "print('hello')");
        }
        other => panic!("expected execution result, got {:?}", other),
    }
    assert!(!orch.can_debug(&ids[0]));
    assert_eq!(log.count(Severity::Success), 1);
    assert_eq!(orch.phase(ActionKind::Execute), ActionPhase::Idle);
}

#[tokio::test]
async fn test_failed_execution_enables_debug() {
    let api = ScriptedApi::new();
    let (mut orch, log) = orchestrator();
    let artifact = generate_artifact(&mut orch, &api, "read config", "open('x')").await;

    api.respond(executed(1, "", "FileNotFoundError: x"));
    let pending = orch.execute(&artifact).unwrap();
    let ids = orch.run(&api, pending).await;

    assert_eq!(ids.len(), 1);
    assert!(orch.can_debug(&ids[0]));
    let last = log.last().unwrap();
    assert_eq!(last.severity, Severity::Error);
    assert!(last.message.contains("FileNotFoundError"));
    assert_eq!(
        orch.board().last_outcome(ActionKind::Execute),
        Some(ActionPhase::Succeeded)
    );
}

#[tokio::test]
async fn test_clean_exit_with_error_words_is_degraded() {
    let api = ScriptedApi::new();
    let (mut orch, log) = orchestrator();
    let artifact = generate_artifact(&mut orch, &api, "check", "print('x')").await;

    api.respond(executed(0, "Traceback (most recent call last):", ""));
    let pending = orch.execute(&artifact).unwrap();
    let ids = orch.run(&api, pending).await;

    match &orch.get(&ids[0]).unwrap().payload {
        BlockPayload::ExecutionResult(result) => {
            assert_eq!(result.outcome, ExecutionOutcome::SucceededWithIssues)
        }
        other => panic!("expected execution result, got {:?}", other),
    }
    assert!(orch.can_debug(&ids[0]));
    assert_eq!(log.last().unwrap().severity, Severity::Warning);
}

// ============================================
// Placement
// ============================================

#[tokio::test]
async fn test_debug_result_lands_in_place_despite_new_rounds() {
    let api = ScriptedApi::new();
    let (mut orch, _) = orchestrator();
    let artifact = generate_artifact(&mut orch, &api, "parse the csv", "import csvv").await;

    api.respond(executed(1, "", "ModuleNotFoundError: csvv"));
    let pending = orch.execute(&artifact).unwrap();
    let exec = orch.run(&api, pending).await[0];

    let debug = orch.debug(&exec).unwrap();
    let placeholder = debug.placeholder().unwrap();
    assert_eq!(position(&orch, &placeholder), position(&orch, &exec) + 1);

    // An unrelated round opens and completes while debug is in flight.
    let later = generate_artifact(&mut orch, &api, "something else", "print(2)").await;
    assert!(position(&orch, &later) > position(&orch, &placeholder));

    api.respond(Ok(ActionResponse::Debug(DebugResponse {
        explanation: Some("typo in module name".to_string()),
        corrected_code: Some("import csv".to_string()),
        suggested_package: None,
        source_kind: Some(ArtifactKind::Python),
        thoughts: Vec::new(),
    })));
    let ids = orch.run(&api, debug).await;

    assert_eq!(ids.len(), 1);
    assert!(orch.get(&placeholder).is_none());
    assert_eq!(position(&orch, &ids[0]), position(&orch, &exec) + 1);
    assert_eq!(orch.blocks().last().unwrap().id, later);

    let request = api.requests().into_iter().find_map(|r| match r {
        ActionRequest::Debug(d) => Some(d),
        _ => None,
    });
    let request = request.unwrap();
    assert_eq!(request.prompt, "parse the csv");
    assert_eq!(request.code, "import csvv");
    assert_eq!(request.stderr, "ModuleNotFoundError: csvv");
}

#[tokio::test]
async fn test_overlapping_review_and_execute_cluster_after_artifact() {
    let api = ScriptedApi::new();
    let (mut orch, _) = orchestrator();
    let artifact = generate_artifact(&mut orch, &api, "list files", "import os").await;
    let before = orch.blocks().len();

    let review = orch.review(&artifact).unwrap();
    let execute = orch.execute(&artifact).unwrap();
    assert!(orch.is_kind_busy(ActionKind::Review));
    assert!(orch.is_kind_busy(ActionKind::Execute));

    api.respond(Ok(ActionResponse::Review(ReviewResponse {
        review: Some("fine".to_string()),
        thoughts: Vec::new(),
    })));
    let review_done = perform(&api, review).await;
    api.respond(executed(0, "ok", ""));
    let execute_done = perform(&api, execute).await;

    // Completion order is execute first, then review.
    let exec_ids = orch.complete(execute_done);
    let review_ids = orch.complete(review_done);

    assert!(!orch.is_busy());
    assert_eq!(orch.blocks().len(), before + 2);
    let at = position(&orch, &artifact);
    let cluster = [orch.blocks()[at + 1].id, orch.blocks()[at + 2].id];
    assert!(cluster.contains(&exec_ids[0]));
    assert!(cluster.contains(&review_ids[0]));
    assert!(!kinds(&orch).contains(&BlockKind::LoadingPlaceholder));
}

#[tokio::test]
async fn test_thinking_trace_precedes_result() {
    let api = ScriptedApi::new();
    let (mut orch, _) = orchestrator();
    let artifact = generate_artifact(&mut orch, &api, "list files", "import os").await;

    api.respond(Ok(ActionResponse::Explain(ExplainResponse {
        explanation: None,
        thoughts: vec![thought("lookup_docs")],
    })));
    let pending = orch.explain(&artifact).unwrap();
    let ids = orch.run(&api, pending).await;

    assert_eq!(ids.len(), 2);
    let trace = orch.get(&ids[0]).unwrap();
    assert_eq!(trace.kind(), BlockKind::ThinkingTrace);
    assert_eq!(trace.thoughts.len(), 1);
    match &orch.get(&ids[1]).unwrap().payload {
        BlockPayload::Explanation { text } => assert_eq!(text, "(no content)"),
        other => panic!("expected explanation, got {:?}", other),
    }
    assert_eq!(position(&orch, &ids[0]), position(&orch, &artifact) + 1);
}

// ============================================
// Gating and failures
// ============================================

#[tokio::test]
async fn test_same_kind_is_gated_other_kinds_are_not() {
    let api = ScriptedApi::new();
    let (mut orch, log) = orchestrator();
    let artifact = generate_artifact(&mut orch, &api, "list files", "import os").await;

    let first = orch.review(&artifact).unwrap();
    let blocks = orch.blocks().len();
    assert!(orch.review(&artifact).unwrap_err().is_validation());
    assert_eq!(orch.blocks().len(), blocks);
    assert!(log.last().unwrap().message.contains("review is already in progress"));

    assert!(orch.explain(&artifact).is_ok());
    assert!(orch.is_busy());

    api.respond(Err(ApiFailure::new("backend unavailable").with_status(503)));
    let ids = orch.run(&api, first).await;
    assert_eq!(orch.get(&ids[0]).unwrap().kind(), BlockKind::Error);
    assert!(!orch.is_kind_busy(ActionKind::Review));
    assert!(orch.is_kind_busy(ActionKind::Explain));
    assert_eq!(
        orch.board().last_outcome(ActionKind::Review),
        Some(ActionPhase::Failed)
    );
}

#[tokio::test]
async fn test_abandoned_action_releases_its_kind() {
    let (mut orch, _) = orchestrator();
    let pending = orch.submit_prompt("list files").unwrap();
    let placeholder = pending.placeholder().unwrap();
    assert!(orch.is_kind_busy(ActionKind::Generate));

    let ids = orch.complete(CompletedAction::abandoned(pending, "action task failed: panicked"));

    assert!(!orch.is_kind_busy(ActionKind::Generate));
    assert!(orch.get(&placeholder).is_none());
    assert_eq!(kinds(&orch), vec![BlockKind::UserRequest, BlockKind::Error]);
    match &orch.get(&ids[0]).unwrap().payload {
        BlockPayload::Error(detail) => assert!(detail.message.contains("panicked")),
        other => panic!("expected error block, got {:?}", other),
    }
    assert!(orch.submit_prompt("try again").is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_becomes_error_block() {
    let api = ScriptedApi::new().with_delay(Duration::from_secs(600));
    let (mut orch, log) = orchestrator();

    api.respond(generated("print(1)", ArtifactKind::Python));
    let pending = orch.submit_prompt("slow request").unwrap();
    let placeholder = pending.placeholder().unwrap();
    let ids = orch.run(&api, pending).await;

    assert!(orch.get(&placeholder).is_none());
    match &orch.get(&ids[0]).unwrap().payload {
        BlockPayload::Error(detail) => {
            assert!(detail.timed_out);
            assert_eq!(detail.action, ActionKind::Generate);
            assert!(detail.message.contains("90 seconds"));
        }
        other => panic!("expected error block, got {:?}", other),
    }
    assert!(log.last().unwrap().message.contains("timed out"));
    assert!(!orch.is_busy());
}

#[tokio::test]
async fn test_failure_preserves_thoughts() {
    let api = ScriptedApi::new();
    let (mut orch, _) = orchestrator();
    let artifact = generate_artifact(&mut orch, &api, "list files", "import os").await;

    api.respond(Err(
        ApiFailure::new("tool crashed").with_thoughts(vec![thought("run_cli"), thought("get_logs")])
    ));
    let pending = orch.review(&artifact).unwrap();
    let ids = orch.run(&api, pending).await;

    let block = orch.get(&ids[0]).unwrap();
    assert_eq!(block.kind(), BlockKind::Error);
    assert_eq!(block.thoughts.len(), 2);
}

#[tokio::test]
async fn test_debug_rejected_for_successful_execution() {
    let api = ScriptedApi::new();
    let (mut orch, _) = orchestrator();
    let artifact = generate_artifact(&mut orch, &api, "hello", "print(1)").await;

    api.respond(executed(0, "1", ""));
    let pending = orch.execute(&artifact).unwrap();
    let exec = orch.run(&api, pending).await[0];

    let blocks = orch.blocks().len();
    assert!(orch.debug(&exec).unwrap_err().is_validation());
    assert!(orch.debug(&artifact).unwrap_err().is_validation());
    assert_eq!(orch.blocks().len(), blocks);
    assert!(!orch.is_busy());
}

// ============================================
// Debug, install and corrected code
// ============================================

#[tokio::test]
async fn test_install_lands_after_debug_result() {
    let api = ScriptedApi::new();
    let (mut orch, log) = orchestrator();
    let artifact = generate_artifact(&mut orch, &api, "fetch a page", "import requests").await;

    api.respond(executed(1, "", "ModuleNotFoundError: requests"));
    let pending = orch.execute(&artifact).unwrap();
    let exec = orch.run(&api, pending).await[0];

    api.respond(Ok(ActionResponse::Debug(DebugResponse {
        explanation: Some("requests is not installed".to_string()),
        corrected_code: None,
        suggested_package: Some("requests".to_string()),
        source_kind: None,
        thoughts: Vec::new(),
    })));
    let pending = orch.debug(&exec).unwrap();
    let debug = orch.run(&api, pending).await[0];
    assert!(orch.apply_corrected_code(&debug).unwrap_err().is_validation());

    api.respond(Ok(ActionResponse::Install(InstallReport {
        success: false,
        message: "pip failed".to_string(),
        stdout: String::new(),
        stderr: "no network".to_string(),
    })));
    let pending = orch.install(&debug, None).unwrap();
    assert!(pending.placeholder().is_none());
    let ids = orch.run(&api, pending).await;

    assert_eq!(position(&orch, &ids[0]), position(&orch, &debug) + 1);
    match &orch.get(&ids[0]).unwrap().payload {
        BlockPayload::InstallationResult(result) => {
            assert!(!result.success);
            assert_eq!(result.package, "requests");
        }
        other => panic!("expected installation result, got {:?}", other),
    }
    assert_eq!(log.last().unwrap().severity, Severity::Error);
    assert_eq!(
        orch.board().last_outcome(ActionKind::Install),
        Some(ActionPhase::Failed)
    );
}

#[tokio::test]
async fn test_corrected_code_flow_uses_provenance() {
    let api = ScriptedApi::new();
    let (mut orch, _) = orchestrator();
    let artifact = generate_artifact(&mut orch, &api, "sum numbers", "print(sum(1, 2))").await;

    api.respond(executed(1, "", "TypeError: 'int' object is not iterable"));
    let pending = orch.execute(&artifact).unwrap();
    let exec = orch.run(&api, pending).await[0];

    api.respond(Ok(ActionResponse::Debug(DebugResponse {
        explanation: Some("sum takes an iterable".to_string()),
        corrected_code: Some("print(sum([1, 2]))".to_string()),
        suggested_package: None,
        source_kind: Some(ArtifactKind::Python),
        thoughts: Vec::new(),
    })));
    let pending = orch.debug(&exec).unwrap();
    let debug = orch.run(&api, pending).await[0];

    let fixed = orch.apply_corrected_code(&debug).unwrap();
    assert_eq!(position(&orch, &fixed), position(&orch, &debug) + 1);
    assert_eq!(orch.editing().unwrap().block_id, fixed);

    orch.update_draft("print(sum([1, 2, 3]))");
    orch.save_edit(&fixed).unwrap();
    assert!(orch.editing().is_none());

    // Debugging the first failure again still resolves the original artifact.
    api.respond(Ok(ActionResponse::Debug(DebugResponse::default())));
    let pending = orch.debug(&exec).unwrap();
    orch.run(&api, pending).await;

    // The corrected artifact fails too; its debug sees the corrected code.
    api.respond(executed(1, "", "still broken"));
    let pending = orch.execute(&fixed).unwrap();
    let second_exec = orch.run(&api, pending).await[0];
    api.respond(Ok(ActionResponse::Debug(DebugResponse::default())));
    let pending = orch.debug(&second_exec).unwrap();
    orch.run(&api, pending).await;

    let debugs: Vec<DebugRequest> = api
        .requests()
        .into_iter()
        .filter_map(|r| match r {
            ActionRequest::Debug(d) => Some(d),
            _ => None,
        })
        .collect();
    assert_eq!(debugs.len(), 3);
    assert_eq!(debugs[1].code, "print(sum(1, 2))");
    assert_eq!(debugs[1].prompt, "sum numbers");
    assert_eq!(debugs[2].code, "print(sum([1, 2, 3]))");
    assert_eq!(debugs[2].prompt, "sum numbers");
}

// ============================================
// Editing and rounds
// ============================================

#[tokio::test]
async fn test_edit_round_trip_feeds_execution() {
    let api = ScriptedApi::new();
    let (mut orch, _) = orchestrator();
    let artifact = generate_artifact(&mut orch, &api, "greet", "print('hi')").await;

    orch.begin_edit(&artifact).unwrap();
    orch.update_draft("print('hello')");
    orch.save_edit(&artifact).unwrap();

    assert_eq!(
        orch.get(&artifact).unwrap().payload.editable_text(),
        Some("print('hello')")
    );

    api.respond(executed(0, "hello", ""));
    let pending = orch.execute(&artifact).unwrap();
    orch.run(&api, pending).await;
    match &api.requests()[1] {
        ActionRequest::Execute(req) => assert_eq!(req.code, "print('hello')"),
        other => panic!("expected execute, got {:?}", other),
    }
}

#[tokio::test]
async fn test_new_round_collapses_earlier_rounds() {
    let api = ScriptedApi::new();
    let (mut orch, _) = orchestrator();
    generate_artifact(&mut orch, &api, "first", "print(1)").await;
    let first_anchor = orch.blocks()[0].id;

    assert_eq!(orch.toggle_round(&first_anchor), Some(false));
    generate_artifact(&mut orch, &api, "second", "print(2)").await;

    let rounds = orch.rounds();
    assert_eq!(rounds.len(), 2);
    assert!(rounds[0].collapsed);
    assert!(!rounds[1].collapsed);

    // Toggling twice returns to the original state.
    assert_eq!(orch.toggle_round(&first_anchor), Some(false));
    assert_eq!(orch.toggle_round(&first_anchor), Some(true));
}

#[tokio::test]
async fn test_device_chat_carries_history() {
    let api = ScriptedApi::new();
    let log = NotificationLog::new();
    let mut prefs = Preferences::default();
    prefs.set_target(TargetEnvironment::Device);
    let mut orch = Orchestrator::new(prefs, Arc::new(log.clone()));

    api.respond(Ok(ActionResponse::Chat(ChatResponse {
        answer: Some("Firmware is 7.4.2".to_string()),
        thoughts: vec![thought("run_cli")],
    })));
    let pending = orch.submit_prompt("which firmware?").unwrap();
    let ids = orch.run(&api, pending).await;
    assert_eq!(
        kinds(&orch),
        vec![
            BlockKind::UserRequest,
            BlockKind::ThinkingTrace,
            BlockKind::Explanation
        ]
    );
    assert_eq!(ids.len(), 2);

    api.respond(Ok(ActionResponse::Chat(ChatResponse::default())));
    let pending = orch.submit_prompt("and the uptime?").unwrap();
    orch.run(&api, pending).await;

    match &api.requests()[1] {
        ActionRequest::Chat(chat) => {
            assert!(chat.history.contains("which firmware?"));
            assert!(chat.history.contains("Firmware is 7.4.2"));
            assert!(!chat.history.contains("and the uptime?"));
        }
        other => panic!("expected chat, got {:?}", other),
    }
}
