//! Action orchestration
//!
//! The [`Orchestrator`] owns the conversation and drives every user action
//! through its state machine. Actions are split in two halves so that no
//! borrow of the conversation is held across the network call:
//!
//! 1. `submit_prompt`, `review`, `execute`, `debug`, `install` and `explain`
//!    validate, mark the kind busy, insert any placeholder and return a
//!    [`PendingAction`] describing the remote call.
//! 2. [`perform`] runs the call under its deadline, detached from the
//!    orchestrator.
//! 3. [`Orchestrator::complete`] applies the outcome to whatever the
//!    conversation looks like *at completion time*: the placeholder is
//!    removed and the results are spliced where it stood.
//!
//! Validation errors are returned (and notified) without touching the
//! conversation. Remote failures always end as a block.

mod action;
mod outcome;

pub use crate::types::ActionKind;
pub use action::{ActionBoard, ActionPhase};
pub use outcome::{classify, KeywordHeuristic, OutputHeuristic, CLIENT_FAILURE_EXIT_CODE};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::api::{
    dispatch, ActionRequest, ActionResponse, ApiFailure, ApiResult, AssistantApi, ChatRequest,
    DebugRequest, DeviceContext, ExecuteRequest, ExecutionReport, ExplainContext, ExplainRequest,
    GenerateRequest, InstallReport, InstallRequest, ReviewRequest,
};
use crate::config::Config;
use crate::conversation::{
    chat_transcript, layout_rounds, BeginEdit, BlockPatch, BlockStore, CancelledEdit,
    CollapseState, EditSession, EditingOverlay, RoundView, SharedBlock,
};
use crate::error::{Error, Result};
use crate::notify::{Notifier, Severity};
use crate::preferences::Preferences;
use crate::types::{
    ArtifactKind, Block, BlockId, BlockKind, BlockPayload, DebugResult, ErrorDetail,
    ExecutionOutcome, ExecutionResult, InstallationResult, NO_CONTENT,
};

/// How long a new block keeps its entrance animation flag.
pub const ANIMATION_DURATION: Duration = Duration::from_millis(500);

/// Used when no user request precedes a failing artifact.
pub const MISSING_PROMPT: &str = "(original prompt not found)";

/// Deadlines and execution options.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    pub timeout: Duration,
    /// Deadline for executions on the network device
    pub device_timeout: Duration,
    pub run_elevated: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(90),
            device_timeout: Duration::from_secs(120),
            run_elevated: false,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: config.backend.timeout(),
            device_timeout: config.backend.device_timeout(),
            run_elevated: config.execution.run_elevated,
        }
    }
}

/// What completion needs to know beyond the response.
#[derive(Debug, Clone, PartialEq)]
enum Subject {
    Generate,
    Chat,
    Review,
    Execute { code: String, kind: ArtifactKind },
    Debug { kind: ArtifactKind },
    Install { package: String },
    Explain,
}

/// A started action waiting for its remote call.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAction {
    kind: ActionKind,
    /// Block the results are inserted after when there is no placeholder
    anchor: BlockId,
    placeholder: Option<BlockId>,
    request: ActionRequest,
    deadline: Duration,
    subject: Subject,
}

impl PendingAction {
    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    pub fn anchor(&self) -> BlockId {
        self.anchor
    }

    pub fn placeholder(&self) -> Option<BlockId> {
        self.placeholder
    }

    pub fn request(&self) -> &ActionRequest {
        &self.request
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }
}

/// A pending action together with the outcome of its remote call.
#[derive(Debug, Clone)]
pub struct CompletedAction {
    pub pending: PendingAction,
    pub result: ApiResult<ActionResponse>,
}

impl CompletedAction {
    /// Complete `pending` as failed when its call never returned, for
    /// example because the task running it panicked.
    pub fn abandoned(pending: PendingAction, reason: impl Into<String>) -> Self {
        Self {
            pending,
            result: Err(ApiFailure::new(reason)),
        }
    }
}

/// Run the remote call for `pending` under its deadline.
pub async fn perform(api: &dyn AssistantApi, pending: PendingAction) -> CompletedAction {
    let result = dispatch(api, pending.request.clone(), pending.deadline).await;
    CompletedAction { pending, result }
}

/// Owns the conversation and sequences every action on it.
pub struct Orchestrator {
    store: BlockStore,
    overlay: EditingOverlay,
    collapse: CollapseState,
    board: ActionBoard,
    preferences: Preferences,
    heuristic: Box<dyn OutputHeuristic>,
    notifier: Arc<dyn Notifier>,
    settings: OrchestratorSettings,
    /// Blocks whose entrance flag is set, with the time it was set
    animations: Vec<(BlockId, DateTime<Utc>)>,
}

impl Orchestrator {
    pub fn new(preferences: Preferences, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store: BlockStore::new(),
            overlay: EditingOverlay::new(),
            collapse: CollapseState::new(),
            board: ActionBoard::new(),
            preferences,
            heuristic: Box::new(KeywordHeuristic::default()),
            notifier,
            settings: OrchestratorSettings::default(),
            animations: Vec::new(),
        }
    }

    /// Orchestrator using deadlines, options and keywords from `config`.
    pub fn from_config(config: &Config, preferences: Preferences, notifier: Arc<dyn Notifier>) -> Self {
        Self::new(preferences, notifier)
            .with_settings(OrchestratorSettings::from_config(config))
            .with_heuristic(KeywordHeuristic::new(&config.execution.error_keywords))
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_heuristic(mut self, heuristic: impl OutputHeuristic + 'static) -> Self {
        self.heuristic = Box::new(heuristic);
        self
    }

    // ============================================
    // Queries
    // ============================================

    pub fn blocks(&self) -> &[SharedBlock] {
        self.store.blocks()
    }

    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    pub fn get(&self, id: &BlockId) -> Option<&Block> {
        self.store.get(id)
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    /// Preferences changed mid-session apply to the next action.
    pub fn preferences_mut(&mut self) -> &mut Preferences {
        &mut self.preferences
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// True while any action kind is pending.
    pub fn is_busy(&self) -> bool {
        self.board.any_busy()
    }

    pub fn is_kind_busy(&self, kind: ActionKind) -> bool {
        self.board.is_busy(kind)
    }

    pub fn phase(&self, kind: ActionKind) -> ActionPhase {
        self.board.phase(kind)
    }

    pub fn board(&self) -> &ActionBoard {
        &self.board
    }

    /// Rounds with the current collapse policy applied.
    pub fn rounds(&self) -> Vec<RoundView<'_>> {
        layout_rounds(self.store.blocks(), &self.collapse)
    }

    /// Flip the collapse state of the round opened by `anchor`.
    ///
    /// Returns the new collapsed value, or `None` if `anchor` does not open
    /// a round.
    pub fn toggle_round(&mut self, anchor: &BlockId) -> Option<bool> {
        let opens_round = self.store.get(anchor).is_some_and(Block::is_user_request);
        if !opens_round {
            return None;
        }
        let collapsed = self.collapse.toggle(*anchor);
        tracing::debug!(anchor = %anchor, collapsed, "Toggled round");
        Some(collapsed)
    }

    /// Text to act on for `id`: the live draft when it is under edit,
    /// otherwise the stored artifact text.
    pub fn code_for(&self, id: &BlockId) -> Option<String> {
        if let Some(draft) = self.overlay.draft_for(id) {
            return Some(draft.to_string());
        }
        self.store
            .get(id)
            .and_then(|b| b.payload.editable_text())
            .map(str::to_string)
    }

    /// Whether `id` is an execution result that can be debugged.
    pub fn can_debug(&self, id: &BlockId) -> bool {
        matches!(
            self.store.get(id).map(|b| &b.payload),
            Some(BlockPayload::ExecutionResult(result)) if result.outcome.needs_attention()
        )
    }

    // ============================================
    // Starting actions
    // ============================================

    /// Open a new round for `prompt`.
    ///
    /// With a device target and interactive mode off the prompt becomes a
    /// device chat; otherwise it asks for an artifact.
    pub fn submit_prompt(&mut self, prompt: &str) -> Result<PendingAction> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return self.reject(Error::Validation("enter a request first".to_string()));
        }
        self.ensure_idle(ActionKind::Generate)?;

        let chat = self.preferences.routes_to_chat();
        // History is taken before the new request is added.
        let history = chat.then(|| chat_transcript(self.store.blocks()));

        self.board.begin(ActionKind::Generate)?;
        self.collapse.reset();

        let anchor = self.store.append(Block::user_request(prompt));
        let label = if chat {
            "Thinking..."
        } else {
            "Generating..."
        };
        let placeholder = self.store.append(Block::placeholder(label));
        self.mark_animated(&[anchor, placeholder]);

        let prefs = &self.preferences;
        let (request, subject) = match history {
            Some(history) => (
                ActionRequest::Chat(ChatRequest {
                    prompt: prompt.to_string(),
                    history,
                    model: prefs.model.clone(),
                    device: self.device_context(),
                }),
                Subject::Chat,
            ),
            None => (
                ActionRequest::Generate(GenerateRequest {
                    prompt: prompt.to_string(),
                    target: prefs.target,
                    artifact_kind: prefs.artifact_kind.clone(),
                    model: prefs.model.clone(),
                    device: prefs
                        .is_device_related(prompt)
                        .then(|| self.device_context()),
                }),
                Subject::Generate,
            ),
        };

        tracing::info!(block_id = %anchor, chat, "Opened round");
        Ok(PendingAction {
            kind: ActionKind::Generate,
            anchor,
            placeholder: Some(placeholder),
            request,
            deadline: self.settings.timeout,
            subject,
        })
    }

    /// Ask for a review of the artifact `id`.
    pub fn review(&mut self, id: &BlockId) -> Result<PendingAction> {
        let block = self.require(id)?;
        let kind = block.effective_artifact_kind();
        let Some(code) = self.code_for(id).filter(|c| !c.trim().is_empty()) else {
            return self.reject(Error::Validation("there is no code to review".to_string()));
        };
        self.ensure_idle(ActionKind::Review)?;

        let request = ActionRequest::Review(ReviewRequest {
            code,
            artifact_kind: kind,
            model: self.preferences.model.clone(),
        });
        self.start_attached(ActionKind::Review, *id, "Reviewing...", request, Subject::Review)
    }

    /// Run the artifact `id`. No placeholder is shown; the result is
    /// inserted right after the artifact.
    pub fn execute(&mut self, id: &BlockId) -> Result<PendingAction> {
        let block = self.require(id)?;
        let kind = block.effective_artifact_kind();
        let Some(code) = self.code_for(id).filter(|c| !c.trim().is_empty()) else {
            return self.reject(Error::Validation("there is no code to run".to_string()));
        };

        let on_device = kind.is_device_cli();
        if on_device && !self.preferences.device.is_complete() {
            return self.reject(Error::Validation(
                "set the device host and username before running device commands".to_string(),
            ));
        }
        self.ensure_idle(ActionKind::Execute)?;
        self.board.begin(ActionKind::Execute)?;

        let request = ActionRequest::Execute(ExecuteRequest {
            code: code.clone(),
            artifact_kind: kind.clone(),
            run_elevated: self.settings.run_elevated && !on_device,
            device: on_device.then(|| self.preferences.device.clone()),
        });
        let deadline = if on_device {
            self.settings.device_timeout
        } else {
            self.settings.timeout
        };

        tracing::info!(block_id = %id, kind = %kind, "Executing artifact");
        self.notifier.notify(
            Severity::Info,
            if on_device {
                "Sending commands to the device..."
            } else {
                "Running..."
            },
        );
        Ok(PendingAction {
            kind: ActionKind::Execute,
            anchor: *id,
            placeholder: None,
            request,
            deadline,
            subject: Subject::Execute { code, kind },
        })
    }

    /// Debug the failing execution `execution_id`.
    ///
    /// The failing artifact and the prompt that produced it are found by
    /// walking the execution block's provenance backwards.
    pub fn debug(&mut self, execution_id: &BlockId) -> Result<PendingAction> {
        let block = self.require(execution_id)?;
        let BlockPayload::ExecutionResult(result) = &block.payload else {
            return self.reject(Error::Validation(
                "only execution results can be debugged".to_string(),
            ));
        };
        if !result.outcome.needs_attention() {
            return self.reject(Error::Validation(
                "the execution succeeded; there is nothing to debug".to_string(),
            ));
        }

        let artifact = block.provenance.nearest(BlockKind::GeneratedArtifact);
        let request = match artifact {
            Some(a) => block
                .provenance
                .nearest_before(&a.id, BlockKind::UserRequest),
            None => block.provenance.nearest(BlockKind::UserRequest),
        };
        let prompt = request
            .and_then(|b| match &b.payload {
                BlockPayload::UserRequest { prompt } => Some(prompt.clone()),
                _ => None,
            })
            .unwrap_or_else(|| MISSING_PROMPT.to_string());

        let draft = artifact.and_then(|a| self.overlay.draft_for(&a.id));
        let stored = artifact.and_then(|a| a.payload.editable_text());
        let code = draft
            .map(str::to_string)
            .or_else(|| Some(result.code.clone()).filter(|c| !c.trim().is_empty()))
            .or_else(|| stored.map(str::to_string))
            .unwrap_or_default();
        if code.trim().is_empty() {
            return self.reject(Error::Validation(
                "could not find the code that failed".to_string(),
            ));
        }

        let kind = result
            .executed_kind
            .clone()
            .or_else(|| artifact.map(Block::effective_artifact_kind))
            .unwrap_or_default();
        let (stdout, stderr) = (result.stdout.clone(), result.stderr.clone());
        self.ensure_idle(ActionKind::Debug)?;

        tracing::debug!(
            block_id = %execution_id,
            artifact = ?artifact.map(|a| a.id),
            "Resolved debug subject"
        );
        let request = ActionRequest::Debug(DebugRequest {
            prompt,
            code,
            stdout,
            stderr,
            artifact_kind: kind.clone(),
            model: self.preferences.model.clone(),
            device: kind.is_device_cli().then(|| self.device_context()),
        });
        self.start_attached(
            ActionKind::Debug,
            *execution_id,
            "Debugging...",
            request,
            Subject::Debug { kind },
        )
    }

    /// Install the dependency suggested by the debug result `debug_id`, or
    /// `package` when given.
    pub fn install(&mut self, debug_id: &BlockId, package: Option<&str>) -> Result<PendingAction> {
        let block = self.require(debug_id)?;
        let BlockPayload::DebugResult(result) = &block.payload else {
            return self.reject(Error::Validation(
                "packages are installed from debug results".to_string(),
            ));
        };
        let package = package
            .map(str::to_string)
            .or_else(|| result.suggested_package.clone())
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
        let Some(package) = package else {
            return self.reject(Error::Validation("no package to install".to_string()));
        };
        self.ensure_idle(ActionKind::Install)?;
        self.board.begin(ActionKind::Install)?;

        tracing::info!(block_id = %debug_id, package = %package, "Installing package");
        self.notifier
            .notify(Severity::Info, &format!("Installing {}...", package));
        Ok(PendingAction {
            kind: ActionKind::Install,
            anchor: *debug_id,
            placeholder: None,
            request: ActionRequest::Install(InstallRequest {
                package: package.clone(),
            }),
            deadline: self.settings.timeout,
            subject: Subject::Install { package },
        })
    }

    /// Ask for an explanation of block `id`.
    pub fn explain(&mut self, id: &BlockId) -> Result<PendingAction> {
        let block = self.require(id)?;
        let (context, content) = match &block.payload {
            BlockPayload::GeneratedArtifact { .. } => (
                ExplainContext::Code,
                self.code_for(id).unwrap_or_default(),
            ),
            BlockPayload::ExecutionResult(result) => {
                (ExplainContext::ExecutionResult, pretty_json(result)?)
            }
            BlockPayload::InstallationResult(result) => {
                (ExplainContext::ExecutionResult, pretty_json(result)?)
            }
            BlockPayload::DebugResult(result) => (ExplainContext::DebugResult, pretty_json(result)?),
            BlockPayload::ReviewResult { review } => (ExplainContext::Review, review.clone()),
            BlockPayload::Explanation { text } => (ExplainContext::Explanation, text.clone()),
            BlockPayload::UserRequest { prompt } => (ExplainContext::UserPrompt, prompt.clone()),
            BlockPayload::Error(detail) => (ExplainContext::Error, detail.message.clone()),
            BlockPayload::LoadingPlaceholder { .. } | BlockPayload::ThinkingTrace => {
                return self.reject(Error::Validation(
                    "this block has nothing to explain".to_string(),
                ));
            }
        };
        if content.trim().is_empty() {
            return self.reject(Error::Validation("there is nothing to explain".to_string()));
        }
        let artifact_kind = (context == ExplainContext::Code).then(|| block.effective_artifact_kind());
        self.ensure_idle(ActionKind::Explain)?;

        let request = ActionRequest::Explain(ExplainRequest {
            content,
            context,
            artifact_kind,
            model: self.preferences.model.clone(),
        });
        self.start_attached(ActionKind::Explain, *id, "Explaining...", request, Subject::Explain)
    }

    /// Turn the corrected code of debug result `debug_id` into a new
    /// artifact right after it and open it for editing.
    pub fn apply_corrected_code(&mut self, debug_id: &BlockId) -> Result<BlockId> {
        let block = self.require(debug_id)?;
        if !matches!(block.payload, BlockPayload::DebugResult(_)) {
            return self.reject(Error::Validation(
                "corrected code comes from debug results".to_string(),
            ));
        }
        let kind = block.effective_artifact_kind();
        let Some(code) = self.code_for(debug_id).filter(|c| !c.trim().is_empty()) else {
            return self.reject(Error::Validation(
                "this debug result has no corrected code".to_string(),
            ));
        };

        let ids = self
            .store
            .splice_after(debug_id, vec![Block::artifact(code.clone(), kind)]);
        self.mark_animated(&ids);
        let Some(new_id) = ids.first().copied() else {
            return Err(Error::BlockNotFound(debug_id.short()));
        };

        tracing::info!(block_id = %new_id, source = %debug_id, "Applied corrected code");
        self.notifier
            .notify(Severity::Success, "Corrected code added; edit it before running");
        let outcome = self.overlay.begin_edit(new_id, code);
        self.notify_edit(&outcome);
        Ok(new_id)
    }

    // ============================================
    // Completing actions
    // ============================================

    /// Apply the outcome of a remote call to the current conversation.
    ///
    /// Returns the ids of the inserted blocks, in order.
    pub fn complete(&mut self, completed: CompletedAction) -> Vec<BlockId> {
        let CompletedAction { pending, result } = completed;
        let kind = pending.kind;

        let (blocks, succeeded) = match (&pending.subject, result) {
            (Subject::Execute { code, kind }, Ok(ActionResponse::Execute(report))) => {
                let block = self.execution_block(code, kind, report);
                (vec![block], true)
            }
            (Subject::Execute { code, kind }, Err(failure)) => {
                (vec![self.client_failure_block(code, kind, failure)], false)
            }
            (Subject::Install { package }, Ok(ActionResponse::Install(report))) => {
                let success = report.success;
                (vec![self.installation_block(package, report)], success)
            }
            (Subject::Install { package }, Err(failure)) => {
                (vec![self.installation_failure_block(package, failure)], false)
            }
            (subject, Ok(response)) => match self.result_blocks(subject, response) {
                Some(blocks) => (blocks, true),
                None => {
                    let failure = ApiFailure::new("unexpected response from the backend");
                    (vec![self.failure_block(kind, failure)], false)
                }
            },
            (_, Err(failure)) => (vec![self.failure_block(kind, failure)], false),
        };

        self.board.finish(kind, succeeded);
        let ids = self.insert_results(&pending, blocks);
        tracing::info!(kind = %kind, succeeded, inserted = ids.len(), "Action completed");
        ids
    }

    /// Run `pending` against `api` and apply the outcome.
    ///
    /// Convenience for callers that await one action at a time.
    pub async fn run(&mut self, api: &dyn AssistantApi, pending: PendingAction) -> Vec<BlockId> {
        let completed = perform(api, pending).await;
        self.complete(completed)
    }

    fn result_blocks(&self, subject: &Subject, response: ActionResponse) -> Option<Vec<Block>> {
        let (block, thoughts, message) = match (subject, response) {
            (Subject::Generate, ActionResponse::Generate(resp)) => {
                let kind = resp
                    .generated_for
                    .unwrap_or_else(|| self.preferences.artifact_kind.clone());
                let message = if kind.is_device_cli() {
                    "Device commands generated"
                } else {
                    "Code generated"
                };
                let code = non_empty(resp.code);
                (Block::artifact(code, kind), resp.thoughts, message)
            }
            (Subject::Chat, ActionResponse::Chat(resp)) => (
                Block::new(BlockPayload::Explanation {
                    text: non_empty(resp.answer),
                }),
                resp.thoughts,
                "Answer received",
            ),
            (Subject::Review, ActionResponse::Review(resp)) => (
                Block::new(BlockPayload::ReviewResult {
                    review: non_empty(resp.review),
                }),
                resp.thoughts,
                "Review complete",
            ),
            (Subject::Debug { kind }, ActionResponse::Debug(resp)) => {
                let source_kind = resp.source_kind.clone().unwrap_or_else(|| kind.clone());
                let mut result = DebugResult {
                    explanation: resp.explanation.filter(|e| !e.trim().is_empty()),
                    corrected_code: resp.corrected_code.filter(|c| !c.trim().is_empty()),
                    suggested_package: resp.suggested_package.filter(|p| !p.trim().is_empty()),
                    error: None,
                    source_kind: Some(source_kind.clone()),
                };
                if result.explanation.is_none()
                    && result.corrected_code.is_none()
                    && result.suggested_package.is_none()
                {
                    result.explanation = Some(NO_CONTENT.to_string());
                }
                (
                    Block::new(BlockPayload::DebugResult(result)).with_artifact_kind(source_kind),
                    resp.thoughts,
                    "Debug analysis ready",
                )
            }
            (Subject::Explain, ActionResponse::Explain(resp)) => (
                Block::new(BlockPayload::Explanation {
                    text: non_empty(resp.explanation),
                }),
                resp.thoughts,
                "Explanation ready",
            ),
            _ => return None,
        };

        self.notifier.notify(Severity::Success, message);
        let mut blocks = Vec::with_capacity(2);
        if !thoughts.is_empty() {
            blocks.push(Block::thinking_trace(thoughts));
        }
        blocks.push(block);
        Some(blocks)
    }

    fn execution_block(&self, code: &str, kind: &ArtifactKind, report: ExecutionReport) -> Block {
        let exit_code = match report.exit_code {
            Some(code) => code,
            None => {
                tracing::warn!("Execution report has no exit code, treating it as a client failure");
                CLIENT_FAILURE_EXIT_CODE
            }
        };
        let outcome = classify(
            exit_code,
            &report.stdout,
            &report.stderr,
            self.heuristic.as_ref(),
        );

        if let Some(warning) = report.warning.as_deref().filter(|w| !w.trim().is_empty()) {
            self.notifier.notify(Severity::Warning, warning);
        }
        match outcome {
            ExecutionOutcome::Succeeded => {
                self.notifier.notify(Severity::Success, "Execution succeeded")
            }
            ExecutionOutcome::SucceededWithIssues => self.notifier.notify(
                Severity::Warning,
                "Executed, but the output may contain problems",
            ),
            ExecutionOutcome::Failed => {
                let detail = report.stderr.lines().map(str::trim).find(|l| !l.is_empty());
                let message = match detail {
                    Some(line) => format!("Execution failed: {}", line),
                    None => format!("Execution failed with exit code {}", exit_code),
                };
                self.notifier.notify(Severity::Error, &message);
            }
        }

        let message = if report.message.trim().is_empty() {
            NO_CONTENT.to_string()
        } else {
            report.message
        };
        Block::new(BlockPayload::ExecutionResult(ExecutionResult {
            message,
            stdout: report.stdout,
            stderr: report.stderr,
            exit_code,
            warning: report.warning,
            executed_kind: Some(report.executed_kind.unwrap_or_else(|| kind.clone())),
            outcome,
            code: code.to_string(),
        }))
        .with_artifact_kind(kind.clone())
    }

    fn client_failure_block(&self, code: &str, kind: &ArtifactKind, failure: ApiFailure) -> Block {
        let message = if failure.timed_out {
            format!("Execution timed out: {}", failure.message)
        } else {
            format!("Execution failed: {}", failure.message)
        };
        self.notifier.notify(Severity::Error, &message);

        Block::new(BlockPayload::ExecutionResult(ExecutionResult {
            message,
            stdout: String::new(),
            stderr: failure.message,
            exit_code: CLIENT_FAILURE_EXIT_CODE,
            warning: None,
            executed_kind: Some(kind.clone()),
            outcome: ExecutionOutcome::Failed,
            code: code.to_string(),
        }))
        .with_artifact_kind(kind.clone())
        .with_thoughts(failure.thoughts)
    }

    fn installation_block(&self, package: &str, report: InstallReport) -> Block {
        let message = [&report.message, &report.stderr]
            .into_iter()
            .find(|m| !m.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| NO_CONTENT.to_string());
        if report.success {
            self.notifier
                .notify(Severity::Success, &format!("Installed {}", package));
        } else {
            self.notifier
                .notify(Severity::Error, &format!("Installing {} failed", package));
        }

        Block::new(BlockPayload::InstallationResult(InstallationResult {
            success: report.success,
            message,
            stdout: report.stdout,
            stderr: report.stderr,
            package: package.to_string(),
        }))
    }

    fn installation_failure_block(&self, package: &str, failure: ApiFailure) -> Block {
        let message = if failure.timed_out {
            format!("Installing {} timed out", package)
        } else {
            format!("Installing {} failed: {}", package, failure.message)
        };
        self.notifier.notify(Severity::Error, &message);

        Block::new(BlockPayload::InstallationResult(InstallationResult {
            success: false,
            message,
            stdout: String::new(),
            stderr: failure.message,
            package: package.to_string(),
        }))
        .with_thoughts(failure.thoughts)
    }

    fn failure_block(&self, kind: ActionKind, failure: ApiFailure) -> Block {
        let notice = if failure.timed_out {
            format!("{} timed out: {}", capitalize(kind.as_str()), failure.message)
        } else {
            format!("{} failed: {}", capitalize(kind.as_str()), failure.message)
        };
        self.notifier.notify(Severity::Error, &notice);

        Block::new(BlockPayload::Error(ErrorDetail {
            message: failure.message,
            action: kind,
            timed_out: failure.timed_out,
        }))
        .with_thoughts(failure.thoughts)
    }

    /// Put `blocks` where the placeholder stood, or after the anchor.
    fn insert_results(&mut self, pending: &PendingAction, blocks: Vec<Block>) -> Vec<BlockId> {
        let mut anchor = pending.anchor;

        if let Some(placeholder) = pending.placeholder {
            match self.store.position(&placeholder) {
                Some(index) => {
                    if let Some(previous) = index.checked_sub(1).map(|i| self.store.blocks()[i].id)
                    {
                        anchor = previous;
                    }
                    self.store.remove_by_id(&placeholder);
                    self.forget_animation(&placeholder);
                }
                None => {
                    tracing::warn!(placeholder = %placeholder, "Placeholder already gone");
                }
            }
        }

        let ids = self.store.splice_after(&anchor, blocks);
        self.mark_animated(&ids);
        ids
    }

    // ============================================
    // Editing
    // ============================================

    pub fn editing(&self) -> Option<&EditSession> {
        self.overlay.editing()
    }

    /// Open (or, if already open, close) the editor on block `id`.
    pub fn begin_edit(&mut self, id: &BlockId) -> Result<BeginEdit> {
        let block = self.require(id)?;
        let Some(text) = block.payload.editable_text().map(str::to_string) else {
            return self.reject(Error::Validation(
                "only generated or corrected code can be edited".to_string(),
            ));
        };
        let outcome = self.overlay.begin_edit(*id, text);
        self.notify_edit(&outcome);
        Ok(outcome)
    }

    /// Replace the draft. Returns false when nothing is being edited.
    pub fn update_draft(&mut self, text: impl Into<String>) -> bool {
        self.overlay.update_draft(text)
    }

    /// Write the draft for `id` into the block.
    pub fn save_edit(&mut self, id: &BlockId) -> Result<()> {
        let payload = match self.store.get(id) {
            Some(block) => block.payload.clone(),
            None => {
                self.overlay.take_for_save(id);
                return self.reject(Error::BlockNotFound(id.short()));
            }
        };
        let Some(draft) = self.overlay.take_for_save(id) else {
            return self.reject(Error::Validation("this block is not being edited".to_string()));
        };
        let Some(edited) = payload.with_edited_text(draft) else {
            return self.reject(Error::Validation("this block cannot be edited".to_string()));
        };

        self.store.replace(id, BlockPatch::edited(edited));
        self.mark_animated(&[*id]);
        tracing::info!(block_id = %id, "Saved edit");
        self.notifier.notify(Severity::Success, "Changes saved");
        Ok(())
    }

    /// Close the editor without saving.
    pub fn cancel_edit(&mut self) -> Option<CancelledEdit> {
        let cancelled = self.overlay.cancel()?;
        if cancelled.had_changes {
            self.notifier
                .notify(Severity::Warning, "Edit cancelled; changes discarded");
        } else {
            self.notifier.notify(Severity::Info, "Edit closed");
        }
        Some(cancelled)
    }

    fn notify_edit(&self, outcome: &BeginEdit) {
        match outcome {
            BeginEdit::Started => self.notifier.notify(Severity::Info, "Editing"),
            BeginEdit::Closed { had_changes: true } => self
                .notifier
                .notify(Severity::Warning, "Edit cancelled; changes discarded"),
            BeginEdit::Closed { had_changes: false } => {
                self.notifier.notify(Severity::Info, "Edit closed")
            }
            BeginEdit::Switched {
                discarded_changes, ..
            } => {
                if *discarded_changes {
                    self.notifier.notify(
                        Severity::Warning,
                        "Unsaved changes to the previous block were discarded",
                    );
                }
                self.notifier.notify(Severity::Info, "Editing");
            }
        }
    }

    // ============================================
    // Housekeeping
    // ============================================

    /// Clear entrance flags older than [`ANIMATION_DURATION`]. Returns how
    /// many were cleared.
    pub fn expire_animations(&mut self, now: DateTime<Utc>) -> usize {
        let (expired, live): (Vec<_>, Vec<_>) = self.animations.drain(..).partition(|(_, at)| {
            now.signed_duration_since(*at)
                .to_std()
                .is_ok_and(|age| age >= ANIMATION_DURATION)
        });
        self.animations = live;

        expired
            .into_iter()
            .filter(|(id, _)| self.store.replace(id, BlockPatch::settled()))
            .count()
    }

    fn mark_animated(&mut self, ids: &[BlockId]) {
        let now = Utc::now();
        for id in ids {
            self.forget_animation(id);
            self.animations.push((*id, now));
        }
    }

    fn forget_animation(&mut self, id: &BlockId) {
        self.animations.retain(|(animated, _)| animated != id);
    }

    // ============================================
    // Helpers
    // ============================================

    fn require(&self, id: &BlockId) -> Result<&Block> {
        match self.store.get(id) {
            Some(block) => Ok(block),
            None => {
                let error = Error::BlockNotFound(id.short());
                self.notifier.notify(Severity::Warning, &error.to_string());
                Err(error)
            }
        }
    }

    fn ensure_idle(&self, kind: ActionKind) -> Result<()> {
        if self.board.is_busy(kind) {
            return self.reject(Error::Busy(kind));
        }
        Ok(())
    }

    /// Notify a validation error and return it.
    fn reject<T>(&self, error: Error) -> Result<T> {
        tracing::debug!(error = %error, "Action rejected");
        self.notifier.notify(Severity::Warning, &error.to_string());
        Err(error)
    }

    fn start_attached(
        &mut self,
        kind: ActionKind,
        anchor: BlockId,
        label: &str,
        request: ActionRequest,
        subject: Subject,
    ) -> Result<PendingAction> {
        self.board.begin(kind)?;
        let placeholder = self
            .store
            .splice_after(&anchor, vec![Block::placeholder(label)])
            .first()
            .copied();
        if let Some(id) = placeholder {
            self.mark_animated(&[id]);
        }

        tracing::info!(kind = %kind, block_id = %anchor, "Action started");
        Ok(PendingAction {
            kind,
            anchor,
            placeholder,
            request,
            deadline: self.settings.timeout,
            subject,
        })
    }

    fn device_context(&self) -> DeviceContext {
        DeviceContext {
            profile: self.preferences.device.clone(),
            commands: self.preferences.selected_context_commands(),
        }
    }
}

fn non_empty(text: Option<String>) -> String {
    text.filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| NO_CONTENT.to_string())
}

fn pretty_json<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
