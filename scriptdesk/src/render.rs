//! Plain-text rendering of the conversation
//!
//! Blocks are numbered by their 1-based position in the conversation, which
//! is also how session commands address them.

use scriptdesk_core::orchestrator::Orchestrator;
use scriptdesk_core::preferences::Preferences;
use scriptdesk_core::types::{Block, BlockId, BlockPayload, ExecutionOutcome};

const INDENT: &str = "    ";

/// Every round, collapsed rounds as a single summary line.
pub fn conversation(orchestrator: &Orchestrator) -> String {
    let rounds = orchestrator.rounds();
    if rounds.is_empty() {
        return "(empty conversation)\n".to_string();
    }

    let editing = orchestrator.editing().map(|e| e.block_id);
    let mut out = String::new();
    for view in &rounds {
        if view.collapsed {
            let number = view
                .round
                .key()
                .and_then(|key| orchestrator.store().position(&key))
                .map(|i| i + 1)
                .unwrap_or(0);
            out.push_str(&format!(
                "[{}] + {}  (:toggle {} to expand)\n",
                number, view.summary, number
            ));
            continue;
        }
        for block in view.round.blocks() {
            out.push_str(&numbered(orchestrator, block, editing));
        }
    }
    out
}

/// The blocks in `ids`, in conversation order.
pub fn blocks(orchestrator: &Orchestrator, ids: &[BlockId]) -> String {
    let editing = orchestrator.editing().map(|e| e.block_id);
    ids.iter()
        .filter_map(|id| orchestrator.get(id))
        .map(|block| numbered(orchestrator, block, editing))
        .collect()
}

fn numbered(orchestrator: &Orchestrator, block: &Block, editing: Option<BlockId>) -> String {
    let number = orchestrator
        .store()
        .position(&block.id)
        .map(|i| i + 1)
        .unwrap_or(0);
    let mut header = format!("[{}] {}", number, block.kind());
    if let Some(kind) = &block.artifact_kind {
        header.push_str(&format!(" ({})", kind));
    }
    if block.is_recently_created {
        header.push_str(" *new*");
    }
    if editing == Some(block.id) {
        header.push_str(" [editing]");
    }
    header.push_str(&format!(" @{}", block.id.short()));
    format!("{}\n{}", header, body(block))
}

/// Payload text of `block`, indented, with a trailing newline.
pub fn body(block: &Block) -> String {
    let mut lines: Vec<String> = Vec::new();
    match &block.payload {
        BlockPayload::UserRequest { prompt } => lines.push(format!("> {}", prompt)),
        BlockPayload::GeneratedArtifact { code } => lines.extend(code.lines().map(String::from)),
        BlockPayload::ReviewResult { review } => lines.extend(review.lines().map(String::from)),
        BlockPayload::ExecutionResult(result) => {
            let outcome = match result.outcome {
                ExecutionOutcome::Succeeded => "succeeded",
                ExecutionOutcome::SucceededWithIssues => "finished, output may contain problems",
                ExecutionOutcome::Failed => "failed",
            };
            lines.push(format!("{} (exit code {})", outcome, result.exit_code));
            lines.push(result.message.clone());
            section(&mut lines, "stdout", &result.stdout);
            section(&mut lines, "stderr", &result.stderr);
            if let Some(warning) = &result.warning {
                lines.push(format!("warning: {}", warning));
            }
            if result.outcome.needs_attention() {
                lines.push("(use :debug to analyse)".to_string());
            }
        }
        BlockPayload::DebugResult(result) => {
            if let Some(explanation) = &result.explanation {
                lines.extend(explanation.lines().map(String::from));
            }
            if let Some(code) = &result.corrected_code {
                section(&mut lines, "corrected code (:apply to use)", code);
            }
            if let Some(package) = &result.suggested_package {
                lines.push(format!("suggested package: {} (:install to add)", package));
            }
            if let Some(error) = &result.error {
                lines.push(format!("error: {}", error));
            }
        }
        BlockPayload::InstallationResult(result) => {
            let status = if result.success { "installed" } else { "failed" };
            lines.push(format!("{}: {}", result.package, status));
            lines.push(result.message.clone());
            section(&mut lines, "stdout", &result.stdout);
            section(&mut lines, "stderr", &result.stderr);
        }
        BlockPayload::Explanation { text } => lines.extend(text.lines().map(String::from)),
        BlockPayload::LoadingPlaceholder { label } => lines.push(label.clone()),
        BlockPayload::Error(detail) => {
            let kind = if detail.timed_out { "timed out" } else { "failed" };
            lines.push(format!("{} {}: {}", detail.action, kind, detail.message));
        }
        BlockPayload::ThinkingTrace => {}
    }
    for thought in &block.thoughts {
        lines.push(format!("~ {}", thought.summary()));
    }

    lines
        .iter()
        .map(|line| format!("{}{}\n", INDENT, line))
        .collect()
}

fn section(lines: &mut Vec<String>, title: &str, text: &str) {
    if text.trim().is_empty() {
        return;
    }
    lines.push(format!("{}:", title));
    lines.extend(text.trim_end().lines().map(|l| format!("  {}", l)));
}

/// One `key = value` line per preference, using the keys `prefs set` takes.
pub fn preferences(preferences: &Preferences) -> String {
    let selected = preferences.selected_context_commands();
    let mut out = String::new();
    let mut line = |key: &str, value: String| out.push_str(&format!("{:<16} = {}\n", key, value));

    line("target", preferences.target.to_string());
    line("artifact_kind", preferences.artifact_kind.as_str().to_string());
    line("interactive", preferences.interactive_mode.to_string());
    line("model", preferences.model.model_name.clone());
    line("temperature", preferences.model.temperature.to_string());
    line("top_p", preferences.model.top_p.to_string());
    line("top_k", preferences.model.top_k.to_string());
    line("safety", preferences.model.safety_setting.clone());
    line("device.host", preferences.device.host.clone());
    line("device.port", preferences.device.ssh_port.to_string());
    line("device.username", preferences.device.username.clone());
    line(
        "context",
        format!(
            "{} of {} commands selected",
            preferences
                .context_commands
                .values()
                .filter(|on| **on)
                .count(),
            preferences.context_commands.len()
        ),
    );
    for command in selected {
        out.push_str(&format!("{}  {}\n", INDENT, command));
    }
    out
}
