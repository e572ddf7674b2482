//! Chat context transcript
//!
//! Builds the plain-text history sent with device chat requests: the last
//! few relevant blocks, rendered one section each, keeping only what
//! concerns the device.

use std::sync::Arc;

use crate::types::{Block, BlockKind, BlockPayload};

use super::SharedBlock;

/// How many relevant blocks are considered.
pub const HISTORY_WINDOW: usize = 10;

/// Sent when no block qualifies.
pub const EMPTY_HISTORY: &str = "(no recent device history)";

const SEPARATOR: &str = "\n\n---\n\n";

fn is_relevant(kind: BlockKind) -> bool {
    matches!(
        kind,
        BlockKind::UserRequest
            | BlockKind::GeneratedArtifact
            | BlockKind::ExecutionResult
            | BlockKind::Explanation
            | BlockKind::ThinkingTrace
    )
}

/// Render the chat transcript for `blocks`.
pub fn chat_transcript(blocks: &[SharedBlock]) -> String {
    let relevant: Vec<&Block> = blocks
        .iter()
        .map(Arc::as_ref)
        .filter(|b| is_relevant(b.kind()))
        .collect();
    let start = relevant.len().saturating_sub(HISTORY_WINDOW);

    let sections: Vec<String> = relevant[start..]
        .iter()
        .filter_map(|block| render(block))
        .collect();

    if sections.is_empty() {
        EMPTY_HISTORY.to_string()
    } else {
        sections.join(SEPARATOR)
    }
}

fn render(block: &Block) -> Option<String> {
    let time = block.created_at.format("%H:%M");
    let body = match &block.payload {
        BlockPayload::UserRequest { prompt } => format!("User ({}): {}", time, prompt),
        BlockPayload::GeneratedArtifact { code } if block.effective_artifact_kind().is_device_cli() => {
            format!("Assistant device commands ({}):\n```fortios\n{}\n```", time, code)
        }
        BlockPayload::ExecutionResult(result)
            if result
                .executed_kind
                .as_ref()
                .is_some_and(|k| k.is_device_cli()) =>
        {
            let mut text = format!("Device execution result ({}):\n", time);
            if !result.stdout.trim().is_empty() {
                text.push_str(&format!("Output:\n{}\n", result.stdout.trim()));
            }
            if !result.stderr.trim().is_empty() {
                text.push_str(&format!("Error:\n{}\n", result.stderr.trim()));
            }
            text.push_str(&format!("Exit code: {}", result.exit_code));
            if let Some(warning) = result.warning.as_deref().map(str::trim) {
                if !warning.is_empty() {
                    text.push_str(&format!("\nWarning: {}", warning));
                }
            }
            text
        }
        BlockPayload::Explanation { text } => format!("Assistant answer ({}): {}", time, text),
        BlockPayload::ThinkingTrace if !block.thoughts.is_empty() => {
            let steps: Vec<String> = block
                .thoughts
                .iter()
                .map(|t| format!("  - {}", t.summary()))
                .collect();
            format!("Assistant tool steps ({}):\n{}", time, steps.join("\n"))
        }
        _ => return None,
    };

    let label = match (&block.payload, &block.artifact_kind) {
        (BlockPayload::GeneratedArtifact { .. }, Some(kind)) => {
            format!("[{} ({})]", block.kind().as_str().to_uppercase(), kind.as_str())
        }
        _ => format!("[{}]", block.kind().as_str().to_uppercase()),
    };

    Some(format!("{}\n{}", label, body.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ArtifactKind, ExecutionOutcome, ExecutionResult};

    fn device_execution(stdout: &str) -> Block {
        Block::new(BlockPayload::ExecutionResult(ExecutionResult {
            message: "done".to_string(),
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: 0,
            warning: None,
            executed_kind: Some(ArtifactKind::DeviceCli),
            outcome: ExecutionOutcome::Succeeded,
            code: "get system status".to_string(),
        }))
    }

    fn shared(blocks: Vec<Block>) -> Vec<SharedBlock> {
        blocks.into_iter().map(Arc::new).collect()
    }

    #[test]
    fn test_empty_history() {
        assert_eq!(chat_transcript(&[]), EMPTY_HISTORY);

        let local_only = shared(vec![Block::artifact("print(1)", ArtifactKind::Python)]);
        assert_eq!(chat_transcript(&local_only), EMPTY_HISTORY);
    }

    #[test]
    fn test_transcript_keeps_device_blocks() {
        let blocks = shared(vec![
            Block::user_request("show status"),
            Block::artifact("get system status", ArtifactKind::DeviceCli),
            Block::artifact("print(1)", ArtifactKind::Python),
            device_execution("Version: v7.4"),
            Block::placeholder("ignored"),
        ]);
        let transcript = chat_transcript(&blocks);

        assert!(transcript.contains("[USER-REQUEST]"));
        assert!(transcript.contains("show status"));
        assert!(transcript.contains("[GENERATED-ARTIFACT (fortios)]"));
        assert!(transcript.contains("Version: v7.4"));
        assert!(!transcript.contains("print(1)"));
        assert!(!transcript.contains("ignored"));
        assert_eq!(transcript.matches(SEPARATOR).count(), 2);
    }

    #[test]
    fn test_window_counts_relevant_blocks_before_filtering() {
        let mut blocks = vec![Block::user_request("oldest")];
        for i in 0..HISTORY_WINDOW {
            blocks.push(Block::artifact(format!("print({})", i), ArtifactKind::Python));
        }
        assert_eq!(chat_transcript(&shared(blocks)), EMPTY_HISTORY);
    }
}
