//! Round grouping and collapse state
//!
//! A round is one user request plus every block that follows it up to the
//! next user request. Rounds are derived on demand from the block sequence
//! and never stored.

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{Block, BlockId};

use super::SharedBlock;

/// One user-initiated interaction and its results.
#[derive(Debug, Clone, Copy)]
pub struct Round<'a> {
    /// The user request that opened the round; `None` for the leading run
    /// of blocks that precede any request.
    pub anchor: Option<&'a Block>,
    pub children: &'a [SharedBlock],
}

impl<'a> Round<'a> {
    pub fn is_placeholder(&self) -> bool {
        self.anchor.is_none()
    }

    /// Stable key for collapse state: the anchor id, or the first child's id
    /// for the placeholder round.
    pub fn key(&self) -> Option<BlockId> {
        self.anchor
            .map(|b| b.id)
            .or_else(|| self.children.first().map(|b| b.id))
    }

    /// Anchor followed by children, in sequence order.
    pub fn blocks(&self) -> impl Iterator<Item = &'a Block> {
        self.anchor
            .into_iter()
            .chain(self.children.iter().map(Arc::as_ref))
    }

    pub fn len(&self) -> usize {
        self.children.len() + usize::from(self.anchor.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Partition `blocks` into rounds, in order.
///
/// Total and idempotent: every block lands in exactly one round.
pub fn group_rounds(blocks: &[SharedBlock]) -> Vec<Round<'_>> {
    let mut rounds = Vec::new();

    let leading = blocks
        .iter()
        .position(|b| b.is_user_request())
        .unwrap_or(blocks.len());
    if leading > 0 {
        rounds.push(Round {
            anchor: None,
            children: &blocks[..leading],
        });
    }

    let mut start = leading;
    while start < blocks.len() {
        let end = blocks[start + 1..]
            .iter()
            .position(|b| b.is_user_request())
            .map(|offset| start + 1 + offset)
            .unwrap_or(blocks.len());
        rounds.push(Round {
            anchor: Some(blocks[start].as_ref()),
            children: &blocks[start + 1..end],
        });
        start = end;
    }

    rounds
}

/// Sparse per-round collapse flags.
///
/// A round without an entry is collapsed unless it is the last round.
#[derive(Debug, Clone, Default)]
pub struct CollapseState {
    expanded: HashMap<BlockId, bool>,
}

impl CollapseState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_collapsed(&self, key: &BlockId, is_last: bool) -> bool {
        if is_last {
            return false;
        }
        !self.expanded.get(key).copied().unwrap_or(false)
    }

    /// Flip a round between collapsed and expanded. Returns the new
    /// collapsed value.
    pub fn toggle(&mut self, key: BlockId) -> bool {
        let expanded = self.expanded.entry(key).or_insert(false);
        *expanded = !*expanded;
        !*expanded
    }

    pub fn set_expanded(&mut self, key: BlockId, expanded: bool) {
        self.expanded.insert(key, expanded);
    }

    /// Forget every explicit choice, collapsing all but the last round.
    pub fn reset(&mut self) {
        self.expanded.clear();
    }
}

/// A round ready for rendering.
#[derive(Debug, Clone)]
pub struct RoundView<'a> {
    /// 0-based index among all rounds
    pub index: usize,
    pub round: Round<'a>,
    pub collapsed: bool,
    /// One-line summary shown in place of a collapsed round
    pub summary: String,
}

const SUMMARY_CHARS: usize = 72;

/// Group `blocks` and apply the collapse policy.
///
/// The placeholder round has no request to summarize and is always shown
/// expanded.
pub fn layout_rounds<'a>(blocks: &'a [SharedBlock], state: &CollapseState) -> Vec<RoundView<'a>> {
    let rounds = group_rounds(blocks);
    let last = rounds.len().saturating_sub(1);

    rounds
        .into_iter()
        .enumerate()
        .map(|(index, round)| {
            let collapsed = match (round.anchor, round.key()) {
                (Some(_), Some(key)) => state.is_collapsed(&key, index == last),
                _ => false,
            };
            let summary = match round.anchor {
                Some(anchor) => format!(
                    "{} ({} more)",
                    anchor.summary(SUMMARY_CHARS),
                    round.children.len()
                ),
                None => format!("{} earlier blocks", round.children.len()),
            };
            RoundView {
                index,
                round,
                collapsed,
                summary,
            }
        })
        .collect()
}
