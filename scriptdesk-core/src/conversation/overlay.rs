//! Editing overlay
//!
//! At most one block is under live edit. While it is, the draft shadows the
//! stored text: any reader of "the code for block X" asks
//! [`EditingOverlay::draft_for`] first.

use crate::types::BlockId;

/// The block being edited and its unsaved text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditSession {
    pub block_id: BlockId,
    pub draft: String,
    /// Stored text when the edit started
    pub original: String,
}

impl EditSession {
    pub fn has_changes(&self) -> bool {
        self.draft != self.original
    }
}

/// Result of [`EditingOverlay::begin_edit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeginEdit {
    /// A new edit was opened on an idle overlay
    Started,
    /// The same block was already open; the edit was closed without saving
    Closed { had_changes: bool },
    /// Another block's edit was replaced
    Switched {
        previous: BlockId,
        discarded_changes: bool,
    },
}

/// An edit closed without writing back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelledEdit {
    pub block_id: BlockId,
    pub had_changes: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EditingOverlay {
    session: Option<EditSession>,
}

impl EditingOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn editing(&self) -> Option<&EditSession> {
        self.session.as_ref()
    }

    pub fn is_editing(&self, id: &BlockId) -> bool {
        self.session.as_ref().is_some_and(|s| &s.block_id == id)
    }

    /// Open an edit on `block_id`, toggling it closed if it is already open.
    pub fn begin_edit(&mut self, block_id: BlockId, current_text: impl Into<String>) -> BeginEdit {
        if let Some(cancelled) = self.cancel_if(&block_id) {
            return BeginEdit::Closed {
                had_changes: cancelled.had_changes,
            };
        }

        let text = current_text.into();
        let previous = self.session.replace(EditSession {
            block_id,
            draft: text.clone(),
            original: text,
        });

        match previous {
            Some(prev) => BeginEdit::Switched {
                previous: prev.block_id,
                discarded_changes: prev.has_changes(),
            },
            None => BeginEdit::Started,
        }
    }

    /// Replace the draft text. Returns false when nothing is being edited.
    pub fn update_draft(&mut self, text: impl Into<String>) -> bool {
        match self.session.as_mut() {
            Some(session) => {
                session.draft = text.into();
                true
            }
            None => false,
        }
    }

    /// Close the edit on `block_id` and hand back its draft for saving.
    pub fn take_for_save(&mut self, block_id: &BlockId) -> Option<String> {
        if !self.is_editing(block_id) {
            return None;
        }
        self.session.take().map(|s| s.draft)
    }

    pub fn cancel(&mut self) -> Option<CancelledEdit> {
        self.session.take().map(|s| CancelledEdit {
            had_changes: s.has_changes(),
            block_id: s.block_id,
        })
    }

    /// Draft text for `block_id`, if it is the block under edit.
    pub fn draft_for(&self, block_id: &BlockId) -> Option<&str> {
        self.session
            .as_ref()
            .filter(|s| &s.block_id == block_id)
            .map(|s| s.draft.as_str())
    }

    fn cancel_if(&mut self, block_id: &BlockId) -> Option<CancelledEdit> {
        if self.is_editing(block_id) {
            self.cancel()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_save_round_trip() {
        let id = BlockId::new();
        let mut overlay = EditingOverlay::new();

        assert_eq!(overlay.begin_edit(id, "echo 1"), BeginEdit::Started);
        assert!(overlay.update_draft("echo 2"));
        assert_eq!(overlay.draft_for(&id), Some("echo 2"));
        assert_eq!(overlay.take_for_save(&id), Some("echo 2".to_string()));
        assert!(overlay.editing().is_none());
    }

    #[test]
    fn test_begin_edit_same_block_toggles_closed() {
        let id = BlockId::new();
        let mut overlay = EditingOverlay::new();
        overlay.begin_edit(id, "a");
        overlay.update_draft("b");

        assert_eq!(
            overlay.begin_edit(id, "a"),
            BeginEdit::Closed { had_changes: true }
        );
        assert!(overlay.editing().is_none());
    }

    #[test]
    fn test_switching_blocks_discards_previous_draft() {
        let first = BlockId::new();
        let second = BlockId::new();
        let mut overlay = EditingOverlay::new();
        overlay.begin_edit(first, "a");
        overlay.update_draft("changed");

        assert_eq!(
            overlay.begin_edit(second, "b"),
            BeginEdit::Switched {
                previous: first,
                discarded_changes: true
            }
        );
        assert_eq!(overlay.draft_for(&first), None);
        assert_eq!(overlay.draft_for(&second), Some("b"));
    }

    #[test]
    fn test_save_requires_matching_block() {
        let id = BlockId::new();
        let mut overlay = EditingOverlay::new();
        overlay.begin_edit(id, "a");

        assert_eq!(overlay.take_for_save(&BlockId::new()), None);
        assert!(overlay.is_editing(&id));
    }

    #[test]
    fn test_cancel_reports_changes() {
        let id = BlockId::new();
        let mut overlay = EditingOverlay::new();
        assert!(overlay.cancel().is_none());
        assert!(!overlay.update_draft("ignored"));

        overlay.begin_edit(id, "same");
        assert_eq!(
            overlay.cancel(),
            Some(CancelledEdit {
                block_id: id,
                had_changes: false
            })
        );
    }
}
