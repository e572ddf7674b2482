//! Conversation model
//!
//! The block sequence, its round grouping, per-block provenance and the
//! editing overlay. Everything here is synchronous and free of I/O; the
//! orchestrator drives it.

mod history;
mod overlay;
mod provenance;
mod rounds;
mod store;

pub use history::{chat_transcript, EMPTY_HISTORY, HISTORY_WINDOW};
pub use overlay::{BeginEdit, CancelledEdit, EditSession, EditingOverlay};
pub use provenance::Provenance;
pub use rounds::{group_rounds, layout_rounds, CollapseState, Round, RoundView};
pub use store::{BlockPatch, BlockStore, SharedBlock};
