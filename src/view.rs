//! Pure mapping from [`RoomPhase`] to the view the page should show.

use crate::protocol::{GameCategory, InvalidPhase, RoomPhase};

/// Text shown by the placeholder view when the phase cannot be rendered.
pub const INVALID_STATE_MESSAGE: &str = "Something wrong!!!";

/// Which sub-view the room page renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomView {
    /// Waiting room: player list, game selection, start button.
    Ready,
    /// The running game of the given category.
    InGame { category: GameCategory },
    /// Score board after the game ended.
    Result,
    /// Placeholder for a phase that has no view.
    Invalid { reason: InvalidPhase },
}

impl RoomView {
    /// Placeholder text, if this is the invalid view.
    pub fn fallback_message(&self) -> Option<&'static str> {
        match self {
            Self::Invalid { .. } => Some(INVALID_STATE_MESSAGE),
            _ => None,
        }
    }
}

/// Select the view for `phase`. No side effects.
pub fn select_view(phase: &RoomPhase) -> RoomView {
    match phase {
        RoomPhase::Ready => RoomView::Ready,
        RoomPhase::InGame(category) => RoomView::InGame {
            category: category.clone(),
        },
        RoomPhase::Ended => RoomView::Result,
        RoomPhase::Invalid(reason) => RoomView::Invalid {
            reason: reason.clone(),
        },
    }
}
