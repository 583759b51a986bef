use crate::core::types::PayerIndex;
use serde::{Deserialize, Serialize};

/// Outcome of the round played inside an application session
///
/// Only used to decide when a session may be opened or closed and who pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    #[default]
    Idle,
    Playing,
    Won,
    Lost,
}

impl GameStatus {
    pub fn can_open_session(self, authenticated: bool) -> bool {
        authenticated && self == Self::Idle
    }

    pub fn can_close_session(self, authenticated: bool, has_session: bool) -> bool {
        authenticated && has_session && self.is_finished()
    }

    pub fn is_finished(self) -> bool {
        matches!(self, Self::Won | Self::Lost)
    }

    /// The loser pays and is allocated zero
    pub fn payer_index(self) -> Option<PayerIndex> {
        match self {
            Self::Won => Some(PayerIndex::Second),
            Self::Lost => Some(PayerIndex::First),
            Self::Idle | Self::Playing => None,
        }
    }
}
