use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Position;

/// Position lifecycle transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionState {
    Opened,
    Closed,
}

/// Broadcast whenever a venue position appears or disappears
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionStateChangeEvent {
    pub state: PositionState,
    pub exchange: String,
    pub position: Position,
    pub timestamp: DateTime<Utc>,
}

impl PositionStateChangeEvent {
    pub fn opened(exchange: impl Into<String>, position: Position) -> Self {
        Self {
            state: PositionState::Opened,
            exchange: exchange.into(),
            position,
            timestamp: Utc::now(),
        }
    }

    pub fn closed(exchange: impl Into<String>, position: Position) -> Self {
        Self {
            state: PositionState::Closed,
            exchange: exchange.into(),
            position,
            timestamp: Utc::now(),
        }
    }

    pub fn is_opened(&self) -> bool {
        self.state == PositionState::Opened
    }

    pub fn is_closed(&self) -> bool {
        self.state == PositionState::Closed
    }
}
