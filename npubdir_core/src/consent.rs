//! Consent transitions.
//!
//! Consent is driven by two owner actions. The table below is the only
//! place that decides which state an action leads to; nothing ever returns
//! a profile to `Undecided`. Removing a profile is not a transition, it
//! deletes the row.

use serde::{Deserialize, Serialize};

use crate::profile::ConsentState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentAction {
    Grant,
    Deny,
}

impl ConsentAction {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Grant => "grant",
            Self::Deny => "deny",
        }
    }

    #[must_use]
    pub fn from_str_lowercase(s: &str) -> Option<Self> {
        match s {
            "grant" => Some(Self::Grant),
            "deny" => Some(Self::Deny),
            _ => None,
        }
    }
}

/// Outcome of applying one action to one state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsentChange {
    pub from: ConsentState,
    pub to: ConsentState,
}

impl ConsentChange {
    #[must_use]
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

const TRANSITIONS: [(ConsentState, ConsentAction, ConsentState); 6] = [
    (ConsentState::Undecided, ConsentAction::Grant, ConsentState::Granted),
    (ConsentState::Undecided, ConsentAction::Deny, ConsentState::Denied),
    (ConsentState::Granted, ConsentAction::Grant, ConsentState::Granted),
    (ConsentState::Granted, ConsentAction::Deny, ConsentState::Denied),
    (ConsentState::Denied, ConsentAction::Grant, ConsentState::Granted),
    (ConsentState::Denied, ConsentAction::Deny, ConsentState::Denied),
];

/// Look up `(current, action)` in the transition table.
#[must_use]
pub fn transition(current: ConsentState, action: ConsentAction) -> Option<ConsentChange> {
    TRANSITIONS
        .iter()
        .find(|(from, act, _)| *from == current && *act == action)
        .map(|(from, _, to)| ConsentChange { from: *from, to: *to })
}
