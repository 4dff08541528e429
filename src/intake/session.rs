//! Per-conversation session state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::Caller;

/// Rendered in operator summaries for a stage the catalog skipped.
pub const NOT_APPLICABLE: &str = "N/A";

/// The stages of the intake conversation.
///
/// Progresses AwaitingCategory → AwaitingModel → AwaitingService →
/// AwaitingContacts → Completed, with model and service skipped when the
/// catalog has nothing to offer. Cancelled can be reached from any
/// non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    AwaitingCategory,
    AwaitingModel,
    AwaitingService,
    AwaitingContacts,
    Completed,
    Cancelled,
}

impl Stage {
    /// Whether the conversation is over at this stage.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AwaitingCategory => "awaiting_category",
            Self::AwaitingModel => "awaiting_model",
            Self::AwaitingService => "awaiting_service",
            Self::AwaitingContacts => "awaiting_contacts",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// A recorded selection for a stage that may be skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    /// The user picked this value from the offered list.
    Chosen(String),
    /// The catalog has no options for this stage, so it was never shown.
    NotApplicable,
}

impl Slot {
    /// The chosen value, if the stage was actually shown.
    pub fn chosen(&self) -> Option<&str> {
        match self {
            Self::Chosen(value) => Some(value),
            Self::NotApplicable => None,
        }
    }

    pub fn is_chosen(&self) -> bool {
        matches!(self, Self::Chosen(_))
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.chosen().unwrap_or(NOT_APPLICABLE))
    }
}

/// Accumulated selections of one conversation.
///
/// A field is `Some` exactly when its stage has been passed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Session {
    pub stage: Stage,
    pub category: Option<String>,
    pub model: Option<Slot>,
    pub service: Option<Slot>,
    pub contacts: Option<String>,
}

impl Session {
    /// A fresh session waiting for a category.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check the field/stage ordering invariant.
    pub fn is_consistent(&self) -> bool {
        let set = (
            self.category.is_some(),
            self.model.is_some(),
            self.service.is_some(),
            self.contacts.is_some(),
        );
        match self.stage {
            Stage::AwaitingCategory => set == (false, false, false, false),
            Stage::AwaitingModel => set == (true, false, false, false),
            Stage::AwaitingService => set == (true, true, false, false),
            Stage::AwaitingContacts => set == (true, true, true, false),
            Stage::Completed => set == (true, true, true, true),
            Stage::Cancelled => true,
        }
    }
}

/// A finished request handed to the notifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedRequest {
    /// Correlates log lines for one request.
    pub id: Uuid,
    pub caller: Caller,
    pub category: String,
    pub model: Slot,
    pub service: Slot,
    pub contacts: String,
    pub completed_at: DateTime<Utc>,
}

impl CompletedRequest {
    /// Build the request from a completed session.
    ///
    /// Returns `None` if the session skipped any required field.
    pub fn from_session(session: &Session, caller: &Caller) -> Option<Self> {
        Some(Self {
            id: Uuid::new_v4(),
            caller: caller.clone(),
            category: session.category.clone()?,
            model: session.model.clone()?,
            service: session.service.clone()?,
            contacts: session.contacts.clone()?,
            completed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_stages() {
        use Stage::*;
        assert!(Completed.is_terminal());
        assert!(Cancelled.is_terminal());
        for stage in [AwaitingCategory, AwaitingModel, AwaitingService, AwaitingContacts] {
            assert!(!stage.is_terminal(), "{stage} should not be terminal");
        }
    }

    #[test]
    fn display_matches_serde() {
        use Stage::*;
        for stage in [
            AwaitingCategory,
            AwaitingModel,
            AwaitingService,
            AwaitingContacts,
            Completed,
            Cancelled,
        ] {
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(format!("\"{stage}\""), json);
        }
    }

    #[test]
    fn slot_display_uses_marker_for_skipped_stage() {
        assert_eq!(Slot::Chosen("IPhone 16".into()).to_string(), "IPhone 16");
        assert_eq!(Slot::NotApplicable.to_string(), "N/A");
        assert_eq!(Slot::NotApplicable.chosen(), None);
    }

    #[test]
    fn new_session_is_consistent() {
        let session = Session::new();
        assert_eq!(session.stage, Stage::AwaitingCategory);
        assert!(session.is_consistent());
    }

    #[test]
    fn model_without_category_is_inconsistent() {
        let session = Session {
            stage: Stage::AwaitingService,
            category: None,
            model: Some(Slot::Chosen("iPad Air".into())),
            ..Default::default()
        };
        assert!(!session.is_consistent());
    }

    #[test]
    fn completed_request_requires_all_fields() {
        let caller = Caller::new("42");
        let mut session = Session {
            stage: Stage::Completed,
            category: Some("Другая техника".into()),
            model: Some(Slot::NotApplicable),
            service: Some(Slot::NotApplicable),
            contacts: None,
        };
        assert!(CompletedRequest::from_session(&session, &caller).is_none());

        session.contacts = Some("Ivan".into());
        let request = CompletedRequest::from_session(&session, &caller).unwrap();
        assert_eq!(request.category, "Другая техника");
        assert_eq!(request.model, Slot::NotApplicable);
        assert_eq!(request.contacts, "Ivan");
    }
}
