//! Inbound and outbound conversation events.
//!
//! Transports decode what the user did (a command, a menu tap, free text)
//! into an [`EventKind`] exactly once, through [`EventParser`]. The stage
//! machine answers with a list of [`Outbound`] actions for the transport to
//! render.

use serde::{Deserialize, Serialize};

/// Telegram caps `callback_data` at 64 bytes.
pub const MAX_CALLBACK_BYTES: usize = 64;

/// Callback token for the "back" button.
pub const BACK_TOKEN: &str = "back";

const CATEGORY_PREFIX: &str = "c:";
const MODEL_PREFIX: &str = "m:";
const SERVICE_PREFIX: &str = "s:";

/// Key of one conversation (the originating chat).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationKey(String);

impl ConversationKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who sent an event, as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Caller {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: None,
            display_name: None,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// What the user did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum EventKind {
    ConversationStarted,
    CategorySelected(String),
    ModelSelected(String),
    ServiceSelected(String),
    BackRequested,
    ContactsSubmitted(String),
    CancelRequested,
    /// A slash command the bot does not know.
    UnknownCommand(String),
}

/// An event addressed to one conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub key: ConversationKey,
    pub caller: Caller,
    pub kind: EventKind,
}

impl InboundEvent {
    pub fn new(key: ConversationKey, caller: Caller, kind: EventKind) -> Self {
        Self { key, caller, kind }
    }
}

/// Decodes transport payloads into [`EventKind`]s.
pub struct EventParser;

impl EventParser {
    /// Parse a typed text message.
    ///
    /// Commands may carry a `@botname` suffix, as group chats send them.
    pub fn parse_text(text: &str) -> EventKind {
        let trimmed = text.trim();
        if let Some(command) = trimmed.strip_prefix('/') {
            let name = command
                .split_whitespace()
                .next()
                .unwrap_or("")
                .split('@')
                .next()
                .unwrap_or("")
                .to_lowercase();
            return match name.as_str() {
                "start" => EventKind::ConversationStarted,
                "cancel" => EventKind::CancelRequested,
                "back" => EventKind::BackRequested,
                _ => EventKind::UnknownCommand(trimmed.to_string()),
            };
        }
        EventKind::ContactsSubmitted(text.to_string())
    }

    /// Parse the opaque id of a tapped menu option.
    pub fn parse_callback(data: &str) -> Option<EventKind> {
        if data == BACK_TOKEN {
            return Some(EventKind::BackRequested);
        }
        if let Some(value) = data.strip_prefix(CATEGORY_PREFIX) {
            return Some(EventKind::CategorySelected(value.to_string()));
        }
        if let Some(value) = data.strip_prefix(MODEL_PREFIX) {
            return Some(EventKind::ModelSelected(value.to_string()));
        }
        if let Some(value) = data.strip_prefix(SERVICE_PREFIX) {
            return Some(EventKind::ServiceSelected(value.to_string()));
        }
        None
    }
}

/// Which menu an option belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuKind {
    Category,
    Model,
    Service,
}

impl MenuKind {
    fn prefix(self) -> &'static str {
        match self {
            Self::Category => CATEGORY_PREFIX,
            Self::Model => MODEL_PREFIX,
            Self::Service => SERVICE_PREFIX,
        }
    }

    /// Opaque id for a label in this menu.
    pub fn token(self, label: &str) -> String {
        format!("{}{label}", self.prefix())
    }

    /// Longest label (in bytes) whose token still fits in callback data.
    pub fn max_label_bytes(self) -> usize {
        MAX_CALLBACK_BYTES - self.prefix().len()
    }
}

/// One selectable entry of a menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuOption {
    pub label: String,
    pub id: String,
}

impl MenuOption {
    pub fn new(kind: MenuKind, label: &str) -> Self {
        Self {
            label: label.to_string(),
            id: kind.token(label),
        }
    }
}

/// An action the transport should render, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    ShowMessage {
        text: String,
    },
    ShowOptions {
        text: String,
        options: Vec<MenuOption>,
        include_back: bool,
    },
    /// Remove the keyboard of the last menu shown in this chat.
    ClearKeyboard,
    /// A message with a single URL button.
    ShowLink {
        text: String,
        label: String,
        url: String,
    },
}

impl Outbound {
    pub fn message(text: impl Into<String>) -> Self {
        Self::ShowMessage { text: text.into() }
    }
}
