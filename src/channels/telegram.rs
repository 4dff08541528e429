//! Telegram channel — long-polls the Bot API for messages and menu taps.
//!
//! Menus are rendered as inline keyboards with one button per row. The id
//! of the last menu message per chat is remembered so `ClearKeyboard` can
//! strip its buttons.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::channels::{Channel, EventStream};
use crate::error::ChannelError;
use crate::intake::prompts::BACK_LABEL;
use crate::intake::{
    BACK_TOKEN, Caller, ConversationKey, EventParser, InboundEvent, MenuOption, Outbound,
};

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Long-poll timeout passed to getUpdates.
const POLL_TIMEOUT_SECS: u64 = 30;

// ── Bot API wire types ──────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct ApiResponse {
    ok: bool,
    result: Option<Value>,
    description: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Update {
    update_id: i64,
    message: Option<Message>,
    callback_query: Option<CallbackQuery>,
}

#[derive(Deserialize, Debug)]
struct Message {
    chat: Chat,
    from: Option<User>,
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Chat {
    id: i64,
}

#[derive(Deserialize, Debug)]
struct User {
    id: i64,
    username: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
}

#[derive(Deserialize, Debug)]
struct CallbackQuery {
    id: String,
    from: User,
    message: Option<Message>,
    data: Option<String>,
}

/// Inline keyboard button for Telegram
#[derive(Serialize, Debug)]
struct InlineKeyboardButton {
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

/// Inline keyboard markup for Telegram
#[derive(Serialize, Debug)]
struct InlineKeyboardMarkup {
    inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

impl InlineKeyboardMarkup {
    fn menu(options: &[MenuOption], include_back: bool) -> Self {
        let mut rows: Vec<Vec<InlineKeyboardButton>> = options
            .iter()
            .map(|o| vec![callback_button(&o.label, &o.id)])
            .collect();
        if include_back {
            rows.push(vec![callback_button(BACK_LABEL, BACK_TOKEN)]);
        }
        Self {
            inline_keyboard: rows,
        }
    }

    fn link(label: &str, url: &str) -> Self {
        Self {
            inline_keyboard: vec![vec![InlineKeyboardButton {
                text: label.to_string(),
                callback_data: None,
                url: Some(url.to_string()),
            }]],
        }
    }

    fn empty() -> Self {
        Self {
            inline_keyboard: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.inline_keyboard.is_empty()
    }
}

fn callback_button(label: &str, data: &str) -> InlineKeyboardButton {
    InlineKeyboardButton {
        text: label.to_string(),
        callback_data: Some(data.to_string()),
        url: None,
    }
}

// ── Bot API client ──────────────────────────────────────────────────

/// Thin Bot API client shared by the channel and the operator notifier.
#[derive(Clone, Debug)]
pub struct BotApi {
    client: reqwest::Client,
    base_url: String,
    token: Arc<SecretString>,
}

impl BotApi {
    pub fn new(token: SecretString) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 30))
                .build()
                .unwrap_or_default(),
            base_url: TELEGRAM_API_BASE.to_string(),
            token: Arc::new(token),
        }
    }

    /// Point the client at another Bot API server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.base_url,
            self.token.expose_secret()
        )
    }

    /// Call a Bot API method and return its `result` field.
    pub async fn call(&self, method: &str, body: &Value) -> Result<Value, ChannelError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::Http(format!("{method}: {}", e.without_url())))?;

        let status = resp.status();
        let parsed: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ChannelError::InvalidMessage(format!("{method} ({status}): {e}")))?;

        if !parsed.ok {
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!(
                    "{method} returned {status}: {}",
                    parsed.description.unwrap_or_default()
                ),
            });
        }
        Ok(parsed.result.unwrap_or(Value::Null))
    }

    /// Send plain text, splitting messages over Telegram's length limit.
    pub async fn send_text(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            self.call(
                "sendMessage",
                &serde_json::json!({ "chat_id": chat_id, "text": chunk }),
            )
            .await?;
        }
        Ok(())
    }

    async fn send_with_markup(
        &self,
        chat_id: &str,
        text: &str,
        markup: &InlineKeyboardMarkup,
    ) -> Result<Value, ChannelError> {
        self.call(
            "sendMessage",
            &serde_json::json!({
                "chat_id": chat_id,
                "text": text,
                "reply_markup": markup,
            }),
        )
        .await
    }

    async fn answer_callback(&self, callback_id: &str) -> Result<(), ChannelError> {
        self.call(
            "answerCallbackQuery",
            &serde_json::json!({ "callback_query_id": callback_id }),
        )
        .await
        .map(|_| ())
    }
}

// ── Channel ─────────────────────────────────────────────────────────

/// Telegram channel — connects to the Bot API via long-polling.
pub struct TelegramChannel {
    api: BotApi,
    menus: Arc<RwLock<HashMap<String, i64>>>,
}

impl TelegramChannel {
    pub fn new(api: BotApi) -> Self {
        Self {
            api,
            menus: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn clear_keyboard(&self, chat_id: &str) -> Result<(), ChannelError> {
        let Some(message_id) = self.menus.write().await.remove(chat_id) else {
            return Ok(());
        };
        let result = self
            .api
            .call(
                "editMessageReplyMarkup",
                &serde_json::json!({
                    "chat_id": chat_id,
                    "message_id": message_id,
                    "reply_markup": InlineKeyboardMarkup::empty(),
                }),
            )
            .await;
        if let Err(e) = result {
            // The menu may already be gone (deleted by the user, too old to edit).
            tracing::debug!(chat_id, message_id, error = %e, "Could not clear keyboard");
        }
        Ok(())
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<EventStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let api = self.api.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!("Telegram channel listening for updates...");

            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["message", "callback_query"]
                });

                let updates: Vec<Update> = match api.call("getUpdates", &body).await {
                    Ok(result) => match serde_json::from_value(result) {
                        Ok(updates) => updates,
                        Err(e) => {
                            tracing::warn!("Telegram parse error: {e}");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                            continue;
                        }
                    },
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                };

                for update in updates {
                    // Advance offset past this update
                    offset = update.update_id + 1;

                    if let Some(ref query) = update.callback_query {
                        if let Err(e) = api.answer_callback(&query.id).await {
                            tracing::warn!(
                                callback_id = %query.id,
                                "answerCallbackQuery failed: {e}"
                            );
                        }
                    }

                    let Some(event) = event_from_update(&update) else {
                        continue;
                    };

                    if tx.send(event).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn render(&self, key: &ConversationKey, action: &Outbound) -> Result<(), ChannelError> {
        let chat_id = key.as_str();
        match action {
            Outbound::ShowMessage { text } => self.api.send_text(chat_id, text).await,
            Outbound::ShowOptions {
                text,
                options,
                include_back,
            } => {
                let markup = InlineKeyboardMarkup::menu(options, *include_back);
                if markup.is_empty() {
                    return self.api.send_text(chat_id, text).await;
                }
                let sent = self.api.send_with_markup(chat_id, text, &markup).await?;
                if let Some(message_id) = sent.get("message_id").and_then(Value::as_i64) {
                    self.menus
                        .write()
                        .await
                        .insert(chat_id.to_string(), message_id);
                }
                Ok(())
            }
            Outbound::ClearKeyboard => self.clear_keyboard(chat_id).await,
            Outbound::ShowLink { text, label, url } => self
                .api
                .send_with_markup(chat_id, text, &InlineKeyboardMarkup::link(label, url))
                .await
                .map(|_| ()),
        }
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        self.api
            .call("getMe", &serde_json::json!({}))
            .await
            .map(|_| ())
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        tracing::info!("Telegram channel shutting down");
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn caller_from_user(user: &User) -> Caller {
    let mut caller = Caller::new(user.id.to_string());
    if let Some(ref username) = user.username {
        caller = caller.with_username(username);
    }
    let name = match (&user.first_name, &user.last_name) {
        (Some(first), Some(last)) => Some(format!("{first} {last}")),
        (Some(first), None) => Some(first.clone()),
        (None, Some(last)) => Some(last.clone()),
        (None, None) => None,
    };
    if let Some(name) = name {
        caller = caller.with_display_name(name);
    }
    caller
}

/// Decode one update into an event, if it carries anything the bot handles.
fn event_from_update(update: &Update) -> Option<InboundEvent> {
    if let Some(ref query) = update.callback_query {
        let data = query.data.as_deref()?;
        let Some(kind) = EventParser::parse_callback(data) else {
            tracing::warn!(data, "Telegram: ignoring unknown callback data");
            return None;
        };
        // Fall back to the user's private chat when the menu message is unavailable.
        let chat_id = query
            .message
            .as_ref()
            .map(|m| m.chat.id)
            .unwrap_or(query.from.id);
        return Some(InboundEvent::new(
            ConversationKey::new(chat_id.to_string()),
            caller_from_user(&query.from),
            kind,
        ));
    }

    let message = update.message.as_ref()?;
    let text = message.text.as_deref()?;
    let Some(ref from) = message.from else {
        tracing::warn!("Message with no user info - ignoring");
        return None;
    };
    Some(InboundEvent::new(
        ConversationKey::new(message.chat.id.to_string()),
        caller_from_user(from),
        EventParser::parse_text(text),
    ))
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts at a char boundary.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut limit = max_len;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }

        // Find a good split point
        let chunk = &remaining[..limit];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(limit);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { limit } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
