//! CLI channel — stdin/stdout REPL for local testing.
//!
//! Menus are printed as numbered lists. Typing a number picks that option,
//! `0` goes back when the menu offers it, anything else is parsed like a
//! chat message.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;

use crate::channels::{Channel, EventStream};
use crate::error::ChannelError;
use crate::intake::prompts::BACK_LABEL;
use crate::intake::{
    Caller, ConversationKey, EventKind, EventParser, InboundEvent, MenuOption, Outbound,
};

const CLI_KEY: &str = "cli";
const CLI_USER: &str = "local-user";

/// The menu currently on screen: options and whether `0` means back.
#[derive(Debug, Clone, Default)]
struct Menu {
    options: Vec<MenuOption>,
    include_back: bool,
}

impl Menu {
    /// Interpret one typed line against this menu.
    fn interpret(&self, line: &str) -> EventKind {
        if let Ok(n) = line.parse::<usize>() {
            if n == 0 && self.include_back {
                return EventKind::BackRequested;
            }
            if let Some(kind) = n
                .checked_sub(1)
                .and_then(|i| self.options.get(i))
                .and_then(|o| EventParser::parse_callback(&o.id))
            {
                return kind;
            }
        }
        EventParser::parse_text(line)
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for (i, option) in self.options.iter().enumerate() {
            out.push_str(&format!("  {}. {}\n", i + 1, option.label));
        }
        if self.include_back {
            out.push_str(&format!("  0. {BACK_LABEL}\n"));
        }
        out
    }
}

/// A simple CLI channel that reads from stdin and writes to stdout.
pub struct CliChannel {
    menu: Arc<Mutex<Menu>>,
}

impl CliChannel {
    pub fn new() -> Self {
        Self {
            menu: Arc::new(Mutex::new(Menu::default())),
        }
    }
}

impl Default for CliChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(&self) -> Result<EventStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let menu = Arc::clone(&self.menu);

        tokio::spawn(async move {
            let stdin = tokio::io::stdin();
            let reader = BufReader::new(stdin);
            let mut lines = reader.lines();

            // Print prompt
            eprint!("> ");

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            eprint!("> ");
                            continue;
                        }
                        let kind = menu.lock().await.interpret(&line);
                        let event = InboundEvent::new(
                            ConversationKey::new(CLI_KEY),
                            Caller::new(CLI_USER),
                            kind,
                        );
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF
                    Err(e) => {
                        tracing::error!("Error reading stdin: {}", e);
                        break;
                    }
                }
            }
        });

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn render(&self, _key: &ConversationKey, action: &Outbound) -> Result<(), ChannelError> {
        match action {
            Outbound::ShowMessage { text } => {
                println!("\n{text}\n");
                *self.menu.lock().await = Menu::default();
            }
            Outbound::ShowOptions {
                text,
                options,
                include_back,
            } => {
                let menu = Menu {
                    options: options.clone(),
                    include_back: *include_back,
                };
                println!("\n{text}\n{}", menu.render());
                *self.menu.lock().await = menu;
            }
            Outbound::ClearKeyboard => *self.menu.lock().await = Menu::default(),
            Outbound::ShowLink { text, label, url } => {
                println!("\n{text}\n{label}: {url}\n");
                *self.menu.lock().await = Menu::default();
            }
        }
        eprint!("> ");
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}
