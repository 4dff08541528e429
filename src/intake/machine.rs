//! Pure transition logic for the intake conversation.
//!
//! [`StageMachine::handle`] takes the current session and one event and
//! returns a [`Step`]: the next stage, the session to keep (if the
//! conversation goes on), the actions to render, and the completed request
//! when the user has just finished. It never performs I/O.
//!
//! "Back" is not replayed from a history. The previous prompt is rebuilt
//! from the stored category/model and the catalog, which supports one level
//! of meaningful back-travel from the contacts stage.

use std::sync::Arc;

use super::catalog::Catalog;
use super::event::{Caller, EventKind, MenuKind, MenuOption, Outbound};
use super::prompts;
use super::session::{CompletedRequest, Session, Slot, Stage};
use crate::error::FlowError;

/// Outcome of one event.
#[derive(Debug, Clone)]
pub struct Step {
    /// Stage after the event.
    pub stage: Stage,
    /// Session to keep, or `None` once the conversation ended.
    pub session: Option<Session>,
    /// Actions for the transport, in order.
    pub replies: Vec<Outbound>,
    /// Set only on the transition into `Completed`.
    pub completed: Option<CompletedRequest>,
    /// Why the event was not applied, if it was rejected.
    pub rejection: Option<FlowError>,
}

impl Step {
    fn active(session: Session, replies: Vec<Outbound>) -> Self {
        Self {
            stage: session.stage,
            session: Some(session),
            replies,
            completed: None,
            rejection: None,
        }
    }

    fn ended(stage: Stage, replies: Vec<Outbound>) -> Self {
        Self {
            stage,
            session: None,
            replies,
            completed: None,
            rejection: None,
        }
    }

    fn with_rejection(mut self, rejection: FlowError) -> Self {
        self.rejection = Some(rejection);
        self
    }
}

/// Drives sessions through the catalog's menus.
pub struct StageMachine {
    catalog: Arc<Catalog>,
    contact_url: Option<String>,
}

impl StageMachine {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            contact_url: None,
        }
    }

    /// Attach a "contact the manager" button to the completion message.
    pub fn with_contact_url(mut self, url: Option<String>) -> Self {
        self.contact_url = url;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Begin a fresh conversation.
    pub fn start(&self) -> Step {
        let session = Session::new();
        let mut replies = vec![Outbound::ClearKeyboard, Outbound::message(prompts::WELCOME)];
        replies.extend(self.stage_prompt(&session));
        Step::active(session, replies)
    }

    /// Apply one event to a session.
    pub fn handle(&self, session: Session, event: &EventKind, caller: &Caller) -> Step {
        match event {
            EventKind::ConversationStarted => return self.start(),
            EventKind::CancelRequested => return self.cancel(),
            EventKind::UnknownCommand(command) => {
                return self.reject(
                    session,
                    FlowError::UnsupportedCommand(command.clone()),
                    prompts::UNSUPPORTED_COMMAND,
                );
            }
            _ => {}
        }

        if let EventKind::BackRequested = event {
            return self.back(session);
        }

        match session.stage {
            Stage::AwaitingCategory => self.on_category(session, event),
            Stage::AwaitingModel => self.on_model(session, event),
            Stage::AwaitingService => self.on_service(session, event),
            Stage::AwaitingContacts => self.on_contacts(session, event, caller),
            // A finished session is never reused; the event opens a new one.
            Stage::Completed | Stage::Cancelled => self.handle(Session::new(), event, caller),
        }
    }

    /// Render the prompt for the session's current stage.
    ///
    /// The previous menu is retired first so only the newest one has live
    /// buttons.
    pub fn prompt(&self, session: &Session) -> Vec<Outbound> {
        if session.stage.is_terminal() {
            return Vec::new();
        }
        let mut replies = vec![Outbound::ClearKeyboard];
        replies.extend(self.stage_prompt(session));
        replies
    }

    fn stage_prompt(&self, session: &Session) -> Vec<Outbound> {
        match session.stage {
            Stage::AwaitingCategory => vec![Outbound::ShowOptions {
                text: prompts::CHOOSE_CATEGORY.to_string(),
                options: self
                    .catalog
                    .categories()
                    .map(|c| MenuOption::new(MenuKind::Category, c))
                    .collect(),
                include_back: false,
            }],
            Stage::AwaitingModel => {
                let category = session.category.as_deref().unwrap_or_default();
                vec![Outbound::ShowOptions {
                    text: prompts::choose_model(category),
                    options: self.menu(MenuKind::Model, session),
                    include_back: true,
                }]
            }
            Stage::AwaitingService => {
                let model = session
                    .model
                    .as_ref()
                    .and_then(Slot::chosen)
                    .unwrap_or_default();
                vec![Outbound::ShowOptions {
                    text: prompts::choose_service(model),
                    options: self.menu(MenuKind::Service, session),
                    include_back: true,
                }]
            }
            Stage::AwaitingContacts => {
                let text = prompts::ask_contacts(session);
                if has_selectable_predecessor(session) {
                    vec![Outbound::ShowOptions {
                        text,
                        options: Vec::new(),
                        include_back: true,
                    }]
                } else {
                    vec![Outbound::message(text)]
                }
            }
            Stage::Completed | Stage::Cancelled => Vec::new(),
        }
    }

    fn cancel(&self) -> Step {
        Step::ended(
            Stage::Cancelled,
            vec![Outbound::ClearKeyboard, Outbound::message(prompts::CANCELLED)],
        )
    }

    fn on_category(&self, session: Session, event: &EventKind) -> Step {
        let EventKind::CategorySelected(category) = event else {
            return self.invalid(session, event);
        };
        let Some(entry) = self.catalog.lookup(category) else {
            return Step::ended(
                Stage::Cancelled,
                vec![
                    Outbound::ClearKeyboard,
                    Outbound::message(prompts::unknown_category(category)),
                ],
            )
            .with_rejection(FlowError::UnknownCategory(category.clone()));
        };

        let mut next = session;
        next.category = Some(category.clone());
        if entry.models().is_some() {
            next.stage = Stage::AwaitingModel;
        } else {
            next.model = Some(Slot::NotApplicable);
            next.service = Some(Slot::NotApplicable);
            next.stage = Stage::AwaitingContacts;
        }
        let replies = self.prompt(&next);
        Step::active(next, replies)
    }

    fn on_model(&self, session: Session, event: &EventKind) -> Step {
        let EventKind::ModelSelected(model) = event else {
            return self.invalid(session, event);
        };
        let Some(entry) = self.entry(&session).filter(|e| e.has_model(model)) else {
            return self.invalid(session, event);
        };

        let skip_services = entry.services().is_none();
        let mut next = session;
        next.model = Some(Slot::Chosen(model.clone()));
        if skip_services {
            next.service = Some(Slot::NotApplicable);
            next.stage = Stage::AwaitingContacts;
        } else {
            next.stage = Stage::AwaitingService;
        }
        let replies = self.prompt(&next);
        Step::active(next, replies)
    }

    fn on_service(&self, session: Session, event: &EventKind) -> Step {
        let EventKind::ServiceSelected(service) = event else {
            return self.invalid(session, event);
        };
        if !self.entry(&session).is_some_and(|e| e.has_service(service)) {
            return self.invalid(session, event);
        }

        let mut next = session;
        next.service = Some(Slot::Chosen(service.clone()));
        next.stage = Stage::AwaitingContacts;
        let replies = self.prompt(&next);
        Step::active(next, replies)
    }

    fn on_contacts(&self, session: Session, event: &EventKind, caller: &Caller) -> Step {
        let EventKind::ContactsSubmitted(text) = event else {
            return self.invalid(session, event);
        };
        let contacts = text.trim();
        if contacts.is_empty() {
            return self.reject(session, FlowError::EmptyContacts, prompts::EMPTY_CONTACTS);
        }

        let mut finished = session;
        finished.contacts = Some(contacts.to_string());
        finished.stage = Stage::Completed;
        let completed = CompletedRequest::from_session(&finished, caller);

        let thanks = match self.contact_url {
            Some(ref url) => Outbound::ShowLink {
                text: prompts::THANKS.to_string(),
                label: prompts::CONTACT_MANAGER_LABEL.to_string(),
                url: url.clone(),
            },
            None => Outbound::message(prompts::THANKS),
        };
        let mut step = Step::ended(Stage::Completed, vec![Outbound::ClearKeyboard, thanks]);
        step.completed = completed;
        step
    }

    fn back(&self, session: Session) -> Step {
        let mut next = session;
        match next.stage {
            Stage::AwaitingCategory => {}
            Stage::AwaitingModel => next = Session::new(),
            Stage::AwaitingService => {
                next.model = None;
                next.stage = Stage::AwaitingModel;
            }
            Stage::AwaitingContacts => match (&next.model, &next.service) {
                (Some(Slot::Chosen(_)), Some(Slot::Chosen(_))) => {
                    next.service = None;
                    next.stage = Stage::AwaitingService;
                }
                (Some(Slot::Chosen(_)), _) => {
                    next.model = None;
                    next.service = None;
                    next.stage = Stage::AwaitingModel;
                }
                // Model was skipped: contacts has no predecessor to return to.
                _ => {}
            },
            Stage::Completed | Stage::Cancelled => next = Session::new(),
        }
        let replies = self.prompt(&next);
        Step::active(next, replies)
    }

    fn invalid(&self, session: Session, event: &EventKind) -> Step {
        let rejection = FlowError::InvalidSelection {
            stage: session.stage,
            value: event_value(event),
        };
        self.reject(session, rejection, prompts::INVALID_SELECTION)
    }

    fn reject(&self, session: Session, rejection: FlowError, notice: &str) -> Step {
        let mut replies = vec![Outbound::message(notice)];
        replies.extend(self.prompt(&session));
        Step::active(session, replies).with_rejection(rejection)
    }

    fn entry(&self, session: &Session) -> Option<&super::catalog::CatalogEntry> {
        session
            .category
            .as_deref()
            .and_then(|c| self.catalog.lookup(c))
    }

    fn menu(&self, kind: MenuKind, session: &Session) -> Vec<MenuOption> {
        let entry = self.entry(session);
        let labels = match kind {
            MenuKind::Category => None,
            MenuKind::Model => entry.and_then(|e| e.models()),
            MenuKind::Service => entry.and_then(|e| e.services()),
        };
        labels
            .unwrap_or_default()
            .iter()
            .map(|label| MenuOption::new(kind, label))
            .collect()
    }
}

/// Whether a menu was shown right before the contacts stage.
fn has_selectable_predecessor(session: &Session) -> bool {
    session.model.as_ref().is_some_and(Slot::is_chosen)
}

fn event_value(event: &EventKind) -> String {
    match event {
        EventKind::CategorySelected(v)
        | EventKind::ModelSelected(v)
        | EventKind::ServiceSelected(v)
        | EventKind::ContactsSubmitted(v)
        | EventKind::UnknownCommand(v) => v.clone(),
        EventKind::ConversationStarted => "/start".to_string(),
        EventKind::CancelRequested => "/cancel".to_string(),
        EventKind::BackRequested => "back".to_string(),
    }
}
