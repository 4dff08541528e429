//! Repair-request intake: catalog, sessions, the stage machine, and the
//! dispatcher that drives them.

pub mod catalog;
pub mod dispatcher;
pub mod event;
pub mod machine;
pub mod prompts;
pub mod session;
pub mod store;

pub use catalog::{Catalog, CatalogEntry};
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use event::{
    BACK_TOKEN, Caller, ConversationKey, EventKind, EventParser, InboundEvent, MAX_CALLBACK_BYTES,
    MenuKind, MenuOption, Outbound,
};
pub use machine::{StageMachine, Step};
pub use session::{CompletedRequest, NOT_APPLICABLE, Session, Slot, Stage};
pub use store::SessionStore;
