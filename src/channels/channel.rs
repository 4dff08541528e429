//! The transport seam between the intake core and a messaging service.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::ChannelError;
use crate::intake::{ConversationKey, InboundEvent, Outbound};

/// Stream of decoded user events.
pub type EventStream = Pin<Box<dyn Stream<Item = InboundEvent> + Send>>;

/// A messaging transport.
///
/// Implementations decode raw updates into [`InboundEvent`]s once, at the
/// boundary, and render [`Outbound`] actions back to the user.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Start receiving events.
    async fn start(&self) -> Result<EventStream, ChannelError>;

    /// Render one action into the conversation identified by `key`.
    async fn render(&self, key: &ConversationKey, action: &Outbound) -> Result<(), ChannelError>;

    /// Check that the transport is reachable.
    async fn health_check(&self) -> Result<(), ChannelError>;

    async fn shutdown(&self) -> Result<(), ChannelError>;
}
