//! Repair Intake: a menu-driven bot that collects repair requests and
//! forwards them to an operator.

pub mod channels;
pub mod config;
pub mod error;
pub mod intake;
pub mod notifier;
