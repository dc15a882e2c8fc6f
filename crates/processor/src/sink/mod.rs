//! Result sinks
//!
//! Every pipeline owns a [`SinkRouter`] built from its sink descriptors.
//! Delivery clients are shared across pipelines through [`SinkTransports`]
//! and sit behind small traits so tests can substitute in-memory fakes.

mod chat;
mod mail;
mod router;
mod template;
mod trap;

pub use chat::{ChatClient, WebhookChatClient};
pub use mail::{MailTransport, SmtpMailTransport};
pub use router::{RouteReport, SinkHandler, SinkRouter, SinkTransports, NO_PROJECT};
pub use template::{render, PLACEHOLDERS};
pub use trap::{encode_trap, TrapSender, UdpTrapSender};
