//! QMUX framing, device transport, and client-id registry for QMI
//!
//! This crate is schema-independent: it knows how to frame and
//! demultiplex QMUX envelopes, allocate client ids via CTL, and manage a
//! single device's in-flight calls. It does not know what any particular
//! service's messages look like — that comes from schema-generated code
//! built on top of [`TlvCodec`]/[`Request`]/[`Message`] and registered
//! into a [`Registry`] at startup.

mod client;
mod device;
mod error;
mod framer;
mod message;
mod registry;
mod transport;

pub use client::Client;
pub use error::{describe_error_code, QmiError, QmiResult};
pub use framer::{find_tag, Envelope, CTL_SERVICE_ID, MARKER};
pub use message::{FixedTlvCodec, Message, Request, TlvCodec};
pub use registry::Registry;
pub use transport::Transport;
