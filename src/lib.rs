//! A framed, watchdog-supervised WebSocket-to-PTY terminal gateway.
//!
//! This crate implements the wire-level plumbing (RFC 6455 framing,
//! streaming UTF-8 validation, masking) and the session plumbing
//! (pseudo-terminal brokering, in-band control escapes, idle/ping
//! supervision) that sits between a browser's WebSocket connection and a
//! host shell, the way the original DCLinabox CGI program did for VMS
//! terminals.
//!
//! Authentication, TLS termination, and HTTP upgrade negotiation are left
//! to the surrounding harness; this crate starts from an already-upgraded
//! byte stream (see [`connection`]) and already-resolved request
//! attributes (see [`admission`]).

pub mod admission;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod escape;
pub mod event;
pub mod frame;
pub mod pty;
pub mod reader;
mod scratch;
pub mod session;
pub mod session_manager;
pub mod transport;
pub mod utf8;
pub mod watchdog;
pub mod writer;
