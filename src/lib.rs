//! Host agent for cloud game streaming sessions.
//!
//! The [`broker`] pops admission requests from a work queue and opens a
//! per-session websocket endpoint ([`listener`]). Each connection on that
//! endpoint runs the [`session`] state machine, which provisions the game and
//! its capture pipelines and then relays binary [`input`] frames into the OS.

pub mod broker;
pub mod config;
pub mod game;
pub mod input;
pub mod listener;
pub mod process;
pub mod protocol;
pub mod queue;
pub mod services;
pub mod session;
pub mod state;
pub mod streaming;
pub mod window;
