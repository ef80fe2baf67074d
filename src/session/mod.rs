//! # Conversational Session Module
//!
//! One session per WebSocket connection. This module owns everything a
//! session needs between connect and disconnect:
//!
//! ## Key Components:
//! - **Conversation History**: the ordered log of user/model turns that is
//!   sent verbatim to the generation backend on every request
//! - **Session Controller**: the per-connection state machine that enforces
//!   single-flight request processing, drives the
//!   transcribe → generate → synthesize pipeline, and implements
//!   cooperative interruption
//!
//! Sessions share nothing with each other: each connection gets a fresh
//! controller with an empty history, and both are dropped on disconnect.

pub mod controller; // Single-flight pipeline state machine
pub mod history; // Ordered user/model turn log

pub use controller::SessionController;
pub use history::{ConversationHistory, Role, Turn};
