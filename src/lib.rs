//! Remote development session server.
//!
//! This library provides the core components for provisioning ephemeral,
//! remotely-controlled development sessions: repository synchronization,
//! workspace configuration, agent process supervision inside terminal
//! multiplexer sessions, and the session lifecycle registry.

pub mod agent;
pub mod api;
pub mod git;
pub mod session;
pub mod tmux;
