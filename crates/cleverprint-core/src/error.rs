// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for the CleverPrint agent.

use thiserror::Error;

/// Top-level error type for all agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    // -- Spooler errors --
    #[error("print queue is full ({0} jobs)")]
    QueueFull(usize),

    #[error("invalid print payload: {0}")]
    InvalidPayload(String),

    #[error("server job {0} is already in flight")]
    DuplicateServerJob(String),

    #[error("spooler is shutting down")]
    ShuttingDown,

    // -- Print pipeline --
    #[error("PDF materialization failed: {0}")]
    Materialize(String),

    #[error("print command failed: {0}")]
    Print(String),

    // -- Remote server --
    #[error("remote request failed: {0}")]
    RemoteTransport(String),

    // -- Persistence --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, AgentError>;
