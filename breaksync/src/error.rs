/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Error handling.

use std::io;

use thiserror::Error;

use crate::backend::BackendFailure;
use crate::breakpoint::BreakpointKind;
use crate::context::TargetBreakpointRef;
use crate::context::TargetContext;

/// Errors produced while keeping platform and target breakpoints in sync.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The context is not (or no longer) being tracked.
    #[error("Unknown or untracked target context {0}")]
    InvalidContext(TargetContext),

    /// No target breakpoint with this reference is known.
    #[error("Unknown target breakpoint {0}")]
    InvalidBreakpointReference(TargetBreakpointRef),

    /// The attribute bag carries no breakpoint kind, or one that the
    /// requested operation cannot handle.
    #[error("Unknown breakpoint kind{}", .0.map(|k| format!(" {:?}", k)).unwrap_or_default())]
    UnknownBreakpointKind(Option<BreakpointKind>),

    /// The backend refused to create the breakpoint. This includes inserts
    /// that were answered with success but produced no breakpoint.
    #[error("Breakpoint insertion failed: {0}")]
    InsertionFailed(String),

    /// The backend rejected a condition expression.
    #[error("Condition rejected by backend: {0}")]
    ConditionRejected(String),

    /// The source path could not be translated into one the backend can use.
    #[error("Unable to resolve source path {0}")]
    PathUnresolved(String),

    /// Any other command the backend answered with an error.
    #[error("Backend error: {0}")]
    Backend(String),

    /// The request channel to the backend is closed.
    #[error("Backend session terminated")]
    SessionTerminated,

    /// The backend dropped a request without replying.
    #[error("Failed to receive reply from backend request")]
    ReplyDropped,

    /// Reading or parsing configuration failed.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Returns true if the error only means the session went away while the
    /// request was in flight. Such results are moot rather than failures.
    pub fn is_moot(&self) -> bool {
        matches!(self, Error::SessionTerminated | Error::ReplyDropped)
    }

    /// Message suitable for a problem annotation on a platform breakpoint.
    /// Detailed backend messages are passed through, everything else is
    /// reported as a generic attribute problem.
    pub fn problem_message(&self) -> String {
        match self {
            Error::InsertionFailed(msg)
            | Error::ConditionRejected(msg)
            | Error::Backend(msg)
                if !msg.is_empty() =>
            {
                msg.clone()
            }
            Error::PathUnresolved(path) => format!("Unable to resolve source file {}", path),
            _ => String::from("Breakpoint attributes could not be applied"),
        }
    }
}

impl From<BackendFailure> for Error {
    fn from(failure: BackendFailure) -> Self {
        Error::Backend(failure.message)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}
