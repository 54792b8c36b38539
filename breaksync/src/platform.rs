/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Interfaces of the collaborators this crate consumes: the user-facing
//! breakpoint model, source lookup, and the execution-context registry.

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use crate::attrs::Attributes;
use crate::attrs::Delta;
use crate::context::ExecutionContext;
use crate::context::TargetContext;
use crate::error::Error;

/// Identity of a platform breakpoint, owned by the platform model.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct PlatformBreakpointId(u64);

impl PlatformBreakpointId {
    pub const fn new(id: u64) -> Self {
        PlatformBreakpointId(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PlatformBreakpointId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "bp{}", self.0)
    }
}

/// Set of execution contexts a platform breakpoint is restricted to. A
/// breakpoint without a filter applies everywhere.
pub type ThreadFilter = BTreeSet<ExecutionContext>;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A problem annotation attached to a platform breakpoint.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Problem {
    pub context: TargetContext,
    pub severity: Severity,
    pub message: String,
}

impl Problem {
    pub fn error(context: TargetContext, message: impl Into<String>) -> Self {
        Problem {
            context,
            severity: Severity::Error,
            message: message.into(),
        }
    }
}

/// The persistent, user-facing breakpoint model.
///
/// The model owns breakpoint identity and storage. It is both the source of
/// breakpoint attributes and the sink for changes pulled up from the backend.
/// Implementations must be cheap to call; every method runs inline on the
/// caller's task.
pub trait PlatformModel: Send + Sync {
    /// All platform breakpoints currently defined.
    fn breakpoints(&self) -> Vec<PlatformBreakpointId>;

    /// User-level attributes of a breakpoint, or `None` if it no longer
    /// exists.
    fn attributes(&self, id: PlatformBreakpointId) -> Option<Attributes>;

    /// Thread filter of a breakpoint. `None` means unrestricted.
    fn thread_filter(&self, id: PlatformBreakpointId) -> Option<ThreadFilter>;

    fn set_thread_filter(&self, id: PlatformBreakpointId, filter: Option<ThreadFilter>);

    /// Writes attribute changes onto a breakpoint. Cleared keys are removed.
    fn update_attributes(&self, id: PlatformBreakpointId, changes: &Delta);

    /// Registers a breakpoint that was discovered in the backend.
    fn create_breakpoint(
        &self,
        attributes: Attributes,
        filter: Option<ThreadFilter>,
    ) -> PlatformBreakpointId;

    fn remove_breakpoint(&self, id: PlatformBreakpointId);

    fn increment_install_count(&self, id: PlatformBreakpointId);

    fn decrement_install_count(&self, id: PlatformBreakpointId);

    fn set_hit_count(&self, id: PlatformBreakpointId, hits: u32);

    fn add_problem(&self, id: PlatformBreakpointId, problem: Problem);

    /// Removes every problem reported for `context`.
    fn clear_problems(&self, id: PlatformBreakpointId, context: TargetContext);
}

/// Translates between host source paths and the paths the backend uses.
#[async_trait]
pub trait SourceLookup: Send + Sync {
    /// Path the backend should be given for a host file.
    async fn resolve_debugger_path(
        &self,
        context: TargetContext,
        host_path: &str,
    ) -> Result<String, Error>;

    /// Host file for a path reported by the backend, if there is one.
    async fn resolve_local_file(&self, context: TargetContext, debugger_path: &str)
    -> Option<String>;
}

/// Lookup of the target contexts that currently exist.
pub trait ContextRegistry: Send + Sync {
    fn contexts(&self) -> Vec<TargetContext>;

    /// Target context that owns the thread group named by the backend.
    fn context_for_group(&self, group: &str) -> Option<TargetContext>;
}
