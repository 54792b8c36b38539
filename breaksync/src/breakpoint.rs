/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Breakpoint kinds and the backend's view of a breakpoint.

use bitflags::bitflags;
use serde::Deserialize;
use serde::Serialize;

use crate::context::ThreadScope;

/// Kind of a platform breakpoint.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakpointKind {
    /// Source line breakpoint.
    Line,
    /// Breakpoint on function entry.
    Function,
    /// Breakpoint on an instruction address.
    Address,
    /// Watchpoint on an expression.
    Watch,
    /// Tracepoint; collects data without stopping.
    Tracepoint,
    /// Catchpoint on a backend event (exec, fork, throw, ...).
    Catchpoint,
    /// Breakpoint that prints a formatted message and continues.
    DynamicPrintf,
}

impl BreakpointKind {
    /// Returns true if breakpoints of this kind may carry a source file that
    /// needs translating into a debugger-visible path.
    pub fn has_source_path(&self) -> bool {
        match self {
            BreakpointKind::Line
            | BreakpointKind::Function
            | BreakpointKind::Tracepoint
            | BreakpointKind::DynamicPrintf => true,
            BreakpointKind::Address | BreakpointKind::Watch | BreakpointKind::Catchpoint => false,
        }
    }

    /// Tracepoints and dynamic printf ignore the manager-wide enable toggle.
    pub fn ignores_manager_enablement(&self) -> bool {
        match self {
            BreakpointKind::Tracepoint | BreakpointKind::DynamicPrintf => true,
            BreakpointKind::Line
            | BreakpointKind::Function
            | BreakpointKind::Address
            | BreakpointKind::Watch
            | BreakpointKind::Catchpoint => false,
        }
    }
}

bitflags! {
    /// Access type of a watchpoint.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct WatchAccess: u8 {
        const READ = 0x1;
        const WRITE = 0x2;
    }
}

impl Default for WatchAccess {
    fn default() -> Self {
        WatchAccess::WRITE
    }
}

/// Kind flags of a target breakpoint as reported by the backend.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Breakpoint { hardware: bool, temporary: bool },
    Watchpoint { access: WatchAccess },
    Tracepoint,
    DynamicPrintf,
    Catchpoint { event: String },
}

impl TargetKind {
    pub fn is_catchpoint(&self) -> bool {
        matches!(self, TargetKind::Catchpoint { .. })
    }
}

impl Default for TargetKind {
    fn default() -> Self {
        TargetKind::Breakpoint {
            hardware: false,
            temporary: false,
        }
    }
}

/// A breakpoint resident in the backend. The location fields are the ones
/// the backend reports, which may differ from what was requested.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetBreakpointData {
    /// Backend-assigned number, unique within its context.
    pub number: String,
    pub kind: TargetKind,
    /// Debugger-visible source file.
    pub file: Option<String>,
    pub line: Option<u32>,
    pub function: Option<String>,
    pub address: Option<u64>,
    /// Watched expression.
    pub expression: Option<String>,
    /// The location string as originally requested.
    pub original_location: Option<String>,
    pub condition: String,
    pub ignore_count: u32,
    pub enabled: bool,
    /// The backend accepted the breakpoint but could not resolve it yet.
    pub pending: bool,
    pub thread: ThreadScope,
    /// Thread groups the breakpoint applies to, as named by the backend.
    pub groups: Vec<String>,
    pub hit_count: u32,
    /// Tracepoint pass count.
    pub pass_count: u32,
    /// Tracepoint actions.
    pub commands: Vec<String>,
    /// Dynamic printf format and arguments.
    pub printf: Option<String>,
    /// Catchpoint event arguments.
    pub catch_args: Vec<String>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn only_trace_kinds_ignore_manager_toggle() {
        assert!(BreakpointKind::Tracepoint.ignores_manager_enablement());
        assert!(BreakpointKind::DynamicPrintf.ignores_manager_enablement());
        assert!(!BreakpointKind::Line.ignores_manager_enablement());
        assert!(!BreakpointKind::Watch.ignores_manager_enablement());
    }

    #[test]
    fn target_data_deserializes_with_defaults() {
        let data: TargetBreakpointData =
            serde_json::from_str(r#"{"number":"3","file":"main.c","line":42,"enabled":true}"#)
                .unwrap();
        assert_eq!(data.number, "3");
        assert_eq!(data.line, Some(42));
        assert_eq!(data.thread, ThreadScope::All);
        assert!(!data.pending);
        assert_eq!(data.kind, TargetKind::default());
    }
}
