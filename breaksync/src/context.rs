/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Handles for debug targets, execution contexts and target breakpoints.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// One backend debug target, e.g. a process under a multi-process session.
/// Created and destroyed by the execution-context collaborator; only ever
/// stored here as a map key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct TargetContext(u32);

impl TargetContext {
    pub const fn new(id: u32) -> Self {
        TargetContext(id)
    }

    pub fn id(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TargetContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "i{}", self.0)
    }
}

/// The thread scope of a single target breakpoint. `All` is the sentinel
/// used when a platform breakpoint carries no thread filter.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub enum ThreadScope {
    All,
    Thread(u32),
}

impl ThreadScope {
    /// Parses the backend's textual thread field, where `0`, `all` or an
    /// empty string mean no restriction.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() || s == "0" || s.eq_ignore_ascii_case("all") {
            Some(ThreadScope::All)
        } else {
            s.parse().ok().map(ThreadScope::Thread)
        }
    }
}

impl Default for ThreadScope {
    fn default() -> Self {
        ThreadScope::All
    }
}

impl fmt::Display for ThreadScope {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ThreadScope::All => f.write_str("0"),
            ThreadScope::Thread(tid) => write!(f, "{}", tid),
        }
    }
}

/// An execution context inside a target: either a container (a thread
/// group) or a single thread of that container.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub enum ExecutionContext {
    Container { context: TargetContext, group: u32 },
    Thread { context: TargetContext, group: u32, thread: u32 },
}

impl ExecutionContext {
    pub fn container(context: TargetContext, group: u32) -> Self {
        ExecutionContext::Container { context, group }
    }

    pub fn thread(context: TargetContext, group: u32, thread: u32) -> Self {
        ExecutionContext::Thread {
            context,
            group,
            thread,
        }
    }

    pub fn context(&self) -> TargetContext {
        match self {
            ExecutionContext::Container { context, .. } => *context,
            ExecutionContext::Thread { context, .. } => *context,
        }
    }

    pub fn group(&self) -> u32 {
        match self {
            ExecutionContext::Container { group, .. } => *group,
            ExecutionContext::Thread { group, .. } => *group,
        }
    }

    /// The parent container of a thread. Containers have no parent.
    pub fn parent(&self) -> Option<ExecutionContext> {
        match *self {
            ExecutionContext::Container { .. } => None,
            ExecutionContext::Thread { context, group, .. } => {
                Some(ExecutionContext::container(context, group))
            }
        }
    }

    /// Returns true if `self` is `other` or one of its ancestors.
    pub fn contains(&self, other: &ExecutionContext) -> bool {
        self == other || other.parent().as_ref() == Some(self)
    }

    /// The thread scope a breakpoint restricted to this context would use.
    pub fn scope(&self) -> ThreadScope {
        match self {
            ExecutionContext::Container { .. } => ThreadScope::All,
            ExecutionContext::Thread { thread, .. } => ThreadScope::Thread(*thread),
        }
    }
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExecutionContext::Container { context, group } => write!(f, "{}.p{}", context, group),
            ExecutionContext::Thread {
                context,
                group,
                thread,
            } => write!(f, "{}.p{}.t{}", context, group, thread),
        }
    }
}

/// A backend-assigned breakpoint number, scoped to the context it lives in.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct TargetBreakpointRef {
    pub context: TargetContext,
    pub number: String,
}

impl TargetBreakpointRef {
    pub fn new(context: TargetContext, number: impl Into<String>) -> Self {
        TargetBreakpointRef {
            context,
            number: number.into(),
        }
    }
}

impl fmt::Display for TargetBreakpointRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}#{}", self.context, self.number)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn thread_scope_parse() {
        assert_eq!(ThreadScope::parse("0"), Some(ThreadScope::All));
        assert_eq!(ThreadScope::parse(""), Some(ThreadScope::All));
        assert_eq!(ThreadScope::parse("all"), Some(ThreadScope::All));
        assert_eq!(ThreadScope::parse("7"), Some(ThreadScope::Thread(7)));
        assert_eq!(ThreadScope::parse("x"), None);
    }

    #[test]
    fn container_contains_its_threads() {
        let ctx = TargetContext::new(1);
        let container = ExecutionContext::container(ctx, 100);
        let thread = ExecutionContext::thread(ctx, 100, 3);
        let stranger = ExecutionContext::thread(ctx, 200, 3);

        assert!(container.contains(&thread));
        assert!(container.contains(&container));
        assert!(thread.contains(&thread));
        assert!(!thread.contains(&container));
        assert!(!container.contains(&stranger));
    }
}
