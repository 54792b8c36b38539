/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::collections::HashMap;

use crate::context::ExecutionContext;
use crate::context::TargetBreakpointRef;
use crate::context::TargetContext;

/// Breakpoints associated with suspended execution contexts.
///
/// A container entry covers all of its threads, so a lookup on a thread
/// falls back to the thread's container.
#[derive(Debug, Default)]
pub struct HitTracker {
    hits: HashMap<ExecutionContext, Vec<TargetBreakpointRef>>,
}

impl HitTracker {
    pub fn record(&mut self, ec: ExecutionContext, refs: Vec<TargetBreakpointRef>) {
        if refs.is_empty() {
            self.hits.remove(&ec);
        } else {
            self.hits.insert(ec, refs);
        }
    }

    /// Forgets `ec` and, for a container, every thread below it.
    pub fn clear(&mut self, ec: &ExecutionContext) {
        self.hits.retain(|recorded, _| !ec.contains(recorded));
    }

    pub fn clear_target(&mut self, context: TargetContext) {
        self.hits.retain(|recorded, _| recorded.context() != context);
    }

    pub fn get(&self, ec: &ExecutionContext) -> Vec<TargetBreakpointRef> {
        self.hits
            .get(ec)
            .or_else(|| ec.parent().and_then(|parent| self.hits.get(&parent)))
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const CTX: TargetContext = TargetContext::new(1);

    fn bp(n: &str) -> TargetBreakpointRef {
        TargetBreakpointRef::new(CTX, n)
    }

    #[test]
    fn container_hit_propagates_to_threads() {
        let mut hits = HitTracker::default();
        let container = ExecutionContext::container(CTX, 1);
        hits.record(container, vec![bp("1")]);
        assert_eq!(hits.get(&ExecutionContext::thread(CTX, 1, 7)), vec![bp("1")]);
        assert!(hits.get(&ExecutionContext::thread(CTX, 2, 7)).is_empty());
    }

    #[test]
    fn clearing_container_clears_threads() {
        let mut hits = HitTracker::default();
        let thread = ExecutionContext::thread(CTX, 1, 7);
        hits.record(thread, vec![bp("2")]);
        hits.record(ExecutionContext::thread(CTX, 3, 9), vec![bp("3")]);
        hits.clear(&ExecutionContext::container(CTX, 1));
        assert!(hits.get(&thread).is_empty());
        assert_eq!(hits.get(&ExecutionContext::thread(CTX, 3, 9)), vec![bp("3")]);

        hits.clear_target(CTX);
        assert!(hits.is_empty());
    }

    #[test]
    fn thread_resume_keeps_container_entry() {
        let mut hits = HitTracker::default();
        let container = ExecutionContext::container(CTX, 1);
        let thread = ExecutionContext::thread(CTX, 1, 7);
        hits.record(container, vec![bp("1")]);
        hits.clear(&thread);
        assert_eq!(hits.get(&container), vec![bp("1")]);
    }
}
