/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::attrs::AttrKey;
use crate::attrs::AttrValue;
use crate::attrs::Attributes;
use crate::attrs::Delta;
use crate::context::TargetContext;
use crate::platform::PlatformBreakpointId;
use crate::platform::PlatformModel;
use crate::platform::Problem;
use crate::platform::ThreadFilter;

/// Everything the in-memory model stores about one breakpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModelEntry {
    pub attributes: Attributes,
    pub filter: Option<ThreadFilter>,
    pub install_count: u32,
    pub hit_count: u32,
    pub problems: Vec<Problem>,
}

#[derive(Debug, Default)]
struct ModelState {
    next_id: u64,
    breakpoints: BTreeMap<PlatformBreakpointId, ModelEntry>,
    /// Decrements that would have taken an install count below zero.
    underflows: u32,
}

/// A platform model that keeps breakpoints in memory. It never calls back
/// into the synchronization layer; callers forward changes themselves.
#[derive(Debug, Default)]
pub struct MemoryModel {
    state: Mutex<ModelState>,
}

impl MemoryModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, attributes: Attributes) -> PlatformBreakpointId {
        self.create_breakpoint(attributes, None)
    }

    pub fn add_filtered(&self, attributes: Attributes, filter: ThreadFilter) -> PlatformBreakpointId {
        self.create_breakpoint(attributes, Some(filter))
    }

    /// Sets one attribute, as a user edit would.
    pub fn set(&self, id: PlatformBreakpointId, key: AttrKey, value: impl Into<AttrValue>) {
        if let Some(entry) = self.state.lock().breakpoints.get_mut(&id) {
            entry.attributes.insert(key, value);
        }
    }

    pub fn unset(&self, id: PlatformBreakpointId, key: AttrKey) {
        if let Some(entry) = self.state.lock().breakpoints.get_mut(&id) {
            entry.attributes.remove(key);
        }
    }

    pub fn entry(&self, id: PlatformBreakpointId) -> Option<ModelEntry> {
        self.state.lock().breakpoints.get(&id).cloned()
    }

    pub fn ids(&self) -> Vec<PlatformBreakpointId> {
        self.state.lock().breakpoints.keys().copied().collect()
    }

    pub fn install_count(&self, id: PlatformBreakpointId) -> u32 {
        self.entry(id).map_or(0, |entry| entry.install_count)
    }

    pub fn problems(&self, id: PlatformBreakpointId) -> Vec<Problem> {
        self.entry(id).map(|entry| entry.problems).unwrap_or_default()
    }

    pub fn underflows(&self) -> u32 {
        self.state.lock().underflows
    }

    fn with_entry(&self, id: PlatformBreakpointId, f: impl FnOnce(&mut ModelEntry)) {
        if let Some(entry) = self.state.lock().breakpoints.get_mut(&id) {
            f(entry);
        }
    }
}

impl PlatformModel for MemoryModel {
    fn breakpoints(&self) -> Vec<PlatformBreakpointId> {
        self.ids()
    }

    fn attributes(&self, id: PlatformBreakpointId) -> Option<Attributes> {
        self.state
            .lock()
            .breakpoints
            .get(&id)
            .map(|entry| entry.attributes.clone())
    }

    fn thread_filter(&self, id: PlatformBreakpointId) -> Option<ThreadFilter> {
        self.state
            .lock()
            .breakpoints
            .get(&id)
            .and_then(|entry| entry.filter.clone())
    }

    fn set_thread_filter(&self, id: PlatformBreakpointId, filter: Option<ThreadFilter>) {
        self.with_entry(id, |entry| entry.filter = filter);
    }

    fn update_attributes(&self, id: PlatformBreakpointId, changes: &Delta) {
        self.with_entry(id, |entry| entry.attributes.apply(changes));
    }

    fn create_breakpoint(
        &self,
        attributes: Attributes,
        filter: Option<ThreadFilter>,
    ) -> PlatformBreakpointId {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = PlatformBreakpointId::new(state.next_id);
        state.breakpoints.insert(
            id,
            ModelEntry {
                attributes,
                filter,
                ..Default::default()
            },
        );
        id
    }

    fn remove_breakpoint(&self, id: PlatformBreakpointId) {
        self.state.lock().breakpoints.remove(&id);
    }

    fn increment_install_count(&self, id: PlatformBreakpointId) {
        self.with_entry(id, |entry| entry.install_count += 1);
    }

    fn decrement_install_count(&self, id: PlatformBreakpointId) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(entry) = state.breakpoints.get_mut(&id) else {
            return;
        };
        match entry.install_count.checked_sub(1) {
            Some(count) => entry.install_count = count,
            None => {
                tracing::warn!(breakpoint = %id, "install count underflow");
                state.underflows += 1;
            }
        }
    }

    fn set_hit_count(&self, id: PlatformBreakpointId, hits: u32) {
        self.with_entry(id, |entry| entry.hit_count = hits);
    }

    fn add_problem(&self, id: PlatformBreakpointId, problem: Problem) {
        self.with_entry(id, |entry| entry.problems.push(problem));
    }

    fn clear_problems(&self, id: PlatformBreakpointId, context: TargetContext) {
        self.with_entry(id, |entry| entry.problems.retain(|p| p.context != context));
    }
}
