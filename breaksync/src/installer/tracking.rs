/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::collections::BTreeMap;
use std::collections::HashMap;

use crate::attrs::Attributes;
use crate::context::TargetBreakpointRef;
use crate::context::ThreadScope;
use crate::platform::PlatformBreakpointId;

/// Everything the installation manager knows about one tracked context.
/// Created by start tracking and dropped as a whole by stop tracking.
#[derive(Debug, Default)]
pub struct TrackingState {
    /// Attribute snapshot each platform breakpoint was last installed or
    /// patched with, including its thread scopes and resolved path.
    pub(crate) attributes: HashMap<PlatformBreakpointId, Attributes>,
    pub(crate) targets: HashMap<PlatformBreakpointId, Vec<TargetBreakpointRef>>,
    pub(crate) owners: HashMap<TargetBreakpointRef, PlatformBreakpointId>,
    /// Thread scope covered by each installed target breakpoint.
    pub(crate) scopes: HashMap<PlatformBreakpointId, BTreeMap<ThreadScope, TargetBreakpointRef>>,
}

impl TrackingState {
    /// Associates `target` with `id`. Returns false if `target` already
    /// belongs to some platform breakpoint.
    pub(crate) fn record(
        &mut self,
        id: PlatformBreakpointId,
        scope: ThreadScope,
        target: TargetBreakpointRef,
    ) -> bool {
        if self.owners.contains_key(&target) {
            return false;
        }
        self.owners.insert(target.clone(), id);
        self.targets.entry(id).or_default().push(target.clone());
        self.scopes.entry(id).or_default().insert(scope, target);
        true
    }

    /// Dissociates a single target breakpoint, returning its owner.
    pub(crate) fn forget(&mut self, target: &TargetBreakpointRef) -> Option<PlatformBreakpointId> {
        let id = self.owners.remove(target)?;
        if let Some(targets) = self.targets.get_mut(&id) {
            targets.retain(|t| t != target);
            if targets.is_empty() {
                self.targets.remove(&id);
            }
        }
        if let Some(scopes) = self.scopes.get_mut(&id) {
            scopes.retain(|_, t| t != target);
            if scopes.is_empty() {
                self.scopes.remove(&id);
            }
        }
        Some(id)
    }

    /// Dissociates every target breakpoint of `id` and returns them.
    pub(crate) fn take_targets(&mut self, id: PlatformBreakpointId) -> Vec<TargetBreakpointRef> {
        self.scopes.remove(&id);
        let targets = self.targets.remove(&id).unwrap_or_default();
        for target in &targets {
            self.owners.remove(target);
        }
        targets
    }

    pub(crate) fn targets_of(&self, id: PlatformBreakpointId) -> Vec<TargetBreakpointRef> {
        self.targets.get(&id).cloned().unwrap_or_default()
    }

    pub(crate) fn is_installed(&self, id: PlatformBreakpointId) -> bool {
        self.targets.get(&id).is_some_and(|t| !t.is_empty())
    }

    /// Checks that the forward and reverse maps agree and that every target
    /// has exactly one scope entry.
    pub fn is_consistent(&self) -> bool {
        let forward_ok = self.targets.iter().all(|(id, targets)| {
            targets.iter().all(|t| self.owners.get(t) == Some(id))
                && self.scopes.get(id).map_or(0, BTreeMap::len) == targets.len()
        });
        let reverse_ok = self
            .owners
            .iter()
            .all(|(t, id)| self.targets.get(id).is_some_and(|targets| targets.contains(t)));
        forward_ok && reverse_ok
    }
}
