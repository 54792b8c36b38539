/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The breakpoint installation manager.
//!
//! Owns the mapping between platform breakpoints and the target breakpoints
//! installed for them in every tracked context, and pushes platform-side
//! edits down to the backend through the [`BreakpointGateway`].

mod convert;
mod tracking;

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::future;
use parking_lot::Mutex;

pub use self::convert::convert_to_target;
pub use self::convert::effective_enabled;
pub use self::convert::extract_threads;
pub use self::tracking::TrackingState;
use crate::attrs::AttrKey;
use crate::attrs::Attributes;
use crate::attrs::Delta;
use crate::breakpoint::BreakpointKind;
use crate::context::TargetBreakpointRef;
use crate::context::TargetContext;
use crate::context::ThreadScope;
use crate::error::Error;
use crate::gateway::BreakpointGateway;
use crate::gateway::TargetDelta;
use crate::platform::PlatformBreakpointId;
use crate::platform::PlatformModel;
use crate::platform::Problem;
use crate::platform::SourceLookup;
use crate::platform::ThreadFilter;

/// Target breakpoint created for one thread scope by an install pass.
struct Installed {
    scope: ThreadScope,
    target: TargetBreakpointRef,
    pending: bool,
}

struct Inner {
    gateway: BreakpointGateway,
    model: Arc<dyn PlatformModel>,
    lookup: Arc<dyn SourceLookup>,
    tracking: Mutex<HashMap<TargetContext, TrackingState>>,
    /// Breakpoints with a change being applied. The flag records whether
    /// another change arrived in the meantime.
    in_flight: Mutex<HashMap<PlatformBreakpointId, bool>>,
    manager_enabled: AtomicBool,
}

/// Handle to the installation manager. Cloning is cheap.
#[derive(Clone)]
pub struct InstallationManager {
    inner: Arc<Inner>,
}

/// Attribute snapshot of a platform breakpoint as seen from `context`.
pub fn snapshot(context: TargetContext, attrs: &Attributes, filter: Option<&ThreadFilter>) -> Attributes {
    let mut snapshot = attrs.clone();
    snapshot.remove(AttrKey::ResolvedPath);
    snapshot.insert(AttrKey::ThreadScopes, extract_threads(context, filter));
    snapshot
}

impl InstallationManager {
    pub fn new(
        gateway: BreakpointGateway,
        model: Arc<dyn PlatformModel>,
        lookup: Arc<dyn SourceLookup>,
    ) -> Self {
        InstallationManager {
            inner: Arc::new(Inner {
                gateway,
                model,
                lookup,
                tracking: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                manager_enabled: AtomicBool::new(true),
            }),
        }
    }

    pub fn gateway(&self) -> &BreakpointGateway {
        &self.inner.gateway
    }

    pub fn model(&self) -> &Arc<dyn PlatformModel> {
        &self.inner.model
    }

    pub fn manager_enabled(&self) -> bool {
        self.inner.manager_enabled.load(Ordering::SeqCst)
    }

    pub fn is_tracking(&self, context: TargetContext) -> bool {
        self.inner.tracking.lock().contains_key(&context)
    }

    pub fn tracked_contexts(&self) -> Vec<TargetContext> {
        let mut contexts: Vec<_> = self.inner.tracking.lock().keys().copied().collect();
        contexts.sort();
        contexts
    }

    /// Runs `f` on the tracking tables of `context`.
    pub fn inspect<R>(&self, context: TargetContext, f: impl FnOnce(&TrackingState) -> R) -> Option<R> {
        self.inner.tracking.lock().get(&context).map(f)
    }

    fn current_snapshot(&self, context: TargetContext, id: PlatformBreakpointId) -> Option<Attributes> {
        let attrs = self.inner.model.attributes(id)?;
        let filter = self.inner.model.thread_filter(id);
        Some(snapshot(context, &attrs, filter.as_ref()))
    }

    /// Caches the attributes of a breakpoint not yet tracked in `context`.
    /// Returns false if the context is untracked or already knows `id`.
    fn track_new(&self, context: TargetContext, id: PlatformBreakpointId, attrs: Attributes) -> bool {
        let mut tracking = self.inner.tracking.lock();
        match tracking.get_mut(&context) {
            Some(state) if !state.attributes.contains_key(&id) => {
                state.attributes.insert(id, attrs);
                true
            }
            _ => false,
        }
    }

    fn cache_attributes(&self, context: TargetContext, id: PlatformBreakpointId, attrs: Attributes) {
        if let Some(state) = self.inner.tracking.lock().get_mut(&context) {
            state.attributes.insert(id, attrs);
        }
    }

    fn is_pending(&self, target: &TargetBreakpointRef) -> bool {
        self.inner
            .gateway
            .get_data(target)
            .map(|data| data.pending)
            .unwrap_or(false)
    }

    /// Starts tracking `context` and installs every platform breakpoint in
    /// it. Breakpoints are installed even when disabled so that the backend
    /// tells whether their location exists in this context. Starting a
    /// context that is already tracked does nothing.
    pub async fn start_tracking(&self, context: TargetContext) -> Result<(), Error> {
        {
            let mut tracking = self.inner.tracking.lock();
            if tracking.contains_key(&context) {
                tracing::debug!(%context, "context already tracked");
                return Ok(());
            }
            tracking.insert(context, TrackingState::default());
        }
        tracing::debug!(%context, "start tracking");

        let mut installs = Vec::new();
        for id in self.inner.model.breakpoints() {
            if let Some(attrs) = self.current_snapshot(context, id) {
                if self.track_new(context, id, attrs) {
                    installs.push(self.install(context, id));
                }
            }
        }
        let failed = future::join_all(installs)
            .await
            .into_iter()
            .filter(Result::is_err)
            .count();
        if failed > 0 {
            tracing::debug!(%context, failed, "some breakpoints could not be installed");
        }
        Ok(())
    }

    /// Uninstalls every breakpoint tracked for `context`, then drops its
    /// tables. Failures do not stop the other uninstalls; the first one is
    /// returned after the tables are gone.
    pub async fn stop_tracking(&self, context: TargetContext) -> Result<(), Error> {
        let ids: Vec<PlatformBreakpointId> = match self.inner.tracking.lock().get(&context) {
            Some(state) => state.attributes.keys().copied().collect(),
            None => return Ok(()),
        };
        tracing::debug!(%context, breakpoints = ids.len(), "stop tracking");

        let results =
            future::join_all(ids.iter().map(|id| self.uninstall(context, *id, true))).await;
        self.inner.tracking.lock().remove(&context);
        results
            .into_iter()
            .filter_map(Result::err)
            .find(|err| !err.is_moot())
            .map_or(Ok(()), Err)
    }

    /// Installs the cached breakpoint `id` for each of its thread scopes
    /// that has no target breakpoint yet. Succeeds if at least one scope
    /// was installed; failed scopes are reported as problems.
    async fn install(&self, context: TargetContext, id: PlatformBreakpointId) -> Result<(), Error> {
        let (mut attrs, installed) = {
            let tracking = self.inner.tracking.lock();
            let state = tracking
                .get(&context)
                .ok_or(Error::InvalidContext(context))?;
            let Some(attrs) = state.attributes.get(&id).cloned() else {
                return Ok(());
            };
            let installed: BTreeSet<ThreadScope> = state
                .scopes
                .get(&id)
                .map(|scopes| scopes.keys().copied().collect())
                .unwrap_or_default();
            (attrs, installed)
        };
        let kind = attrs.kind().ok_or(Error::UnknownBreakpointKind(None))?;
        let scopes: BTreeSet<ThreadScope> = attrs
            .thread_scopes()
            .difference(&installed)
            .copied()
            .collect();
        if scopes.is_empty() {
            return Ok(());
        }

        self.resolve_path(context, id, kind, &mut attrs).await?;
        let (installed, failures) = self.insert_scopes(context, kind, &attrs, &scopes).await;
        let succeeded = !installed.is_empty();

        let mut orphans = Vec::new();
        let mut increments = 0;
        {
            let mut tracking = self.inner.tracking.lock();
            match tracking
                .get_mut(&context)
                .filter(|state| state.attributes.contains_key(&id))
            {
                Some(state) => {
                    if let (Some(cached), Some(path)) = (
                        state.attributes.get_mut(&id),
                        attrs.text(AttrKey::ResolvedPath),
                    ) {
                        cached.insert(AttrKey::ResolvedPath, path);
                    }
                    for Installed {
                        scope,
                        target,
                        pending,
                    } in installed
                    {
                        if state.record(id, scope, target.clone()) {
                            if !pending {
                                increments += 1;
                            }
                        } else {
                            tracing::debug!(%context, breakpoint = %id, %target, "target already owned");
                        }
                    }
                }
                // Stopped tracking or removed while the inserts were out.
                None => orphans.extend(installed.into_iter().map(|i| i.target)),
            }
        }
        for _ in 0..increments {
            self.inner.model.increment_install_count(id);
        }
        for orphan in orphans {
            tracing::debug!(%context, breakpoint = %id, target = %orphan, "removing orphaned target");
            if let Err(err) = self.inner.gateway.remove(&orphan).await {
                tracing::debug!(%context, target = %orphan, "failed to remove orphaned target: {}", err);
            }
        }

        self.report(context, id, &failures);
        match failures.into_iter().next() {
            Some(err) if !succeeded => Err(err),
            _ => Ok(()),
        }
    }

    /// Inserts one target breakpoint per scope, concurrently.
    async fn insert_scopes(
        &self,
        context: TargetContext,
        kind: BreakpointKind,
        attrs: &Attributes,
        scopes: &BTreeSet<ThreadScope>,
    ) -> (Vec<Installed>, Vec<Error>) {
        let manager_enabled = self.manager_enabled();
        let gateway = &self.inner.gateway;
        let inserts = scopes.iter().map(|scope| {
            let target_attrs = convert_to_target(kind, attrs, *scope, manager_enabled);
            async move { (*scope, gateway.insert(context, &target_attrs).await) }
        });

        let mut installed = Vec::new();
        let mut failures = Vec::new();
        for (scope, result) in future::join_all(inserts).await {
            match result {
                Ok(target) => {
                    let pending = self.is_pending(&target);
                    tracing::debug!(%context, %target, %scope, pending, "installed");
                    installed.push(Installed {
                        scope,
                        target,
                        pending,
                    });
                }
                Err(err) => {
                    if !err.is_moot() {
                        tracing::warn!(%context, %scope, ?kind, "failed to install breakpoint: {}", err);
                    }
                    failures.push(err);
                }
            }
        }
        (installed, failures)
    }

    /// Resolves the debugger-visible path of a source breakpoint into
    /// `attrs` unless it is already known.
    async fn resolve_path(
        &self,
        context: TargetContext,
        id: PlatformBreakpointId,
        kind: BreakpointKind,
        attrs: &mut Attributes,
    ) -> Result<(), Error> {
        if !kind.has_source_path() || attrs.non_empty_text(AttrKey::ResolvedPath).is_some() {
            return Ok(());
        }
        let Some(file) = attrs.non_empty_text(AttrKey::FileName).map(str::to_owned) else {
            return Ok(());
        };
        match self.inner.lookup.resolve_debugger_path(context, &file).await {
            Ok(path) => {
                attrs.insert(AttrKey::ResolvedPath, path);
                Ok(())
            }
            Err(err) => {
                tracing::warn!(%context, breakpoint = %id, %file, "failed to resolve path: {}", err);
                let err = match err {
                    Error::PathUnresolved(_) => err,
                    _ => Error::PathUnresolved(file),
                };
                self.report(context, id, std::slice::from_ref(&err));
                Err(err)
            }
        }
    }

    /// Replaces the problems of `id` in `context` with `failures`.
    fn report(&self, context: TargetContext, id: PlatformBreakpointId, failures: &[Error]) {
        self.inner.model.clear_problems(id, context);
        for err in failures.iter().filter(|err| !err.is_moot()) {
            self.inner
                .model
                .add_problem(id, Problem::error(context, err.problem_message()));
        }
    }

    /// Deletes a target breakpoint. Returns whether it counted as installed
    /// along with the result of the delete.
    async fn delete_target(&self, target: &TargetBreakpointRef) -> (bool, Result<(), Error>) {
        let counted = !self.is_pending(target);
        (counted, self.inner.gateway.remove(target).await)
    }

    /// Removes every target breakpoint of `id` in `context`. With `evict`
    /// the breakpoint is forgotten entirely, otherwise its attributes stay
    /// cached (it is merely filtered out of the context).
    async fn uninstall(
        &self,
        context: TargetContext,
        id: PlatformBreakpointId,
        evict: bool,
    ) -> Result<(), Error> {
        let targets = {
            let mut tracking = self.inner.tracking.lock();
            let state = tracking
                .get_mut(&context)
                .ok_or(Error::InvalidContext(context))?;
            // Thread associations go first so no later pass mistakes the
            // breakpoint for one that still needs these scopes.
            state.scopes.remove(&id);
            state.targets_of(id)
        };
        self.inner.model.clear_problems(id, context);

        let results = future::join_all(targets.iter().map(|t| self.delete_target(t))).await;
        let mut first_err = None;
        for (target, (counted, result)) in targets.iter().zip(results) {
            if counted {
                self.inner.model.decrement_install_count(id);
            }
            match result {
                Ok(()) => tracing::debug!(%context, breakpoint = %id, %target, "uninstalled"),
                Err(err) if err.is_moot() => {}
                Err(err) => {
                    tracing::warn!(%context, breakpoint = %id, %target, "failed to delete target breakpoint: {}", err);
                    first_err.get_or_insert(err);
                }
            }
        }

        if let Some(state) = self.inner.tracking.lock().get_mut(&context) {
            for target in &targets {
                state.forget(target);
            }
            if evict {
                state.attributes.remove(&id);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Brings the installation of `id` in `context` in line with `new`.
    async fn modify(
        &self,
        context: TargetContext,
        id: PlatformBreakpointId,
        mut new: Attributes,
    ) -> Result<(), Error> {
        let (old, installed) = {
            let tracking = self.inner.tracking.lock();
            let state = tracking
                .get(&context)
                .ok_or(Error::InvalidContext(context))?;
            (state.attributes.get(&id).cloned(), state.is_installed(id))
        };
        let Some(old) = old else {
            self.cache_attributes(context, id, new);
            return self.install(context, id).await;
        };
        if old.non_empty_text(AttrKey::FileName) == new.non_empty_text(AttrKey::FileName) {
            if let Some(path) = old.text(AttrKey::ResolvedPath) {
                new.insert(AttrKey::ResolvedPath, path);
            }
        }
        let filtered_out = new.thread_scopes().is_empty();

        if !installed {
            self.cache_attributes(context, id, new);
            if filtered_out {
                return Ok(());
            }
            return self.install(context, id).await;
        }
        if filtered_out {
            tracing::debug!(%context, breakpoint = %id, "filtered out of context");
            let result = self.uninstall(context, id, false).await;
            self.cache_attributes(context, id, new);
            return result;
        }

        let delta = Delta::between(&old, &new);
        if delta.is_empty() {
            return Ok(());
        }
        tracing::debug!(
            %context,
            breakpoint = %id,
            keys = ?delta.keys().collect::<Vec<_>>(),
            critical = delta.is_critical(),
            "breakpoint changed"
        );
        if delta.is_critical() {
            self.reinstall(context, id, new).await
        } else {
            self.patch(context, id, &old, new, &delta).await
        }
    }

    /// Installs a new set of target breakpoints for `new` and only then
    /// deletes the old set. When nothing of the new set could be installed
    /// the old set and the old attributes stay in place.
    async fn reinstall(
        &self,
        context: TargetContext,
        id: PlatformBreakpointId,
        mut new: Attributes,
    ) -> Result<(), Error> {
        let kind = new.kind().ok_or(Error::UnknownBreakpointKind(None))?;
        self.resolve_path(context, id, kind, &mut new).await?;
        let scopes = new.thread_scopes();
        let (installed, failures) = self.insert_scopes(context, kind, &new, &scopes).await;

        if installed.is_empty() {
            tracing::debug!(%context, breakpoint = %id, "reinstall failed, keeping previous installation");
            self.report(context, id, &failures);
            return Err(failures.into_iter().next().unwrap_or_else(|| {
                Error::InsertionFailed(String::from("no target breakpoint was installed"))
            }));
        }

        let mut old_targets = Vec::new();
        let mut orphans = Vec::new();
        let mut increments = 0;
        {
            let mut tracking = self.inner.tracking.lock();
            match tracking
                .get_mut(&context)
                .filter(|state| state.attributes.contains_key(&id))
            {
                Some(state) => {
                    old_targets = state.take_targets(id);
                    state.attributes.insert(id, new);
                    for Installed {
                        scope,
                        target,
                        pending,
                    } in installed
                    {
                        if state.record(id, scope, target) && !pending {
                            increments += 1;
                        }
                    }
                }
                None => orphans.extend(installed.into_iter().map(|i| i.target)),
            }
        }
        for _ in 0..increments {
            self.inner.model.increment_install_count(id);
        }

        let results = future::join_all(old_targets.iter().map(|t| self.delete_target(t))).await;
        for (target, (counted, result)) in old_targets.iter().zip(results) {
            if counted {
                self.inner.model.decrement_install_count(id);
            }
            if let Err(err) = result {
                if !err.is_moot() {
                    tracing::warn!(%context, breakpoint = %id, %target, "failed to delete replaced target breakpoint: {}", err);
                }
            }
        }
        for orphan in orphans {
            if let Err(err) = self.inner.gateway.remove(&orphan).await {
                tracing::debug!(%context, target = %orphan, "failed to remove orphaned target: {}", err);
            }
        }

        self.report(context, id, &failures);
        Ok(())
    }

    /// Applies a non-critical change to every target breakpoint of `id`.
    /// On failure the platform breakpoint's changed attributes are rolled
    /// back, with the condition reset to empty.
    async fn patch(
        &self,
        context: TargetContext,
        id: PlatformBreakpointId,
        old: &Attributes,
        new: Attributes,
        delta: &Delta,
    ) -> Result<(), Error> {
        let kind = new.kind().ok_or(Error::UnknownBreakpointKind(None))?;
        let mut update = TargetDelta::default();
        if delta.contains(AttrKey::Condition) {
            update.condition = Some(new.condition().to_owned());
        }
        if delta.contains(AttrKey::IgnoreCount) {
            update.ignore_count = Some(new.ignore_count());
        }
        if delta.contains(AttrKey::Enabled) {
            update.enabled = Some(effective_enabled(kind, &new, self.manager_enabled()));
        }

        let targets = {
            let mut tracking = self.inner.tracking.lock();
            let state = tracking
                .get_mut(&context)
                .ok_or(Error::InvalidContext(context))?;
            state.attributes.insert(id, new);
            state.targets_of(id)
        };
        if update.is_empty() {
            return Ok(());
        }

        let gateway = &self.inner.gateway;
        let results = future::join_all(targets.iter().map(|t| gateway.update(t, &update))).await;
        let failure = results
            .into_iter()
            .filter_map(Result::err)
            .find(|err| !err.is_moot());
        let Some(err) = failure else {
            self.inner.model.clear_problems(id, context);
            return Ok(());
        };

        tracing::debug!(%context, breakpoint = %id, "patch failed, rolling back: {}", err);
        let mut restore = Delta::new();
        let mut cached = old.clone();
        for key in delta.keys() {
            if key == AttrKey::Condition {
                restore.set(key, "");
                cached.insert(key, "");
                continue;
            }
            match old.get(key) {
                Some(value) => restore.set(key, value.clone()),
                None => restore.clear(key),
            }
        }
        self.inner.model.update_attributes(id, &restore);
        self.cache_attributes(context, id, cached);
        self.report(context, id, std::slice::from_ref(&err));
        Err(err)
    }

    /// Installs a new platform breakpoint in every tracked context.
    pub async fn breakpoint_added(&self, id: PlatformBreakpointId) {
        let installs = self.tracked_contexts().into_iter().filter_map(|context| {
            let attrs = self.current_snapshot(context, id)?;
            self.track_new(context, id, attrs)
                .then(|| async move { (context, self.install(context, id).await) })
        });
        for (context, result) in future::join_all(installs).await {
            if let Err(err) = result {
                tracing::debug!(%context, breakpoint = %id, "install failed: {}", err);
            }
        }
    }

    /// Applies the current attributes of a platform breakpoint in every
    /// tracked context.
    ///
    /// Changes to the same breakpoint never overlap: a change arriving while
    /// one is being applied is deferred, and once the running one finishes
    /// the breakpoint is processed once more with whatever attributes it
    /// has by then.
    pub async fn breakpoint_changed(&self, id: PlatformBreakpointId) {
        {
            let mut in_flight = self.inner.in_flight.lock();
            if let Some(queued) = in_flight.get_mut(&id) {
                tracing::debug!(breakpoint = %id, "change deferred");
                *queued = true;
                return;
            }
            in_flight.insert(id, false);
        }
        loop {
            self.apply_change(id).await;
            let mut in_flight = self.inner.in_flight.lock();
            match in_flight.get_mut(&id) {
                Some(queued) if *queued => *queued = false,
                _ => {
                    in_flight.remove(&id);
                    break;
                }
            }
        }
    }

    async fn apply_change(&self, id: PlatformBreakpointId) {
        let modifications = self.tracked_contexts().into_iter().filter_map(|context| {
            let new = self.current_snapshot(context, id)?;
            Some(async move { (context, self.modify(context, id, new).await) })
        });
        for (context, result) in future::join_all(modifications).await {
            match result {
                Ok(()) => {}
                Err(err) if err.is_moot() => {}
                Err(err) => tracing::debug!(%context, breakpoint = %id, "change not applied: {}", err),
            }
        }
    }

    /// Uninstalls a platform breakpoint from every tracked context.
    pub async fn breakpoint_removed(&self, id: PlatformBreakpointId) {
        let contexts: Vec<TargetContext> = self
            .inner
            .tracking
            .lock()
            .iter()
            .filter(|(_, state)| state.attributes.contains_key(&id))
            .map(|(context, _)| *context)
            .collect();
        let results =
            future::join_all(contexts.iter().map(|context| self.uninstall(*context, id, true)))
                .await;
        for (context, result) in contexts.iter().zip(results) {
            if let Err(err) = result {
                tracing::debug!(%context, breakpoint = %id, "uninstall failed: {}", err);
            }
        }
    }

    /// Pushes the manager-wide enabled state to every installed target
    /// breakpoint. Tracepoints and dynamic printf are not affected.
    pub async fn manager_enablement_changed(&self, enabled: bool) {
        if self.inner.manager_enabled.swap(enabled, Ordering::SeqCst) == enabled {
            return;
        }
        tracing::debug!(enabled, "breakpoint manager enablement changed");

        let mut work = Vec::new();
        for state in self.inner.tracking.lock().values() {
            for (id, targets) in &state.targets {
                let Some(attrs) = state.attributes.get(id) else {
                    continue;
                };
                let Some(kind) = attrs.kind() else {
                    continue;
                };
                if kind.ignores_manager_enablement() {
                    continue;
                }
                let target_enabled = effective_enabled(kind, attrs, enabled);
                work.extend(targets.iter().map(|t| (t.clone(), target_enabled)));
            }
        }

        let gateway = &self.inner.gateway;
        let updates = work.into_iter().map(|(target, enabled)| async move {
            let update = TargetDelta {
                enabled: Some(enabled),
                ..Default::default()
            };
            let result = gateway.update(&target, &update).await;
            (target, result)
        });
        for (target, result) in future::join_all(updates).await {
            if let Err(err) = result {
                if !err.is_moot() {
                    tracing::warn!(%target, "failed to apply manager enablement: {}", err);
                }
            }
        }
    }

    fn release(&self, context: TargetContext, state: TrackingState) {
        for (id, targets) in state.targets {
            for target in targets {
                if !self.is_pending(&target) {
                    self.inner.model.decrement_install_count(id);
                }
            }
        }
        tracing::debug!(%context, "released tracking state");
    }

    /// The backend session is gone: drops all tracking state and install
    /// counts without sending anything to the backend.
    pub fn session_terminated(&self) {
        let states = std::mem::take(&mut *self.inner.tracking.lock());
        for (context, state) in states {
            self.release(context, state);
        }
        self.inner.in_flight.lock().clear();
        self.inner.gateway.forget_all();
    }

    /// Like [`InstallationManager::session_terminated`], for a single
    /// context that exited.
    pub fn context_exited(&self, context: TargetContext) {
        let state = self.inner.tracking.lock().remove(&context);
        if let Some(state) = state {
            self.release(context, state);
        }
        self.inner.gateway.forget_context(context);
    }

    /// Platform breakpoint that owns `target`.
    pub fn owner(&self, target: &TargetBreakpointRef) -> Option<PlatformBreakpointId> {
        self.inner
            .tracking
            .lock()
            .get(&target.context)?
            .owners
            .get(target)
            .copied()
    }

    /// Every target breakpoint owned by some platform breakpoint.
    pub fn known_targets(&self, context: TargetContext) -> Vec<TargetBreakpointRef> {
        self.inner
            .tracking
            .lock()
            .get(&context)
            .map(|state| state.owners.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn targets_of(&self, context: TargetContext, id: PlatformBreakpointId) -> Vec<TargetBreakpointRef> {
        self.inspect(context, |state| state.targets_of(id))
            .unwrap_or_default()
    }

    pub fn installed_scopes(&self, context: TargetContext, id: PlatformBreakpointId) -> BTreeSet<ThreadScope> {
        self.inspect(context, |state| {
            state
                .scopes
                .get(&id)
                .map(|scopes| scopes.keys().copied().collect())
                .unwrap_or_default()
        })
        .unwrap_or_default()
    }

    pub fn cached_attributes(&self, context: TargetContext, id: PlatformBreakpointId) -> Option<Attributes> {
        self.inspect(context, |state| state.attributes.get(&id).cloned())
            .flatten()
    }

    /// Records a target breakpoint that came into existence without this
    /// manager inserting it, as if an install had just completed.
    pub fn target_installed(
        &self,
        context: TargetContext,
        id: PlatformBreakpointId,
        target: TargetBreakpointRef,
        scope: ThreadScope,
    ) -> bool {
        let pending = self.is_pending(&target);
        let attrs = self.current_snapshot(context, id);
        let recorded = {
            let mut tracking = self.inner.tracking.lock();
            let Some(state) = tracking.get_mut(&context) else {
                return false;
            };
            if let Some(attrs) = attrs {
                state.attributes.entry(id).or_insert(attrs);
            }
            state.record(id, scope, target.clone())
        };
        if recorded {
            tracing::debug!(%context, breakpoint = %id, %target, %scope, "adopted target breakpoint");
            if !pending {
                self.inner.model.increment_install_count(id);
            }
            self.inner.model.clear_problems(id, context);
        }
        recorded
    }

    /// Adjusts the install count after a target breakpoint of `id` changed
    /// between pending and resolved.
    pub fn pending_changed(&self, id: PlatformBreakpointId, was_pending: bool, is_pending: bool) {
        match (was_pending, is_pending) {
            (true, false) => self.inner.model.increment_install_count(id),
            (false, true) => self.inner.model.decrement_install_count(id),
            _ => {}
        }
    }

    /// Folds changes pulled up from the backend into the cached attributes,
    /// so they are not mistaken for user edits later.
    pub fn refresh_cached(&self, context: TargetContext, id: PlatformBreakpointId, changes: &Delta) {
        if let Some(attrs) = self
            .inner
            .tracking
            .lock()
            .get_mut(&context)
            .and_then(|state| state.attributes.get_mut(&id))
        {
            attrs.apply(changes);
        }
    }
}
