/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Reconciliation of breakpoint changes that originate in the backend.
//!
//! Notifications are processed strictly one at a time by a single worker
//! task. A notification is fully reconciled, including every backend round
//! trip it needs, before the next one is looked at.

mod actions;

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub use self::actions::normalize_commands;
pub use self::actions::same_commands;
use crate::attrs::AttrKey;
use crate::attrs::Delta;
use crate::backend::BreakpointNotification;
use crate::breakpoint::BreakpointKind;
use crate::breakpoint::TargetBreakpointData;
use crate::context::ExecutionContext;
use crate::context::TargetBreakpointRef;
use crate::context::TargetContext;
use crate::context::ThreadScope;
use crate::error::Error;
use crate::gateway::TargetDelta;
use crate::identity;
use crate::installer::extract_threads;
use crate::installer::InstallationManager;
use crate::platform::ContextRegistry;
use crate::platform::PlatformBreakpointId;
use crate::platform::SourceLookup;
use crate::platform::ThreadFilter;

/// Messages understood by the sync worker.
#[derive(Debug)]
pub enum Inbox {
    Notification(BreakpointNotification),
    /// Tracking of a context started; parked modifications may now have an
    /// owner.
    ContextStarted(TargetContext),
    ContextExited(TargetContext),
    /// Answered once everything queued before it was processed.
    Barrier(oneshot::Sender<()>),
}

/// Sending half of the sync worker's inbox.
#[derive(Clone, Debug)]
pub struct SyncHandle {
    tx: mpsc::Sender<Inbox>,
}

impl SyncHandle {
    async fn send(&self, message: Inbox) -> Result<(), Error> {
        self.tx
            .send(message)
            .await
            .map_err(|_| Error::SessionTerminated)
    }

    /// Queues a backend notification.
    pub async fn submit(&self, notification: BreakpointNotification) -> Result<(), Error> {
        self.send(Inbox::Notification(notification)).await
    }

    pub async fn context_started(&self, context: TargetContext) -> Result<(), Error> {
        self.send(Inbox::ContextStarted(context)).await
    }

    pub async fn context_exited(&self, context: TargetContext) -> Result<(), Error> {
        self.send(Inbox::ContextExited(context)).await
    }

    /// Waits until every message queued so far has been processed.
    pub async fn flush(&self) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        self.send(Inbox::Barrier(tx)).await?;
        rx.await.map_err(|_| Error::ReplyDropped)
    }
}

/// Diffs a full backend listing against what is known about `context`.
///
/// Unknown breakpoints become `Created`, known ones whose backend state
/// differs from `cached` become `Modified`, and known ones missing from the
/// listing become `Deleted`. Unknown catchpoints are left alone.
pub fn synthesize(
    context: TargetContext,
    known: &BTreeSet<String>,
    cached: &BTreeMap<String, TargetBreakpointData>,
    breakpoints: Vec<TargetBreakpointData>,
) -> Vec<BreakpointNotification> {
    let listed: BTreeSet<String> = breakpoints.iter().map(|bp| bp.number.clone()).collect();
    let mut records = Vec::new();
    for data in breakpoints {
        if !known.contains(&data.number) {
            if !data.kind.is_catchpoint() {
                records.push(BreakpointNotification::Created {
                    context: Some(context),
                    data,
                });
            }
        } else if cached.get(&data.number) != Some(&data) {
            records.push(BreakpointNotification::Modified {
                context: Some(context),
                data,
            });
        }
    }
    for number in known.difference(&listed) {
        records.push(BreakpointNotification::Deleted {
            context: Some(context),
            number: number.clone(),
        });
    }
    records
}

/// Thread group of a backend breakpoint as a number, e.g. `i2` is 2.
fn group_of(data: &TargetBreakpointData, context: TargetContext) -> u32 {
    data.groups
        .iter()
        .find_map(|group| group.trim_start_matches('i').parse().ok())
        .unwrap_or_else(|| context.id())
}

pub struct SyncEngine {
    installer: InstallationManager,
    lookup: Arc<dyn SourceLookup>,
    contexts: Arc<dyn ContextRegistry>,
    /// Records synthesized by a resynchronization, processed before
    /// anything else.
    front: VecDeque<BreakpointNotification>,
    /// Modifications of breakpoints that have no platform owner yet.
    parked: HashMap<TargetContext, HashMap<String, TargetBreakpointData>>,
}

impl SyncEngine {
    pub fn new(
        installer: InstallationManager,
        lookup: Arc<dyn SourceLookup>,
        contexts: Arc<dyn ContextRegistry>,
    ) -> Self {
        SyncEngine {
            installer,
            lookup,
            contexts,
            front: VecDeque::new(),
            parked: HashMap::new(),
        }
    }

    pub fn channel(depth: usize) -> (SyncHandle, mpsc::Receiver<Inbox>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (SyncHandle { tx }, rx)
    }

    /// Spawns the worker that drains `rx` until every handle is dropped.
    pub fn spawn(self, rx: mpsc::Receiver<Inbox>) -> JoinHandle<()> {
        tokio::spawn(self.run(rx))
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<Inbox>) {
        while let Some(message) = rx.recv().await {
            match message {
                Inbox::Notification(notification) => self.handle(notification).await,
                Inbox::ContextStarted(context) => self.replay_parked(context).await,
                Inbox::ContextExited(context) => self.context_exited(context),
                Inbox::Barrier(done) => {
                    let _ = done.send(());
                }
            }
        }
        tracing::debug!("sync worker exiting");
    }

    /// Processes one notification and everything it synthesized.
    pub async fn handle(&mut self, notification: BreakpointNotification) {
        self.process(notification).await;
        while let Some(record) = self.front.pop_front() {
            self.process(record).await;
        }
    }

    async fn process(&mut self, notification: BreakpointNotification) {
        let name = notification.name();
        tracing::trace!(notification = name, "processing backend notification");
        let result = match notification {
            BreakpointNotification::Created { context, data } => self.created(context, data).await,
            BreakpointNotification::Modified { context, data } => self.modified(context, data).await,
            BreakpointNotification::Deleted { context, number } => {
                self.deleted(context, number).await
            }
            BreakpointNotification::Resynchronize {
                context,
                breakpoints,
            } => self.resynchronize(context, breakpoints).await,
        };
        if let Err(err) = result {
            if !err.is_moot() {
                tracing::warn!(notification = name, "failed to reconcile backend notification: {}", err);
            }
        }
    }

    /// Determines the context a notification belongs to: the explicit one,
    /// else the one owning one of the breakpoint's thread groups, else the
    /// only context there is.
    fn resolve_context(
        &self,
        context: Option<TargetContext>,
        data: Option<&TargetBreakpointData>,
        number: &str,
    ) -> Result<TargetContext, Error> {
        if let Some(context) = context {
            return Ok(context);
        }
        if let Some(context) = data
            .into_iter()
            .flat_map(|data| data.groups.iter())
            .find_map(|group| self.contexts.context_for_group(group))
        {
            return Ok(context);
        }
        match self.contexts.contexts().as_slice() {
            [only] => Ok(*only),
            _ => Err(Error::Backend(format!(
                "cannot determine target context of breakpoint {}",
                number
            ))),
        }
    }

    async fn resynchronize(
        &mut self,
        context: Option<TargetContext>,
        breakpoints: Vec<TargetBreakpointData>,
    ) -> Result<(), Error> {
        let context = self.resolve_context(context, breakpoints.first(), "*")?;
        let gateway = self.installer.gateway().clone();

        // Breakpoints whose earlier delete failed and that are still listed
        // get another delete. Unlisted ones turn into `Deleted` below.
        let mut retried = BTreeSet::new();
        for target in gateway.undeleted(context) {
            if !breakpoints.iter().any(|data| data.number == target.number) {
                continue;
            }
            match gateway.remove(&target).await {
                Ok(()) => {
                    tracing::debug!(%target, "deleted leftover breakpoint");
                    retried.insert(target.number);
                }
                Err(err) => {
                    tracing::debug!(%target, "leftover breakpoint still not deleted: {}", err);
                }
            }
        }
        let breakpoints: Vec<_> = breakpoints
            .into_iter()
            .filter(|data| !retried.contains(&data.number))
            .collect();
        let cached: BTreeMap<String, TargetBreakpointData> = gateway
            .cached(context)
            .into_iter()
            .map(|data| (data.number.clone(), data))
            .collect();
        let known: BTreeSet<String> = self
            .installer
            .known_targets(context)
            .into_iter()
            .map(|target| target.number)
            .chain(cached.keys().cloned())
            .collect();

        let records = synthesize(context, &known, &cached, breakpoints);
        tracing::debug!(%context, records = records.len(), "resynchronized");
        for record in records.into_iter().rev() {
            self.front.push_front(record);
        }
        Ok(())
    }

    /// Platform breakpoint matching `data` that has no target breakpoint
    /// for the scope of `data` yet.
    fn find_match(
        &self,
        context: TargetContext,
        data: &TargetBreakpointData,
        local_file: Option<&str>,
    ) -> Option<(PlatformBreakpointId, ThreadScope)> {
        let model = self.installer.model();
        let scope = data.thread;
        model.breakpoints().into_iter().find_map(|id| {
            let attrs = model.attributes(id)?;
            if !identity::matches(&attrs, data, local_file) {
                return None;
            }
            let scopes = extract_threads(context, model.thread_filter(id).as_ref());
            if !scopes.contains(&scope) || self.installer.installed_scopes(context, id).contains(&scope) {
                return None;
            }
            Some((id, scope))
        })
    }

    async fn created(
        &mut self,
        context: Option<TargetContext>,
        data: TargetBreakpointData,
    ) -> Result<(), Error> {
        if data.kind.is_catchpoint() {
            return Ok(());
        }
        let context = self.resolve_context(context, Some(&data), &data.number)?;
        let target = TargetBreakpointRef::new(context, data.number.clone());
        if let Some(id) = self.installer.owner(&target) {
            return self.update_owned(context, id, data).await;
        }

        let gateway = self.installer.gateway().clone();
        gateway.cache_external(context, data.clone());
        let local_file = match data.file.as_deref() {
            Some(file) => self.lookup.resolve_local_file(context, file).await,
            None => None,
        };

        match self.find_match(context, &data, local_file.as_deref()) {
            Some((id, scope)) => {
                tracing::debug!(%context, %target, breakpoint = %id, "backend breakpoint matches platform breakpoint");
                if self.installer.is_tracking(context) && gateway.claim_external(&target) {
                    self.installer
                        .target_installed(context, id, target.clone(), scope);
                    self.suppress_if_manager_disabled(id, &target, &data).await;
                }
                self.apply_backend_state(context, id, None, &data).await;
            }
            None => {
                let kind = identity::infer_kind(&data);
                let attrs = identity::platform_attributes(kind, &data, local_file.as_deref());
                let filter = match data.thread {
                    ThreadScope::All => None,
                    ThreadScope::Thread(thread) => Some(ThreadFilter::from([
                        ExecutionContext::thread(context, group_of(&data, context), thread),
                    ])),
                };
                let id = self.installer.model().create_breakpoint(attrs, filter);
                tracing::debug!(%context, %target, breakpoint = %id, ?kind, "created platform breakpoint");
                if self.installer.is_tracking(context) {
                    // Installing adopts the externally created target.
                    self.installer.breakpoint_added(id).await;
                }
            }
        }

        let parked = self
            .parked
            .get_mut(&context)
            .and_then(|parked| parked.remove(&data.number));
        if let Some(parked) = parked {
            match self.installer.owner(&target) {
                Some(id) => self.update_owned(context, id, parked).await?,
                None => self.park(context, parked),
            }
        }
        Ok(())
    }

    /// A target claimed while the manager-wide switch is off must not stay
    /// enabled.
    async fn suppress_if_manager_disabled(
        &self,
        id: PlatformBreakpointId,
        target: &TargetBreakpointRef,
        data: &TargetBreakpointData,
    ) {
        if !data.enabled || self.installer.manager_enabled() {
            return;
        }
        let immune = self
            .installer
            .model()
            .attributes(id)
            .and_then(|attrs| attrs.kind())
            .is_some_and(|kind| kind.ignores_manager_enablement());
        if immune {
            return;
        }
        let delta = TargetDelta {
            enabled: Some(false),
            ..Default::default()
        };
        if let Err(err) = self.installer.gateway().update(target, &delta).await {
            tracing::debug!(%target, "failed to disable claimed breakpoint: {}", err);
        }
    }

    fn park(&mut self, context: TargetContext, data: TargetBreakpointData) {
        self.parked
            .entry(context)
            .or_default()
            .insert(data.number.clone(), data);
    }

    async fn replay_parked(&mut self, context: TargetContext) {
        let Some(parked) = self.parked.remove(&context) else {
            return;
        };
        for (number, data) in parked {
            let target = TargetBreakpointRef::new(context, number);
            match self.installer.owner(&target) {
                Some(id) => {
                    if let Err(err) = self.update_owned(context, id, data).await {
                        tracing::debug!(%target, "failed to replay modification: {}", err);
                    }
                }
                None => self.park(context, data),
            }
        }
    }

    async fn modified(
        &mut self,
        context: Option<TargetContext>,
        data: TargetBreakpointData,
    ) -> Result<(), Error> {
        if data.kind.is_catchpoint() {
            return Ok(());
        }
        let context = self.resolve_context(context, Some(&data), &data.number)?;
        let target = TargetBreakpointRef::new(context, data.number.clone());
        if let Some(id) = self.installer.owner(&target) {
            return self.update_owned(context, id, data).await;
        }
        if !self.installer.gateway().is_cached(&target) {
            tracing::debug!(%target, "modification of unknown breakpoint, treating as creation");
            return self.created(Some(context), data).await;
        }
        // The cached record stays as created so that adopting it compares
        // against what the platform breakpoint was matched with.
        tracing::debug!(%target, "parking modification until the breakpoint has an owner");
        self.park(context, data);
        Ok(())
    }

    async fn update_owned(
        &mut self,
        context: TargetContext,
        id: PlatformBreakpointId,
        data: TargetBreakpointData,
    ) -> Result<(), Error> {
        let previous = self.installer.gateway().store_data(context, data.clone());
        self.apply_backend_state(context, id, previous.as_ref(), &data)
            .await;
        Ok(())
    }

    /// Pulls the backend state of a target breakpoint up into its platform
    /// breakpoint.
    async fn apply_backend_state(
        &self,
        context: TargetContext,
        id: PlatformBreakpointId,
        previous: Option<&TargetBreakpointData>,
        data: &TargetBreakpointData,
    ) {
        let model = self.installer.model();
        let Some(attrs) = model.attributes(id) else {
            return;
        };
        let Some(kind) = attrs.kind() else {
            return;
        };

        let mut changes = Delta::new();
        // A target disabled by the manager-wide switch says nothing about
        // the platform breakpoint.
        let enablement_applies =
            self.installer.manager_enabled() || kind.ignores_manager_enablement();
        if enablement_applies && attrs.enabled() != data.enabled {
            changes.set(AttrKey::Enabled, data.enabled);
        }
        if attrs.condition().trim() != data.condition.trim() {
            if data.condition.trim().is_empty() {
                changes.clear(AttrKey::Condition);
            } else {
                changes.set(AttrKey::Condition, data.condition.trim());
            }
        }
        if attrs.ignore_count() != data.ignore_count {
            changes.set(AttrKey::IgnoreCount, data.ignore_count);
        }
        match kind {
            BreakpointKind::Tracepoint => {
                let pass_count = attrs
                    .int(AttrKey::PassCount)
                    .and_then(|n| u32::try_from(n).ok())
                    .unwrap_or(0);
                if pass_count != data.pass_count {
                    changes.set(AttrKey::PassCount, data.pass_count);
                }
                let commands = attrs.list(AttrKey::Commands).unwrap_or_default();
                if !same_commands(commands, &data.commands) {
                    changes.set(AttrKey::Commands, normalize_commands(&data.commands));
                }
            }
            BreakpointKind::DynamicPrintf => {
                if let Some(printf) = &data.printf {
                    if attrs.text(AttrKey::PrintfString) != Some(printf.as_str()) {
                        changes.set(AttrKey::PrintfString, printf.clone());
                    }
                }
            }
            BreakpointKind::Line
            | BreakpointKind::Function
            | BreakpointKind::Address
            | BreakpointKind::Watch
            | BreakpointKind::Catchpoint => {}
        }

        model.set_hit_count(id, data.hit_count);
        let target = TargetBreakpointRef::new(context, data.number.clone());
        if let Some(previous) = previous {
            if previous.pending != data.pending && self.installer.owner(&target).is_some() {
                tracing::debug!(%target, pending = data.pending, "pending state changed");
                self.installer
                    .pending_changed(id, previous.pending, data.pending);
            }
        }
        if changes.is_empty() {
            return;
        }

        tracing::debug!(
            %context,
            breakpoint = %id,
            keys = ?changes.keys().collect::<Vec<_>>(),
            "applying backend changes to platform breakpoint"
        );
        model.update_attributes(id, &changes);
        self.installer.refresh_cached(context, id, &changes);
        // Other contexts still run with the previous attributes.
        if self
            .installer
            .tracked_contexts()
            .iter()
            .any(|other| *other != context && self.installer.cached_attributes(*other, id).is_some())
        {
            self.installer.breakpoint_changed(id).await;
        }
    }

    async fn deleted(&mut self, context: Option<TargetContext>, number: String) -> Result<(), Error> {
        let context = match context {
            Some(context) => context,
            None => self
                .installer
                .tracked_contexts()
                .into_iter()
                .find(|context| {
                    self.installer
                        .gateway()
                        .is_cached(&TargetBreakpointRef::new(*context, number.clone()))
                })
                .map_or_else(|| self.resolve_context(None, None, &number), Ok)?,
        };
        let target = TargetBreakpointRef::new(context, number);
        let gateway = self.installer.gateway().clone();
        if gateway
            .get_data(&target)
            .is_ok_and(|data| data.kind.is_catchpoint())
        {
            return Ok(());
        }
        if let Some(parked) = self.parked.get_mut(&context) {
            parked.remove(&target.number);
        }
        gateway.mark_deleted_externally(&target);

        let Some(id) = self.installer.owner(&target) else {
            tracing::debug!(%target, "evicting unowned breakpoint deleted in backend");
            if let Err(err) = gateway.remove(&target).await {
                tracing::debug!(%target, "failed to evict deleted breakpoint: {}", err);
            }
            return Ok(());
        };

        let scope = self.installer.inspect(context, |state| {
            state.scopes.get(&id).and_then(|scopes| {
                scopes
                    .iter()
                    .find(|(_, t)| **t == target)
                    .map(|(scope, _)| *scope)
            })
        });
        let model = self.installer.model().clone();
        match (model.thread_filter(id), scope.flatten()) {
            (Some(mut filter), Some(ThreadScope::Thread(thread))) => {
                filter.retain(|ec| {
                    !(ec.context() == context && ec.scope() == ThreadScope::Thread(thread))
                });
                if filter.is_empty() {
                    tracing::debug!(%target, breakpoint = %id, "last filtered thread deleted, removing breakpoint");
                    self.installer.breakpoint_removed(id).await;
                    model.remove_breakpoint(id);
                } else {
                    tracing::debug!(%target, breakpoint = %id, thread, "narrowing thread filter");
                    model.set_thread_filter(id, Some(filter));
                    self.installer.breakpoint_changed(id).await;
                }
            }
            _ => {
                tracing::debug!(%target, breakpoint = %id, "breakpoint deleted in backend");
                self.installer.breakpoint_removed(id).await;
                model.remove_breakpoint(id);
            }
        }
        Ok(())
    }

    fn context_exited(&mut self, context: TargetContext) {
        self.parked.remove(&context);
        self.installer.gateway().forget_external(context);
        tracing::debug!(%context, "forgot backend bookkeeping of exited context");
    }
}
