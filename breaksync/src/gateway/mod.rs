/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The backend breakpoint gateway: a per-context store of target breakpoints
//! and the translation of attribute bags into backend commands.

mod hits;

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;

use futures::future;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;

pub use self::hits::HitTracker;
use crate::attrs::AttrKey;
use crate::attrs::Attributes;
use crate::backend::Backend;
use crate::backend::CatchCommand;
use crate::backend::Command;
use crate::backend::InsertCommand;
use crate::backend::InsertFlavor;
use crate::backend::InsertOutcome;
use crate::backend::Reply;
use crate::breakpoint::BreakpointKind;
use crate::breakpoint::TargetBreakpointData;
use crate::context::ExecutionContext;
use crate::context::TargetBreakpointRef;
use crate::context::TargetContext;
use crate::error::Error;
use crate::identity;
use crate::location::format_location;

/// Changes to the set of target breakpoints, raised after the backend
/// confirmed them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GatewayEvent {
    Added(Vec<TargetBreakpointRef>),
    Updated(Vec<TargetBreakpointRef>),
    Removed(Vec<TargetBreakpointRef>),
}

/// The in-place modifications the backend supports on an existing target
/// breakpoint. Each present field maps to one backend command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TargetDelta {
    pub condition: Option<String>,
    pub ignore_count: Option<u32>,
    pub enabled: Option<bool>,
}

impl TargetDelta {
    pub fn is_empty(&self) -> bool {
        self.condition.is_none() && self.ignore_count.is_none() && self.enabled.is_none()
    }
}

#[derive(Debug, Default)]
struct ContextStore {
    breakpoints: BTreeMap<String, TargetBreakpointData>,
    /// Breakpoints created in the backend by someone else that no platform
    /// breakpoint has claimed yet.
    created_externally: BTreeSet<String>,
    /// Breakpoints the backend already deleted on its own.
    deleted_externally: BTreeSet<String>,
    /// Breakpoints nobody wants any more whose delete the backend refused.
    undeleted: BTreeSet<String>,
}

struct Inner {
    backend: Backend,
    stores: Mutex<HashMap<TargetContext, ContextStore>>,
    hits: Mutex<HitTracker>,
    events: broadcast::Sender<GatewayEvent>,
}

/// Handle to the gateway. Cloning is cheap; all clones share one store.
#[derive(Clone)]
pub struct BreakpointGateway {
    inner: Arc<Inner>,
}

impl BreakpointGateway {
    pub fn new(backend: Backend, event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        BreakpointGateway {
            inner: Arc::new(Inner {
                backend,
                stores: Mutex::new(HashMap::new()),
                hits: Mutex::new(HitTracker::default()),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.events.subscribe()
    }

    pub fn backend(&self) -> &Backend {
        &self.inner.backend
    }

    fn raise(&self, event: GatewayEvent) {
        // Nobody listening is fine.
        let _ = self.inner.events.send(event);
    }

    /// Refreshes the cached breakpoints of `context` from the backend.
    ///
    /// A context that never had a breakpoint inserted has no store; the
    /// result is empty and the backend is not asked.
    pub async fn list(&self, context: TargetContext) -> Result<Vec<TargetBreakpointRef>, Error> {
        if !self.inner.stores.lock().contains_key(&context) {
            return Ok(Vec::new());
        }

        let breakpoints = match self.inner.backend.request(context, Command::List).await? {
            Reply::Listed(breakpoints) => breakpoints,
            reply => {
                return Err(Error::Backend(format!(
                    "unexpected reply to list: {:?}",
                    reply
                )));
            }
        };

        let mut stores = self.inner.stores.lock();
        let store = stores.entry(context).or_default();
        store.breakpoints = breakpoints
            .into_iter()
            .map(|data| (data.number.clone(), data))
            .collect();
        let ContextStore {
            breakpoints,
            created_externally,
            undeleted,
            ..
        } = store;
        created_externally.retain(|number| breakpoints.contains_key(number));
        undeleted.retain(|number| breakpoints.contains_key(number));
        Ok(breakpoints
            .keys()
            .map(|number| TargetBreakpointRef::new(context, number.clone()))
            .collect())
    }

    /// Copy of the cached record for `target`. Never queries the backend.
    pub fn get_data(&self, target: &TargetBreakpointRef) -> Result<TargetBreakpointData, Error> {
        self.inner
            .stores
            .lock()
            .get(&target.context)
            .and_then(|store| store.breakpoints.get(&target.number))
            .cloned()
            .ok_or_else(|| Error::InvalidBreakpointReference(target.clone()))
    }

    /// Every cached record of `context`.
    pub fn cached(&self, context: TargetContext) -> Vec<TargetBreakpointData> {
        self.inner
            .stores
            .lock()
            .get(&context)
            .map(|store| store.breakpoints.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_cached(&self, target: &TargetBreakpointRef) -> bool {
        self.inner
            .stores
            .lock()
            .get(&target.context)
            .is_some_and(|store| store.breakpoints.contains_key(&target.number))
    }

    /// Creates a target breakpoint for `attrs` in `context`.
    ///
    /// A matching breakpoint that was created externally is adopted instead
    /// of inserting a duplicate. Breakpoints are created enabled; when the
    /// caller wants a disabled one, a disable is issued right after the
    /// insert completes.
    pub async fn insert(
        &self,
        context: TargetContext,
        attrs: &Attributes,
    ) -> Result<TargetBreakpointRef, Error> {
        let kind = attrs.kind().ok_or(Error::UnknownBreakpointKind(None))?;

        if let Some(adopted) = self.adopt_external(context, attrs) {
            tracing::debug!(%context, target = %adopted, "adopted externally created breakpoint");
            self.raise(GatewayEvent::Added(vec![adopted.clone()]));
            let delta = self.adoption_delta(&adopted, attrs);
            if let Err(err) = self.update(&adopted, &delta).await {
                if err.is_moot() {
                    return Err(err);
                }
                tracing::warn!(%context, target = %adopted, "failed to adjust adopted breakpoint: {}", err);
            }
            return Ok(adopted);
        }

        let command = insert_command(kind, attrs)?;
        let reply = match self.inner.backend.request(context, command).await {
            Ok(reply) => reply,
            Err(err) if err.is_moot() => return Err(err),
            Err(Error::Backend(message)) => return Err(Error::InsertionFailed(message)),
            Err(err) => return Err(err),
        };

        let data = match reply {
            Reply::Inserted(InsertOutcome::Resolved(breakpoints)) => {
                // The first record is the breakpoint itself; further ones are
                // its individual locations.
                breakpoints.into_iter().next()
            }
            Reply::Inserted(InsertOutcome::Empty) => None,
            reply => {
                return Err(Error::InsertionFailed(format!(
                    "unexpected reply to insert: {:?}",
                    reply
                )));
            }
        };
        let Some(data) = data else {
            tracing::debug!(%context, ?kind, "insert produced no breakpoint");
            return Err(Error::InsertionFailed(String::from(
                "backend reported no breakpoint for the requested location",
            )));
        };

        let target = TargetBreakpointRef::new(context, data.number.clone());
        let created_enabled = data.enabled;
        self.inner
            .stores
            .lock()
            .entry(context)
            .or_default()
            .breakpoints
            .insert(data.number.clone(), data);
        tracing::debug!(%context, %target, ?kind, "inserted target breakpoint");
        self.raise(GatewayEvent::Added(vec![target.clone()]));

        if created_enabled && !attrs.enabled() {
            match self
                .inner
                .backend
                .request(context, Command::Disable(vec![target.number.clone()]))
                .await
            {
                Ok(_) => {
                    self.with_data(&target, |data| data.enabled = false);
                    self.raise(GatewayEvent::Updated(vec![target.clone()]));
                }
                Err(err) => {
                    tracing::warn!(%context, %target, "failed to disable new breakpoint: {}", err);
                }
            }
        }

        Ok(target)
    }

    fn adopt_external(
        &self,
        context: TargetContext,
        attrs: &Attributes,
    ) -> Option<TargetBreakpointRef> {
        let mut stores = self.inner.stores.lock();
        let store = stores.get_mut(&context)?;
        let number = store
            .created_externally
            .iter()
            .find(|number| {
                store.breakpoints.get(*number).is_some_and(|data| {
                    data.thread == attrs.thread() && identity::matches(attrs, data, None)
                })
            })?
            .clone();
        store.created_externally.remove(&number);
        Some(TargetBreakpointRef::new(context, number))
    }

    /// What has to change on an adopted breakpoint for it to carry the
    /// enablement, condition and ignore count that were asked for.
    fn adoption_delta(&self, target: &TargetBreakpointRef, attrs: &Attributes) -> TargetDelta {
        let Ok(data) = self.get_data(target) else {
            return TargetDelta::default();
        };
        let condition = attrs.condition().trim();
        TargetDelta {
            condition: (data.condition.trim() != condition).then(|| condition.to_owned()),
            ignore_count: (data.ignore_count != attrs.ignore_count()).then(|| attrs.ignore_count()),
            enabled: (data.enabled != attrs.enabled()).then(|| attrs.enabled()),
        }
    }

    fn with_data<F>(&self, target: &TargetBreakpointRef, f: F)
    where
        F: FnOnce(&mut TargetBreakpointData),
    {
        if let Some(data) = self
            .inner
            .stores
            .lock()
            .get_mut(&target.context)
            .and_then(|store| store.breakpoints.get_mut(&target.number))
        {
            f(data);
        }
    }

    /// Applies `delta` to an existing target breakpoint. Condition, ignore
    /// count and enablement are sent as separate commands that run
    /// concurrently; `Updated` is raised only when all of them succeeded.
    ///
    /// A rejected condition is cleared in the backend before the original
    /// rejection is reported.
    pub async fn update(&self, target: &TargetBreakpointRef, delta: &TargetDelta) -> Result<(), Error> {
        if !self.is_cached(target) {
            return Err(Error::InvalidBreakpointReference(target.clone()));
        }
        if delta.is_empty() {
            return Ok(());
        }

        let mut steps: Vec<BoxFuture<'_, Result<(), Error>>> = Vec::new();
        if let Some(condition) = &delta.condition {
            steps.push(self.update_condition(target, condition.clone()).boxed());
        }
        if let Some(count) = delta.ignore_count {
            steps.push(self.update_ignore_count(target, count).boxed());
        }
        if let Some(enabled) = delta.enabled {
            steps.push(self.update_enabled(target, enabled).boxed());
        }

        let results = future::join_all(steps).await;
        if let Some(err) = results.into_iter().find_map(Result::err) {
            return Err(err);
        }
        self.raise(GatewayEvent::Updated(vec![target.clone()]));
        Ok(())
    }

    async fn update_condition(
        &self,
        target: &TargetBreakpointRef,
        expression: String,
    ) -> Result<(), Error> {
        let command = Command::Condition {
            number: target.number.clone(),
            expression: expression.clone(),
        };
        match self.inner.backend.request(target.context, command).await {
            Ok(_) => {
                self.with_data(target, |data| data.condition = expression);
                Ok(())
            }
            Err(err) if err.is_moot() => Err(err),
            Err(err) => {
                let message = match err {
                    Error::Backend(message) => message,
                    other => other.to_string(),
                };
                tracing::debug!(%target, %message, "condition rejected, clearing it");
                let clear = Command::Condition {
                    number: target.number.clone(),
                    expression: String::new(),
                };
                match self.inner.backend.request(target.context, clear).await {
                    Ok(_) => self.with_data(target, |data| data.condition.clear()),
                    Err(err) => tracing::warn!(%target, "failed to clear condition: {}", err),
                }
                Err(Error::ConditionRejected(message))
            }
        }
    }

    async fn update_ignore_count(&self, target: &TargetBreakpointRef, count: u32) -> Result<(), Error> {
        let command = Command::IgnoreCount {
            number: target.number.clone(),
            count,
        };
        self.inner.backend.request(target.context, command).await?;
        self.with_data(target, |data| data.ignore_count = count);
        Ok(())
    }

    async fn update_enabled(&self, target: &TargetBreakpointRef, enabled: bool) -> Result<(), Error> {
        let numbers = vec![target.number.clone()];
        let command = if enabled {
            Command::Enable(numbers)
        } else {
            Command::Disable(numbers)
        };
        self.inner.backend.request(target.context, command).await?;
        self.with_data(target, |data| data.enabled = enabled);
        Ok(())
    }

    /// Deletes a target breakpoint. The cache entry is evicted and `Removed`
    /// raised only once the backend confirmed the delete. Breakpoints the
    /// backend already deleted on its own are evicted without a command.
    pub async fn remove(&self, target: &TargetBreakpointRef) -> Result<(), Error> {
        {
            let mut stores = self.inner.stores.lock();
            let store = stores
                .get_mut(&target.context)
                .ok_or_else(|| Error::InvalidBreakpointReference(target.clone()))?;
            if store.deleted_externally.remove(&target.number) {
                store.breakpoints.remove(&target.number);
                store.created_externally.remove(&target.number);
                store.undeleted.remove(&target.number);
                drop(stores);
                tracing::debug!(%target, "evicted externally deleted breakpoint");
                self.raise(GatewayEvent::Removed(vec![target.clone()]));
                return Ok(());
            }
            if !store.breakpoints.contains_key(&target.number) {
                return Err(Error::InvalidBreakpointReference(target.clone()));
            }
        }

        let result = self
            .inner
            .backend
            .request(target.context, Command::Delete(vec![target.number.clone()]))
            .await;
        if let Err(err) = result {
            if !err.is_moot() {
                // Still live in the backend; remembered so it can be retried.
                if let Some(store) = self.inner.stores.lock().get_mut(&target.context) {
                    store.undeleted.insert(target.number.clone());
                }
            }
            return Err(err);
        }
        if let Some(store) = self.inner.stores.lock().get_mut(&target.context) {
            store.breakpoints.remove(&target.number);
            store.created_externally.remove(&target.number);
            store.undeleted.remove(&target.number);
        }
        tracing::debug!(%target, "deleted target breakpoint");
        self.raise(GatewayEvent::Removed(vec![target.clone()]));
        Ok(())
    }

    /// Breakpoints of `context` whose delete failed and that are still
    /// cached.
    pub fn undeleted(&self, context: TargetContext) -> Vec<TargetBreakpointRef> {
        self.inner
            .stores
            .lock()
            .get(&context)
            .map(|store| {
                store
                    .undeleted
                    .iter()
                    .map(|number| TargetBreakpointRef::new(context, number.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Records the breakpoints that caused `ec` to suspend.
    pub fn breakpoint_hit(&self, ec: ExecutionContext, targets: Vec<TargetBreakpointRef>) {
        self.inner.hits.lock().record(ec, targets);
    }

    pub fn execution_resumed(&self, ec: &ExecutionContext) {
        self.inner.hits.lock().clear(ec);
    }

    pub fn execution_exited(&self, ec: &ExecutionContext) {
        self.inner.hits.lock().clear(ec);
    }

    /// Breakpoints `ec`, or the container it belongs to, is suspended at.
    pub fn breakpoints_hit(&self, ec: &ExecutionContext) -> Vec<TargetBreakpointRef> {
        self.inner.hits.lock().get(ec)
    }

    /// Caches a breakpoint the backend reported without being asked, and
    /// remembers it as externally created until a platform breakpoint
    /// claims it.
    pub fn cache_external(&self, context: TargetContext, data: TargetBreakpointData) {
        let mut stores = self.inner.stores.lock();
        let store = stores.entry(context).or_default();
        store.created_externally.insert(data.number.clone());
        store.deleted_externally.remove(&data.number);
        store.undeleted.remove(&data.number);
        store.breakpoints.insert(data.number.clone(), data);
    }

    /// Replaces the cached record of a known breakpoint. Returns the
    /// previous record.
    pub fn store_data(
        &self,
        context: TargetContext,
        data: TargetBreakpointData,
    ) -> Option<TargetBreakpointData> {
        self.inner
            .stores
            .lock()
            .entry(context)
            .or_default()
            .breakpoints
            .insert(data.number.clone(), data)
    }

    /// Marks an externally created breakpoint as owned. Returns false if it
    /// was not waiting to be claimed.
    pub fn claim_external(&self, target: &TargetBreakpointRef) -> bool {
        self.inner
            .stores
            .lock()
            .get_mut(&target.context)
            .is_some_and(|store| store.created_externally.remove(&target.number))
    }

    pub fn is_created_externally(&self, target: &TargetBreakpointRef) -> bool {
        self.inner
            .stores
            .lock()
            .get(&target.context)
            .is_some_and(|store| store.created_externally.contains(&target.number))
    }

    pub fn mark_deleted_externally(&self, target: &TargetBreakpointRef) {
        let mut stores = self.inner.stores.lock();
        let store = stores.entry(target.context).or_default();
        store.created_externally.remove(&target.number);
        store.deleted_externally.insert(target.number.clone());
    }

    /// Drops the externally created/deleted bookkeeping of `context`.
    pub fn forget_external(&self, context: TargetContext) {
        if let Some(store) = self.inner.stores.lock().get_mut(&context) {
            store.created_externally.clear();
            store.deleted_externally.clear();
        }
    }

    /// Drops everything known about `context`, e.g. after it exited.
    pub fn forget_context(&self, context: TargetContext) {
        self.inner.stores.lock().remove(&context);
        self.inner.hits.lock().clear_target(context);
    }

    /// Drops every store. Used when the backend session is gone.
    pub fn forget_all(&self) {
        self.inner.stores.lock().clear();
        *self.inner.hits.lock() = HitTracker::default();
    }
}

/// Builds the backend insert command for a set of target attributes.
fn insert_command(kind: BreakpointKind, attrs: &Attributes) -> Result<Command, Error> {
    let condition = attrs
        .non_empty_text(AttrKey::Condition)
        .map(str::to_owned);
    let ignore_count = attrs.ignore_count();
    let list = |key| {
        attrs
            .list(key)
            .map(<[String]>::to_vec)
            .unwrap_or_default()
    };
    let location = || {
        format_location(attrs)
            .ok_or_else(|| Error::InsertionFailed(String::from("breakpoint has no location")))
    };
    let command = InsertCommand {
        condition: condition.clone(),
        ignore_count,
        thread: attrs.thread(),
        ..Default::default()
    };

    let command = match kind {
        BreakpointKind::Line | BreakpointKind::Function | BreakpointKind::Address => InsertCommand {
            flavor: Some(InsertFlavor::Break),
            location: location()?,
            hardware: attrs.flag(AttrKey::Hardware).unwrap_or(false),
            temporary: attrs.flag(AttrKey::Temporary).unwrap_or(false),
            ..command
        },
        BreakpointKind::Watch => InsertCommand {
            flavor: Some(InsertFlavor::Watch),
            location: attrs
                .non_empty_text(AttrKey::Expression)
                .ok_or_else(|| {
                    Error::InsertionFailed(String::from("watchpoint without an expression"))
                })?
                .to_owned(),
            access: attrs.access(),
            ..command
        },
        BreakpointKind::Tracepoint => InsertCommand {
            flavor: Some(InsertFlavor::Trace),
            location: location()?,
            pass_count: attrs
                .int(AttrKey::PassCount)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(0),
            commands: list(AttrKey::Commands),
            ..command
        },
        BreakpointKind::DynamicPrintf => InsertCommand {
            flavor: Some(InsertFlavor::Dprintf),
            location: location()?,
            printf: attrs
                .non_empty_text(AttrKey::PrintfString)
                .map(str::to_owned),
            ..command
        },
        BreakpointKind::Catchpoint => {
            let event = attrs.non_empty_text(AttrKey::CatchEvent).ok_or_else(|| {
                Error::InsertionFailed(String::from("catchpoint without an event"))
            })?;
            return Ok(Command::InsertCatchpoint(CatchCommand {
                event: event.to_owned(),
                args: list(AttrKey::CatchArgs),
                condition,
                ignore_count,
            }));
        }
    };
    Ok(Command::Insert(command))
}
