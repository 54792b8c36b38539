/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::attrs::Delta;
use crate::backend::Backend;
use crate::backend::BreakpointNotification;
use crate::config::Config;
use crate::context::ExecutionContext;
use crate::context::TargetBreakpointRef;
use crate::context::TargetContext;
use crate::error::Error;
use crate::gateway::BreakpointGateway;
use crate::gateway::GatewayEvent;
use crate::installer::InstallationManager;
use crate::platform::ContextRegistry;
use crate::platform::PlatformBreakpointId;
use crate::platform::PlatformModel;
use crate::platform::SourceLookup;
use crate::sync::SyncEngine;
use crate::sync::SyncHandle;

/// Breakpoint synchronization for one backend session.
///
/// Wires the gateway, the installation manager and the sync engine
/// together. Platform model and execution-context events are forwarded to
/// the installation manager; backend notifications go through
/// [`BreakpointSync::notifier`] to the sync worker, which is spawned on
/// construction and stops once the service and every notifier are dropped.
pub struct BreakpointSync {
    gateway: BreakpointGateway,
    installer: InstallationManager,
    notifier: SyncHandle,
    worker: JoinHandle<()>,
}

impl BreakpointSync {
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: &Config,
        backend: Backend,
        model: Arc<dyn PlatformModel>,
        lookup: Arc<dyn SourceLookup>,
        contexts: Arc<dyn ContextRegistry>,
    ) -> Self {
        let gateway = BreakpointGateway::new(backend, config.event_capacity);
        let installer = InstallationManager::new(gateway.clone(), model, lookup.clone());
        let (notifier, inbox) = SyncEngine::channel(config.notification_queue_depth);
        let worker = SyncEngine::new(installer.clone(), lookup, contexts).spawn(inbox);
        BreakpointSync {
            gateway,
            installer,
            notifier,
            worker,
        }
    }

    pub fn gateway(&self) -> &BreakpointGateway {
        &self.gateway
    }

    pub fn installer(&self) -> &InstallationManager {
        &self.installer
    }

    /// Handle through which the backend transport delivers breakpoint
    /// notifications.
    pub fn notifier(&self) -> SyncHandle {
        self.notifier.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.gateway.subscribe()
    }

    pub async fn notify(&self, notification: BreakpointNotification) -> Result<(), Error> {
        self.notifier.submit(notification).await
    }

    /// Waits until the sync worker processed everything queued so far.
    pub async fn flush(&self) -> Result<(), Error> {
        self.notifier.flush().await
    }

    pub async fn breakpoint_added(&self, id: PlatformBreakpointId) {
        self.installer.breakpoint_added(id).await
    }

    /// The platform breakpoint `id` changed. The hint is informational; the
    /// change is recomputed against the attributes each context was last
    /// installed with.
    pub async fn breakpoint_changed(&self, id: PlatformBreakpointId, hint: Option<&Delta>) {
        if let Some(hint) = hint {
            tracing::trace!(breakpoint = %id, keys = ?hint.keys().collect::<Vec<_>>(), "breakpoint changed");
        }
        self.installer.breakpoint_changed(id).await
    }

    pub async fn breakpoint_removed(&self, id: PlatformBreakpointId) {
        self.installer.breakpoint_removed(id).await
    }

    pub async fn manager_enablement_changed(&self, enabled: bool) {
        self.installer.manager_enablement_changed(enabled).await
    }

    pub async fn context_started(&self, context: TargetContext) -> Result<(), Error> {
        self.installer.start_tracking(context).await?;
        self.notifier.context_started(context).await
    }

    /// Stops tracking a context that is still alive, removing its
    /// breakpoints from the backend.
    pub async fn stop_tracking(&self, context: TargetContext) -> Result<(), Error> {
        self.installer.stop_tracking(context).await
    }

    pub fn context_suspended(&self, ec: ExecutionContext, hits: Vec<TargetBreakpointRef>) {
        self.gateway.breakpoint_hit(ec, hits);
    }

    pub fn context_resumed(&self, ec: &ExecutionContext) {
        self.gateway.execution_resumed(ec);
    }

    /// A thread or container exited. This is about hit bookkeeping only;
    /// use [`BreakpointSync::context_exited`] when a whole target context
    /// is gone.
    pub fn execution_exited(&self, ec: &ExecutionContext) {
        self.gateway.execution_exited(ec);
    }

    pub fn breakpoints_hit(&self, ec: &ExecutionContext) -> Vec<TargetBreakpointRef> {
        self.gateway.breakpoints_hit(ec)
    }

    /// A target context is gone. Nothing is sent to the backend.
    pub async fn context_exited(&self, context: TargetContext) -> Result<(), Error> {
        self.notifier.context_exited(context).await?;
        self.notifier.flush().await?;
        self.installer.context_exited(context);
        Ok(())
    }

    /// The backend session is gone. Nothing is sent to the backend.
    pub fn session_terminated(&self) {
        self.installer.session_terminated();
    }

    /// Stops the sync worker after it drained its inbox.
    pub async fn shutdown(self) {
        let BreakpointSync {
            notifier, worker, ..
        } = self;
        drop(notifier);
        if let Err(err) = worker.await {
            tracing::error!("sync worker failed: {}", err);
        }
    }
}
