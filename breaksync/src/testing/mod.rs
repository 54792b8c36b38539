/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! In-process collaborators for exercising breakpoint synchronization
//! without a real debugger backend.

mod backend;
mod model;

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

pub use self::backend::SimulatedBackend;
pub use self::model::MemoryModel;
pub use self::model::ModelEntry;
use crate::config::Config;
use crate::context::TargetContext;
use crate::error::Error;
use crate::platform::ContextRegistry;
use crate::platform::SourceLookup;
use crate::service::BreakpointSync;

/// Configure tokio and tracing in the way that we like, and run the future.
pub fn run_tokio_test<F: Future>(fut: F) -> F::Output {
    let collector = tracing_subscriber::fmt()
        .with_env_filter("breaksync=trace")
        .with_test_writer()
        .finish();

    // Tests may be running in parallel, and we don't care who "wins".
    tracing::subscriber::set_global_default(collector).unwrap_or(());
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_time()
        .worker_threads(2)
        .build()
        .unwrap();
    rt.block_on(fut)
}

/// Source lookup that rewrites path prefixes between host and backend.
#[derive(Debug, Default)]
pub struct StaticSourceLookup {
    /// `(host prefix, backend prefix)` pairs.
    prefixes: Vec<(String, String)>,
    unresolvable: Mutex<BTreeSet<String>>,
}

impl StaticSourceLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, host: impl Into<String>, backend: impl Into<String>) -> Self {
        self.prefixes.push((host.into(), backend.into()));
        self
    }

    /// Makes `host_path` fail to resolve.
    pub fn fail_on(&self, host_path: impl Into<String>) {
        self.unresolvable.lock().insert(host_path.into());
    }

    fn rewrite<'a>(path: &str, pairs: impl Iterator<Item = (&'a str, &'a str)>) -> String {
        for (from, to) in pairs {
            if let Some(rest) = path.strip_prefix(from) {
                return format!("{}{}", to, rest);
            }
        }
        path.to_owned()
    }
}

#[async_trait]
impl SourceLookup for StaticSourceLookup {
    async fn resolve_debugger_path(
        &self,
        _context: TargetContext,
        host_path: &str,
    ) -> Result<String, Error> {
        if self.unresolvable.lock().contains(host_path) {
            return Err(Error::PathUnresolved(host_path.to_owned()));
        }
        let pairs = self.prefixes.iter().map(|(h, b)| (h.as_str(), b.as_str()));
        Ok(Self::rewrite(host_path, pairs))
    }

    async fn resolve_local_file(
        &self,
        _context: TargetContext,
        debugger_path: &str,
    ) -> Option<String> {
        let pairs = self.prefixes.iter().map(|(h, b)| (b.as_str(), h.as_str()));
        Some(Self::rewrite(debugger_path, pairs))
    }
}

/// Context registry backed by a plain list. Thread groups are named `i<id>`.
#[derive(Debug, Default)]
pub struct StaticContexts {
    contexts: Mutex<Vec<TargetContext>>,
}

impl StaticContexts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, context: TargetContext) {
        let mut contexts = self.contexts.lock();
        if !contexts.contains(&context) {
            contexts.push(context);
        }
    }

    pub fn remove(&self, context: TargetContext) {
        self.contexts.lock().retain(|c| *c != context);
    }
}

impl ContextRegistry for StaticContexts {
    fn contexts(&self) -> Vec<TargetContext> {
        self.contexts.lock().clone()
    }

    fn context_for_group(&self, group: &str) -> Option<TargetContext> {
        let id: u32 = group.strip_prefix('i')?.parse().ok()?;
        self.contexts
            .lock()
            .iter()
            .copied()
            .find(|context| context.id() == id)
    }
}

/// A [`BreakpointSync`] wired to a simulated backend and in-memory
/// collaborators.
pub struct Harness {
    pub backend: SimulatedBackend,
    pub model: Arc<MemoryModel>,
    pub lookup: Arc<StaticSourceLookup>,
    pub contexts: Arc<StaticContexts>,
    pub sync: BreakpointSync,
}

impl Harness {
    /// Must be called from within a tokio runtime.
    pub fn new(config: &Config, lookup: StaticSourceLookup) -> Self {
        let (backend, requests) = crate::backend::Backend::channel(config.request_queue_depth);
        let simulated = SimulatedBackend::new();
        simulated.spawn(requests);
        let model = Arc::new(MemoryModel::new());
        let lookup = Arc::new(lookup);
        let contexts = Arc::new(StaticContexts::new());
        let sync = BreakpointSync::new(
            config,
            backend,
            model.clone(),
            lookup.clone(),
            contexts.clone(),
        );
        Harness {
            backend: simulated,
            model,
            lookup,
            contexts,
            sync,
        }
    }

    /// Registers and starts tracking `context`.
    pub async fn start(&self, context: TargetContext) -> Result<(), Error> {
        self.contexts.add(context);
        self.sync.context_started(context).await
    }

    /// Every tracked context has consistent tracking tables and every
    /// platform breakpoint's install count matches its non-pending targets.
    pub fn check_invariants(&self) -> Result<(), String> {
        let installer = self.sync.installer();
        let gateway = self.sync.gateway();
        for id in self.model.ids() {
            let mut expected = 0;
            for context in installer.tracked_contexts() {
                for target in installer.targets_of(context, id) {
                    let data = gateway
                        .get_data(&target)
                        .map_err(|err| format!("{} of {}: {}", target, id, err))?;
                    if !data.pending {
                        expected += 1;
                    }
                }
            }
            let actual = self.model.install_count(id);
            if actual != expected {
                return Err(format!(
                    "{} has install count {} but {} installed targets",
                    id, actual, expected
                ));
            }
        }
        for context in installer.tracked_contexts() {
            if installer.inspect(context, |state| state.is_consistent()) != Some(true) {
                return Err(format!("tracking tables of {} are inconsistent", context));
            }
        }
        if self.model.underflows() > 0 {
            return Err(String::from("install count decremented below zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const CTX: TargetContext = TargetContext::new(1);

    #[tokio::test]
    async fn lookup_rewrites_prefixes_both_ways() {
        let lookup = StaticSourceLookup::new().with_prefix("/home/dev/", "/build/");
        assert_eq!(
            lookup
                .resolve_debugger_path(CTX, "/home/dev/main.c")
                .await
                .unwrap(),
            "/build/main.c"
        );
        assert_eq!(
            lookup.resolve_local_file(CTX, "/build/main.c").await.as_deref(),
            Some("/home/dev/main.c")
        );
        lookup.fail_on("/home/dev/gone.c");
        assert!(matches!(
            lookup.resolve_debugger_path(CTX, "/home/dev/gone.c").await,
            Err(Error::PathUnresolved(_))
        ));
    }

    #[test]
    fn contexts_by_group() {
        let contexts = StaticContexts::new();
        contexts.add(TargetContext::new(2));
        assert_eq!(contexts.context_for_group("i2"), Some(TargetContext::new(2)));
        assert_eq!(contexts.context_for_group("i3"), None);
        assert_eq!(contexts.context_for_group("bogus"), None);
    }
}
