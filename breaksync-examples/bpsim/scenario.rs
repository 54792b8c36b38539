/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use breaksync::testing::Harness;
use breaksync::AttrKey;
use breaksync::Attributes;
use breaksync::BreakpointKind;
use breaksync::BreakpointNotification;
use breaksync::Delta;
use breaksync::ExecutionContext;
use breaksync::PlatformBreakpointId;
use breaksync::PlatformModel;
use breaksync::Problem;
use breaksync::TargetBreakpointData;
use breaksync::TargetContext;
use breaksync::ThreadFilter;
use breaksync::ThreadScope;
use breaksync::WatchAccess;
use serde::Deserialize;
use serde::Serialize;

/// A platform breakpoint as written in a scenario file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BreakpointSpec {
    pub kind: Option<BreakpointKind>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub function: Option<String>,
    pub address: Option<String>,
    pub expression: Option<String>,
    pub access: Option<String>,
    pub condition: Option<String>,
    pub ignore_count: Option<u32>,
    pub enabled: Option<bool>,
    pub printf: Option<String>,
    pub commands: Option<Vec<String>>,
    pub event: Option<String>,
    /// `[context, group, thread]` triples. Absent means every thread.
    pub threads: Option<Vec<(u32, u32, u32)>>,
}

impl BreakpointSpec {
    fn access(&self) -> anyhow::Result<Option<WatchAccess>> {
        let Some(access) = &self.access else {
            return Ok(None);
        };
        let access = match access.as_str() {
            "read" => WatchAccess::READ,
            "write" => WatchAccess::WRITE,
            "access" | "read_write" => WatchAccess::READ | WatchAccess::WRITE,
            other => anyhow::bail!("Unknown watch access `{}`", other),
        };
        Ok(Some(access))
    }

    /// Writes every field that is present onto `attrs`.
    fn apply(&self, attrs: &mut Attributes) -> anyhow::Result<()> {
        if let Some(kind) = self.kind {
            attrs.insert(AttrKey::Kind, kind);
        }
        if let Some(file) = &self.file {
            attrs.insert(AttrKey::FileName, file.as_str());
        }
        if let Some(line) = self.line {
            attrs.insert(AttrKey::Line, line);
        }
        if let Some(function) = &self.function {
            attrs.insert(AttrKey::Function, function.as_str());
        }
        if let Some(address) = &self.address {
            attrs.insert(AttrKey::Address, address.as_str());
        }
        if let Some(expression) = &self.expression {
            attrs.insert(AttrKey::Expression, expression.as_str());
        }
        if let Some(access) = self.access()? {
            attrs.insert(AttrKey::Access, access);
        }
        if let Some(condition) = &self.condition {
            attrs.insert(AttrKey::Condition, condition.as_str());
        }
        if let Some(count) = self.ignore_count {
            attrs.insert(AttrKey::IgnoreCount, count);
        }
        if let Some(enabled) = self.enabled {
            attrs.insert(AttrKey::Enabled, enabled);
        }
        if let Some(printf) = &self.printf {
            attrs.insert(AttrKey::PrintfString, printf.as_str());
        }
        if let Some(commands) = &self.commands {
            attrs.insert(AttrKey::Commands, commands.clone());
        }
        if let Some(event) = &self.event {
            attrs.insert(AttrKey::CatchEvent, event.as_str());
        }
        Ok(())
    }

    fn filter(&self) -> Option<ThreadFilter> {
        self.threads.as_ref().map(|threads| {
            threads
                .iter()
                .map(|&(context, group, thread)| {
                    ExecutionContext::thread(TargetContext::new(context), group, thread)
                })
                .collect()
        })
    }
}

/// One step of a scenario.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    StartContext {
        context: u32,
    },
    StopTracking {
        context: u32,
    },
    ExitContext {
        context: u32,
    },
    TerminateSession,
    AddBreakpoint {
        name: String,
        breakpoint: BreakpointSpec,
    },
    /// Overwrites the fields given; `threads` replaces the filter when set.
    ChangeBreakpoint {
        name: String,
        breakpoint: BreakpointSpec,
        #[serde(default)]
        clear_threads: bool,
    },
    RemoveBreakpoint {
        name: String,
    },
    ManagerEnabled {
        enabled: bool,
    },
    ConsoleInsert {
        context: u32,
        location: String,
        #[serde(default)]
        thread: Option<u32>,
    },
    ConsoleDelete {
        context: u32,
        number: String,
    },
    ConsoleModify {
        context: u32,
        number: String,
        #[serde(default)]
        condition: Option<String>,
        #[serde(default)]
        ignore_count: Option<u32>,
        #[serde(default)]
        enabled: Option<bool>,
        #[serde(default)]
        hit_count: Option<u32>,
    },
    Resynchronize {
        context: u32,
    },
    RejectLocation {
        location: String,
    },
    AcceptLocation {
        location: String,
    },
    RejectCondition {
        symbol: String,
    },
    PendingFile {
        file: String,
    },
    LoadFile {
        file: String,
    },
    FailCommand {
        command: String,
    },
    HealCommand {
        command: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse scenario {}", path.display()))
    }
}

/// Command names the simulated backend knows how to fail.
fn command_name(name: &str) -> anyhow::Result<&'static str> {
    const NAMES: [&str; 8] = [
        "insert", "catch", "delete", "enable", "disable", "condition", "ignore", "list",
    ];
    NAMES
        .iter()
        .copied()
        .find(|known| *known == name)
        .ok_or_else(|| anyhow::anyhow!("Unknown backend command `{}`", name))
}

/// Runs scenarios against a [`Harness`], remembering the names given to
/// platform breakpoints.
pub struct Runner {
    harness: Harness,
    names: BTreeMap<String, PlatformBreakpointId>,
}

impl Runner {
    pub fn new(harness: Harness) -> Self {
        Runner {
            harness,
            names: BTreeMap::new(),
        }
    }

    fn id(&self, name: &str) -> anyhow::Result<PlatformBreakpointId> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("No breakpoint named `{}`", name))
    }

    async fn notify(&self, notification: BreakpointNotification) -> anyhow::Result<()> {
        self.harness.sync.notify(notification).await?;
        Ok(())
    }

    pub async fn run(&mut self, scenario: &Scenario) -> anyhow::Result<()> {
        for (index, step) in scenario.steps.iter().enumerate() {
            tracing::info!(step = index, ?step, "running step");
            self.step(step)
                .await
                .with_context(|| format!("Step {} failed", index))?;
            self.harness.sync.flush().await?;
            if let Err(violation) = self.harness.check_invariants() {
                tracing::warn!(step = index, "invariant violated: {}", violation);
            }
        }
        Ok(())
    }

    async fn step(&mut self, step: &Step) -> anyhow::Result<()> {
        let h = &self.harness;
        match step {
            Step::StartContext { context } => h.start(TargetContext::new(*context)).await?,
            Step::StopTracking { context } => {
                h.sync.stop_tracking(TargetContext::new(*context)).await?
            }
            Step::ExitContext { context } => {
                let context = TargetContext::new(*context);
                h.contexts.remove(context);
                h.sync.context_exited(context).await?;
            }
            Step::TerminateSession => h.sync.session_terminated(),
            Step::AddBreakpoint { name, breakpoint } => {
                if self.names.contains_key(name) {
                    anyhow::bail!("Breakpoint `{}` already exists", name);
                }
                let kind = breakpoint
                    .kind
                    .ok_or_else(|| anyhow::anyhow!("Breakpoint `{}` has no kind", name))?;
                let mut attrs = Attributes::new(kind);
                breakpoint.apply(&mut attrs)?;
                let id = match breakpoint.filter() {
                    Some(filter) => h.model.add_filtered(attrs, filter),
                    None => h.model.add(attrs),
                };
                self.names.insert(name.clone(), id);
                h.sync.breakpoint_added(id).await;
            }
            Step::ChangeBreakpoint {
                name,
                breakpoint,
                clear_threads,
            } => {
                let id = self.id(name)?;
                let old = h
                    .model
                    .attributes(id)
                    .ok_or_else(|| anyhow::anyhow!("Breakpoint `{}` was removed", name))?;
                let mut attrs = old.clone();
                breakpoint.apply(&mut attrs)?;
                let changes = Delta::between(&old, &attrs);
                h.model.update_attributes(id, &changes);
                if *clear_threads {
                    h.model.set_thread_filter(id, None);
                } else if let Some(filter) = breakpoint.filter() {
                    h.model.set_thread_filter(id, Some(filter));
                }
                h.sync.breakpoint_changed(id, Some(&changes)).await;
            }
            Step::RemoveBreakpoint { name } => {
                let id = self.id(name)?;
                h.sync.breakpoint_removed(id).await;
                h.model.remove_breakpoint(id);
                self.names.remove(name);
            }
            Step::ManagerEnabled { enabled } => h.sync.manager_enablement_changed(*enabled).await,
            Step::ConsoleInsert {
                context,
                location,
                thread,
            } => {
                let scope = thread.map_or(ThreadScope::All, ThreadScope::Thread);
                let data = h
                    .backend
                    .console_insert(TargetContext::new(*context), location, scope);
                self.notify(BreakpointNotification::Created {
                    context: None,
                    data,
                })
                .await?;
            }
            Step::ConsoleDelete { context, number } => {
                let context = TargetContext::new(*context);
                if !h.backend.console_delete(context, number) {
                    anyhow::bail!("No backend breakpoint {} in {}", number, context);
                }
                self.notify(BreakpointNotification::Deleted {
                    context: Some(context),
                    number: number.clone(),
                })
                .await?;
            }
            Step::ConsoleModify {
                context,
                number,
                condition,
                ignore_count,
                enabled,
                hit_count,
            } => {
                let context = TargetContext::new(*context);
                let data = h
                    .backend
                    .console_modify(context, number, |data| {
                        if let Some(condition) = condition {
                            data.condition = condition.clone();
                        }
                        if let Some(count) = ignore_count {
                            data.ignore_count = *count;
                        }
                        if let Some(enabled) = enabled {
                            data.enabled = *enabled;
                        }
                        if let Some(hits) = hit_count {
                            data.hit_count = *hits;
                        }
                    })
                    .ok_or_else(|| anyhow::anyhow!("No backend breakpoint {} in {}", number, context))?;
                self.notify(BreakpointNotification::Modified {
                    context: Some(context),
                    data,
                })
                .await?;
            }
            Step::Resynchronize { context } => {
                let context = TargetContext::new(*context);
                self.notify(BreakpointNotification::Resynchronize {
                    context: Some(context),
                    breakpoints: h.backend.breakpoints(context),
                })
                .await?;
            }
            Step::RejectLocation { location } => h.backend.reject_location(location.as_str()),
            Step::AcceptLocation { location } => h.backend.accept_location(location),
            Step::RejectCondition { symbol } => h.backend.reject_condition(symbol.as_str()),
            Step::PendingFile { file } => h.backend.pending_file(file.as_str()),
            Step::LoadFile { file } => {
                for (context, data) in h.backend.load_file(file) {
                    self.notify(BreakpointNotification::Modified {
                        context: Some(context),
                        data,
                    })
                    .await?;
                }
            }
            Step::FailCommand { command } => h.backend.fail_command(command_name(command)?),
            Step::HealCommand { command } => h.backend.heal_command(command_name(command)?),
        }
        Ok(())
    }

    /// Final state of both sides.
    pub fn report(&self) -> Report {
        let h = &self.harness;
        // Breakpoints created from backend notifications have no scenario
        // name and are reported by id.
        let platform = h
            .model
            .ids()
            .into_iter()
            .filter_map(|id| {
                let entry = h.model.entry(id)?;
                let name = self
                    .names
                    .iter()
                    .find(|(_, named)| **named == id)
                    .map_or_else(|| id.to_string(), |(name, _)| name.clone());
                Some((
                    name,
                    PlatformReport {
                        id: id.id(),
                        attributes: entry.attributes,
                        install_count: entry.install_count,
                        hit_count: entry.hit_count,
                        problems: entry.problems,
                    },
                ))
            })
            .collect();
        let backend = h
            .backend
            .contexts()
            .into_iter()
            .map(|context| (context.to_string(), h.backend.breakpoints(context)))
            .collect();
        Report {
            platform,
            backend,
            invariants: h.check_invariants().err(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PlatformReport {
    pub id: u64,
    pub attributes: Attributes,
    pub install_count: u32,
    pub hit_count: u32,
    pub problems: Vec<Problem>,
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub platform: BTreeMap<String, PlatformReport>,
    pub backend: BTreeMap<String, Vec<TargetBreakpointData>>,
    /// The first invariant violation found, if any.
    pub invariants: Option<String>,
}

#[cfg(test)]
mod test {
    use breaksync::testing::StaticSourceLookup;
    use breaksync::Config;

    use super::*;

    const SCENARIO: &str = r#"{
        "steps": [
            { "action": "start_context", "context": 1 },
            { "action": "add_breakpoint", "name": "main",
              "breakpoint": { "kind": "line", "file": "/src/main.c", "line": 42, "enabled": false } },
            { "action": "change_breakpoint", "name": "main", "breakpoint": { "line": 50 } },
            { "action": "console_insert", "context": 1, "location": "/src/util.c:7" },
            { "action": "resynchronize", "context": 1 }
        ]
    }"#;

    #[tokio::test]
    async fn scenario_runs() {
        let scenario: Scenario = serde_json::from_str(SCENARIO).unwrap();
        let harness = Harness::new(&Config::default(), StaticSourceLookup::new());
        let mut runner = Runner::new(harness);
        runner.run(&scenario).await.unwrap();

        let report = runner.report();
        assert_eq!(report.invariants, None);
        assert_eq!(report.platform.len(), 2);
        let main = &report.platform["main"];
        assert_eq!(main.install_count, 1);
        assert_eq!(main.attributes.int(AttrKey::Line), Some(50));
        let backend = &report.backend["i1"];
        assert_eq!(backend.len(), 2);
        assert!(backend.iter().any(|data| data.line == Some(50) && !data.enabled));
    }

    #[test]
    fn unknown_actions_are_rejected() {
        assert!(serde_json::from_str::<Scenario>(r#"{ "steps": [ { "action": "explode" } ] }"#).is_err());
        assert!(command_name("insert").is_ok());
        assert!(command_name("explode").is_err());
    }
}
