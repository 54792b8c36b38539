/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backend::BackendFailure;
use crate::backend::BackendRequest;
use crate::backend::CatchCommand;
use crate::backend::Command;
use crate::backend::InsertCommand;
use crate::backend::InsertFlavor;
use crate::backend::InsertOutcome;
use crate::backend::Reply;
use crate::breakpoint::TargetBreakpointData;
use crate::breakpoint::TargetKind;
use crate::context::TargetContext;
use crate::context::ThreadScope;
use crate::location::parse_location;

#[derive(Debug, Default)]
struct State {
    /// Breakpoint numbers are unique across contexts, like in a debugger
    /// serving several inferiors.
    last_number: u32,
    breakpoints: BTreeMap<TargetContext, BTreeMap<u32, TargetBreakpointData>>,
    log: Vec<(TargetContext, Command)>,
    /// Locations answered with a successful but empty insert.
    invalid_locations: BTreeSet<String>,
    /// Condition expressions containing one of these are rejected.
    rejected_conditions: Vec<String>,
    /// Files whose breakpoints are created pending.
    pending_files: BTreeSet<String>,
    /// Command names answered with an error.
    failing: BTreeSet<&'static str>,
}

/// An in-process backend servicing the request channel of a
/// [`crate::Backend`]. Breakpoints are created enabled, whatever the
/// request says.
#[derive(Clone, Debug, Default)]
pub struct SimulatedBackend {
    state: Arc<Mutex<State>>,
}

fn failure(message: impl Into<String>) -> BackendFailure {
    BackendFailure::new(message)
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Services requests until every sender is dropped.
    pub fn spawn(&self, mut requests: mpsc::Receiver<BackendRequest>) -> JoinHandle<()> {
        let backend = self.clone();
        tokio::spawn(async move {
            while let Some(request) = requests.recv().await {
                let result = backend.execute(request.context, request.command);
                // The requester may have stopped caring.
                let _ = request.reply.send(result);
            }
        })
    }

    /// Makes inserts at `location` come back empty.
    pub fn reject_location(&self, location: impl Into<String>) {
        self.state.lock().invalid_locations.insert(location.into());
    }

    pub fn accept_location(&self, location: &str) {
        self.state.lock().invalid_locations.remove(location);
    }

    /// Rejects conditions that mention `symbol`.
    pub fn reject_condition(&self, symbol: impl Into<String>) {
        self.state.lock().rejected_conditions.push(symbol.into());
    }

    /// Breakpoints in `file` are created pending until the file is loaded.
    pub fn pending_file(&self, file: impl Into<String>) {
        self.state.lock().pending_files.insert(file.into());
    }

    /// Makes every command called `name` (see [`Command::name`]) fail.
    pub fn fail_command(&self, name: &'static str) {
        self.state.lock().failing.insert(name);
    }

    pub fn heal_command(&self, name: &'static str) {
        self.state.lock().failing.remove(name);
    }

    pub fn breakpoints(&self, context: TargetContext) -> Vec<TargetBreakpointData> {
        self.state
            .lock()
            .breakpoints
            .get(&context)
            .map(|bps| bps.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contexts(&self) -> Vec<TargetContext> {
        self.state.lock().breakpoints.keys().copied().collect()
    }

    pub fn get(&self, context: TargetContext, number: &str) -> Option<TargetBreakpointData> {
        let number: u32 = number.parse().ok()?;
        self.state
            .lock()
            .breakpoints
            .get(&context)?
            .get(&number)
            .cloned()
    }

    /// Every command received so far, in order.
    pub fn log(&self) -> Vec<(TargetContext, Command)> {
        self.state.lock().log.clone()
    }

    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }

    /// Number of commands called `name` received so far.
    pub fn count(&self, name: &str) -> usize {
        self.state
            .lock()
            .log
            .iter()
            .filter(|(_, command)| command.name() == name)
            .count()
    }

    /// Creates a breakpoint the way a user typing into the debugger console
    /// would. Returns the new record, to be reported as a notification.
    pub fn console_insert(
        &self,
        context: TargetContext,
        location: &str,
        thread: ThreadScope,
    ) -> TargetBreakpointData {
        let command = InsertCommand {
            flavor: Some(InsertFlavor::Break),
            location: location.to_owned(),
            thread,
            ..Default::default()
        };
        let mut state = self.state.lock();
        Self::create(&mut state, context, &command)
    }

    /// Deletes a breakpoint behind everybody's back.
    pub fn console_delete(&self, context: TargetContext, number: &str) -> bool {
        let Ok(number) = number.parse::<u32>() else {
            return false;
        };
        self.state
            .lock()
            .breakpoints
            .get_mut(&context)
            .is_some_and(|bps| bps.remove(&number).is_some())
    }

    /// Edits a breakpoint behind everybody's back and returns the result.
    pub fn console_modify<F>(&self, context: TargetContext, number: &str, f: F) -> Option<TargetBreakpointData>
    where
        F: FnOnce(&mut TargetBreakpointData),
    {
        let number: u32 = number.parse().ok()?;
        let mut state = self.state.lock();
        let data = state.breakpoints.get_mut(&context)?.get_mut(&number)?;
        f(data);
        Some(data.clone())
    }

    /// Resolves pending breakpoints in `file`, as if a library containing
    /// it was loaded. Returns the updated records.
    pub fn load_file(&self, file: &str) -> Vec<(TargetContext, TargetBreakpointData)> {
        let mut state = self.state.lock();
        state.pending_files.remove(file);
        let mut resolved = Vec::new();
        for (context, bps) in state.breakpoints.iter_mut() {
            for data in bps.values_mut().filter(|data| data.pending) {
                let location = data
                    .original_location
                    .as_deref()
                    .map(parse_location)
                    .unwrap_or_default();
                if location.file.as_deref() == Some(file) {
                    data.pending = false;
                    data.file = location.file;
                    data.line = location.line;
                    data.function = location.function;
                    resolved.push((*context, data.clone()));
                }
            }
        }
        resolved
    }

    fn create(state: &mut State, context: TargetContext, command: &InsertCommand) -> TargetBreakpointData {
        state.last_number += 1;
        let number = state.last_number;
        let mut data = TargetBreakpointData {
            number: number.to_string(),
            condition: command.condition.clone().unwrap_or_default(),
            ignore_count: command.ignore_count,
            enabled: true,
            thread: command.thread,
            groups: vec![format!("i{}", context.id())],
            pass_count: command.pass_count,
            commands: command.commands.clone(),
            printf: command.printf.clone(),
            ..Default::default()
        };
        data.kind = match command.flavor.unwrap_or(InsertFlavor::Break) {
            InsertFlavor::Break => TargetKind::Breakpoint {
                hardware: command.hardware,
                temporary: command.temporary,
            },
            InsertFlavor::Watch => TargetKind::Watchpoint {
                access: command.access,
            },
            InsertFlavor::Trace => TargetKind::Tracepoint,
            InsertFlavor::Dprintf => TargetKind::DynamicPrintf,
        };
        if matches!(data.kind, TargetKind::Watchpoint { .. }) {
            data.expression = Some(command.location.clone());
        } else {
            let location = parse_location(&command.location);
            data.original_location = Some(command.location.clone());
            let pending = location
                .file
                .as_ref()
                .is_some_and(|file| state.pending_files.contains(file));
            if pending {
                data.pending = true;
            } else {
                data.file = location.file;
                data.line = location.line;
                data.function = location.function;
                data.address = location.address;
            }
        }
        state
            .breakpoints
            .entry(context)
            .or_default()
            .insert(number, data.clone());
        data
    }

    fn execute(&self, context: TargetContext, command: Command) -> Result<Reply, BackendFailure> {
        let mut state = self.state.lock();
        state.log.push((context, command.clone()));
        if state.failing.contains(command.name()) {
            return Err(failure(format!("{} failed", command.name())));
        }

        match command {
            Command::Insert(insert) => {
                if state.invalid_locations.contains(&insert.location) {
                    return Ok(Reply::Inserted(InsertOutcome::Empty));
                }
                if let Some(condition) = &insert.condition {
                    Self::check_condition(&state, condition)?;
                }
                let data = Self::create(&mut state, context, &insert);
                Ok(Reply::Inserted(InsertOutcome::Resolved(vec![data])))
            }
            Command::InsertCatchpoint(CatchCommand {
                event,
                args,
                condition,
                ignore_count,
            }) => {
                state.last_number += 1;
                let number = state.last_number;
                let data = TargetBreakpointData {
                    number: number.to_string(),
                    kind: TargetKind::Catchpoint { event },
                    catch_args: args,
                    condition: condition.unwrap_or_default(),
                    ignore_count,
                    enabled: true,
                    groups: vec![format!("i{}", context.id())],
                    ..Default::default()
                };
                state
                    .breakpoints
                    .entry(context)
                    .or_default()
                    .insert(number, data.clone());
                Ok(Reply::Inserted(InsertOutcome::Resolved(vec![data])))
            }
            Command::Delete(numbers) => {
                let bps = Self::lookup(&mut state, context, &numbers)?;
                for number in numbers {
                    if let Ok(number) = number.parse::<u32>() {
                        bps.remove(&number);
                    }
                }
                Ok(Reply::Done)
            }
            Command::Enable(numbers) => Self::set_enabled(&mut state, context, &numbers, true),
            Command::Disable(numbers) => Self::set_enabled(&mut state, context, &numbers, false),
            Command::Condition { number, expression } => {
                Self::check_condition(&state, &expression)?;
                let bps = Self::lookup(&mut state, context, std::slice::from_ref(&number))?;
                if let Some(data) = number.parse::<u32>().ok().and_then(|n| bps.get_mut(&n)) {
                    data.condition = expression;
                }
                Ok(Reply::Done)
            }
            Command::IgnoreCount { number, count } => {
                let bps = Self::lookup(&mut state, context, std::slice::from_ref(&number))?;
                if let Some(data) = number.parse::<u32>().ok().and_then(|n| bps.get_mut(&n)) {
                    data.ignore_count = count;
                }
                Ok(Reply::Done)
            }
            Command::List => Ok(Reply::Listed(
                state
                    .breakpoints
                    .get(&context)
                    .map(|bps| bps.values().cloned().collect())
                    .unwrap_or_default(),
            )),
        }
    }

    fn check_condition(state: &State, expression: &str) -> Result<(), BackendFailure> {
        match state
            .rejected_conditions
            .iter()
            .find(|symbol| expression.contains(symbol.as_str()))
        {
            Some(symbol) => Err(failure(format!(
                "No symbol \"{}\" in current context.",
                symbol
            ))),
            None => Ok(()),
        }
    }

    /// The breakpoints of `context`, provided all of `numbers` exist there.
    fn lookup<'a>(
        state: &'a mut State,
        context: TargetContext,
        numbers: &[String],
    ) -> Result<&'a mut BTreeMap<u32, TargetBreakpointData>, BackendFailure> {
        let bps = state.breakpoints.entry(context).or_default();
        for number in numbers {
            let known = number.parse::<u32>().is_ok_and(|n| bps.contains_key(&n));
            if !known {
                return Err(failure(format!("No breakpoint number {}.", number)));
            }
        }
        Ok(bps)
    }

    fn set_enabled(
        state: &mut State,
        context: TargetContext,
        numbers: &[String],
        enabled: bool,
    ) -> Result<Reply, BackendFailure> {
        let bps = Self::lookup(state, context, numbers)?;
        for number in numbers {
            if let Some(data) = number.parse::<u32>().ok().and_then(|n| bps.get_mut(&n)) {
                data.enabled = enabled;
            }
        }
        Ok(Reply::Done)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::Backend;
    use crate::error::Error;

    const CTX: TargetContext = TargetContext::new(1);

    #[tokio::test]
    async fn simulated_backend_services_requests() {
        let (backend, requests) = Backend::channel(4);
        let simulated = SimulatedBackend::new();
        simulated.spawn(requests);

        let reply = backend
            .request(
                CTX,
                Command::Insert(InsertCommand {
                    flavor: Some(InsertFlavor::Break),
                    location: "main.c:42".into(),
                    ..Default::default()
                }),
            )
            .await
            .unwrap();
        let Reply::Inserted(InsertOutcome::Resolved(bps)) = reply else {
            panic!("unexpected reply to insert");
        };
        assert_eq!(bps[0].line, Some(42));
        assert!(bps[0].enabled);

        assert_eq!(
            backend.request(CTX, Command::Delete(vec!["9".into()])).await,
            Err(Error::Backend("No breakpoint number 9.".into()))
        );
        backend
            .request(CTX, Command::Disable(vec![bps[0].number.clone()]))
            .await
            .unwrap();
        assert!(!simulated.get(CTX, &bps[0].number).unwrap().enabled);
        assert_eq!(simulated.count("insert"), 1);
    }

    #[test]
    fn pending_breakpoints_resolve_on_load() {
        let simulated = SimulatedBackend::new();
        simulated.pending_file("libfoo.c");
        let data = simulated.console_insert(CTX, "libfoo.c:17", ThreadScope::All);
        assert!(data.pending);
        assert_eq!(data.line, None);
        let resolved = simulated.load_file("libfoo.c");
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].1.line, Some(17));
        assert!(!resolved[0].1.pending);
    }
}
