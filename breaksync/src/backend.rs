/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Requests sent to the debugger backend and notifications it sends back.
//!
//! The transport itself lives elsewhere: whoever owns the receiving end of
//! the request channel turns each [`BackendRequest`] into protocol traffic
//! and answers on the enclosed reply sender once the backend responds.

use serde::Deserialize;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::oneshot;

use crate::breakpoint::TargetBreakpointData;
use crate::breakpoint::WatchAccess;
use crate::context::ThreadScope;
use crate::context::TargetContext;
use crate::error::Error;

/// Flavor of a location-based insert command.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertFlavor {
    Break,
    Watch,
    Trace,
    Dprintf,
}

/// Arguments of a location-based insert.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InsertCommand {
    pub flavor: Option<InsertFlavor>,
    /// Location, or the watched expression for watchpoints.
    pub location: String,
    pub condition: Option<String>,
    pub ignore_count: u32,
    pub thread: ThreadScope,
    pub hardware: bool,
    pub temporary: bool,
    pub access: WatchAccess,
    /// Dynamic printf format and arguments.
    pub printf: Option<String>,
    pub pass_count: u32,
    pub commands: Vec<String>,
}

/// Arguments of a catch-event insert.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatchCommand {
    pub event: String,
    pub args: Vec<String>,
    pub condition: Option<String>,
    pub ignore_count: u32,
}

/// Abstract backend commands.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Insert(InsertCommand),
    InsertCatchpoint(CatchCommand),
    Delete(Vec<String>),
    Enable(Vec<String>),
    Disable(Vec<String>),
    Condition { number: String, expression: String },
    IgnoreCount { number: String, count: u32 },
    List,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Insert(_) => "insert",
            Command::InsertCatchpoint(_) => "catch",
            Command::Delete(_) => "delete",
            Command::Enable(_) => "enable",
            Command::Disable(_) => "disable",
            Command::Condition { .. } => "condition",
            Command::IgnoreCount { .. } => "ignore",
            Command::List => "list",
        }
    }
}

/// Result of an insert. The backend may answer an insert of an unusable
/// location with success and no breakpoint at all, which is kept as its own
/// variant instead of being inferred from an empty list.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertOutcome {
    Resolved(Vec<TargetBreakpointData>),
    Empty,
}

/// A successful reply.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    Done,
    Inserted(InsertOutcome),
    Listed(Vec<TargetBreakpointData>),
}

/// An error reply.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct BackendFailure {
    pub message: String,
}

impl BackendFailure {
    pub fn new(message: impl Into<String>) -> Self {
        BackendFailure {
            message: message.into(),
        }
    }
}

/// A request for the backend, answered through `reply`.
#[derive(Debug)]
pub struct BackendRequest {
    pub context: TargetContext,
    pub command: Command,
    pub reply: oneshot::Sender<Result<Reply, BackendFailure>>,
}

/// Breakpoint notifications originating in the backend: console commands,
/// automatic removals, hit count changes, or a full snapshot.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakpointNotification {
    Created {
        context: Option<TargetContext>,
        data: TargetBreakpointData,
    },
    Modified {
        context: Option<TargetContext>,
        data: TargetBreakpointData,
    },
    Deleted {
        context: Option<TargetContext>,
        number: String,
    },
    Resynchronize {
        context: Option<TargetContext>,
        breakpoints: Vec<TargetBreakpointData>,
    },
}

impl BreakpointNotification {
    pub fn name(&self) -> &'static str {
        match self {
            BreakpointNotification::Created { .. } => "created",
            BreakpointNotification::Modified { .. } => "modified",
            BreakpointNotification::Deleted { .. } => "deleted",
            BreakpointNotification::Resynchronize { .. } => "resynchronize",
        }
    }
}

/// Sending half of the backend request channel.
#[derive(Clone, Debug)]
pub struct Backend {
    request_tx: mpsc::Sender<BackendRequest>,
}

impl Backend {
    pub fn new(request_tx: mpsc::Sender<BackendRequest>) -> Self {
        Backend { request_tx }
    }

    /// Creates a backend handle together with the receiver the transport
    /// has to service.
    pub fn channel(depth: usize) -> (Self, mpsc::Receiver<BackendRequest>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (Backend::new(tx), rx)
    }

    /// Sends a command and waits for its reply. Other work keeps running
    /// while the reply is outstanding.
    pub async fn request(&self, context: TargetContext, command: Command) -> Result<Reply, Error> {
        let (reply, reply_rx) = oneshot::channel();
        tracing::trace!(%context, command = command.name(), "backend request");
        self.request_tx
            .send(BackendRequest {
                context,
                command,
                reply,
            })
            .await
            .map_err(|_| Error::SessionTerminated)?;
        let reply = reply_rx.await.map_err(|_| Error::ReplyDropped)?;
        Ok(reply?)
    }

    pub fn is_closed(&self) -> bool {
        self.request_tx.is_closed()
    }
}
