/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

#![doc = include_str!("../../README.md")]
#![deny(rustdoc::broken_intra_doc_links)]

mod attrs;
mod backend;
mod breakpoint;
mod config;
mod context;
mod error;
pub mod gateway;
pub mod identity;
pub mod installer;
mod location;
mod platform;
mod service;
pub mod sync;
pub mod testing;

pub use attrs::*;
pub use backend::*;
pub use breakpoint::*;
pub use config::*;
pub use context::*;
pub use error::*;
pub use location::*;
pub use platform::*;
pub use service::*;

pub use gateway::BreakpointGateway;
pub use gateway::GatewayEvent;
pub use gateway::TargetDelta;
pub use installer::InstallationManager;
pub use sync::SyncEngine;
pub use sync::SyncHandle;

/// Required for `impl SourceLookup for MyLookup` blocks.
pub use async_trait::async_trait;
