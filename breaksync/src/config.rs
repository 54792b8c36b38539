/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

use crate::error::Error;

/// Tunables of a [`crate::BreakpointSync`] instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Depth of the bounded backend request channel.
    pub request_queue_depth: usize,
    /// Depth of the sync engine's notification inbox.
    pub notification_queue_depth: usize,
    /// Number of gateway events buffered for slow subscribers.
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            request_queue_depth: 64,
            notification_queue_depth: 256,
            event_capacity: 1024,
        }
    }
}

impl Config {
    /// Reads a JSON configuration file. Missing fields take their defaults.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, Error> {
        let config: Config = serde_json::from_str(text)?;
        if config.request_queue_depth == 0
            || config.notification_queue_depth == 0
            || config.event_capacity == 0
        {
            return Err(Error::Config(String::from(
                "queue depths and event capacity must be non-zero",
            )));
        }
        Ok(config)
    }
}
