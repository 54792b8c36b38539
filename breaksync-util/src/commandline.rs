/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Common support for building the CLI of tools driving a breakpoint
//! synchronization service.

use std::io;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use breaksync::Config;
use chrono::Local;
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Parses a `KEY=VALUE` configuration override.
pub fn parse_override(s: &str) -> anyhow::Result<(String, String)> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("Invalid KEY=VALUE: no `=` found in `{}`", s))?;
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("Invalid KEY=VALUE: key is empty");
    }
    Ok((key.to_owned(), value.trim().to_owned()))
}

// Arguments shared by every tool: where to log and how to configure the
// service.
//
// NOTE: Do not change this to a doc comment, it would replace the tool's
// own about text.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, Parser)]
pub struct CommonArguments {
    /// Direct logging to a file.  This can also be set with the RUST_LOG_FILE environment
    /// variable, but the CLI flag takes precedence.
    #[clap(long = "log-file", value_name = "PATH", env = "RUST_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// JSON file holding the service configuration. Missing fields take their
    /// defaults.
    #[clap(long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Overrides one configuration field, e.g. `--set event_capacity=16`.
    /// Can be used multiple times.
    #[clap(
        long = "set",
        value_name = "KEY=VALUE",
        value_parser = parse_override,
        num_args = 1
    )]
    pub overrides: Vec<(String, String)>,
}

impl CommonArguments {
    /// Loads the configuration file, if any, and applies the overrides on top.
    pub fn load_config(&self) -> anyhow::Result<Config> {
        let base = match &self.config {
            Some(path) => Config::from_path(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => Config::default(),
        };
        if self.overrides.is_empty() {
            return Ok(base);
        }

        let mut value = serde_json::to_value(&base)?;
        let fields = value
            .as_object_mut()
            .context("configuration does not serialize to an object")?;
        for (key, raw) in &self.overrides {
            if !fields.contains_key(key) {
                anyhow::bail!("Unknown configuration field `{}`", key);
            }
            let parsed = serde_json::from_str(raw)
                .unwrap_or_else(|_| serde_json::Value::String(raw.clone()));
            fields.insert(key.clone(), parsed);
        }
        Config::from_json(&value.to_string()).context("Invalid configuration override")
    }

    /// Installs the global tracing subscriber. Logs go to the file named by
    /// `--log-file`, or to stderr. The returned guard flushes the file
    /// writer when dropped.
    pub fn init_tracing(&self) -> Option<WorkerGuard> {
        fn set_subscriber_with_writer<
            T: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
        >(
            writer: T,
        ) {
            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::from_default_env())
                .with_writer(writer)
                .finish();
            if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!(" [breaksync] WARNING: unable to set tracing subscriber: {}", err);
            }
        }

        self.log_file
            .as_ref()
            .and_then(|lf| {
                let parent = lf.parent()?;
                let orig_filename = lf.file_name()?.to_os_string();
                let mut filename = orig_filename.clone();

                for _ in 0..100 {
                    if Path::new(parent).join(&filename).exists() {
                        filename = orig_filename.clone();
                        filename.push(format!("{}", Local::now().format(".%Y%m%d.%H%M%S.%f")));
                    } else {
                        break;
                    }
                }

                if Path::new(parent).join(&filename).exists() {
                    eprintln!(
                        " [breaksync] WARNING: could not open log file, falling back to stderr"
                    );
                    None
                } else {
                    let file_writer = tracing_appender::rolling::never(parent, &filename);
                    let (file_writer, guard) = tracing_appender::non_blocking(file_writer);

                    eprintln!(" [breaksync] Logging to file at {:?}", parent.join(&filename));
                    set_subscriber_with_writer(file_writer);
                    Some(guard)
                }
            })
            .or_else(|| {
                set_subscriber_with_writer(io::stderr);
                None
            })
    }
}
