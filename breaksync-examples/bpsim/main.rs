/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Replays a breakpoint scenario against a simulated debugger backend and
//! prints the resulting state of both sides as JSON.

mod scenario;

use std::path::PathBuf;

use anyhow::Context;
use breaksync::testing::Harness;
use breaksync::testing::StaticSourceLookup;
use breaksync_util::CommonArguments;
use clap::Parser;
use scenario::Runner;
use scenario::Scenario;

/// A tool to exercise breakpoint synchronization against a simulated backend.
#[derive(Parser, Debug)]
struct Opts {
    #[clap(flatten)]
    common: CommonArguments,

    /// Maps a host source prefix to the prefix the backend sees, as
    /// `HOST=BACKEND`. Can be used multiple times.
    #[clap(
        long = "path-map",
        value_name = "HOST=BACKEND",
        value_parser = breaksync_util::commandline::parse_override,
        num_args = 1
    )]
    path_maps: Vec<(String, String)>,

    /// Exit with an error if the final state breaks an invariant.
    #[clap(long)]
    strict: bool,

    /// Scenario file to replay.
    #[clap(value_name = "SCENARIO")]
    scenario: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Opts::parse();
    let log_guard = args.common.init_tracing();

    let config = args.common.load_config()?;
    let scenario = Scenario::from_path(&args.scenario)?;
    let lookup = args
        .path_maps
        .iter()
        .fold(StaticSourceLookup::new(), |lookup, (host, backend)| {
            lookup.with_prefix(host.as_str(), backend.as_str())
        });

    let mut runner = Runner::new(Harness::new(&config, lookup));
    runner.run(&scenario).await?;
    let report = runner.report();
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to render report")?
    );

    drop(log_guard); // Flush logs before exiting.
    if let (true, Some(violation)) = (args.strict, &report.invariants) {
        anyhow::bail!("Invariant violated: {}", violation);
    }
    Ok(())
}
