/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Helpers shared by the command-line tools built on breaksync.

pub mod commandline;

pub use commandline::CommonArguments;
