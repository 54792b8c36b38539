/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

/// Normalizes tracepoint actions into one action per entry.
///
/// Platform breakpoints keep actions either as a list or as a single
/// newline separated string, while the backend reports one action per
/// entry. Entries are split on newlines and trimmed, and empty ones dropped.
pub fn normalize_commands<S: AsRef<str>>(commands: &[S]) -> Vec<String> {
    commands
        .iter()
        .flat_map(|entry| entry.as_ref().lines())
        .map(str::trim)
        .filter(|action| !action.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Compares two action lists after normalization.
pub fn same_commands<A: AsRef<str>, B: AsRef<str>>(a: &[A], b: &[B]) -> bool {
    normalize_commands(a) == normalize_commands(b)
}
