/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Kind-specific identity of breakpoints: deciding whether a backend
//! breakpoint is "the same" as a set of attributes, and synthesising
//! attributes for a backend breakpoint nobody asked for.

use std::path::Path;

use crate::attrs::AttrKey;
use crate::attrs::AttrValue;
use crate::attrs::Attributes;
use crate::breakpoint::BreakpointKind;
use crate::breakpoint::TargetBreakpointData;
use crate::breakpoint::TargetKind;
use crate::location::parse_location;
use crate::location::parse_number;
use crate::location::Location;

/// Compares two paths. When either side is only a file name (backends often
/// report relative names) the file names are compared instead.
pub fn same_file(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let (pa, pb) = (Path::new(a), Path::new(b));
    if pa.is_absolute() && pb.is_absolute() {
        return false;
    }
    pa.file_name().is_some() && pa.file_name() == pb.file_name()
}

/// Function names match exactly or up to an argument list the backend
/// appends, e.g. `run` matches `run(int)`.
fn same_function(requested: &str, reported: &str) -> bool {
    requested == reported
        || reported
            .strip_prefix(requested)
            .is_some_and(|rest| rest.starts_with('('))
}

/// The location the backend reports for a breakpoint, falling back to the
/// originally requested location string for what is missing (pending
/// breakpoints often carry nothing else).
pub fn reported_location(data: &TargetBreakpointData) -> Location {
    let original = data
        .original_location
        .as_deref()
        .map(parse_location)
        .unwrap_or_default();
    Location {
        file: data.file.clone().or(original.file),
        line: data.line.or(original.line),
        function: data.function.clone().or(original.function),
        address: data.address.or(original.address),
    }
}

fn requested_address(attrs: &Attributes) -> Option<u64> {
    match attrs.get(AttrKey::Address)? {
        AttrValue::Int(addr) => u64::try_from(*addr).ok(),
        AttrValue::Text(raw) => parse_number(raw),
        _ => None,
    }
}

/// Kind of platform breakpoint that best represents a backend breakpoint.
pub fn infer_kind(data: &TargetBreakpointData) -> BreakpointKind {
    match &data.kind {
        TargetKind::Watchpoint { .. } => BreakpointKind::Watch,
        TargetKind::Tracepoint => BreakpointKind::Tracepoint,
        TargetKind::DynamicPrintf => BreakpointKind::DynamicPrintf,
        TargetKind::Catchpoint { .. } => BreakpointKind::Catchpoint,
        TargetKind::Breakpoint { .. } => {
            if let Some(original) = data.original_location.as_deref() {
                let loc = parse_location(original);
                if loc.address.is_some() {
                    return BreakpointKind::Address;
                }
                if loc.function.is_some() {
                    return BreakpointKind::Function;
                }
                if loc.line.is_some() {
                    return BreakpointKind::Line;
                }
            }
            if data.line.is_some() && data.file.is_some() {
                BreakpointKind::Line
            } else if data.function.is_some() {
                BreakpointKind::Function
            } else {
                BreakpointKind::Address
            }
        }
    }
}

/// Returns true if `data` is the backend counterpart of `attrs`.
///
/// `file` is the path to compare the requested file against; pass `None`
/// to use the file the backend reported. Identity is kind specific: line
/// kinds compare file and line (or file and function), functions compare
/// the function name, addresses the address, watchpoints the expression and
/// access type, catchpoints the event.
pub fn matches(attrs: &Attributes, data: &TargetBreakpointData, file: Option<&str>) -> bool {
    let Some(kind) = attrs.kind() else {
        return false;
    };
    let reported = reported_location(data);
    let reported_file = file.map(str::to_owned).or(reported.file.clone());
    let requested_file = attrs
        .non_empty_text(AttrKey::ResolvedPath)
        .or_else(|| attrs.non_empty_text(AttrKey::FileName));
    let file_ok = match (requested_file, reported_file.as_deref()) {
        (None, _) => true,
        (Some(requested), Some(reported)) => same_file(requested, reported),
        (Some(_), None) => false,
    };
    let line_ok = || match (attrs.int(AttrKey::Line), reported.line) {
        (Some(requested), Some(reported)) => requested == i64::from(reported),
        _ => false,
    };
    let function_ok = || match (attrs.non_empty_text(AttrKey::Function), &reported.function) {
        (Some(requested), Some(reported)) => same_function(requested, reported),
        _ => false,
    };

    match kind {
        BreakpointKind::Line => {
            matches!(data.kind, TargetKind::Breakpoint { .. }) && file_ok && (line_ok() || function_ok())
        }
        BreakpointKind::Function => {
            matches!(data.kind, TargetKind::Breakpoint { .. }) && file_ok && function_ok()
        }
        BreakpointKind::Address => {
            matches!(data.kind, TargetKind::Breakpoint { .. })
                && requested_address(attrs).is_some()
                && requested_address(attrs) == reported.address
        }
        BreakpointKind::Watch => match &data.kind {
            TargetKind::Watchpoint { access } => {
                *access == attrs.access()
                    && attrs.non_empty_text(AttrKey::Expression).map(str::trim)
                        == data.expression.as_deref().map(str::trim)
            }
            _ => false,
        },
        BreakpointKind::Tracepoint => {
            data.kind == TargetKind::Tracepoint && file_ok && (line_ok() || function_ok())
        }
        BreakpointKind::DynamicPrintf => {
            data.kind == TargetKind::DynamicPrintf && file_ok && (line_ok() || function_ok())
        }
        BreakpointKind::Catchpoint => match &data.kind {
            TargetKind::Catchpoint { event } => attrs.text(AttrKey::CatchEvent) == Some(event),
            _ => false,
        },
    }
}

/// Attributes for a new platform breakpoint representing `data`. `local_file`
/// is the host file for the backend's path, when one was found.
pub fn platform_attributes(
    kind: BreakpointKind,
    data: &TargetBreakpointData,
    local_file: Option<&str>,
) -> Attributes {
    let reported = reported_location(data);
    let file = local_file.map(str::to_owned).or(reported.file.clone());

    let mut attrs = Attributes::new(kind).with(AttrKey::Enabled, data.enabled);
    if !data.condition.trim().is_empty() {
        attrs.insert(AttrKey::Condition, data.condition.clone());
    }
    if data.ignore_count > 0 {
        attrs.insert(AttrKey::IgnoreCount, data.ignore_count);
    }

    match kind {
        BreakpointKind::Line => {
            if let Some(file) = file {
                attrs.insert(AttrKey::FileName, file);
            }
            if let Some(line) = reported.line {
                attrs.insert(AttrKey::Line, line);
            }
        }
        BreakpointKind::Function => {
            let requested = data.original_location.as_deref().map(parse_location);
            let function = requested
                .as_ref()
                .and_then(|loc| loc.function.clone())
                .or(reported.function);
            if let Some(function) = function {
                attrs.insert(AttrKey::Function, function);
            }
            if requested.and_then(|loc| loc.file).is_some() {
                if let Some(file) = file {
                    attrs.insert(AttrKey::FileName, file);
                }
            }
        }
        BreakpointKind::Address => {
            if let Some(address) = reported.address.and_then(|a| i64::try_from(a).ok()) {
                attrs.insert(AttrKey::Address, address);
            }
        }
        BreakpointKind::Watch => {
            if let Some(expression) = &data.expression {
                attrs.insert(AttrKey::Expression, expression.clone());
            }
            if let TargetKind::Watchpoint { access } = data.kind {
                attrs.insert(AttrKey::Access, access);
            }
        }
        BreakpointKind::Tracepoint => {
            if let Some(file) = file {
                attrs.insert(AttrKey::FileName, file);
            }
            if let Some(line) = reported.line {
                attrs.insert(AttrKey::Line, line);
            }
            if data.pass_count > 0 {
                attrs.insert(AttrKey::PassCount, data.pass_count);
            }
            if !data.commands.is_empty() {
                attrs.insert(AttrKey::Commands, data.commands.clone());
            }
        }
        BreakpointKind::DynamicPrintf => {
            if let Some(file) = file {
                attrs.insert(AttrKey::FileName, file);
            }
            if let Some(line) = reported.line {
                attrs.insert(AttrKey::Line, line);
            }
            if let Some(printf) = &data.printf {
                attrs.insert(AttrKey::PrintfString, printf.clone());
            }
        }
        BreakpointKind::Catchpoint => {
            if let TargetKind::Catchpoint { event } = &data.kind {
                attrs.insert(AttrKey::CatchEvent, event.clone());
            }
            if !data.catch_args.is_empty() {
                attrs.insert(AttrKey::CatchArgs, data.catch_args.clone());
            }
        }
    }
    attrs
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::breakpoint::WatchAccess;

    fn line_data(file: &str, line: u32) -> TargetBreakpointData {
        TargetBreakpointData {
            number: "1".into(),
            file: Some(file.into()),
            line: Some(line),
            function: Some("main".into()),
            enabled: true,
            original_location: Some(format!("{}:{}", file, line)),
            ..Default::default()
        }
    }

    #[test]
    fn same_file_compares_names_for_relative_paths() {
        assert!(same_file("/a/main.c", "/a/main.c"));
        assert!(same_file("/a/main.c", "main.c"));
        assert!(!same_file("/a/main.c", "/b/main.c"));
        assert!(!same_file("/a/main.c", "util.c"));
    }

    #[test]
    fn line_identity() {
        let attrs = Attributes::new(BreakpointKind::Line)
            .with(AttrKey::FileName, "/src/main.c")
            .with(AttrKey::Line, 42u32);
        assert!(matches(&attrs, &line_data("/src/main.c", 42), None));
        assert!(!matches(&attrs, &line_data("/src/main.c", 43), None));
        assert!(!matches(&attrs, &line_data("/src/util.c", 42), None));
        // Host path compared against a caller-provided local path.
        assert!(matches(
            &attrs,
            &line_data("/build/main.c", 42),
            Some("/src/main.c")
        ));
    }

    #[test]
    fn function_identity_ignores_signature() {
        let attrs = Attributes::new(BreakpointKind::Function).with(AttrKey::Function, "run");
        let data = TargetBreakpointData {
            function: Some("run(int)".into()),
            original_location: Some("run".into()),
            ..Default::default()
        };
        assert!(matches(&attrs, &data, None));
        assert_eq!(infer_kind(&data), BreakpointKind::Function);
    }

    #[test]
    fn watch_identity_requires_same_access() {
        let attrs = Attributes::new(BreakpointKind::Watch)
            .with(AttrKey::Expression, "counter")
            .with(AttrKey::Access, WatchAccess::READ | WatchAccess::WRITE);
        let mut data = TargetBreakpointData {
            kind: TargetKind::Watchpoint {
                access: WatchAccess::READ | WatchAccess::WRITE,
            },
            expression: Some("counter".into()),
            ..Default::default()
        };
        assert!(matches(&attrs, &data, None));
        data.kind = TargetKind::Watchpoint {
            access: WatchAccess::WRITE,
        };
        assert!(!matches(&attrs, &data, None));
    }

    #[test]
    fn kinds_do_not_cross_match() {
        let attrs = Attributes::new(BreakpointKind::Tracepoint)
            .with(AttrKey::FileName, "/src/main.c")
            .with(AttrKey::Line, 42u32);
        assert!(!matches(&attrs, &line_data("/src/main.c", 42), None));
        let mut data = line_data("/src/main.c", 42);
        data.kind = TargetKind::Tracepoint;
        assert!(matches(&attrs, &data, None));
    }

    #[test]
    fn pending_breakpoint_uses_original_location() {
        let data = TargetBreakpointData {
            pending: true,
            original_location: Some("libfoo.c:17".into()),
            ..Default::default()
        };
        assert_eq!(infer_kind(&data), BreakpointKind::Line);
        let attrs = platform_attributes(BreakpointKind::Line, &data, None);
        assert_eq!(attrs.text(AttrKey::FileName), Some("libfoo.c"));
        assert_eq!(attrs.int(AttrKey::Line), Some(17));
        assert!(matches(&attrs, &data, None));
    }

    #[test]
    fn synthesized_attributes_round_trip_through_matching() {
        let mut data = line_data("/build/main.c", 42);
        data.condition = "x == 1".into();
        data.enabled = false;
        let attrs = platform_attributes(BreakpointKind::Line, &data, Some("/src/main.c"));
        assert_eq!(attrs.text(AttrKey::FileName), Some("/src/main.c"));
        assert_eq!(attrs.condition(), "x == 1");
        assert!(!attrs.enabled());
        assert!(matches(&attrs, &data, Some("/src/main.c")));
    }
}
