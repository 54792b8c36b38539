/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Formatting and parsing of backend location strings.

use crate::attrs::AttrKey;
use crate::attrs::AttrValue;
use crate::attrs::Attributes;

/// A location string split into its parts.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Location {
    pub file: Option<String>,
    pub line: Option<u32>,
    pub function: Option<String>,
    pub address: Option<u64>,
}

/// Parses a decimal or `0x`-prefixed hexadecimal number.
pub fn parse_number(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

fn quote_file(file: &str) -> String {
    if file.contains(char::is_whitespace) {
        format!("\"{}\"", file)
    } else {
        file.to_owned()
    }
}

/// Builds the location string of an insert command. An explicit address wins,
/// then `file:function`, `file:line`, a bare function, and finally a raw
/// numeric location which is treated as an address.
pub fn format_location(attrs: &Attributes) -> Option<String> {
    if let Some(AttrValue::Int(addr)) = attrs.get(AttrKey::Address) {
        return Some(format!("*0x{:x}", addr));
    }

    let file = attrs
        .non_empty_text(AttrKey::ResolvedPath)
        .or_else(|| attrs.non_empty_text(AttrKey::FileName));
    let function = attrs.non_empty_text(AttrKey::Function);
    let line = attrs.int(AttrKey::Line).filter(|l| *l > 0);

    match (file, function, line) {
        (Some(file), Some(function), _) => Some(format!("{}:{}", quote_file(file), function)),
        (Some(file), None, Some(line)) => Some(format!("{}:{}", quote_file(file), line)),
        (None, Some(function), _) => Some(function.to_owned()),
        _ => attrs
            .non_empty_text(AttrKey::Address)
            .filter(|raw| parse_number(raw).is_some())
            .map(|raw| format!("*{}", raw.trim())),
    }
}

/// Splits a location string produced by [`format_location`] (or typed into
/// the backend console) back into its parts.
pub fn parse_location(location: &str) -> Location {
    let location = location.trim();
    if let Some(addr) = location.strip_prefix('*') {
        return Location {
            address: parse_number(addr),
            ..Default::default()
        };
    }

    let (file, rest) = if let Some(quoted) = location.strip_prefix('"') {
        match quoted.split_once("\":") {
            Some((file, rest)) => (Some(file), rest),
            None => (None, location),
        }
    } else {
        match location.rsplit_once(':') {
            Some((file, rest)) if !file.is_empty() && !file.ends_with(':') => (Some(file), rest),
            _ => (None, location),
        }
    };

    match rest.parse::<u32>() {
        Ok(line) => Location {
            file: file.map(str::to_owned),
            line: Some(line),
            ..Default::default()
        },
        Err(_) => Location {
            file: file.map(str::to_owned),
            function: Some(rest.to_owned()).filter(|f| !f.is_empty()),
            ..Default::default()
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::breakpoint::BreakpointKind;

    #[test]
    fn address_wins() {
        let attrs = Attributes::new(BreakpointKind::Address)
            .with(AttrKey::Address, 0x4005d0i64)
            .with(AttrKey::FileName, "main.c")
            .with(AttrKey::Line, 4u32);
        assert_eq!(format_location(&attrs).as_deref(), Some("*0x4005d0"));
    }

    #[test]
    fn file_function_before_file_line() {
        let attrs = Attributes::new(BreakpointKind::Function)
            .with(AttrKey::ResolvedPath, "/src/main.c")
            .with(AttrKey::Function, "main")
            .with(AttrKey::Line, 4u32);
        assert_eq!(format_location(&attrs).as_deref(), Some("/src/main.c:main"));

        let attrs = Attributes::new(BreakpointKind::Line)
            .with(AttrKey::ResolvedPath, "/src/main.c")
            .with(AttrKey::FileName, "/home/me/main.c")
            .with(AttrKey::Line, 42u32);
        assert_eq!(format_location(&attrs).as_deref(), Some("/src/main.c:42"));
    }

    #[test]
    fn bare_function_and_raw_numbers() {
        let attrs = Attributes::new(BreakpointKind::Function).with(AttrKey::Function, "abort");
        assert_eq!(format_location(&attrs).as_deref(), Some("abort"));

        let attrs = Attributes::new(BreakpointKind::Address).with(AttrKey::Address, "0x1000");
        assert_eq!(format_location(&attrs).as_deref(), Some("*0x1000"));

        let attrs = Attributes::new(BreakpointKind::Address).with(AttrKey::Address, "nope");
        assert_eq!(format_location(&attrs), None);
    }

    #[test]
    fn files_with_spaces_are_quoted() {
        let attrs = Attributes::new(BreakpointKind::Line)
            .with(AttrKey::FileName, "/my src/a b.c")
            .with(AttrKey::Line, 3u32);
        let loc = format_location(&attrs).unwrap();
        assert_eq!(loc, "\"/my src/a b.c\":3");
        assert_eq!(
            parse_location(&loc),
            Location {
                file: Some("/my src/a b.c".into()),
                line: Some(3),
                ..Default::default()
            }
        );
    }

    #[test]
    fn parse_forms() {
        assert_eq!(parse_location("*0x10").address, Some(0x10));
        assert_eq!(parse_location("main.c:42").line, Some(42));
        assert_eq!(parse_location("main.c:run").function.as_deref(), Some("run"));
        let loc = parse_location("main");
        assert_eq!(loc.file, None);
        assert_eq!(loc.function.as_deref(), Some("main"));
        let loc = parse_location("ns::run");
        assert_eq!(loc.file, None);
        assert_eq!(loc.function.as_deref(), Some("ns::run"));
    }
}
