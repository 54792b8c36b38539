/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::collections::BTreeSet;

use crate::attrs::AttrKey;
use crate::attrs::Attributes;
use crate::breakpoint::BreakpointKind;
use crate::context::ExecutionContext;
use crate::context::TargetContext;
use crate::context::ThreadScope;
use crate::platform::ThreadFilter;

/// Thread scopes a platform breakpoint needs in `context`.
///
/// Without a filter the breakpoint applies to all threads. A filter that
/// names nothing in `context` excludes the context entirely (empty set). A
/// filter naming a container covers all of its threads.
pub fn extract_threads(context: TargetContext, filter: Option<&ThreadFilter>) -> BTreeSet<ThreadScope> {
    let Some(filter) = filter else {
        return BTreeSet::from([ThreadScope::All]);
    };
    let entries: Vec<&ExecutionContext> = filter.iter().filter(|ec| ec.context() == context).collect();
    if entries
        .iter()
        .any(|ec| matches!(ec, ExecutionContext::Container { .. }))
    {
        return BTreeSet::from([ThreadScope::All]);
    }
    entries.into_iter().map(ExecutionContext::scope).collect()
}

/// Enabled state a target breakpoint should have.
pub fn effective_enabled(kind: BreakpointKind, attrs: &Attributes, manager_enabled: bool) -> bool {
    attrs.enabled() && (manager_enabled || kind.ignores_manager_enablement())
}

/// Translates platform attributes into the attributes of one target
/// breakpoint for `scope`. Only the keys meaningful for `kind` are carried
/// over, and the resolved path replaces the host file name.
pub fn convert_to_target(
    kind: BreakpointKind,
    attrs: &Attributes,
    scope: ThreadScope,
    manager_enabled: bool,
) -> Attributes {
    let mut target = Attributes::new(kind)
        .with(AttrKey::Enabled, effective_enabled(kind, attrs, manager_enabled))
        .with(AttrKey::Thread, scope);
    let copy = |target: &mut Attributes, key: AttrKey| {
        if let Some(value) = attrs.get(key) {
            target.insert(key, value.clone());
        }
    };
    copy(&mut target, AttrKey::Condition);
    copy(&mut target, AttrKey::IgnoreCount);

    let file = attrs
        .non_empty_text(AttrKey::ResolvedPath)
        .or_else(|| attrs.non_empty_text(AttrKey::FileName));
    let copy_location = |target: &mut Attributes| {
        if let Some(file) = file {
            target.insert(AttrKey::FileName, file);
        }
        copy(target, AttrKey::Line);
        copy(target, AttrKey::Function);
        copy(target, AttrKey::Address);
    };

    match kind {
        BreakpointKind::Line | BreakpointKind::Function | BreakpointKind::Address => {
            copy_location(&mut target);
            copy(&mut target, AttrKey::Hardware);
            copy(&mut target, AttrKey::Temporary);
        }
        BreakpointKind::Watch => {
            copy(&mut target, AttrKey::Expression);
            copy(&mut target, AttrKey::Access);
        }
        BreakpointKind::Tracepoint => {
            copy_location(&mut target);
            copy(&mut target, AttrKey::PassCount);
            copy(&mut target, AttrKey::Commands);
        }
        BreakpointKind::DynamicPrintf => {
            copy_location(&mut target);
            copy(&mut target, AttrKey::PrintfString);
        }
        BreakpointKind::Catchpoint => {
            copy(&mut target, AttrKey::CatchEvent);
            copy(&mut target, AttrKey::CatchArgs);
        }
    }
    target
}

#[cfg(test)]
mod test {
    use super::*;

    const CTX: TargetContext = TargetContext::new(1);
    const OTHER: TargetContext = TargetContext::new(2);

    #[test]
    fn thread_extraction() {
        assert_eq!(extract_threads(CTX, None), BTreeSet::from([ThreadScope::All]));

        let filter = ThreadFilter::from([
            ExecutionContext::thread(CTX, 1, 3),
            ExecutionContext::thread(CTX, 1, 4),
        ]);
        assert_eq!(
            extract_threads(CTX, Some(&filter)),
            BTreeSet::from([ThreadScope::Thread(3), ThreadScope::Thread(4)])
        );
        assert!(extract_threads(OTHER, Some(&filter)).is_empty());

        let filter = ThreadFilter::from([
            ExecutionContext::container(CTX, 1),
            ExecutionContext::thread(CTX, 1, 4),
        ]);
        assert_eq!(
            extract_threads(CTX, Some(&filter)),
            BTreeSet::from([ThreadScope::All])
        );
    }

    #[test]
    fn conversion_uses_resolved_path() {
        let attrs = Attributes::new(BreakpointKind::Line)
            .with(AttrKey::FileName, "/home/me/main.c")
            .with(AttrKey::ResolvedPath, "/build/main.c")
            .with(AttrKey::Line, 42u32)
            .with(AttrKey::Condition, "i > 3")
            .with(AttrKey::PrintfString, "ignored");
        let target = convert_to_target(BreakpointKind::Line, &attrs, ThreadScope::Thread(2), true);
        assert_eq!(target.text(AttrKey::FileName), Some("/build/main.c"));
        assert_eq!(target.thread(), ThreadScope::Thread(2));
        assert_eq!(target.condition(), "i > 3");
        assert!(!target.contains(AttrKey::PrintfString));
        assert!(!target.contains(AttrKey::ResolvedPath));
    }

    #[test]
    fn manager_enablement_spares_tracepoints() {
        let attrs = Attributes::new(BreakpointKind::Tracepoint).with(AttrKey::Enabled, true);
        assert!(effective_enabled(BreakpointKind::Tracepoint, &attrs, false));
        assert!(effective_enabled(BreakpointKind::DynamicPrintf, &attrs, false));
        assert!(!effective_enabled(BreakpointKind::Line, &attrs, false));
        let disabled = attrs.with(AttrKey::Enabled, false);
        assert!(!effective_enabled(BreakpointKind::Tracepoint, &disabled, true));
    }
}
