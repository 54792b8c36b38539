/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Attribute bags describing a breakpoint, and deltas between two bags.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::breakpoint::BreakpointKind;
use crate::breakpoint::WatchAccess;
use crate::context::ThreadScope;

/// Attribute keys. Platform breakpoints use the user-facing keys; the
/// installation manager adds `ResolvedPath` and `ThreadScopes`, and the
/// backend form of a single target breakpoint carries `Thread`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrKey {
    Kind,
    /// Host source file.
    FileName,
    /// Debugger-visible source file.
    ResolvedPath,
    Line,
    Function,
    Address,
    /// Watched expression.
    Expression,
    Access,
    Condition,
    IgnoreCount,
    Enabled,
    Hardware,
    Temporary,
    /// Effective thread set for one context.
    ThreadScopes,
    /// Thread scope of one target breakpoint.
    Thread,
    PrintfString,
    Commands,
    PassCount,
    CatchEvent,
    CatchArgs,
}

impl AttrKey {
    /// Changing one of these keys changes which backend breakpoints must
    /// exist, so the breakpoint has to be reinstalled rather than patched.
    pub fn is_critical(&self) -> bool {
        match self {
            AttrKey::Kind
            | AttrKey::FileName
            | AttrKey::ResolvedPath
            | AttrKey::Line
            | AttrKey::Function
            | AttrKey::Address
            | AttrKey::Expression
            | AttrKey::Access
            | AttrKey::Hardware
            | AttrKey::Temporary
            | AttrKey::ThreadScopes
            | AttrKey::Thread
            | AttrKey::PrintfString
            | AttrKey::Commands
            | AttrKey::PassCount
            | AttrKey::CatchEvent
            | AttrKey::CatchArgs => true,
            AttrKey::Condition | AttrKey::IgnoreCount | AttrKey::Enabled => false,
        }
    }
}

/// An attribute value.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Text(String),
    Kind(BreakpointKind),
    Access(WatchAccess),
    Scope(ThreadScope),
    Scopes(BTreeSet<ThreadScope>),
    List(Vec<String>),
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<u32> for AttrValue {
    fn from(v: u32) -> Self {
        AttrValue::Int(v.into())
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Text(v.to_owned())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Text(v)
    }
}

impl From<BreakpointKind> for AttrValue {
    fn from(v: BreakpointKind) -> Self {
        AttrValue::Kind(v)
    }
}

impl From<WatchAccess> for AttrValue {
    fn from(v: WatchAccess) -> Self {
        AttrValue::Access(v)
    }
}

impl From<ThreadScope> for AttrValue {
    fn from(v: ThreadScope) -> Self {
        AttrValue::Scope(v)
    }
}

impl From<BTreeSet<ThreadScope>> for AttrValue {
    fn from(v: BTreeSet<ThreadScope>) -> Self {
        AttrValue::Scopes(v)
    }
}

impl From<Vec<String>> for AttrValue {
    fn from(v: Vec<String>) -> Self {
        AttrValue::List(v)
    }
}

/// A bag of breakpoint attributes.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<AttrKey, AttrValue>);

impl Attributes {
    pub fn new(kind: BreakpointKind) -> Self {
        let mut attrs = Attributes::default();
        attrs.insert(AttrKey::Kind, kind);
        attrs
    }

    /// Builder-style insert.
    pub fn with(mut self, key: AttrKey, value: impl Into<AttrValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: AttrKey, value: impl Into<AttrValue>) -> Option<AttrValue> {
        self.0.insert(key, value.into())
    }

    pub fn remove(&mut self, key: AttrKey) -> Option<AttrValue> {
        self.0.remove(&key)
    }

    pub fn get(&self, key: AttrKey) -> Option<&AttrValue> {
        self.0.get(&key)
    }

    pub fn contains(&self, key: AttrKey) -> bool {
        self.0.contains_key(&key)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, AttrKey, AttrValue> {
        self.0.iter()
    }

    pub fn kind(&self) -> Option<BreakpointKind> {
        match self.get(AttrKey::Kind) {
            Some(AttrValue::Kind(kind)) => Some(*kind),
            _ => None,
        }
    }

    pub fn text(&self, key: AttrKey) -> Option<&str> {
        match self.get(key) {
            Some(AttrValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Like [`Attributes::text`], but treats empty strings as absent.
    pub fn non_empty_text(&self, key: AttrKey) -> Option<&str> {
        self.text(key).filter(|s| !s.trim().is_empty())
    }

    pub fn int(&self, key: AttrKey) -> Option<i64> {
        match self.get(key) {
            Some(AttrValue::Int(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn flag(&self, key: AttrKey) -> Option<bool> {
        match self.get(key) {
            Some(AttrValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn list(&self, key: AttrKey) -> Option<&[String]> {
        match self.get(key) {
            Some(AttrValue::List(l)) => Some(l.as_slice()),
            _ => None,
        }
    }

    pub fn access(&self) -> WatchAccess {
        match self.get(AttrKey::Access) {
            Some(AttrValue::Access(a)) => *a,
            _ => WatchAccess::default(),
        }
    }

    /// Enabled flag; breakpoints are enabled unless stated otherwise.
    pub fn enabled(&self) -> bool {
        self.flag(AttrKey::Enabled).unwrap_or(true)
    }

    pub fn condition(&self) -> &str {
        self.text(AttrKey::Condition).unwrap_or("")
    }

    pub fn ignore_count(&self) -> u32 {
        self.int(AttrKey::IgnoreCount)
            .and_then(|i| u32::try_from(i).ok())
            .unwrap_or(0)
    }

    /// Thread scope of a single target breakpoint.
    pub fn thread(&self) -> ThreadScope {
        match self.get(AttrKey::Thread) {
            Some(AttrValue::Scope(scope)) => *scope,
            _ => ThreadScope::All,
        }
    }

    /// Effective thread set; empty when the breakpoint is filtered out.
    pub fn thread_scopes(&self) -> BTreeSet<ThreadScope> {
        match self.get(AttrKey::ThreadScopes) {
            Some(AttrValue::Scopes(scopes)) => scopes.clone(),
            _ => BTreeSet::new(),
        }
    }

    /// Applies a delta: set values are written, cleared keys removed.
    pub fn apply(&mut self, delta: &Delta) {
        for (key, value) in delta.iter() {
            match value {
                Some(value) => {
                    self.0.insert(*key, value.clone());
                }
                None => {
                    self.0.remove(key);
                }
            }
        }
    }
}

impl FromIterator<(AttrKey, AttrValue)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (AttrKey, AttrValue)>>(iter: I) -> Self {
        Attributes(iter.into_iter().collect())
    }
}

/// Difference between two attribute bags. A `None` value is the explicit
/// "clear" sentinel for a key that was removed.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Delta(BTreeMap<AttrKey, Option<AttrValue>>);

impl Delta {
    pub fn new() -> Self {
        Delta::default()
    }

    pub fn set(&mut self, key: AttrKey, value: impl Into<AttrValue>) {
        self.0.insert(key, Some(value.into()));
    }

    pub fn clear(&mut self, key: AttrKey) {
        self.0.insert(key, None);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, key: AttrKey) -> bool {
        self.0.contains_key(&key)
    }

    /// `None` if the key is not part of the delta, `Some(None)` if the key
    /// is cleared.
    pub fn get(&self, key: AttrKey) -> Option<Option<&AttrValue>> {
        self.0.get(&key).map(|v| v.as_ref())
    }

    pub fn keys(&self) -> impl Iterator<Item = AttrKey> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, AttrKey, Option<AttrValue>> {
        self.0.iter()
    }

    /// Returns true if applying this delta requires reinstallation.
    pub fn is_critical(&self) -> bool {
        self.0.keys().any(AttrKey::is_critical)
    }

    /// Computes the delta that turns `old` into `new`: keys only in `new`
    /// or with a changed value are set, keys only in `old` are cleared.
    pub fn between(old: &Attributes, new: &Attributes) -> Self {
        let mut delta = Delta::new();
        for (key, value) in new.iter() {
            if old.get(*key) != Some(value) {
                delta.0.insert(*key, Some(value.clone()));
            }
        }
        for (key, _) in old.iter() {
            if !new.contains(*key) {
                delta.0.insert(*key, None);
            }
        }
        delta
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn line_bp(line: u32) -> Attributes {
        Attributes::new(BreakpointKind::Line)
            .with(AttrKey::FileName, "/src/main.c")
            .with(AttrKey::Line, line)
            .with(AttrKey::Enabled, true)
    }

    #[test]
    fn delta_of_identical_bags_is_empty() {
        assert!(Delta::between(&line_bp(42), &line_bp(42)).is_empty());
    }

    #[test]
    fn changed_line_is_critical() {
        let delta = Delta::between(&line_bp(42), &line_bp(50));
        assert_eq!(delta.len(), 1);
        assert_eq!(
            delta.get(AttrKey::Line),
            Some(Some(&AttrValue::Int(50)))
        );
        assert!(delta.is_critical());
    }

    #[test]
    fn removed_condition_is_cleared_and_not_critical() {
        let old = line_bp(42).with(AttrKey::Condition, "i > 3");
        let new = line_bp(42).with(AttrKey::IgnoreCount, 2u32);
        let delta = Delta::between(&old, &new);

        assert_eq!(delta.get(AttrKey::Condition), Some(None));
        assert_eq!(
            delta.get(AttrKey::IgnoreCount),
            Some(Some(&AttrValue::Int(2)))
        );
        assert!(!delta.is_critical());

        let mut patched = old.clone();
        patched.apply(&delta);
        assert_eq!(patched, new);
    }

    #[test]
    fn thread_scope_change_is_critical() {
        let old = line_bp(42).with(
            AttrKey::ThreadScopes,
            BTreeSet::from([ThreadScope::All]),
        );
        let new = line_bp(42).with(
            AttrKey::ThreadScopes,
            BTreeSet::from([ThreadScope::Thread(2), ThreadScope::Thread(3)]),
        );
        assert!(Delta::between(&old, &new).is_critical());
    }

    #[test]
    fn typed_accessors() {
        let attrs = line_bp(7)
            .with(AttrKey::Condition, "  ")
            .with(AttrKey::IgnoreCount, -4i64);
        assert_eq!(attrs.kind(), Some(BreakpointKind::Line));
        assert_eq!(attrs.int(AttrKey::Line), Some(7));
        assert_eq!(attrs.non_empty_text(AttrKey::Condition), None);
        assert_eq!(attrs.ignore_count(), 0);
        assert!(attrs.enabled());
        assert_eq!(attrs.thread(), ThreadScope::All);
        assert!(attrs.thread_scopes().is_empty());
    }
}
