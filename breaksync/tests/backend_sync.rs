/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Backend-side edits pulled up into the platform model.

use breaksync::testing::run_tokio_test;
use breaksync::testing::Harness;
use breaksync::testing::StaticSourceLookup;
use breaksync::AttrKey;
use breaksync::Attributes;
use breaksync::BreakpointKind;
use breaksync::BreakpointNotification;
use breaksync::Config;
use breaksync::ExecutionContext;
use breaksync::PlatformModel;
use breaksync::TargetBreakpointRef;
use breaksync::TargetContext;
use breaksync::ThreadFilter;
use breaksync::ThreadScope;

const CTX: TargetContext = TargetContext::new(1);
const OTHER: TargetContext = TargetContext::new(2);

fn harness() -> Harness {
    Harness::new(&Config::default(), StaticSourceLookup::new())
}

fn line_bp(line: u32) -> Attributes {
    Attributes::new(BreakpointKind::Line)
        .with(AttrKey::FileName, "/src/main.c")
        .with(AttrKey::Line, line)
}

async fn deliver(h: &Harness, notification: BreakpointNotification) {
    h.sync.notify(notification).await.unwrap();
    h.sync.flush().await.unwrap();
}

#[tokio::test]
async fn console_breakpoint_becomes_a_platform_breakpoint() {
    let h = harness();
    h.start(CTX).await.unwrap();

    let data = h.backend.console_insert(CTX, "/src/main.c:30", ThreadScope::All);
    deliver(&h, BreakpointNotification::Created { context: None, data }).await;

    let ids = h.model.ids();
    assert_eq!(ids.len(), 1);
    let attrs = h.model.entry(ids[0]).unwrap().attributes;
    assert_eq!(attrs.kind(), Some(BreakpointKind::Line));
    assert_eq!(attrs.text(AttrKey::FileName), Some("/src/main.c"));
    assert_eq!(attrs.int(AttrKey::Line), Some(30));

    // Adopted rather than inserted a second time.
    assert_eq!(h.backend.count("insert"), 0);
    assert_eq!(h.backend.breakpoints(CTX).len(), 1);
    assert_eq!(h.model.install_count(ids[0]), 1);
    h.check_invariants().unwrap();
}

#[tokio::test]
async fn console_breakpoint_on_one_thread_gets_a_thread_filter() {
    let h = harness();
    h.start(CTX).await.unwrap();

    let data = h
        .backend
        .console_insert(CTX, "/src/main.c:31", ThreadScope::Thread(7));
    deliver(&h, BreakpointNotification::Created { context: None, data }).await;

    let id = h.model.ids()[0];
    let filter = h.model.entry(id).unwrap().filter.unwrap();
    assert_eq!(filter, ThreadFilter::from([ExecutionContext::thread(CTX, 1, 7)]));
    assert_eq!(h.backend.count("insert"), 0);
    h.check_invariants().unwrap();
}

#[tokio::test]
async fn created_breakpoint_matching_a_platform_breakpoint_is_reconciled() {
    let h = harness();
    h.start(CTX).await.unwrap();
    h.backend.reject_location("run");
    let id = h.model.add(
        Attributes::new(BreakpointKind::Function)
            .with(AttrKey::Function, "run")
            .with(AttrKey::Enabled, false),
    );
    h.sync.breakpoint_added(id).await;
    assert_eq!(h.model.problems(id).len(), 1);

    h.backend.accept_location("run");
    let data = h.backend.console_insert(CTX, "run", ThreadScope::All);
    deliver(&h, BreakpointNotification::Created { context: None, data }).await;

    assert_eq!(h.model.ids(), vec![id]);
    let entry = h.model.entry(id).unwrap();
    // The backend created it enabled, which wins.
    assert!(entry.attributes.enabled());
    assert_eq!(entry.install_count, 1);
    assert!(entry.problems.is_empty());
    assert_eq!(h.sync.installer().targets_of(CTX, id).len(), 1);
    h.check_invariants().unwrap();
}

#[tokio::test]
async fn adopted_console_breakpoint_follows_disabled_manager() {
    let h = harness();
    h.contexts.add(CTX);
    let id = h.model.add(line_bp(30));
    h.sync.manager_enablement_changed(false).await;

    let data = h.backend.console_insert(CTX, "/src/main.c:30", ThreadScope::All);
    let number = data.number.clone();
    deliver(&h, BreakpointNotification::Created { context: None, data }).await;
    assert_eq!(h.model.ids(), vec![id]);

    h.sync.context_started(CTX).await.unwrap();
    h.sync.flush().await.unwrap();

    let targets = h.sync.installer().targets_of(CTX, id);
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].number, number);
    assert_eq!(h.backend.count("insert"), 0);
    assert_eq!(h.backend.count("disable"), 1);
    assert!(!h.backend.get(CTX, &number).unwrap().enabled);
    assert!(h.model.entry(id).unwrap().attributes.enabled());
    assert_eq!(h.model.install_count(id), 1);
    h.check_invariants().unwrap();
}

#[tokio::test]
async fn claimed_console_breakpoint_follows_disabled_manager() {
    let h = harness();
    h.start(CTX).await.unwrap();
    h.sync.manager_enablement_changed(false).await;
    h.backend.reject_location("run");
    let id = h
        .model
        .add(Attributes::new(BreakpointKind::Function).with(AttrKey::Function, "run"));
    h.sync.breakpoint_added(id).await;
    assert_eq!(h.model.problems(id).len(), 1);

    h.backend.accept_location("run");
    let data = h.backend.console_insert(CTX, "run", ThreadScope::All);
    let number = data.number.clone();
    deliver(&h, BreakpointNotification::Created { context: None, data }).await;

    assert_eq!(h.model.ids(), vec![id]);
    assert_eq!(h.sync.installer().targets_of(CTX, id).len(), 1);
    assert!(!h.backend.get(CTX, &number).unwrap().enabled);
    assert!(h.model.entry(id).unwrap().attributes.enabled());

    h.sync.manager_enablement_changed(true).await;
    assert!(h.backend.get(CTX, &number).unwrap().enabled);
    h.check_invariants().unwrap();
}

#[tokio::test]
async fn console_modification_updates_the_platform_breakpoint() {
    let h = harness();
    h.start(CTX).await.unwrap();
    let id = h.model.add(line_bp(40));
    h.sync.breakpoint_added(id).await;
    let target = h.sync.installer().targets_of(CTX, id)[0].clone();
    h.backend.clear_log();

    let data = h
        .backend
        .console_modify(CTX, &target.number, |data| {
            data.condition = "  n > 3 ".into();
            data.ignore_count = 4;
            data.enabled = false;
            data.hit_count = 2;
        })
        .unwrap();
    deliver(&h, BreakpointNotification::Modified { context: Some(CTX), data }).await;

    let entry = h.model.entry(id).unwrap();
    assert_eq!(entry.attributes.condition(), "n > 3");
    assert_eq!(entry.attributes.ignore_count(), 4);
    assert!(!entry.attributes.enabled());
    assert_eq!(entry.hit_count, 2);
    // Pulling state up does not echo commands back down.
    assert!(h.backend.log().is_empty());
    let cached = h.sync.installer().cached_attributes(CTX, id).unwrap();
    assert_eq!(cached.condition(), "n > 3");
}

#[tokio::test]
async fn console_modification_propagates_to_other_contexts() {
    let h = harness();
    h.start(CTX).await.unwrap();
    h.start(OTHER).await.unwrap();
    let id = h.model.add(line_bp(41));
    h.sync.breakpoint_added(id).await;
    let here = h.sync.installer().targets_of(CTX, id)[0].clone();
    let there = h.sync.installer().targets_of(OTHER, id)[0].clone();

    let data = h
        .backend
        .console_modify(CTX, &here.number, |data| data.condition = "k == 1".into())
        .unwrap();
    deliver(&h, BreakpointNotification::Modified { context: Some(CTX), data }).await;

    assert_eq!(h.backend.get(OTHER, &there.number).unwrap().condition, "k == 1");
    assert_eq!(h.backend.count("condition"), 1);
    h.check_invariants().unwrap();
}

#[tokio::test]
async fn modification_before_tracking_is_replayed() {
    let h = harness();
    h.contexts.add(CTX);

    let data = h.backend.console_insert(CTX, "/src/main.c:30", ThreadScope::All);
    let number = data.number.clone();
    deliver(&h, BreakpointNotification::Created { context: None, data }).await;
    let id = h.model.ids()[0];
    assert_eq!(h.model.install_count(id), 0);

    let data = h
        .backend
        .console_modify(CTX, &number, |data| data.condition = "x > 1".into())
        .unwrap();
    deliver(&h, BreakpointNotification::Modified { context: None, data }).await;
    assert_eq!(h.model.entry(id).unwrap().attributes.condition(), "");

    h.sync.context_started(CTX).await.unwrap();
    h.sync.flush().await.unwrap();
    assert_eq!(h.model.entry(id).unwrap().attributes.condition(), "x > 1");
    assert_eq!(h.model.install_count(id), 1);
    assert_eq!(h.backend.count("insert"), 0);
    h.check_invariants().unwrap();
}

#[tokio::test]
async fn deleting_a_filtered_thread_narrows_the_filter() {
    let h = harness();
    h.start(CTX).await.unwrap();
    let filter = ThreadFilter::from([
        ExecutionContext::thread(CTX, 1, 3),
        ExecutionContext::thread(CTX, 1, 4),
    ]);
    let id = h.model.add_filtered(line_bp(50), filter);
    h.sync.breakpoint_added(id).await;
    let installer = h.sync.installer();
    let third = installer
        .targets_of(CTX, id)
        .into_iter()
        .find(|target| {
            h.backend.get(CTX, &target.number).unwrap().thread == ThreadScope::Thread(3)
        })
        .unwrap();

    h.backend.console_delete(CTX, &third.number);
    deliver(
        &h,
        BreakpointNotification::Deleted {
            context: Some(CTX),
            number: third.number.clone(),
        },
    )
    .await;

    assert_eq!(
        h.model.entry(id).unwrap().filter,
        Some(ThreadFilter::from([ExecutionContext::thread(CTX, 1, 4)]))
    );
    let targets = installer.targets_of(CTX, id);
    assert_eq!(targets.len(), 1);
    assert_eq!(
        h.backend.get(CTX, &targets[0].number).unwrap().thread,
        ThreadScope::Thread(4)
    );
    assert_eq!(h.backend.breakpoints(CTX).len(), 1);
    assert!(!h.sync.gateway().is_cached(&third));
    h.check_invariants().unwrap();

    // Deleting the last thread removes the breakpoint altogether.
    let last = targets[0].clone();
    let deletes = h.backend.count("delete");
    h.backend.console_delete(CTX, &last.number);
    deliver(
        &h,
        BreakpointNotification::Deleted {
            context: Some(CTX),
            number: last.number,
        },
    )
    .await;
    assert!(h.model.ids().is_empty());
    assert!(installer.targets_of(CTX, id).is_empty());
    assert_eq!(h.backend.count("delete"), deletes);
}

#[tokio::test]
async fn deleting_an_unfiltered_breakpoint_removes_it() {
    let h = harness();
    h.start(CTX).await.unwrap();
    let id = h.model.add(line_bp(60));
    h.sync.breakpoint_added(id).await;
    let target = h.sync.installer().targets_of(CTX, id)[0].clone();

    h.backend.console_delete(CTX, &target.number);
    deliver(
        &h,
        BreakpointNotification::Deleted {
            context: None,
            number: target.number.clone(),
        },
    )
    .await;

    assert!(h.model.ids().is_empty());
    assert_eq!(h.backend.count("delete"), 0);
    assert!(!h.sync.gateway().is_cached(&target));
    assert_eq!(h.model.underflows(), 0);
}

#[tokio::test]
async fn resynchronizing_twice_changes_nothing_the_second_time() {
    let h = harness();
    h.start(CTX).await.unwrap();
    let id = h.model.add(line_bp(10).with(AttrKey::Enabled, false));
    h.sync.breakpoint_added(id).await;
    h.backend
        .console_insert(CTX, "/src/main.c:30", ThreadScope::All);

    let listing = h.backend.breakpoints(CTX);
    deliver(
        &h,
        BreakpointNotification::Resynchronize {
            context: Some(CTX),
            breakpoints: listing.clone(),
        },
    )
    .await;
    assert_eq!(h.model.ids().len(), 2);
    h.check_invariants().unwrap();

    let before = h.model.ids();
    let cached = h.sync.gateway().cached(CTX);
    h.backend.clear_log();
    deliver(
        &h,
        BreakpointNotification::Resynchronize {
            context: Some(CTX),
            breakpoints: listing,
        },
    )
    .await;
    assert_eq!(h.model.ids(), before);
    assert_eq!(h.sync.gateway().cached(CTX), cached);
    assert!(h.backend.log().is_empty());
    assert!(!h.model.entry(id).unwrap().attributes.enabled());
}

#[tokio::test]
async fn resynchronizing_notices_vanished_breakpoints() {
    let h = harness();
    h.start(CTX).await.unwrap();
    let id = h.model.add(line_bp(11));
    h.sync.breakpoint_added(id).await;

    deliver(
        &h,
        BreakpointNotification::Resynchronize {
            context: Some(CTX),
            breakpoints: Vec::new(),
        },
    )
    .await;
    assert!(h.model.ids().is_empty());
    assert_eq!(h.model.underflows(), 0);
}

#[tokio::test]
async fn deleting_an_unowned_breakpoint_evicts_it() {
    let h = harness();
    h.contexts.add(CTX);
    let data = h.backend.console_insert(CTX, "/src/main.c:70", ThreadScope::All);
    let number = data.number.clone();
    deliver(&h, BreakpointNotification::Created { context: None, data }).await;
    assert_eq!(h.sync.gateway().cached(CTX).len(), 1);

    assert!(h.backend.console_delete(CTX, &number));
    deliver(&h, BreakpointNotification::Deleted { context: None, number }).await;
    assert!(h.sync.gateway().cached(CTX).is_empty());
    assert_eq!(h.backend.count("delete"), 0);
}

#[tokio::test]
async fn resynchronizing_retries_a_failed_delete() {
    let h = harness();
    h.start(CTX).await.unwrap();
    let id = h.model.add(line_bp(60));
    h.sync.breakpoint_added(id).await;
    let target = h.sync.installer().targets_of(CTX, id)[0].clone();

    h.backend.fail_command("delete");
    h.model.remove_breakpoint(id);
    h.sync.breakpoint_removed(id).await;
    assert!(h.sync.installer().owner(&target).is_none());
    assert_eq!(h.backend.breakpoints(CTX).len(), 1);

    h.backend.heal_command("delete");
    deliver(
        &h,
        BreakpointNotification::Resynchronize {
            context: Some(CTX),
            breakpoints: h.backend.breakpoints(CTX),
        },
    )
    .await;

    assert!(h.backend.breakpoints(CTX).is_empty());
    assert!(h.model.ids().is_empty());
    assert!(h.sync.gateway().cached(CTX).is_empty());
    assert_eq!(h.model.underflows(), 0);
    h.check_invariants().unwrap();
}

#[tokio::test]
async fn notifications_arriving_back_to_back_keep_their_order() {
    let h = harness();
    h.start(CTX).await.unwrap();

    let first = h.backend.console_insert(CTX, "/src/main.c:30", ThreadScope::All);
    let first_modified = h
        .backend
        .console_modify(CTX, &first.number, |data| data.condition = "x > 1".into())
        .unwrap();
    h.backend.console_insert(CTX, "/src/main.c:31", ThreadScope::All);
    let listing = h.backend.breakpoints(CTX);
    let second_modified = h
        .backend
        .console_modify(CTX, &listing[1].number, |data| data.condition = "y > 2".into())
        .unwrap();

    // The resynchronization creates the second breakpoint before the
    // modification queued behind it is looked at.
    for notification in [
        BreakpointNotification::Created {
            context: None,
            data: first,
        },
        BreakpointNotification::Modified {
            context: None,
            data: first_modified,
        },
        BreakpointNotification::Resynchronize {
            context: Some(CTX),
            breakpoints: listing,
        },
        BreakpointNotification::Modified {
            context: None,
            data: second_modified,
        },
    ] {
        h.sync.notify(notification).await.unwrap();
    }
    h.sync.flush().await.unwrap();

    let ids = h.model.ids();
    assert_eq!(ids.len(), 2);
    let condition_at = |line: i64| {
        ids.iter()
            .filter_map(|id| h.model.entry(*id))
            .find(|entry| entry.attributes.int(AttrKey::Line) == Some(line))
            .map(|entry| entry.attributes.condition().to_owned())
    };
    assert_eq!(condition_at(30).as_deref(), Some("x > 1"));
    assert_eq!(condition_at(31).as_deref(), Some("y > 2"));
    for id in &ids {
        assert_eq!(h.model.install_count(*id), 1);
    }
    assert_eq!(h.backend.count("insert"), 0);
    h.check_invariants().unwrap();
}

#[tokio::test]
async fn exited_context_sends_nothing_to_the_backend() {
    let h = harness();
    h.start(CTX).await.unwrap();
    h.start(OTHER).await.unwrap();
    let id = h.model.add(line_bp(70));
    h.sync.breakpoint_added(id).await;
    assert_eq!(h.model.install_count(id), 2);
    h.backend.clear_log();

    h.contexts.remove(CTX);
    h.sync.context_exited(CTX).await.unwrap();
    assert!(h.backend.log().is_empty());
    assert_eq!(h.model.install_count(id), 1);
    assert_eq!(h.sync.installer().tracked_contexts(), vec![OTHER]);
    h.check_invariants().unwrap();
}

#[tokio::test]
async fn terminated_session_sends_nothing_to_the_backend() {
    let h = harness();
    h.start(CTX).await.unwrap();
    h.start(OTHER).await.unwrap();
    let a = h.model.add(line_bp(80));
    let b = h.model.add(line_bp(81).with(AttrKey::Enabled, false));
    h.sync.breakpoint_added(a).await;
    h.sync.breakpoint_added(b).await;
    h.backend.clear_log();

    h.sync.session_terminated();
    assert!(h.backend.log().is_empty());
    assert_eq!(h.model.install_count(a), 0);
    assert_eq!(h.model.install_count(b), 0);
    assert!(h.sync.installer().tracked_contexts().is_empty());
    assert!(h.sync.gateway().cached(CTX).is_empty());
    assert_eq!(h.model.underflows(), 0);
}

#[test]
fn hits_are_reported_per_thread() {
    run_tokio_test(async {
        let h = harness();
        h.start(CTX).await.unwrap();
        let id = h.model.add(line_bp(90));
        h.sync.breakpoint_added(id).await;
        let target: TargetBreakpointRef = h.sync.installer().targets_of(CTX, id)[0].clone();

        let container = ExecutionContext::container(CTX, 1);
        let thread = ExecutionContext::thread(CTX, 1, 2);
        h.sync.context_suspended(thread, vec![target.clone()]);
        assert_eq!(h.sync.breakpoints_hit(&thread), vec![target.clone()]);
        assert!(h.sync.breakpoints_hit(&container).is_empty());

        h.sync.context_suspended(container, vec![target.clone()]);
        let sibling = ExecutionContext::thread(CTX, 1, 5);
        assert_eq!(h.sync.breakpoints_hit(&sibling), vec![target]);

        h.sync.context_resumed(&container);
        assert!(h.sync.breakpoints_hit(&thread).is_empty());
        assert!(h.sync.breakpoints_hit(&sibling).is_empty());
    })
}
