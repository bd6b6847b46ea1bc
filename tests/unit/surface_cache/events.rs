/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::time::{Duration, Instant};

use base::id::ProcessId;
use surface_cache::{AnimationEventInfo, FrameEvents};

use crate::common::node_id;

fn unlock_scenes() -> Vec<String> {
    vec![String::from("password-unlock"), String::from("launcher-scroll")]
}

fn fling_scenes() -> Vec<String> {
    vec![String::from("app-list-fling")]
}

fn event(unique_id: u64, pid: u32, scene: &str) -> AnimationEventInfo {
    AnimationEventInfo {
        unique_id,
        process: ProcessId(pid),
        scene_id: String::from(scene),
    }
}

#[test]
fn matching_scene_allows_skipping_first_wait() {
    let mut events = FrameEvents::new();
    events.register(event(1, 10, "password-unlock-to-home"));
    events.prepare_frame(&unlock_scenes());
    assert!(events.can_skip_first_wait());
}

#[test]
fn unrelated_scene_does_not_allow_skipping() {
    let mut events = FrameEvents::new();
    events.register(event(1, 10, "window-minimize"));
    events.prepare_frame(&unlock_scenes());
    assert!(!events.can_skip_first_wait());
}

#[test]
fn completed_events_age_out() {
    let mut events = FrameEvents::new();
    events.register(event(1, 10, "password-unlock"));
    events.complete(1, "password-unlock");

    // Immediately after the stop the event still lingers.
    events.prepare_frame(&unlock_scenes());
    assert!(events.can_skip_first_wait());

    std::thread::sleep(Duration::from_millis(170));
    events.prepare_frame(&unlock_scenes());
    assert!(!events.can_skip_first_wait(), "stopped event must age out");
    assert!(events.is_empty());
}

#[test]
fn fling_event_disables_caching_for_established_windows() {
    let mut events = FrameEvents::new();
    events.register(event(1, 10, "app-list-fling"));
    events.prepare_frame(&[]);

    let node = node_id(10, 100);
    // Enabled long before the animation started: the event targets it.
    let enabled_at = Instant::now().checked_sub(Duration::from_millis(400));
    assert!(events.disables_cache_for(node, &[ProcessId(10)], enabled_at, &fling_scenes()));
    // The decision sticks for the event's lifetime.
    assert!(events.disables_cache_for(node, &[ProcessId(10)], enabled_at, &fling_scenes()));
}

#[test]
fn fling_event_spares_windows_that_just_enabled() {
    let mut events = FrameEvents::new();
    events.register(event(1, 10, "app-list-fling"));
    events.prepare_frame(&[]);

    // Caching enabled after (or right around) the animation start is part
    // of the same gesture and stays enabled.
    let node = node_id(10, 101);
    let enabled_at = Some(Instant::now());
    assert!(!events.disables_cache_for(node, &[ProcessId(10)], enabled_at, &fling_scenes()));
}

#[test]
fn fling_event_ignores_other_processes() {
    let mut events = FrameEvents::new();
    events.register(event(1, 10, "app-list-fling"));
    events.prepare_frame(&[]);

    let node = node_id(11, 100);
    let enabled_at = Instant::now().checked_sub(Duration::from_millis(400));
    assert!(!events.disables_cache_for(node, &[ProcessId(11)], enabled_at, &fling_scenes()));
}
