/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Control-plane animation events consumed by the eligibility pass.
//!
//! Window management reports scene animations (app open/close, list fling,
//! unlock transitions) as start/stop events. The scheduler uses them two
//! ways: certain scenes allow a dependent drawable to skip the first-frame
//! wait for a cache, and certain scenes disable window caching for the
//! process that is animating.

use std::time::{Duration, Instant};

use base::id::{NodeId, ProcessId};
use log::debug;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;

/// An event is dropped once its start is this old, whether or not a stop
/// arrived; animations that outlive this no longer influence eligibility.
const EVENT_START_TIMEOUT: Duration = Duration::from_millis(500);
/// After a stop, the event lingers briefly so a follow-up frame still sees
/// the animation winding down.
const EVENT_STOP_TIMEOUT: Duration = Duration::from_millis(150);
/// A node whose caching started at least this long before the event is the
/// one the event means to disable.
const EVENT_DISABLE_GAP: Duration = Duration::from_millis(100);

/// One scene-animation event as reported by the control plane.
#[derive(Clone, Debug)]
pub struct AnimationEventInfo {
    pub unique_id: u64,
    pub process: ProcessId,
    pub scene_id: String,
}

#[derive(Clone)]
struct AnimationEvent {
    info: AnimationEventInfo,
    started: Instant,
    stopped: Option<Instant>,
    /// Nodes whose window caching this event has disabled, so the decision
    /// sticks for the event's remaining lifetime.
    disabled_nodes: FxHashSet<NodeId>,
}

/// The event store. `register`/`complete` are called from the control-plane
/// thread; everything else runs on the render thread against the per-frame
/// copy taken by [`FrameEvents::prepare_frame`].
#[derive(Default)]
pub struct FrameEvents {
    global: Mutex<Vec<AnimationEvent>>,
    current: Vec<AnimationEvent>,
    can_skip_first_wait: bool,
}

impl FrameEvents {
    pub fn new() -> FrameEvents {
        FrameEvents::default()
    }

    /// An animation started. Called on the control-plane thread. A fresh
    /// event resets earlier events' disable decisions; the new animation may
    /// re-qualify the same windows.
    pub fn register(&self, info: AnimationEventInfo) {
        debug!(
            "animation event start: scene {} process {}",
            info.scene_id, info.process
        );
        let mut global = self.global.lock();
        for event in global.iter_mut() {
            event.disabled_nodes.clear();
        }
        global.push(AnimationEvent {
            info,
            started: Instant::now(),
            stopped: None,
            disabled_nodes: FxHashSet::default(),
        });
    }

    /// The animation with this id finished. The event is kept briefly so the
    /// tail of the animation still sees it.
    pub fn complete(&self, unique_id: u64, scene_id: &str) {
        let mut global = self.global.lock();
        if let Some(event) = global
            .iter_mut()
            .find(|event| event.info.unique_id == unique_id && event.info.scene_id == scene_id)
        {
            event.stopped = Some(Instant::now());
        }
    }

    /// Age out stale events and copy the live ones for this frame's
    /// eligibility decisions. Render thread, once per frame.
    pub fn prepare_frame(&mut self, skip_first_wait_scenes: &[String]) {
        let now = Instant::now();
        {
            let mut global = self.global.lock();
            global.retain(|event| {
                if let Some(stopped) = event.stopped {
                    if now.duration_since(stopped) > EVENT_STOP_TIMEOUT {
                        return false;
                    }
                }
                now.duration_since(event.started) <= EVENT_START_TIMEOUT
            });
            self.current = global.clone();
        }
        self.can_skip_first_wait = Self::any_skips_first_wait(&self.current, skip_first_wait_scenes);
    }

    fn any_skips_first_wait(events: &[AnimationEvent], scenes: &[String]) -> bool {
        events.iter().any(|event| {
            scenes
                .iter()
                .any(|scene| event.info.scene_id.contains(scene.as_str()))
        })
    }

    /// Whether a drawable with no cache yet may draw nothing this frame
    /// instead of blocking on its first cache job.
    pub fn can_skip_first_wait(&self) -> bool {
        self.can_skip_first_wait
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    /// Whether one of this frame's events disables window caching for the
    /// given node: either it already did so, or it names the node's process,
    /// the node enabled caching comfortably before the animation started,
    /// and its scene is in the configured disable list.
    pub fn disables_cache_for(
        &mut self,
        node: NodeId,
        processes: &[ProcessId],
        cache_enabled_at: Option<Instant>,
        disable_scenes: &[String],
    ) -> bool {
        if self.current.is_empty() || processes.is_empty() {
            return false;
        }
        for event in &mut self.current {
            if event.disabled_nodes.contains(&node) {
                return true;
            }
            if !processes.contains(&event.info.process) {
                continue;
            }
            let Some(enabled_at) = cache_enabled_at else {
                continue;
            };
            if enabled_at + EVENT_DISABLE_GAP >= event.started {
                continue;
            }
            if disable_scenes
                .iter()
                .any(|scene| event.info.scene_id.contains(scene.as_str()))
            {
                event.disabled_nodes.insert(node);
                // Record on the long-lived event too, so later frames that
                // re-copy it keep the node disabled.
                let mut global = self.global.lock();
                if let Some(global_event) = global.iter_mut().find(|global_event| {
                    global_event.info.unique_id == event.info.unique_id &&
                        global_event.info.scene_id == event.info.scene_id
                }) {
                    global_event.disabled_nodes.insert(node);
                }
                return true;
            }
        }
        false
    }
}
