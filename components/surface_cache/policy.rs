/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Per-frame cache-mode eligibility.
//!
//! Everything here is a pure function of the node, the scene graph and the
//! frame's policy inputs, so that the same evaluation can be replayed in
//! tests and never observes scheduler-internal state.

use base::surface::{CacheMode, DeviceClass, SpecialLayerFlags, SurfaceNodeKind};
use log::trace;

use crate::scene::{SceneGraph, SurfaceNode};

/// How the asynchronous cache schedules: one focused window at a time
/// (phone) or many resizable windows at once (desktop).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SchedulerMode {
    SingleWindow,
    MultiWindow,
}

/// Map the device class to a scheduling mode. Tablets are the hybrid case,
/// resolved by whether free-form multi-window is active.
pub fn mode_for(device_class: DeviceClass, free_multi_window: bool) -> SchedulerMode {
    match device_class {
        DeviceClass::Phone => SchedulerMode::SingleWindow,
        DeviceClass::Desktop => SchedulerMode::MultiWindow,
        DeviceClass::Tablet => {
            if free_multi_window {
                SchedulerMode::MultiWindow
            } else {
                SchedulerMode::SingleWindow
            }
        },
    }
}

/// System gesture/animation context for the current frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct SceneState {
    pub rotation_changed: bool,
    pub recents: bool,
    pub mission_center: bool,
    pub split_screen: bool,
    pub snapshot_rotation: bool,
}

/// The inputs the eligibility decision needs beyond node and scene.
#[derive(Clone, Copy)]
pub struct EligibilityContext {
    pub mode: SchedulerMode,
    pub scene_state: SceneState,
    pub widget_cache_enabled: bool,
    /// An ancestor of the node is animating this frame.
    pub ancestor_animating: bool,
    /// A control-plane animation event disables caching for this window.
    pub app_has_disable_animation: bool,
    /// The limit on concurrently cached non-focused windows is reached.
    pub window_threshold_exceeded: bool,
}

fn leash_contains_app_window(scene: &SceneGraph, node: &SurfaceNode) -> bool {
    node.children.iter().any(|child| {
        scene
            .get(*child)
            .is_some_and(|child| child.kind == SurfaceNodeKind::AppWindow)
    })
}

/// Whether any surface directly under a leash window is transparent. A
/// non-leash node answers for itself.
fn subtree_has_transparency(scene: &SceneGraph, node: &SurfaceNode) -> bool {
    if node.kind == SurfaceNodeKind::LeashWindow {
        node.children.iter().any(|child| {
            scene
                .get(*child)
                .is_some_and(|child| child.is_transparent)
        })
    } else {
        node.is_transparent
    }
}

/// A transparent subtree sitting above a visible filter cannot be cached:
/// the cached image would bake in whatever was behind it.
fn has_transparent_surface_with_filter(scene: &SceneGraph, node: &SurfaceNode) -> bool {
    node.child_has_visible_filter && subtree_has_transparency(scene, node)
}

fn query_assignable(scene: &SceneGraph, node: &SurfaceNode, rotation: bool) -> bool {
    if !node.is_first_level() {
        return false;
    }
    let assignable = !has_transparent_surface_with_filter(scene, node) &&
        !rotation &&
        !node.special_layers.contains(SpecialLayerFlags::PROTECTED);
    trace!(
        "assignable {:?}: {assignable} (rotation {rotation}, filter {})",
        node.id, node.child_has_visible_filter,
    );
    assignable
}

/// Single-window-mode caching of a whole window container during animation.
fn is_leash_window_cache(scene: &SceneGraph, node: &SurfaceNode, ctx: &EligibilityContext) -> bool {
    if ctx.mode != SchedulerMode::SingleWindow ||
        !node.is_first_level() ||
        node.kind != SurfaceNodeKind::LeashWindow ||
        ctx.app_has_disable_animation
    {
        return false;
    }
    if has_transparent_surface_with_filter(scene, node) {
        return false;
    }
    let rotating = ctx.scene_state.rotation_changed && !ctx.scene_state.snapshot_rotation;
    let wants_cache = if ctx.scene_state.recents {
        // In the recents gesture every window scales; only subtrees that
        // actually contain an application window are worth a worker.
        node.is_scaling && leash_contains_app_window(scene, node)
    } else {
        ctx.ancestor_animating
    };
    let wants_cache = wants_cache || node.cache_switch == crate::scene::SurfaceCacheSwitch::ForceEnable;
    wants_cache && !rotating
}

/// Multi-window-mode caching of non-focused windows.
fn is_nonfocus_window_cache(
    scene: &SceneGraph,
    node: &SurfaceNode,
    ctx: &EligibilityContext,
) -> bool {
    if ctx.mode != SchedulerMode::MultiWindow || !node.is_first_level() {
        return false;
    }
    if !node.kind.is_window() {
        return false;
    }
    if ctx.window_threshold_exceeded && !scene.is_focused(node.id) {
        return false;
    }
    // The focused window is what the user interacts with; re-rendering it a
    // frame late is visible. Cache it only while it animates.
    if scene.is_focused(node.id) && !ctx.ancestor_animating {
        return false;
    }
    // A leash window that lost its app window mid mission-center or
    // split-screen animation has nothing worth caching.
    if node.kind == SurfaceNodeKind::LeashWindow &&
        node.is_scaling &&
        !leash_contains_app_window(scene, node) &&
        (ctx.scene_state.mission_center || ctx.scene_state.split_screen)
    {
        return false;
    }
    query_assignable(scene, node, ctx.scene_state.rotation_changed)
}

/// Embedded-widget caching, phone only.
fn is_widget_cache(node: &SurfaceNode, ctx: &EligibilityContext) -> bool {
    ctx.widget_cache_enabled &&
        ctx.mode == SchedulerMode::SingleWindow &&
        node.kind == SurfaceNodeKind::Widget &&
        node.should_paint
}

/// Decide this frame's cache mode for one node. Pure; the scheduler applies
/// the outcome through its state-transition function.
pub fn evaluate(scene: &SceneGraph, node: &SurfaceNode, ctx: &EligibilityContext) -> CacheMode {
    if is_leash_window_cache(scene, node, ctx) {
        CacheMode::LeashWindow
    } else if is_nonfocus_window_cache(scene, node, ctx) {
        CacheMode::NonfocusWindow
    } else if is_widget_cache(node, ctx) {
        CacheMode::Widget
    } else {
        CacheMode::None
    }
}
