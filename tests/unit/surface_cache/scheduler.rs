/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use base::id::NodeId;
use base::surface::{CacheMode, JobState};
use surface_cache::{SceneGraph, SchedulerConfig, SurfaceCacheScheduler};

use crate::common::{
    CountingRenderer, ManualPool, add_leash_with_app, make_node_static, phone_scene,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn new_scheduler() -> (SurfaceCacheScheduler, Arc<CountingRenderer>, ManualPool) {
    let scheduler = SurfaceCacheScheduler::new(SchedulerConfig::default());
    let renderer = Arc::new(CountingRenderer::new());
    let pool = ManualPool::new(&scheduler, renderer.clone());
    (scheduler, renderer, pool)
}

fn assert_exclusive_membership(scheduler: &SurfaceCacheScheduler) {
    let windows: HashSet<NodeId> = scheduler.pending_window_ids().into_iter().collect();
    let widgets: HashSet<NodeId> = scheduler.pending_widget_ids().into_iter().collect();
    let resets: HashSet<NodeId> = scheduler.pending_reset_ids().into_iter().collect();
    assert!(windows.is_disjoint(&widgets), "windows and widgets overlap");
    assert!(windows.is_disjoint(&resets), "windows and resets overlap");
    assert!(widgets.is_disjoint(&resets), "widgets and resets overlap");
}

/// Run one full cache round for a node: eligibility, post, worker, drain.
fn cache_one_round(
    scheduler: &mut SurfaceCacheScheduler,
    scene: &mut SceneGraph,
    pool: &ManualPool,
    id: NodeId,
) {
    scheduler.begin_frame();
    scheduler.update_cache_candidates(scene, id, true);
    scheduler.post_pending_jobs(scene, pool);
    pool.run_all();
    scheduler.process_completed_jobs(scene);
}

#[test]
fn leash_window_becomes_eligible_during_animation() {
    init_logging();
    let (mut scheduler, _renderer, _pool) = new_scheduler();
    let (mut scene, root) = phone_scene();
    let leash = add_leash_with_app(&mut scene, root, 7);

    scheduler.begin_frame();
    scheduler.update_cache_candidates(&mut scene, leash, true);

    assert_eq!(
        scene.get(leash).map(|node| node.cache_mode),
        Some(CacheMode::LeashWindow)
    );
    assert_eq!(scheduler.pending_window_ids(), vec![leash]);
    assert_exclusive_membership(&scheduler);
}

#[test]
fn no_animation_means_no_caching() {
    let (mut scheduler, _renderer, _pool) = new_scheduler();
    let (mut scene, root) = phone_scene();
    let leash = add_leash_with_app(&mut scene, root, 7);

    scheduler.begin_frame();
    scheduler.update_cache_candidates(&mut scene, leash, false);

    assert_eq!(scene.get(leash).map(|node| node.cache_mode), Some(CacheMode::None));
    assert!(scheduler.pending_window_ids().is_empty());
}

#[test]
fn single_writer_never_posts_a_doing_node_again() {
    init_logging();
    let (mut scheduler, _renderer, pool) = new_scheduler();
    let (mut scene, root) = phone_scene();
    let leash = add_leash_with_app(&mut scene, root, 7);

    scheduler.begin_frame();
    scheduler.update_cache_candidates(&mut scene, leash, true);
    scheduler.post_pending_jobs(&mut scene, &pool);
    assert_eq!(pool.posted_ids(), vec![leash]);
    assert_eq!(scheduler.processing_ids(), vec![leash]);

    // The job never finishes; the next frame re-requests caching.
    scheduler.begin_frame();
    scheduler.update_cache_candidates(&mut scene, leash, true);
    assert_eq!(scheduler.pending_window_ids(), vec![leash]);
    scheduler.post_pending_jobs(&mut scene, &pool);

    // Still exactly one post: a node already processing is never reposted.
    assert_eq!(pool.posted_ids(), vec![leash]);
}

#[test]
fn state_machine_disable_enable_cycle_keeps_one_record() {
    let (mut scheduler, _renderer, _pool) = new_scheduler();
    let (mut scene, root) = phone_scene();
    let leash = add_leash_with_app(&mut scene, root, 7);

    scheduler.state_change(&mut scene, leash, CacheMode::None);
    scheduler.state_change(&mut scene, leash, CacheMode::LeashWindow);
    scheduler.state_change(&mut scene, leash, CacheMode::None);
    scheduler.state_change(&mut scene, leash, CacheMode::LeashWindow);

    assert_eq!(scheduler.registry().len(), 1);
    assert_eq!(scheduler.pending_window_ids(), vec![leash]);
    assert!(scheduler.pending_reset_ids().is_empty());
    assert_exclusive_membership(&scheduler);
}

#[test]
fn mode_change_between_enabled_modes_reverts_to_disable() {
    let (mut scheduler, _renderer, _pool) = new_scheduler();
    let (mut scene, root) = phone_scene();
    let leash = add_leash_with_app(&mut scene, root, 7);

    scheduler.state_change(&mut scene, leash, CacheMode::LeashWindow);
    assert_eq!(scheduler.pending_window_ids(), vec![leash]);

    // A switch to a different enabled mode is not supported and must be
    // treated as a disable.
    scheduler.state_change(&mut scene, leash, CacheMode::Widget);
    assert_eq!(scene.get(leash).map(|node| node.cache_mode), Some(CacheMode::None));
    assert_eq!(scheduler.pending_reset_ids(), vec![leash]);
    assert!(scheduler.pending_window_ids().is_empty());
    assert!(scheduler.pending_widget_ids().is_empty());
    assert_exclusive_membership(&scheduler);
}

#[test]
fn purge_drops_static_cached_nodes() {
    init_logging();
    let (mut scheduler, _renderer, pool) = new_scheduler();
    let (mut scene, root) = phone_scene();
    let leash = add_leash_with_app(&mut scene, root, 7);

    cache_one_round(&mut scheduler, &mut scene, &pool, leash);
    assert_eq!(scheduler.node_job_state(leash), JobState::Done);
    assert!(scheduler.has_completed_texture(leash));

    // Next frame: eligible again, but the content is static and nothing
    // visible is dirty, so the pending entry is redundant.
    scheduler.begin_frame();
    scheduler.update_cache_candidates(&mut scene, leash, true);
    make_node_static(&mut scene, leash);
    scheduler.purge_pending_nodes(&scene);

    assert!(scheduler.pending_window_ids().is_empty());
}

#[test]
fn purge_keeps_dirty_nodes() {
    let (mut scheduler, _renderer, pool) = new_scheduler();
    let (mut scene, root) = phone_scene();
    let leash = add_leash_with_app(&mut scene, root, 7);

    cache_one_round(&mut scheduler, &mut scene, &pool, leash);

    // Dirty and non-static: the refresh is not redundant.
    scheduler.begin_frame();
    scheduler.update_cache_candidates(&mut scene, leash, true);
    scheduler.purge_pending_nodes(&scene);

    assert_eq!(scheduler.pending_window_ids(), vec![leash]);
}

#[test]
fn priority_orders_focused_then_uncached_then_cached() {
    init_logging();
    let (mut scheduler, _renderer, pool) = new_scheduler();
    let (mut scene, root) = phone_scene();
    let focused = add_leash_with_app(&mut scene, root, 2);
    let uncached = add_leash_with_app(&mut scene, root, 3);
    let cached = add_leash_with_app(&mut scene, root, 4);
    scene.focus_leash_window = Some(focused);

    // Give `cached` a committed texture first.
    cache_one_round(&mut scheduler, &mut scene, &pool, cached);
    let already_posted = pool.posted_ids().len();

    scheduler.begin_frame();
    for id in [cached, uncached, focused] {
        scheduler.update_cache_candidates(&mut scene, id, true);
    }
    scheduler.post_pending_jobs(&mut scene, &pool);

    let posted = pool.posted_ids()[already_posted..].to_vec();
    assert_eq!(posted, vec![focused, uncached, cached]);
}

#[test]
fn priority_breaks_ties_by_z_order_higher_first() {
    let (mut scheduler, _renderer, pool) = new_scheduler();
    let (mut scene, root) = phone_scene();
    let low = add_leash_with_app(&mut scene, root, 2);
    let high = add_leash_with_app(&mut scene, root, 3);
    if let Some(node) = scene.get_mut(low) {
        node.z_order = 1;
    }
    if let Some(node) = scene.get_mut(high) {
        node.z_order = 5;
    }

    scheduler.begin_frame();
    scheduler.update_cache_candidates(&mut scene, low, true);
    scheduler.update_cache_candidates(&mut scene, high, true);
    scheduler.post_pending_jobs(&mut scene, &pool);

    assert_eq!(pool.posted_ids(), vec![high, low]);
}

#[test]
fn purged_node_never_posts_while_focused_node_posts_first() {
    init_logging();
    let (mut scheduler, _renderer, pool) = new_scheduler();
    let (mut scene, root) = phone_scene();
    let node_a = add_leash_with_app(&mut scene, root, 2);
    let node_b = add_leash_with_app(&mut scene, root, 3);
    scene.focus_leash_window = Some(node_b);

    // A has a valid cached texture and static, clean content.
    cache_one_round(&mut scheduler, &mut scene, &pool, node_a);
    let already_posted = pool.posted_ids().len();

    scheduler.begin_frame();
    scheduler.update_cache_candidates(&mut scene, node_a, true);
    scheduler.update_cache_candidates(&mut scene, node_b, true);
    make_node_static(&mut scene, node_a);
    scheduler.post_pending_jobs(&mut scene, &pool);

    let posted = pool.posted_ids()[already_posted..].to_vec();
    assert_eq!(posted, vec![node_b]);
    assert!(scheduler.pending_window_ids().is_empty());
}

#[test]
fn reset_waits_for_inflight_job_to_finish() {
    init_logging();
    let (mut scheduler, _renderer, pool) = new_scheduler();
    let (mut scene, root) = phone_scene();
    let leash = add_leash_with_app(&mut scene, root, 7);

    scheduler.begin_frame();
    scheduler.update_cache_candidates(&mut scene, leash, true);
    scheduler.post_pending_jobs(&mut scene, &pool);

    // The worker picked the job up but has not finished.
    let holder = scheduler.holder_for(leash).expect("holder exists");
    holder.set_state(JobState::Doing);
    pool.discard_jobs();

    // The node disables while the job is in flight: it must park in
    // pending-reset, not release resources.
    scheduler.begin_frame();
    scheduler.update_cache_candidates(&mut scene, leash, false);
    assert_eq!(scheduler.pending_reset_ids(), vec![leash]);
    assert_exclusive_membership(&scheduler);

    scheduler.process_completed_jobs(&mut scene);
    assert_eq!(
        scheduler.pending_reset_ids(),
        vec![leash],
        "reset deferred while the job is still running"
    );

    // The job reaches a terminal state; the next drain releases everything.
    holder.set_state_terminal(scheduler.signal(), JobState::Done);
    scheduler.completion_sink().push_done(leash);
    scheduler.process_completed_jobs(&mut scene);

    assert!(scheduler.pending_reset_ids().is_empty());
    assert_eq!(scheduler.node_job_state(leash), JobState::Unknown);
    assert!(!scheduler.has_completed_texture(leash));
}

#[test]
fn worker_skipped_node_requeues_with_forced_draw() {
    init_logging();
    let (mut scheduler, _renderer, pool) = new_scheduler();
    let (mut scene, root) = phone_scene();
    let leash = add_leash_with_app(&mut scene, root, 7);

    cache_one_round(&mut scheduler, &mut scene, &pool, leash);

    // Re-post, then age the post by one frame before the worker runs it:
    // the worker skips instead of re-rendering the stale request.
    scheduler.begin_frame();
    scheduler.update_cache_candidates(&mut scene, leash, true);
    scheduler.post_pending_jobs(&mut scene, &pool);
    scheduler.begin_frame();
    pool.run_all();
    assert_eq!(scheduler.node_job_state(leash), JobState::Skipped);
    assert!(scheduler.needs_next_frame_for_skipped());

    scheduler.process_completed_jobs(&mut scene);
    assert_eq!(scheduler.pending_window_ids(), vec![leash]);

    // The skipped node survives purging even though it looks redundant:
    // its cached image is a frame behind.
    make_node_static(&mut scene, leash);
    scheduler.purge_pending_nodes(&scene);
    assert_eq!(scheduler.pending_window_ids(), vec![leash]);
    scheduler.purge_pending_nodes(&scene);
    assert_eq!(scheduler.pending_window_ids(), vec![leash]);

    // Once the refresh actually renders, the node purges as usual.
    scheduler.begin_frame();
    scheduler.post_pending_jobs(&mut scene, &pool);
    pool.run_all();
    scheduler.process_completed_jobs(&mut scene);
    scheduler.begin_frame();
    scheduler.update_cache_candidates(&mut scene, leash, true);
    make_node_static(&mut scene, leash);
    scheduler.purge_pending_nodes(&scene);
    assert!(scheduler.pending_window_ids().is_empty());
}

#[test]
fn idle_frames_release_worker_resources_once() {
    let (mut scheduler, _renderer, pool) = new_scheduler();
    let (mut scene, _root) = phone_scene();

    for _ in 0..5 {
        scheduler.begin_frame();
        scheduler.post_pending_jobs(&mut scene, &pool);
    }
    assert_eq!(pool.release_requests.load(Ordering::Relaxed), 1);
}

#[test]
fn skip_sync_defers_descendants_while_root_job_runs() {
    init_logging();
    let (mut scheduler, _renderer, pool) = new_scheduler();
    let (mut scene, root) = phone_scene();
    let leash = add_leash_with_app(&mut scene, root, 7);
    let app = scene
        .get(leash)
        .and_then(|node| node.children.first().copied())
        .expect("leash has an app child");

    scheduler.begin_frame();
    scheduler.update_cache_candidates(&mut scene, leash, true);
    scheduler.post_pending_jobs(&mut scene, &pool);
    scheduler.process_completed_jobs(&mut scene);
    scene.take_pending_sync();

    // The job is pending on a worker: descendants must defer their property
    // sync, the root itself commits a partial sync.
    assert!(scheduler.collect_skip_sync_node(&mut scene, app));
    assert!(!scheduler.collect_skip_sync_node(&mut scene, leash));
    assert!(scene.get(leash).is_some_and(|node| node.partial_sync));
    assert_eq!(scheduler.deferred_sync_roots(), vec![leash]);

    // Job completes; the deferred syncs are restored.
    pool.run_all();
    scheduler.begin_frame();
    scheduler.process_completed_jobs(&mut scene);
    assert!(scheduler.deferred_sync_roots().is_empty());
    assert!(scene.get(leash).is_some_and(|node| !node.partial_sync));
    let restored = scene.take_pending_sync();
    assert!(restored.contains(&app));
}

#[test]
fn off_tree_node_is_disabled_and_reset() {
    init_logging();
    let (mut scheduler, _renderer, pool) = new_scheduler();
    let (mut scene, root) = phone_scene();
    let leash = add_leash_with_app(&mut scene, root, 7);

    cache_one_round(&mut scheduler, &mut scene, &pool, leash);
    assert!(scheduler.has_completed_texture(leash));

    if let Some(node) = scene.get_mut(leash) {
        node.on_tree = false;
    }
    scheduler.on_tree_state_change(&mut scene, leash, &pool);
    assert_eq!(scheduler.pending_reset_ids(), vec![leash]);

    scheduler.process_completed_jobs(&mut scene);
    assert!(!scheduler.has_completed_texture(leash));
    assert!(scheduler.pending_reset_ids().is_empty());
}

#[test]
fn committed_cache_invalidates_render_group_ancestors() {
    init_logging();
    let (mut scheduler, _renderer, pool) = new_scheduler();
    let (mut scene, root) = phone_scene();
    if let Some(node) = scene.get_mut(root) {
        node.render_group = true;
    }

    // A render-group container sits between the display root and the window.
    let group = crate::common::node_id(1, 2);
    let mut group_node = surface_cache::SurfaceNode::new(
        group,
        base::surface::SurfaceNodeKind::SelfDrawing,
    );
    group_node.parent = Some(root);
    group_node.render_group = true;
    scene.insert(group_node);
    let leash = add_leash_with_app(&mut scene, group, 7);

    cache_one_round(&mut scheduler, &mut scene, &pool, leash);

    assert!(scene.get(group).is_some_and(|node| node.cache_invalidated));
    // The display root itself is never part of the invalidation pass.
    assert!(scene.get(root).is_some_and(|node| !node.cache_invalidated));
    assert!(scene.take_pending_sync().contains(&group));
}

#[test]
fn widget_pending_is_segregated_from_windows() {
    let (mut scheduler, _renderer, _pool) = new_scheduler();
    let (mut scene, root) = phone_scene();
    let widget = crate::common::node_id(9, 500);
    let mut widget_node = surface_cache::SurfaceNode::new(
        widget,
        base::surface::SurfaceNodeKind::Widget,
    );
    widget_node.parent = Some(root);
    widget_node.first_level_id = Some(widget);
    widget_node.cache_root_id = Some(widget);
    scene.insert(widget_node);

    scheduler.begin_frame();
    scheduler.update_cache_candidates(&mut scene, widget, false);

    assert_eq!(scene.get(widget).map(|node| node.cache_mode), Some(CacheMode::Widget));
    assert_eq!(scheduler.pending_widget_ids(), vec![widget]);
    assert!(scheduler.pending_window_ids().is_empty());
    assert_exclusive_membership(&scheduler);
}

#[test]
fn caching_a_window_disables_nested_widgets() {
    init_logging();
    let (mut scheduler, _renderer, _pool) = new_scheduler();
    let (mut scene, root) = phone_scene();
    let leash = add_leash_with_app(&mut scene, root, 7);

    let widget = crate::common::node_id(9, 500);
    let mut widget_node = surface_cache::SurfaceNode::new(
        widget,
        base::surface::SurfaceNodeKind::Widget,
    );
    widget_node.parent = Some(leash);
    widget_node.first_level_id = Some(widget);
    widget_node.cache_root_id = Some(widget);
    scene.insert(widget_node);

    scheduler.begin_frame();
    scheduler.update_cache_candidates(&mut scene, widget, false);
    assert_eq!(scheduler.pending_widget_ids(), vec![widget]);

    // The window cache will contain the widget; the widget's own job must
    // not race it.
    scheduler.update_cache_candidates(&mut scene, leash, true);
    assert!(scheduler.pending_widget_ids().is_empty());
    assert_eq!(scene.get(widget).map(|node| node.cache_mode), Some(CacheMode::None));
    assert_exclusive_membership(&scheduler);
}
