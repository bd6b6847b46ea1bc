/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The surface-cache scheduler.
//!
//! One instance lives for the lifetime of the render thread and is driven at
//! three points of every frame: eligibility evaluation while the control
//! plane syncs the tree, job posting right before drawing starts, and
//! completion draining after the frame. All pending bookkeeping is owned by
//! the render thread; worker threads only ever append to the completion
//! queues and notify the shared signal.

use std::cmp::Reverse;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use base::id::{NodeId, ProcessId};
use base::surface::{CacheImage, CacheMode, JobState, SpecialLayerFlags, SurfaceNodeKind,
                    SystemAnimatedScene};
use log::{debug, error, info, trace};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::events::{AnimationEventInfo, FrameEvents};
use crate::holder::{CacheSurfaceHolder, DrawableRegistry};
use crate::params::SurfaceParams;
use crate::policy::{self, EligibilityContext, SceneState, SchedulerMode};
use crate::scene::{SceneGraph, SurfaceCacheSwitch};
use crate::wait::{self, CompletionSignal};
use crate::worker::{CacheJob, CacheTaskPool, CompletionSink};

/// Consecutive frames without any cache work before worker-side resources
/// are released.
const IDLE_RELEASE_FRAMES: u32 = 3;

/// Scheduling priority of one pending job. Lower sorts (and posts) first.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[repr(u8)]
pub enum JobPriority {
    /// The focused window; posted first to keep interaction latency low.
    Focused = 0,
    /// No usable cached texture yet, or the job is still waiting: the window
    /// has nothing to show until this runs.
    High = 1,
    /// A valid cached texture exists; re-rendering is an optimization.
    Low = 2,
}

impl JobPriority {
    fn from_u8(value: u8) -> JobPriority {
        match value {
            0 => JobPriority::Focused,
            1 => JobPriority::High,
            _ => JobPriority::Low,
        }
    }
}

/// Static configuration of the scheduler, read once at construction.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Master switch for window caching.
    pub enabled: bool,
    /// Separate switch for embedded-widget caching.
    pub widget_cache_enabled: bool,
    /// Whether redundant pending jobs may be purged before posting.
    pub purge_enabled: bool,
    /// Upper bound on concurrently cached non-focused windows; zero or
    /// negative means unbounded.
    pub nonfocus_window_threshold: i32,
    /// Bound for the cross-thread wait; well under one frame interval.
    pub wait_timeout: Duration,
    /// Scene ids during which a first cache may be skipped instead of
    /// awaited.
    pub skip_first_wait_scenes: Vec<String>,
    /// Scene ids that disable window caching for the animating process.
    pub disable_cache_scenes: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> SchedulerConfig {
        SchedulerConfig {
            enabled: true,
            widget_cache_enabled: true,
            purge_enabled: true,
            nonfocus_window_threshold: 0,
            wait_timeout: Duration::from_millis(32),
            skip_first_wait_scenes: Vec::new(),
            disable_cache_scenes: Vec::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct PendingEntry {
    mode: CacheMode,
    /// The previous job for this node was skipped; the next purge pass must
    /// not drop it.
    force_draw: bool,
}

/// The asynchronous surface-cache scheduler. See the crate documentation for
/// the frame protocol.
pub struct SurfaceCacheScheduler {
    config: SchedulerConfig,
    registry: Arc<DrawableRegistry>,
    signal: Arc<CompletionSignal>,
    sink: CompletionSink,
    /// Monotonic frame counter shared with posted jobs for staleness checks.
    epoch: Arc<AtomicU64>,

    scene_state: SceneState,
    events: FrameEvents,

    /// Window-class subtrees awaiting a post. Disjoint from the other two
    /// pending maps at every observation point.
    pending_windows: FxHashMap<NodeId, PendingEntry>,
    /// Widget-class subtrees awaiting a post; segregated because their
    /// priority and invalidation rules differ.
    pending_widgets: FxHashMap<NodeId, PendingEntry>,
    /// Subtrees whose caching is being torn down; resources are released
    /// only once their in-flight job is terminal.
    pending_reset: FxHashSet<NodeId>,
    /// Jobs handed to the worker pool and not yet drained. A node present
    /// here must never be posted again.
    processing: FxHashMap<NodeId, Arc<CacheSurfaceHolder>>,

    sorted: Vec<NodeId>,

    /// Skip-sync bookkeeping, recomputed from `processing` every frame.
    processing_partial_sync: FxHashSet<NodeId>,
    processing_skip_sync: FxHashSet<NodeId>,
    processing_widget_skip_sync: FxHashSet<NodeId>,
    /// Nodes whose property sync was deferred, keyed by the grouping root
    /// they are waiting on.
    deferred_sync: FxHashMap<NodeId, Vec<NodeId>>,
    /// Per-frame memo of root job states, so one frame observes one answer.
    frame_root_states: FxHashMap<NodeId, JobState>,

    idle_frames: u32,
    nonfocus_window_count: u32,
}

impl SurfaceCacheScheduler {
    pub fn new(config: SchedulerConfig) -> SurfaceCacheScheduler {
        SurfaceCacheScheduler {
            config,
            registry: Arc::new(DrawableRegistry::new()),
            signal: Arc::new(CompletionSignal::new()),
            sink: CompletionSink::new(),
            epoch: Arc::new(AtomicU64::new(0)),
            scene_state: SceneState::default(),
            events: FrameEvents::new(),
            pending_windows: FxHashMap::default(),
            pending_widgets: FxHashMap::default(),
            pending_reset: FxHashSet::default(),
            processing: FxHashMap::default(),
            sorted: Vec::new(),
            processing_partial_sync: FxHashSet::default(),
            processing_skip_sync: FxHashSet::default(),
            processing_widget_skip_sync: FxHashSet::default(),
            deferred_sync: FxHashMap::default(),
            frame_root_states: FxHashMap::default(),
            idle_frames: 0,
            nonfocus_window_count: 0,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<DrawableRegistry> {
        &self.registry
    }

    pub fn signal(&self) -> &Arc<CompletionSignal> {
        &self.signal
    }

    /// The sink worker pools report completions into.
    pub fn completion_sink(&self) -> CompletionSink {
        self.sink.clone()
    }

    pub fn epoch_counter(&self) -> Arc<AtomicU64> {
        self.epoch.clone()
    }

    pub fn holder_for(&self, id: NodeId) -> Option<Arc<CacheSurfaceHolder>> {
        self.registry.get(id)
    }

    /// Advance the frame epoch and refresh per-frame event state. Called at
    /// the top of every render-thread frame.
    pub fn begin_frame(&mut self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.events.prepare_frame(&self.config.skip_first_wait_scenes);
        self.frame_root_states.clear();
    }

    // --- Control-plane inputs -------------------------------------------

    /// A scene animation started. Control-plane thread.
    pub fn register_animation_event(&self, info: AnimationEventInfo) {
        self.events.register(info);
    }

    /// A scene animation finished. Control-plane thread.
    pub fn complete_animation_event(&self, unique_id: u64, scene_id: &str) {
        self.events.complete(unique_id, scene_id);
    }

    pub fn on_animated_scene(&mut self, scene: SystemAnimatedScene) {
        debug!("animated scene {scene:?}");
        match scene {
            SystemAnimatedScene::EnterRecents => self.scene_state.recents = true,
            SystemAnimatedScene::ExitRecents => self.scene_state.recents = false,
            SystemAnimatedScene::EnterMissionCenter | SystemAnimatedScene::ExitMissionCenter => {
                self.scene_state.mission_center = true;
            },
            SystemAnimatedScene::EnterSplitScreen | SystemAnimatedScene::ExitSplitScreen => {
                self.scene_state.split_screen = true;
            },
            SystemAnimatedScene::SnapshotRotation => self.scene_state.snapshot_rotation = true,
            SystemAnimatedScene::Other => {
                self.scene_state.mission_center = false;
                self.scene_state.split_screen = false;
                self.scene_state.snapshot_rotation = false;
            },
        }
    }

    pub fn set_rotation_changed(&mut self, changed: bool) {
        self.scene_state.rotation_changed = changed;
    }

    pub fn scene_state(&self) -> SceneState {
        self.scene_state
    }

    // --- Eligibility -----------------------------------------------------

    /// The process ids an animation event must name to affect this node: the
    /// node's own for app windows, the child app windows' for leashes.
    fn affected_processes(scene: &SceneGraph, id: NodeId) -> Vec<ProcessId> {
        let Some(node) = scene.get(id) else {
            return Vec::new();
        };
        match node.kind {
            SurfaceNodeKind::AppWindow => vec![id.process_id()],
            SurfaceNodeKind::LeashWindow => node
                .children
                .iter()
                .filter(|child| {
                    scene
                        .get(**child)
                        .is_some_and(|child| child.kind == SurfaceNodeKind::AppWindow)
                })
                .map(|child| child.process_id())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Judge whether `id` satisfies the asynchronous caching conditions this
    /// frame, and apply the resulting state transition.
    pub fn update_cache_candidates(
        &mut self,
        scene: &mut SceneGraph,
        id: NodeId,
        ancestor_animating: bool,
    ) {
        let Some(node) = scene.get(id) else {
            return;
        };

        // Hard gates come first: a disabled scheduler, an unsupported or
        // force-disabled node, and protected content always revert to None.
        let force_disabled = node.cache_switch == SurfaceCacheSwitch::ForceDisable;
        let protected = node.special_layers.contains(SpecialLayerFlags::PROTECTED);
        if !self.config.enabled || !node.cache_supported || force_disabled || protected {
            trace!(
                "caching unavailable for {id:?} (enabled {}, supported {}, forced off {force_disabled}, protected {protected})",
                self.config.enabled, node.cache_supported,
            );
            self.state_change(scene, id, CacheMode::None);
            return;
        }

        // An explicit force-enable on a leash window bypasses the policy
        // evaluation but still respects the scheduling mode.
        let mode = policy::mode_for(scene.device_class, scene.free_multi_window);
        if node.cache_switch == SurfaceCacheSwitch::ForceEnable &&
            node.kind == SurfaceNodeKind::LeashWindow
        {
            let forced = match mode {
                SchedulerMode::MultiWindow => CacheMode::NonfocusWindow,
                SchedulerMode::SingleWindow => CacheMode::LeashWindow,
            };
            self.state_change(scene, id, forced);
            return;
        }

        let focused = scene.is_focused(id);
        let threshold = self.config.nonfocus_window_threshold;
        let window_threshold_exceeded = threshold > 0 &&
            !focused &&
            self.nonfocus_window_count >= threshold as u32;
        let processes = Self::affected_processes(scene, id);
        let enabled_at = scene.get(id).and_then(|node| node.cache_enabled_at);
        let app_has_disable_animation = self.events.disables_cache_for(
            id,
            &processes,
            enabled_at,
            &self.config.disable_cache_scenes,
        );

        let ctx = EligibilityContext {
            mode,
            scene_state: self.scene_state,
            widget_cache_enabled: self.config.widget_cache_enabled,
            ancestor_animating,
            app_has_disable_animation,
            window_threshold_exceeded,
        };
        let Some(node) = scene.get(id) else {
            return;
        };
        let requested = policy::evaluate(scene, node, &ctx);
        self.state_change(scene, id, requested);
    }

    /// Apply a requested cache mode to a node, driving the pending maps and
    /// the cache job record through their state machine.
    pub fn state_change(&mut self, scene: &mut SceneGraph, id: NodeId, requested: CacheMode) {
        let Some(node) = scene.get(id) else {
            return;
        };
        let last = node.cache_mode;
        let focused = scene.is_focused(id);
        let kind = node.kind;

        // A change between two enabled modes would mix incompatible cache
        // production paths; treat it as a disable and let the node re-enable
        // once the reset has completed.
        let requested = if last.is_enabled() && requested.is_enabled() && last != requested {
            debug!("cache mode change {last:?} -> {requested:?} for {id:?}, reverting to None");
            CacheMode::None
        } else {
            requested
        };

        match (last.is_enabled(), requested.is_enabled()) {
            (false, true) => {
                info!("cache enabled for {id:?} as {requested:?}");
                self.registry.ensure(id);
                scene.snapshot_children_dirty_rect(id);
                if let Some(node) = scene.get_mut(id) {
                    node.cache_enabled_at = Some(Instant::now());
                }
                self.add_pending_post(scene, id, requested);
                if !focused && kind != SurfaceNodeKind::Widget {
                    self.nonfocus_window_count += 1;
                }
            },
            (false, false) => {},
            (true, true) => {
                // Re-post with refreshed bounds.
                scene.snapshot_children_dirty_rect(id);
                self.add_pending_post(scene, id, requested);
            },
            (true, false) => {
                info!("cache disabled for {id:?}");
                if let Some(node) = scene.get_mut(id) {
                    node.cache_enabled_at = None;
                }
                self.add_pending_reset(id);
                if !focused &&
                    kind != SurfaceNodeKind::Widget &&
                    self.nonfocus_window_count > 0
                {
                    self.nonfocus_window_count -= 1;
                }
            },
        }

        if let Some(node) = scene.get_mut(id) {
            node.cache_mode = requested;
        }
    }

    /// Disable caching for a node immediately, e.g. because it left the
    /// tree. Cache resources are still released only once any in-flight job
    /// is terminal.
    pub fn disable_node(&mut self, scene: &mut SceneGraph, id: NodeId) {
        self.state_change(scene, id, CacheMode::None);
    }

    /// A node's tree membership changed. An off-tree node loses its cache
    /// eagerly so captured images do not outlive the window.
    pub fn on_tree_state_change(
        &mut self,
        scene: &mut SceneGraph,
        id: NodeId,
        pool: &dyn CacheTaskPool,
    ) {
        let on_tree = scene.get(id).is_some_and(|node| node.on_tree);
        if on_tree {
            return;
        }
        self.disable_node(scene, id);
        self.idle_frames = 0;
        pool.try_release_idle_resources();
    }

    fn add_pending_post(&mut self, scene: &mut SceneGraph, id: NodeId, mode: CacheMode) {
        // Membership across the three pending maps is exclusive.
        self.pending_reset.remove(&id);
        match mode {
            CacheMode::Widget => {
                self.pending_windows.remove(&id);
                let entry = self.pending_widgets.entry(id).or_default();
                entry.mode = mode;
            },
            CacheMode::LeashWindow | CacheMode::NonfocusWindow => {
                self.pending_widgets.remove(&id);
                let entry = self.pending_windows.entry(id).or_default();
                entry.mode = mode;

                // A widget inside this window tree must not race the window
                // cache that is about to contain it.
                let nested: Vec<NodeId> = self
                    .pending_widgets
                    .keys()
                    .copied()
                    .filter(|widget| scene.is_in_subtree(id, *widget))
                    .collect();
                for widget in nested {
                    debug!("widget {widget:?} nested under cached window {id:?}, disabling");
                    self.state_change(scene, widget, CacheMode::None);
                }
            },
            CacheMode::None => return,
        }
        scene.push_pending_sync(id);
    }

    fn add_pending_reset(&mut self, id: NodeId) {
        self.pending_windows.remove(&id);
        self.pending_widgets.remove(&id);
        self.pending_reset.insert(id);
    }

    // --- Purge -----------------------------------------------------------

    /// Drop pending entries whose redraw would be redundant this frame. An
    /// optimization only: a node left pending merely does one extra
    /// worker-thread render.
    pub fn purge_pending_nodes(&mut self, scene: &SceneGraph) {
        Self::purge_map(
            &mut self.pending_windows,
            scene,
            &self.registry,
            &self.processing,
            self.config.purge_enabled,
        );
        Self::purge_map(
            &mut self.pending_widgets,
            scene,
            &self.registry,
            &self.processing,
            self.config.purge_enabled,
        );
    }

    fn purge_map(
        map: &mut FxHashMap<NodeId, PendingEntry>,
        scene: &SceneGraph,
        registry: &DrawableRegistry,
        processing: &FxHashMap<NodeId, Arc<CacheSurfaceHolder>>,
        purge_enabled: bool,
    ) {
        map.retain(|id, entry| {
            let Some(holder) = registry.get(*id) else {
                return true;
            };
            let doing = processing.contains_key(id);
            let Some(node) = scene.get(*id) else {
                // The node is gone; keep the entry only while its job runs.
                return doing;
            };
            if !node.on_tree && !doing {
                debug!("purging off-tree pending node {id:?}");
                return false;
            }

            // A job re-queued after a worker skip must run; its cache is a
            // frame behind. The exemption is consumed here.
            let force_draw = std::mem::replace(&mut entry.force_draw, false);
            if force_draw {
                holder.reset_reuse_count();
                return true;
            }

            let cached_static = holder.content_static() && node.content_static;
            let visible_dirty_empty = !node.has_visible_dirty_region();
            let purge = purge_enabled &&
                holder.has_cached_texture() &&
                (cached_static || visible_dirty_empty) &&
                !doing &&
                !holder.worker_skipped();
            if purge {
                trace!(
                    "purging pending node {id:?} (static {cached_static}, dirty empty {visible_dirty_empty})",
                );
                holder.set_content_static(cached_static);
                holder.note_reuse();
                false
            } else {
                holder.reset_reuse_count();
                true
            }
        });
    }

    // --- Priority and posting -------------------------------------------

    /// Assign every remaining pending node a priority and produce the post
    /// order: focused first, then jobs with nothing to show, then refreshes;
    /// ties broken by z-order, higher first.
    pub fn sort_pending_by_priority(&mut self, scene: &SceneGraph) {
        self.sorted.clear();
        let mut focus_found = false;
        for map in [&self.pending_windows, &self.pending_widgets] {
            for id in map.keys() {
                let Some(holder) = self.registry.get(*id) else {
                    continue;
                };
                let mut priority = if holder.has_cached_texture() {
                    JobPriority::Low
                } else {
                    JobPriority::High
                };
                if holder.state() == JobState::Waiting {
                    priority = JobPriority::High;
                }
                if !focus_found && scene.is_focused(*id) {
                    priority = JobPriority::Focused;
                    focus_found = true;
                }
                holder.set_priority(priority as u8);
                self.sorted.push(*id);
            }
        }
        let registry = &self.registry;
        self.sorted.sort_by_key(|id| {
            let (priority, z_order) = match (registry.get(*id), scene.get(*id)) {
                (Some(holder), Some(node)) => {
                    (JobPriority::from_u8(holder.priority()), node.z_order)
                },
                (Some(holder), None) => (JobPriority::from_u8(holder.priority()), 0),
                _ => (JobPriority::Low, 0),
            };
            (priority, Reverse(z_order))
        });
    }

    /// Purge, sort and post this frame's cache jobs to the worker pool, then
    /// clear the pending maps. Runs on the render thread at the frame's sync
    /// point; posting never blocks.
    pub fn post_pending_jobs(&mut self, scene: &mut SceneGraph, pool: &dyn CacheTaskPool) {
        self.purge_pending_nodes(scene);
        self.sort_pending_by_priority(scene);

        if self.sorted.is_empty() {
            if self.processing.is_empty() && self.deferred_sync.is_empty() {
                self.idle_frames += 1;
                if self.idle_frames == IDLE_RELEASE_FRAMES {
                    debug!("no cache work for {IDLE_RELEASE_FRAMES} frames, releasing worker resources");
                    pool.try_release_idle_resources();
                }
            } else {
                self.idle_frames = 0;
            }
        } else {
            self.idle_frames = 0;
            let epoch = self.epoch.load(Ordering::Acquire);
            let sorted = std::mem::take(&mut self.sorted);
            for id in sorted {
                self.post_job(scene, id, epoch, pool);
            }
            self.pending_windows.clear();
            self.pending_widgets.clear();
        }
        self.frame_root_states.clear();
    }

    fn post_job(&mut self, scene: &SceneGraph, id: NodeId, epoch: u64, pool: &dyn CacheTaskPool) {
        if self.processing.contains_key(&id) {
            // Single-writer rule: the previous job for this node has not
            // reached a terminal state yet.
            error!("refusing to post cache job twice for {id:?}");
            return;
        }
        let Some(holder) = self.registry.get(id) else {
            return;
        };
        let Some(params) = scene.snapshot_params(id) else {
            return;
        };
        trace!("posting cache job for {id:?}");
        holder.set_task_epoch(epoch);
        holder.set_state(JobState::Waiting);
        self.processing.insert(id, holder.clone());
        pool.schedule(CacheJob {
            holder,
            params: Arc::new(params),
            current_epoch: self.epoch.clone(),
        });
    }

    // --- Completion draining --------------------------------------------

    /// Drain worker completions into committed caches, process deferred
    /// resets, and recompute the skip-sync sets. Render thread, once per
    /// frame after drawing.
    pub fn process_completed_jobs(&mut self, scene: &mut SceneGraph) {
        self.requeue_worker_skipped(scene);

        for id in self.sink.take_done() {
            if let Some(holder) = self.registry.get(id) {
                if holder.needs_commit() && holder.has_produced_image() && holder.commit_completed()
                {
                    trace!("committed cache for {id:?}");
                    self.mark_render_group_ancestors(scene, id);
                    scene.push_pending_sync(id);
                }
            }
            self.processing.remove(&id);
        }

        // Nodes waiting for reset can release resources once their job is
        // terminal; a job still running keeps them parked here.
        let ready: Vec<NodeId> = self
            .pending_reset
            .iter()
            .copied()
            .filter(|id| !self.processing.contains_key(id))
            .collect();
        for id in ready {
            self.pending_reset.remove(&id);
            self.reset_node(scene, id);
        }

        // Sweep jobs that reported skipped without passing through the done
        // list, and flag still-running jobs so their nodes are refreshed
        // once the worker finishes: the image being produced is already a
        // frame old.
        let stale: Vec<NodeId> = self
            .processing
            .iter()
            .map(|(id, holder)| (*id, holder.state()))
            .filter_map(|(id, state)| match state {
                JobState::Skipped => Some(id),
                _ => None,
            })
            .collect();
        for id in stale {
            self.processing.remove(&id);
        }
        let still_running: Vec<NodeId> = self.processing.keys().copied().collect();
        for id in still_running {
            debug!("cache job for {id:?} still running after frame");
            self.pending_windows.remove(&id);
            self.pending_widgets.remove(&id);
            self.sink.push_skipped(id);
        }

        self.update_skip_sync_sets(scene);
        self.restore_deferred_sync(scene);
    }

    /// Worker-skipped nodes go back into their pending map with the
    /// must-not-skip flag, so the next frame refreshes their stale cache.
    fn requeue_worker_skipped(&mut self, scene: &SceneGraph) {
        for id in self.sink.take_skipped() {
            let Some(node) = scene.get(id) else {
                continue;
            };
            if !node.on_tree || !node.cache_mode.is_enabled() {
                continue;
            }
            let map = if node.cache_mode == CacheMode::Widget {
                &mut self.pending_widgets
            } else {
                &mut self.pending_windows
            };
            let entry = map.entry(id).or_insert(PendingEntry {
                mode: node.cache_mode,
                force_draw: false,
            });
            entry.force_draw = true;
            trace!("re-queued worker-skipped node {id:?}");
        }
    }

    /// Mark every suggested render group above a freshly cached node, up to
    /// but not including the display root, as needing an invalidation pass.
    fn mark_render_group_ancestors(&self, scene: &mut SceneGraph, id: NodeId) {
        let mut current = scene.get(id).and_then(|node| node.parent);
        let mut to_sync: Vec<NodeId> = Vec::new();
        while let Some(ancestor_id) = current {
            let Some(ancestor) = scene.get_mut(ancestor_id) else {
                break;
            };
            if ancestor.parent.is_none() {
                break;
            }
            if ancestor.render_group {
                ancestor.cache_invalidated = true;
                to_sync.push(ancestor_id);
            }
            current = ancestor.parent;
        }
        for ancestor_id in to_sync {
            scene.push_pending_sync(ancestor_id);
        }
    }

    fn reset_node(&mut self, scene: &mut SceneGraph, id: NodeId) {
        debug!("resetting cache state for {id:?}");
        self.pending_windows.remove(&id);
        self.pending_widgets.remove(&id);
        if let Some(holder) = self.registry.get(id) {
            holder.reset();
        }
        if scene.contains(id) {
            scene.push_pending_sync(id);
        } else {
            // The node is gone; nothing will ever look the holder up again.
            self.registry.remove(id);
        }
    }

    // --- Skip-sync -------------------------------------------------------

    fn update_skip_sync_sets(&mut self, scene: &SceneGraph) {
        self.processing_partial_sync.clear();
        self.processing_skip_sync.clear();
        self.processing_widget_skip_sync.clear();
        for id in self.processing.keys() {
            let Some(node) = scene.get(*id) else {
                continue;
            };
            if node.cache_mode == CacheMode::Widget {
                self.processing_widget_skip_sync.insert(*id);
                continue;
            }
            self.processing_partial_sync.insert(*id);
            for descendant in scene.descendants(*id) {
                self.processing_skip_sync.insert(descendant);
            }
        }
    }

    fn cached_root_state(&mut self, root: NodeId) -> JobState {
        *self
            .frame_root_states
            .entry(root)
            .or_insert_with(|| match self.registry.get(root) {
                Some(holder) => holder.state(),
                None => JobState::Unknown,
            })
    }

    /// Decide whether `id`'s scene-graph property commit must be deferred
    /// this frame because the job producing its grouping root is in flight.
    /// Returns `true` when the sync must be skipped.
    pub fn collect_skip_sync_node(&mut self, scene: &mut SceneGraph, id: NodeId) -> bool {
        if !scene.contains(id) {
            return false;
        }
        if self.pending_windows.contains_key(&id) || self.pending_widgets.contains_key(&id) {
            if let Some(node) = scene.get_mut(id) {
                node.wants_cache_sync = true;
            }
        }

        let (root, first_level) = match scene.get(id) {
            Some(node) => (node.dependency_root(), node.first_level_id),
            None => (None, None),
        };

        if let Some(root) = root {
            let state = self.cached_root_state(root);
            if matches!(state, JobState::Waiting | JobState::Doing) {
                return self.defer_sync(scene, root, id);
            }
        }

        if let Some(root) = root {
            if self.processing_widget_skip_sync.contains(&root) {
                return self.defer_sync(scene, root, id);
            }
        }
        if let Some(first_level) = first_level {
            if self.processing_partial_sync.contains(&first_level) {
                return self.defer_sync(scene, first_level, id);
            }
            if self.processing_skip_sync.contains(&id) {
                self.deferred_sync.entry(first_level).or_default().push(id);
                return true;
            }
        }
        false
    }

    /// Defer `id`'s sync until `root` is terminal. The root itself still
    /// commits a partial sync (its geometry must follow the frame), so only
    /// descendants report "skip".
    fn defer_sync(&mut self, scene: &mut SceneGraph, root: NodeId, id: NodeId) -> bool {
        self.deferred_sync.entry(root).or_default().push(id);
        let is_root = root == id;
        if is_root {
            if let Some(node) = scene.get_mut(id) {
                node.partial_sync = true;
            }
        }
        !is_root
    }

    /// Release deferred syncs whose grouping root reached a terminal state,
    /// and re-queue widget roots that still want caching.
    fn restore_deferred_sync(&mut self, scene: &mut SceneGraph) {
        let released: Vec<NodeId> = self
            .deferred_sync
            .keys()
            .copied()
            .filter(|root| {
                !self.processing_partial_sync.contains(root) &&
                    !self.processing_skip_sync.contains(root) &&
                    !self.processing_widget_skip_sync.contains(root)
            })
            .collect();
        for root in released {
            let Some(nodes) = self.deferred_sync.remove(&root) else {
                continue;
            };
            trace!("restoring {} deferred syncs under {root:?}", nodes.len());
            for id in nodes {
                if let Some(node) = scene.get_mut(id) {
                    node.partial_sync = false;
                }
                scene.push_pending_sync(id);
            }
            let requeue = scene.get(root).is_some_and(|node| {
                node.cache_mode == CacheMode::Widget &&
                    node.cache_root_id == Some(root) &&
                    !self.pending_widgets.contains_key(&root)
            });
            if requeue {
                self.pending_widgets.insert(
                    root,
                    PendingEntry {
                        mode: CacheMode::Widget,
                        force_draw: false,
                    },
                );
            }
        }
    }

    // --- Render-thread queries ------------------------------------------

    /// Job state of the grouping root `params` depends on.
    pub fn job_state_for(&self, params: &SurfaceParams) -> JobState {
        let Some(root) = params.dependency_root() else {
            return JobState::Unknown;
        };
        self.node_job_state(root)
    }

    pub fn node_job_state(&self, id: NodeId) -> JobState {
        self.registry
            .get(id)
            .map_or(JobState::Unknown, |holder| holder.state())
    }

    pub fn has_completed_texture(&self, id: NodeId) -> bool {
        self.registry
            .get(id)
            .is_some_and(|holder| holder.has_cached_texture())
    }

    pub fn completed_image_for(&self, id: NodeId) -> Option<CacheImage> {
        self.registry.get(id).and_then(|holder| holder.completed_image())
    }

    /// Gate a draw on its dependency root's in-flight cache job; bounded by
    /// the configured timeout. `false` means the bound elapsed first.
    pub fn check_match_and_wait_notify(&self, params: &SurfaceParams, check_match: bool) -> bool {
        wait::check_match_and_wait_notify(
            &self.registry,
            &self.signal,
            params,
            check_match,
            self.config.wait_timeout,
        )
    }

    /// Whether a drawable without a cache yet may draw nothing this frame
    /// instead of blocking on the first job.
    pub fn can_skip_first_wait(&self) -> bool {
        self.events.can_skip_first_wait()
    }

    /// Worker-skipped nodes exist, so one more frame must be scheduled to
    /// refresh their stale caches.
    pub fn needs_next_frame_for_skipped(&self) -> bool {
        self.sink.has_skipped()
    }

    // --- Introspection (tests and diagnostics) --------------------------

    pub fn pending_window_ids(&self) -> Vec<NodeId> {
        self.pending_windows.keys().copied().collect()
    }

    pub fn pending_widget_ids(&self) -> Vec<NodeId> {
        self.pending_widgets.keys().copied().collect()
    }

    pub fn pending_reset_ids(&self) -> Vec<NodeId> {
        self.pending_reset.iter().copied().collect()
    }

    pub fn processing_ids(&self) -> Vec<NodeId> {
        self.processing.keys().copied().collect()
    }

    pub fn deferred_sync_roots(&self) -> Vec<NodeId> {
        self.deferred_sync.keys().copied().collect()
    }
}
