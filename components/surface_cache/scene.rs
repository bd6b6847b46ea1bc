/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The scheduler's view of the scene graph: an id-keyed arena of surface
//! nodes plus the handful of global inputs (focus, device class) the
//! eligibility pass consumes.
//!
//! The scene graph is owned by the control plane; the scheduler only ever
//! looks nodes up by id, so a node's destruction cannot leave a dangling
//! reference behind.

use std::time::Instant;

use base::geometry::{DeviceIntRect, join_rects};
use base::id::NodeId;
use base::region::Region;
use base::surface::{CacheMode, DeviceClass, SpecialLayerFlags, SurfaceNodeKind};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::params::SurfaceParams;

/// Per-node override for cache eligibility, set by the client or by window
/// management policy.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SurfaceCacheSwitch {
    #[default]
    Auto,
    ForceEnable,
    ForceDisable,
}

/// A node in the render scene graph eligible for caching and drawing.
pub struct SurfaceNode {
    pub id: NodeId,
    pub kind: SurfaceNodeKind,
    pub name: String,

    pub parent: Option<NodeId>,
    pub children: SmallVec<[NodeId; 4]>,
    /// The first-level ancestor id used as the cache-grouping key. For a
    /// first-level node this is its own id.
    pub first_level_id: Option<NodeId>,
    /// Explicit cache-root id for widget subtrees.
    pub cache_root_id: Option<NodeId>,

    /// The cache mode applied on the previous eligibility pass.
    pub cache_mode: CacheMode,
    pub cache_switch: SurfaceCacheSwitch,
    /// Device support flag; some surface configurations never cache.
    pub cache_supported: bool,
    /// When caching was last enabled, for animation-skip heuristics.
    pub cache_enabled_at: Option<Instant>,

    pub dirty_region: Region,
    pub visible_region: Region,
    pub content_static: bool,
    pub on_tree: bool,
    pub z_order: u32,
    pub global_alpha: f32,
    pub is_transparent: bool,
    pub child_has_visible_filter: bool,
    /// The node is mid scale animation (pinch/recents style).
    pub is_scaling: bool,
    pub special_layers: SpecialLayerFlags,
    pub should_paint: bool,

    /// Dirty rect of this node from the previous frame, in surface space.
    pub old_dirty_in_surface: DeviceIntRect,
    /// Union of main-window children dirty rects snapshotted when the
    /// subtree is handed to a worker.
    pub children_dirty_rect: DeviceIntRect,

    /// This node renders as a suggested render group; a committed child
    /// cache invalidates it.
    pub render_group: bool,
    /// Set when an ancestor invalidation pass must revisit this group.
    pub cache_invalidated: bool,

    /// The node's property commit this frame is reduced to a partial sync
    /// because its own cache job is in flight.
    pub partial_sync: bool,
    /// The node must sync because it is about to be posted for caching.
    pub wants_cache_sync: bool,
}

impl SurfaceNode {
    pub fn new(id: NodeId, kind: SurfaceNodeKind) -> SurfaceNode {
        SurfaceNode {
            id,
            kind,
            name: String::new(),
            parent: None,
            children: SmallVec::new(),
            first_level_id: None,
            cache_root_id: None,
            cache_mode: CacheMode::None,
            cache_switch: SurfaceCacheSwitch::Auto,
            cache_supported: true,
            cache_enabled_at: None,
            dirty_region: Region::new(),
            visible_region: Region::new(),
            content_static: false,
            on_tree: true,
            z_order: 0,
            global_alpha: 1.0,
            is_transparent: false,
            child_has_visible_filter: false,
            is_scaling: false,
            special_layers: SpecialLayerFlags::empty(),
            should_paint: true,
            old_dirty_in_surface: DeviceIntRect::zero(),
            children_dirty_rect: DeviceIntRect::zero(),
            render_group: false,
            cache_invalidated: false,
            partial_sync: false,
            wants_cache_sync: false,
        }
    }

    /// Whether this node is the root of its own cache-grouping unit.
    pub fn is_first_level(&self) -> bool {
        self.first_level_id == Some(self.id)
    }

    pub fn dependency_root(&self) -> Option<NodeId> {
        self.cache_root_id.or(self.first_level_id)
    }

    /// Dirty region restricted to the visible region is non-empty.
    pub fn has_visible_dirty_region(&self) -> bool {
        !self.visible_region.is_empty() && self.dirty_region.intersects(&self.visible_region)
    }
}

/// The arena of surface nodes plus frame-global scheduling inputs.
pub struct SceneGraph {
    nodes: FxHashMap<NodeId, SurfaceNode>,
    pub device_class: DeviceClass,
    /// The free-form multi-window feature toggles desktop-style scheduling
    /// on hybrid devices.
    pub free_multi_window: bool,
    pub focus_node: Option<NodeId>,
    pub focus_leash_window: Option<NodeId>,
    /// Nodes whose scene-graph properties must be synced once more, e.g.
    /// after a cache commit or a deferred sync is released.
    pending_sync: Vec<NodeId>,
}

impl SceneGraph {
    pub fn new(device_class: DeviceClass) -> SceneGraph {
        SceneGraph {
            nodes: FxHashMap::default(),
            device_class,
            free_multi_window: false,
            focus_node: None,
            focus_leash_window: None,
            pending_sync: Vec::new(),
        }
    }

    pub fn insert(&mut self, node: SurfaceNode) {
        if let Some(parent) = node.parent {
            if let Some(parent_node) = self.nodes.get_mut(&parent) {
                if !parent_node.children.contains(&node.id) {
                    parent_node.children.push(node.id);
                }
            }
        }
        self.nodes.insert(node.id, node);
    }

    pub fn remove(&mut self, id: NodeId) -> Option<SurfaceNode> {
        let node = self.nodes.remove(&id)?;
        if let Some(parent) = node.parent {
            if let Some(parent_node) = self.nodes.get_mut(&parent) {
                parent_node.children.retain(|child| *child != id);
            }
        }
        Some(node)
    }

    pub fn get(&self, id: NodeId) -> Option<&SurfaceNode> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut SurfaceNode> {
        self.nodes.get_mut(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Ids of all surface nodes below `id`, depth first.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut stack: Vec<NodeId> = match self.nodes.get(&id) {
            Some(node) => node.children.iter().copied().collect(),
            None => return result,
        };
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(&current) {
                stack.extend(node.children.iter().copied());
            }
            result.push(current);
        }
        result
    }

    /// Whether `descendant` lies in the subtree rooted at `ancestor`.
    pub fn is_in_subtree(&self, ancestor: NodeId, descendant: NodeId) -> bool {
        let mut current = Some(descendant);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes.get(&id).and_then(|node| node.parent);
        }
        false
    }

    pub fn is_focused(&self, id: NodeId) -> bool {
        self.focus_node == Some(id) || self.focus_leash_window == Some(id)
    }

    pub fn push_pending_sync(&mut self, id: NodeId) {
        if !self.pending_sync.contains(&id) {
            self.pending_sync.push(id);
        }
    }

    pub fn take_pending_sync(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.pending_sync)
    }

    /// Snapshot the union of the main-window children's previous-frame dirty
    /// rects onto a leash node. The worker rendering the subtree will not
    /// re-traverse children this frame, so the summary must be taken now.
    pub fn snapshot_children_dirty_rect(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        let mut rect = DeviceIntRect::zero();
        if node.kind == SurfaceNodeKind::LeashWindow {
            for child in node.children.clone() {
                let Some(child_node) = self.nodes.get(&child) else {
                    continue;
                };
                if child_node.kind == SurfaceNodeKind::AppWindow {
                    rect = join_rects(rect, child_node.old_dirty_in_surface);
                }
            }
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.children_dirty_rect = rect;
        }
    }

    /// Build the committed parameter snapshot a worker job or the draw pass
    /// consumes for `id`.
    pub fn snapshot_params(&self, id: NodeId) -> Option<SurfaceParams> {
        let node = self.nodes.get(&id)?;
        Some(SurfaceParams {
            id: node.id,
            kind: node.kind,
            name: node.name.clone(),
            bounds: node.visible_region.bounds(),
            z_order: node.z_order,
            global_alpha: node.global_alpha,
            is_transparent: node.is_transparent,
            first_level_id: node.first_level_id,
            cache_root_id: node.cache_root_id,
            cache_mode: node.cache_mode,
            visible_region: node.visible_region.clone(),
            dirty_region: node.dirty_region.clone(),
            content_static: node.content_static,
            special_layers: node.special_layers,
            occluded_by_filter_cache: false,
            hardware_composited: false,
            mirror_source: None,
            should_paint: node.should_paint,
            skip_draw: false,
            children_dirty_rect: node.children_dirty_rect,
        })
    }
}
