/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use base::geometry::DeviceIntRect;
use base::id::NodeId;
use base::region::Region;
use base::surface::{CacheMode, SpecialLayerFlags, SurfaceNodeKind};

/// The committed, render-visible snapshot of one surface node.
///
/// The control plane produces a fresh snapshot at every sync point; the
/// render thread and worker threads only ever read it. Everything the
/// draw-skip classifier and a cache job need must be here, because neither is
/// allowed to reach back into the mutable scene graph.
#[derive(Clone, Debug)]
pub struct SurfaceParams {
    pub id: NodeId,
    pub kind: SurfaceNodeKind,
    pub name: String,
    pub bounds: DeviceIntRect,
    pub z_order: u32,
    pub global_alpha: f32,
    pub is_transparent: bool,

    /// The first-level ancestor used as the cache-grouping key.
    pub first_level_id: Option<NodeId>,
    /// An explicit cache-root override (widget subtrees); falls back to
    /// [`SurfaceParams::first_level_id`] when absent.
    pub cache_root_id: Option<NodeId>,
    /// The cache mode committed for drawing this frame.
    pub cache_mode: CacheMode,

    pub visible_region: Region,
    pub dirty_region: Region,
    /// Whether this frame's content is unchanged from the previous frame.
    pub content_static: bool,

    pub special_layers: SpecialLayerFlags,
    /// The node is fully covered by a region reconstructible from a cached
    /// blur/filter result.
    pub occluded_by_filter_cache: bool,
    /// The node is composited directly by the display hardware this frame.
    pub hardware_composited: bool,
    /// This node is a view onto another node's already-produced image.
    pub mirror_source: Option<NodeId>,

    pub should_paint: bool,
    pub skip_draw: bool,
    /// Union of the main-window children's dirty rects, snapshotted when the
    /// subtree was handed to a worker (the worker does not re-traverse
    /// children).
    pub children_dirty_rect: DeviceIntRect,
}

impl SurfaceParams {
    pub fn new(id: NodeId, kind: SurfaceNodeKind) -> SurfaceParams {
        SurfaceParams {
            id,
            kind,
            name: String::new(),
            bounds: DeviceIntRect::zero(),
            z_order: 0,
            global_alpha: 1.0,
            is_transparent: false,
            first_level_id: None,
            cache_root_id: None,
            cache_mode: CacheMode::None,
            visible_region: Region::new(),
            dirty_region: Region::new(),
            content_static: false,
            special_layers: SpecialLayerFlags::empty(),
            occluded_by_filter_cache: false,
            hardware_composited: false,
            mirror_source: None,
            should_paint: true,
            skip_draw: false,
            children_dirty_rect: DeviceIntRect::zero(),
        }
    }

    /// The id this node's draw correctness depends on: the explicit cache
    /// root when set, its first-level ancestor otherwise.
    pub fn dependency_root(&self) -> Option<NodeId> {
        self.cache_root_id.or(self.first_level_id)
    }

    /// Dirty region restricted to what is actually visible.
    pub fn has_visible_dirty_region(&self) -> bool {
        !self.visible_region.is_empty() && self.dirty_region.intersects(&self.visible_region)
    }
}
