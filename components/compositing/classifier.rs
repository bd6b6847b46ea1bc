/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The draw-skip classifier: an ordered short-circuit predicate chain run
//! for every surface node, every frame.
//!
//! The checks are ordered by cost, cheap flag tests before region
//! intersection before cache-state queries. Classification is side-effect
//! free and idempotent so the capture/snapshot variants of a frame can
//! re-run it without corrupting normal composition state; the only output
//! besides the verdict is the diagnostic reason tag.

use base::id::NodeId;
use base::surface::{JobState, SpecialLayerFlags};
use log::trace;
use rustc_hash::FxHashSet;
use surface_cache::{SurfaceCacheScheduler, SurfaceParams};

/// What kind of output the current pass composites into.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum CaptureMode {
    /// Normal on-screen composition.
    #[default]
    Composition,
    /// Mirroring to a second display.
    Mirror,
    /// A one-shot screenshot.
    Snapshot,
}

impl CaptureMode {
    pub fn is_capture(self) -> bool {
        self != CaptureMode::Composition
    }
}

/// Frame-global inputs to the classifier, fixed for one pass over the tree.
#[derive(Clone, Debug, Default)]
pub struct FrameContext {
    /// The target display hides security layers.
    pub security_display: bool,
    /// Security layers were explicitly exempted for this output.
    pub security_exemption: bool,
    pub capture: CaptureMode,
    /// Occlusion-based draw dropping is active this frame.
    pub occlusion_culling: bool,
    /// Filter-cache reuse is disabled (for example while debugging).
    pub disable_filter_cache: bool,
    /// This pass runs on a worker thread rendering one subtree; occlusion
    /// was already handled by whoever posted the job.
    pub subtree_pass: bool,
    /// The display rotation animation is running.
    pub rotating: bool,
    /// Surfaces excluded from mirror/screenshot output.
    pub capture_black_list: FxHashSet<NodeId>,
}

/// Why a node was not painted this frame. Diagnostic only; never persisted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DrawSkipReason {
    /// The node must not paint at all (torn down or hidden by policy).
    ShouldNotPaint,
    /// The committed parameters carry an explicit skip.
    SkipDraw,
    /// Excluded from this mirror/screenshot output.
    SkipInCapture,
    /// Fully covered by a reconstructible cached filter result.
    OccludedByFilterCache,
    /// The visible dirty region is empty.
    OccludedByDirtyRegion,
    /// Composited directly by display hardware this frame.
    HardwareBypass,
    /// The bounded cross-thread wait elapsed without a terminal job state.
    WaitTimeout,
    /// Another call site is drawing this node right now.
    MultiAccess,
}

/// The classifier's verdict for one node in one frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Classification {
    Skip(DrawSkipReason),
    /// Security policy replaces the content with a solid fill.
    PaintSolidColor,
    /// The node is a view onto `source`'s already-produced image.
    PaintMirrorSource(NodeId),
    /// Substitute the subtree's cached image.
    PaintFromCache,
    /// Render the subtree now on the calling thread.
    PaintNow,
}

/// Run the ordered short-circuit chain for one node.
pub fn classify(
    params: &SurfaceParams,
    frame: &FrameContext,
    scheduler: &SurfaceCacheScheduler,
) -> Classification {
    // 1. Visibility precondition: cheapest first.
    if !params.should_paint {
        return Classification::Skip(DrawSkipReason::ShouldNotPaint);
    }
    if params.skip_draw {
        return Classification::Skip(DrawSkipReason::SkipDraw);
    }

    // 2. Policy and allow-list checks.
    if frame.security_display &&
        params.special_layers.contains(SpecialLayerFlags::SECURITY) &&
        !frame.security_exemption
    {
        return Classification::PaintSolidColor;
    }
    if frame.capture.is_capture() &&
        (params.special_layers.contains(SpecialLayerFlags::SKIP_CAPTURE) ||
            frame.capture_black_list.contains(&params.id))
    {
        return Classification::Skip(DrawSkipReason::SkipInCapture);
    }

    // 3. Mirrored-source substitution: delegate, no further checks.
    if let Some(source) = params.mirror_source {
        return Classification::PaintMirrorSource(source);
    }

    // 4. Filter-cache occlusion.
    if !frame.disable_filter_cache && !frame.subtree_pass && params.occluded_by_filter_cache {
        trace!("{:?} occluded by filter cache", params.id);
        return Classification::Skip(DrawSkipReason::OccludedByFilterCache);
    }

    // 5. Hardware bypass.
    if params.hardware_composited {
        return Classification::Skip(DrawSkipReason::HardwareBypass);
    }

    // 6. Standard occlusion. A worker-thread subtree pass draws whatever it
    //    was handed; occlusion was the render thread's call.
    if !frame.subtree_pass &&
        frame.occlusion_culling &&
        !params.has_visible_dirty_region()
    {
        trace!("{:?} occlusion skip", params.id);
        return Classification::Skip(DrawSkipReason::OccludedByDirtyRegion);
    }

    // 7. Cache substitution. Only grouping roots substitute; a worker's
    //    subtree pass always paints real content. A root whose enable param
    //    has not committed yet still substitutes while its job is in flight
    //    (Waiting may become Doing at any moment). A snapshot may only
    //    substitute a texture that actually exists.
    let substitutable = if frame.capture == CaptureMode::Snapshot {
        scheduler.has_completed_texture(params.id)
    } else if frame.subtree_pass {
        false
    } else {
        let job_state = scheduler.job_state_for(params);
        params.cache_mode.is_enabled() ||
            (matches!(job_state, JobState::Waiting | JobState::Doing) &&
                params.dependency_root() == Some(params.id))
    };
    if substitutable {
        return Classification::PaintFromCache;
    }

    Classification::PaintNow
}
