/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Per-surface draw orchestration.
//!
//! Glue between the classifier, the cross-thread wait protocol, the per-node
//! draw guard and the offscreen path. The actual pixel work is behind
//! [`PaintBackend`]; this module only decides what runs and in which order,
//! and it must always come back within the frame deadline: every failure
//! here degrades to skipping or direct drawing, never to blocking.

use base::id::NodeId;
use base::surface::{CacheImage, JobState};
use log::{debug, warn};
use surface_cache::{SurfaceCacheScheduler, SurfaceParams};

use crate::classifier::{Classification, DrawSkipReason, FrameContext, classify};
use crate::offscreen::{self, OffscreenBuffer, OffscreenConfig, OffscreenSurface};

/// The drawing primitives the render service delegates to. Implemented by
/// the GPU paint layer; tests substitute a recorder.
pub trait PaintBackend {
    /// Composite a previously produced cache image in place of the subtree.
    fn draw_cached_image(&mut self, params: &SurfaceParams, image: &CacheImage);
    /// Security substitute fill.
    fn draw_solid_color(&mut self, params: &SurfaceParams);
    /// Composite another node's produced image for a mirror view.
    fn draw_mirror_source(&mut self, params: &SurfaceParams, source: NodeId);
    /// Render the subtree's content on the calling thread.
    fn draw_content(&mut self, params: &SurfaceParams);
    /// Allocate an offscreen target; `None` on resource exhaustion.
    fn create_offscreen_surface(
        &mut self,
        size: base::geometry::DeviceIntSize,
    ) -> Option<OffscreenSurface>;
    /// Redirect subsequent content drawing into `surface`.
    fn begin_offscreen(&mut self, surface: &OffscreenSurface, canvas_scale: f32);
    /// Composite `surface` back to the previous target.
    fn end_offscreen(&mut self, surface: &OffscreenSurface, scale_correction: f32);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DrawConfig {
    /// Under the safety flag a concurrent-access violation skips the second
    /// draw; otherwise the duplicate draw is tolerated best-effort.
    pub skip_on_multi_access: bool,
    pub offscreen: OffscreenConfig,
}

/// Draw one surface node, honoring the classifier's verdict. Returns the
/// final outcome, including skips decided after classification (wait
/// timeout, concurrent access).
pub fn draw_surface(
    params: &SurfaceParams,
    frame: &FrameContext,
    scheduler: &SurfaceCacheScheduler,
    offscreen_buffer: &mut OffscreenBuffer,
    config: &DrawConfig,
    backend: &mut dyn PaintBackend,
) -> Classification {
    let verdict = classify(params, frame, scheduler);
    match verdict {
        Classification::Skip(reason) => {
            debug!("skipping {:?}: {reason:?}", params.id);
            verdict
        },
        Classification::PaintSolidColor => {
            backend.draw_solid_color(params);
            verdict
        },
        Classification::PaintMirrorSource(source) => {
            backend.draw_mirror_source(params, source);
            verdict
        },
        Classification::PaintFromCache => {
            draw_from_cache(params, scheduler, backend);
            verdict
        },
        Classification::PaintNow => paint_now(
            params,
            frame,
            scheduler,
            offscreen_buffer,
            config,
            backend,
        ),
    }
}

/// Substitute the node's cache image. A missing image is tolerated: the
/// worst case is one stale or empty frame for this subtree, never a stall.
fn draw_from_cache(
    params: &SurfaceParams,
    scheduler: &SurfaceCacheScheduler,
    backend: &mut dyn PaintBackend,
) {
    let holder = scheduler.holder_for(params.id);
    let has_texture = holder
        .as_ref()
        .is_some_and(|holder| holder.has_cached_texture());

    if !has_texture {
        if scheduler.can_skip_first_wait() {
            // The running unlock/launch scene prefers an empty first frame
            // over blocking the whole composition.
            debug!("skipping first-frame wait for {:?}", params.id);
            return;
        }
        // First frame of a fresh cache: wait for the job, then commit its
        // output ourselves since the scheduler's drain only runs after the
        // frame.
        if scheduler.check_match_and_wait_notify(params, false) {
            if let Some(holder) = &holder {
                if holder.needs_commit() {
                    holder.commit_completed();
                }
            }
        }
    }

    match holder.as_ref().and_then(|holder| holder.completed_image()) {
        Some(image) => backend.draw_cached_image(params, &image),
        None => warn!("cache reuse failed for {:?}, dropping subtree this frame", params.id),
    }
}

fn paint_now(
    params: &SurfaceParams,
    frame: &FrameContext,
    scheduler: &SurfaceCacheScheduler,
    offscreen_buffer: &mut OffscreenBuffer,
    config: &DrawConfig,
    backend: &mut dyn PaintBackend,
) -> Classification {
    // A worker thread drawing a dependent subtree can use the match
    // optimization: if it is itself the producer of this subtree's root,
    // there is nothing to wait for.
    let job_state = scheduler.job_state_for(params);
    let check_match =
        frame.subtree_pass && matches!(job_state, JobState::Waiting | JobState::Doing);
    if !scheduler.check_match_and_wait_notify(params, check_match) {
        // Timeout is a latency/consistency trade-off, not an error.
        return Classification::Skip(DrawSkipReason::WaitTimeout);
    }

    // Per-node draw guard; detects this drawable being drawn from two call
    // sites at once.
    let holder = scheduler.holder_for(params.id);
    let guard = match &holder {
        Some(holder) => match holder.try_begin_draw() {
            Some(guard) => Some(guard),
            None => {
                warn!(
                    "concurrent draw detected on {:?} ({} events)",
                    params.id,
                    holder.multi_access_events(),
                );
                if config.skip_on_multi_access {
                    return Classification::Skip(DrawSkipReason::MultiAccess);
                }
                None
            },
        },
        None => None,
    };

    if offscreen::needs_rotation_offscreen(params, frame, &config.offscreen) {
        let target_size = params.bounds.size;
        let surface = offscreen_buffer.acquire(target_size, &config.offscreen, &mut |size| {
            backend.create_offscreen_surface(size)
        });
        match surface {
            Some(surface) => {
                backend.begin_offscreen(&surface, OffscreenBuffer::canvas_scale(&config.offscreen));
                backend.draw_content(params);
                backend.end_offscreen(
                    &surface,
                    OffscreenBuffer::scale_correction(&config.offscreen),
                );
                drop(guard);
                return Classification::PaintNow;
            },
            None => {
                // Resource exhaustion falls back to direct drawing.
                debug!("offscreen allocation failed for {:?}, drawing direct", params.id);
            },
        }
    } else {
        offscreen_buffer.note_unused_frame();
    }

    backend.draw_content(params);
    drop(guard);
    Classification::PaintNow
}
