/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Rotation offscreen compensation.
//!
//! While the display rotates, an app window's matrix carries a rotation that
//! would otherwise force the compositor to reallocate a full-screen buffer
//! every frame. Instead the window is drawn into a reusable square offscreen
//! surface sized to the larger of its two dimensions (optionally halved
//! under a downgrade policy) and composited back with the matching scale
//! correction.

use base::geometry::DeviceIntSize;
use base::surface::{SurfaceNodeKind, TextureHandle};
use log::debug;
use surface_cache::SurfaceParams;

use crate::classifier::FrameContext;

/// Halves the square buffer under the downgrade policy.
const DOWNGRADE_SIZE_RATIO: i32 = 2;
/// Canvas scale applied while drawing into a downgraded buffer.
const DOWNGRADE_CANVAS_SCALE: f32 = 0.5;
/// Scale correction when compositing a downgraded buffer back.
const DOWNGRADE_BACK_SCALE: f32 = 2.0;
/// Frames the buffer survives without use before it is dropped.
const MAX_RELEASE_FRAMES: u32 = 10;

/// An offscreen render target allocated by the paint backend.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OffscreenSurface {
    pub texture: TextureHandle,
    pub size: DeviceIntSize,
}

#[derive(Clone, Copy, Debug)]
pub struct OffscreenConfig {
    /// Master switch for the rotation offscreen path.
    pub enabled: bool,
    /// Trade sharpness for memory by halving the buffer.
    pub downgrade: bool,
}

impl Default for OffscreenConfig {
    fn default() -> OffscreenConfig {
        OffscreenConfig {
            enabled: true,
            downgrade: false,
        }
    }
}

/// Whether this node should draw through the rotation offscreen path.
/// Transparent and hardware-composited windows never do; neither does a
/// worker-thread subtree pass, which has its own target.
pub fn needs_rotation_offscreen(
    params: &SurfaceParams,
    frame: &FrameContext,
    config: &OffscreenConfig,
) -> bool {
    config.enabled &&
        frame.rotating &&
        !frame.subtree_pass &&
        params.kind == SurfaceNodeKind::AppWindow &&
        !params.is_transparent &&
        !params.hardware_composited
}

/// The reusable square buffer and its release bookkeeping. One per drawable
/// that takes the offscreen path.
#[derive(Debug, Default)]
pub struct OffscreenBuffer {
    surface: Option<OffscreenSurface>,
    side: i32,
    unused_frames: u32,
}

impl OffscreenBuffer {
    pub fn new() -> OffscreenBuffer {
        OffscreenBuffer::default()
    }

    /// The square side length for a target of `size`, after the downgrade
    /// policy.
    fn side_for(size: DeviceIntSize, downgrade: bool) -> i32 {
        let side = size.width.max(size.height);
        if downgrade {
            side / DOWNGRADE_SIZE_RATIO
        } else {
            side
        }
    }

    /// Fetch the buffer for this frame, reallocating when the target size
    /// changed. `None` means allocation failed and the caller must fall back
    /// to direct drawing; the frame is never blocked on this.
    pub fn acquire(
        &mut self,
        target_size: DeviceIntSize,
        config: &OffscreenConfig,
        allocate: &mut dyn FnMut(DeviceIntSize) -> Option<OffscreenSurface>,
    ) -> Option<OffscreenSurface> {
        if target_size.width <= 0 || target_size.height <= 0 {
            return None;
        }
        let side = Self::side_for(target_size, config.downgrade);
        if self.surface.is_none() || self.side != side {
            debug!("allocating {side}x{side} rotation offscreen buffer");
            self.surface = allocate(DeviceIntSize::new(side, side));
            self.side = side;
        }
        self.unused_frames = 0;
        self.surface
    }

    /// Scale applied to the canvas while drawing into the buffer.
    pub fn canvas_scale(config: &OffscreenConfig) -> f32 {
        if config.downgrade {
            DOWNGRADE_CANVAS_SCALE
        } else {
            1.0
        }
    }

    /// Scale correction applied when compositing the buffer back.
    pub fn scale_correction(config: &OffscreenConfig) -> f32 {
        if config.downgrade {
            DOWNGRADE_BACK_SCALE
        } else {
            1.0
        }
    }

    /// Call once per frame in which the buffer was not used. After a fixed
    /// number of unused frames the buffer is dropped so rotation does not
    /// pin a full-window allocation forever.
    pub fn note_unused_frame(&mut self) {
        if self.surface.is_none() {
            return;
        }
        self.unused_frames += 1;
        if self.unused_frames >= MAX_RELEASE_FRAMES {
            debug!("releasing rotation offscreen buffer after {} idle frames", self.unused_frames);
            self.surface = None;
            self.side = 0;
            self.unused_frames = 0;
        }
    }

    pub fn has_surface(&self) -> bool {
        self.surface.is_some()
    }
}
