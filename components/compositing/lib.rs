/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The per-frame draw decision layer of the render service.
//!
//! For every paintable surface the classifier decides, in strict top-to-
//! bottom order, whether the node is painted now on the calling thread,
//! substituted from a previously produced cache image, or not painted at
//! all — and records why. The draw orchestration around it adds the
//! cross-thread wait gate, the per-node draw guard and the rotation
//! offscreen compensation path.

#![deny(unsafe_code)]

mod classifier;
mod draw;
mod offscreen;

pub use crate::classifier::{CaptureMode, Classification, DrawSkipReason, FrameContext, classify};
pub use crate::draw::{DrawConfig, PaintBackend, draw_surface};
pub use crate::offscreen::{OffscreenBuffer, OffscreenConfig, OffscreenSurface};
