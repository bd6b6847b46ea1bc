/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Device-pixel geometry used throughout the render service. Composition
//! happens in integer device pixels; only alpha and scale factors are float.

use euclid::{Point2D, Rect, Size2D};

/// One hardware pixel of the target display.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct DevicePixel;

pub type DeviceIntPoint = Point2D<i32, DevicePixel>;
pub type DeviceIntSize = Size2D<i32, DevicePixel>;
pub type DeviceIntRect = Rect<i32, DevicePixel>;

/// Shorthand for building a [`DeviceIntRect`] from components.
pub fn device_rect(x: i32, y: i32, width: i32, height: i32) -> DeviceIntRect {
    DeviceIntRect::new(DeviceIntPoint::new(x, y), DeviceIntSize::new(width, height))
}

/// Join two rects, treating an empty rect as the identity. `Rect::union`
/// would otherwise pull the result towards an empty rect's origin.
pub fn join_rects(a: DeviceIntRect, b: DeviceIntRect) -> DeviceIntRect {
    if a.is_empty() {
        return b;
    }
    if b.is_empty() {
        return a;
    }
    a.union(&b)
}
