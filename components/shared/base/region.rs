/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! A minimal rectangle-set region, used for visibility and dirty tracking.
//!
//! The occlusion oracle hands the render service visible regions as rect
//! sets; the service only ever needs emptiness and intersection tests plus
//! rect accumulation, so no normalization (banding, coalescing) is done.

use smallvec::SmallVec;

use crate::geometry::DeviceIntRect;

/// A set of possibly-overlapping rectangles in device pixels.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Region {
    rects: SmallVec<[DeviceIntRect; 4]>,
}

impl Region {
    pub fn new() -> Region {
        Region::default()
    }

    pub fn from_rect(rect: DeviceIntRect) -> Region {
        let mut region = Region::new();
        region.union_rect(rect);
        region
    }

    /// Add a rect to the region. Empty rects are discarded.
    pub fn union_rect(&mut self, rect: DeviceIntRect) {
        if !rect.is_empty() {
            self.rects.push(rect);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rects.iter().all(|rect| rect.is_empty())
    }

    pub fn intersects_rect(&self, rect: &DeviceIntRect) -> bool {
        !rect.is_empty() && self.rects.iter().any(|r| r.intersects(rect))
    }

    /// Whether any rect of `self` overlaps any rect of `other`.
    pub fn intersects(&self, other: &Region) -> bool {
        other.rects.iter().any(|rect| self.intersects_rect(rect))
    }

    pub fn rects(&self) -> &[DeviceIntRect] {
        &self.rects
    }

    /// The union of all member rects as one bounding rect.
    pub fn bounds(&self) -> DeviceIntRect {
        self.rects
            .iter()
            .fold(DeviceIntRect::zero(), |bounds, rect| {
                crate::geometry::join_rects(bounds, *rect)
            })
    }

    pub fn clear(&mut self) {
        self.rects.clear();
    }
}
