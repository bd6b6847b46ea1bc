/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Identifiers for surface nodes in the render scene graph.
//!
//! A [`NodeId`] encodes the id of the process that owns the node in its high
//! 32 bits, so that policy code can attribute a node to its producing client
//! without a round trip through the scene graph.

use std::fmt;

/// The id of the client process owning a surface node.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ProcessId(pub u32);

impl fmt::Display for ProcessId {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.0)
    }
}

/// A stable identifier for a node in the render scene graph.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NodeId(u64);

impl NodeId {
    pub fn new(process_id: ProcessId, index: u32) -> NodeId {
        NodeId((u64::from(process_id.0) << 32) | u64::from(index))
    }

    /// The process that created this node.
    pub fn process_id(self) -> ProcessId {
        ProcessId((self.0 >> 32) as u32)
    }

    /// The process-local part of the id.
    pub fn index(self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "({},{})", self.process_id().0, self.index())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, fmt)
    }
}
