/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The asynchronous surface-cache scheduler of the render service.
//!
//! Once per control-plane sync, the scheduler decides which first-level
//! window subtrees are rendered ahead of time on worker threads instead of on
//! the render thread, drives those jobs through their lifecycle
//! (`Waiting → Doing → Done | Skipped`), arbitrates priority between pending
//! jobs, and lets dependent drawables wait — with a bounded timeout — for an
//! in-flight job instead of racing it.

#![deny(unsafe_code)]

mod events;
mod holder;
mod params;
mod policy;
mod scene;
mod scheduler;
mod wait;
mod worker;

pub use crate::events::{AnimationEventInfo, FrameEvents};
pub use crate::holder::{CacheSurfaceHolder, DrawGuard, DrawableRegistry};
pub use crate::params::SurfaceParams;
pub use crate::policy::{SceneState, SchedulerMode};
pub use crate::scene::{SceneGraph, SurfaceCacheSwitch, SurfaceNode};
pub use crate::scheduler::{JobPriority, SchedulerConfig, SurfaceCacheScheduler};
pub use crate::wait::{ActiveRootScope, CompletionSignal, check_match_and_wait_notify};
pub use crate::worker::{
    CacheJob, CacheTaskPool, CompletionSink, SubtreeRenderer, WorkerPool, run_cache_job,
};
