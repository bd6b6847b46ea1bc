/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Per-node cache surface state shared between the render thread and worker
//! threads.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};

use base::id::NodeId;
use base::surface::{CacheImage, JobState};
use log::debug;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::wait::CompletionSignal;

/// The unit of caching: owns a node's optional off-screen rendered image and
/// its production status.
///
/// Ownership of the image slots follows the job lifecycle: while the state is
/// `Doing` the assigned worker thread has exclusive write access to the
/// in-progress slot; in every other state the render thread owns both slots
/// and the completed image may be shared read-only.
pub struct CacheSurfaceHolder {
    id: NodeId,
    state: AtomicU8,

    /// Image being produced by the current job; moved into `completed` when
    /// the render thread commits the job.
    surface: Mutex<Option<CacheImage>>,
    /// The last committed image, valid for substitution while
    /// `texture_valid`.
    completed: Mutex<Option<CacheImage>>,
    texture_valid: AtomicBool,
    /// A finished job produced a new image that has not been committed yet.
    needs_commit: AtomicBool,

    /// Content was static when the cached image was produced.
    content_static: AtomicBool,
    /// The last job was skipped by its worker rather than rendered.
    worker_skipped: AtomicBool,
    /// Frames the completed image has been reused without re-rendering.
    reuse_count: AtomicU32,

    /// Priority assigned by the render thread's sorting pass.
    priority: AtomicU8,
    /// Frame epoch at which the current job was posted.
    task_epoch: AtomicU64,

    /// Per-node draw guard; detects the same drawable being drawn from two
    /// call sites at once.
    draw_busy: AtomicBool,
    multi_access_events: AtomicU32,
}

impl CacheSurfaceHolder {
    pub fn new(id: NodeId) -> CacheSurfaceHolder {
        CacheSurfaceHolder {
            id,
            state: AtomicU8::new(JobState::Unknown as u8),
            surface: Mutex::new(None),
            completed: Mutex::new(None),
            texture_valid: AtomicBool::new(false),
            needs_commit: AtomicBool::new(false),
            content_static: AtomicBool::new(true),
            worker_skipped: AtomicBool::new(false),
            reuse_count: AtomicU32::new(0),
            priority: AtomicU8::new(0),
            task_epoch: AtomicU64::new(0),
            draw_busy: AtomicBool::new(false),
            multi_access_events: AtomicU32::new(0),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn state(&self) -> JobState {
        JobState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Store a non-terminal state. Terminal states must go through
    /// [`CacheSurfaceHolder::set_state_terminal`] so waiters are woken.
    pub fn set_state(&self, state: JobState) {
        debug_assert!(!state.is_terminal());
        self.state.store(state as u8, Ordering::Release);
    }

    /// Store a terminal state and wake every thread blocked on `signal`.
    /// The store happens under the signal's mutex so a waiter cannot observe
    /// the notification without the state.
    pub fn set_state_terminal(&self, signal: &CompletionSignal, state: JobState) {
        debug_assert!(state.is_terminal());
        signal.notify_terminal(|| self.state.store(state as u8, Ordering::Release));
    }

    /// Whether a committed image exists and is usable for substitution.
    pub fn has_cached_texture(&self) -> bool {
        self.texture_valid.load(Ordering::Acquire) && self.completed.lock().is_some()
    }

    pub fn completed_image(&self) -> Option<CacheImage> {
        if !self.texture_valid.load(Ordering::Acquire) {
            return None;
        }
        *self.completed.lock()
    }

    /// Called by the worker that produced an image. Only valid while the
    /// holder is `Doing` (the worker owns the in-progress slot).
    pub fn store_produced_image(&self, image: CacheImage) {
        *self.surface.lock() = Some(image);
        self.needs_commit.store(true, Ordering::Release);
    }

    pub fn needs_commit(&self) -> bool {
        self.needs_commit.load(Ordering::Acquire)
    }

    pub fn has_produced_image(&self) -> bool {
        self.surface.lock().is_some()
    }

    /// Commit the produced image as the new completed cache. Render thread
    /// only, and only once the job is terminal.
    pub fn commit_completed(&self) -> bool {
        let produced = self.surface.lock().take();
        let Some(image) = produced else {
            return false;
        };
        *self.completed.lock() = Some(image);
        self.texture_valid.store(true, Ordering::Release);
        self.needs_commit.store(false, Ordering::Release);
        self.reuse_count.store(0, Ordering::Relaxed);
        true
    }

    /// Drop all cache resources and return the holder to its initial state.
    /// Must not be called while a job is `Doing`.
    pub fn reset(&self) {
        debug_assert!(self.state() != JobState::Doing);
        debug!("releasing cache surfaces for {:?}", self.id);
        *self.surface.lock() = None;
        *self.completed.lock() = None;
        self.texture_valid.store(false, Ordering::Release);
        self.needs_commit.store(false, Ordering::Release);
        self.worker_skipped.store(false, Ordering::Relaxed);
        self.reuse_count.store(0, Ordering::Relaxed);
        self.content_static.store(true, Ordering::Relaxed);
        self.state.store(JobState::Unknown as u8, Ordering::Release);
    }

    pub fn content_static(&self) -> bool {
        self.content_static.load(Ordering::Relaxed)
    }

    pub fn set_content_static(&self, value: bool) {
        self.content_static.store(value, Ordering::Relaxed);
    }

    pub fn worker_skipped(&self) -> bool {
        self.worker_skipped.load(Ordering::Relaxed)
    }

    pub fn note_worker_skip(&self) {
        self.worker_skipped.store(true, Ordering::Relaxed);
    }

    /// Cleared when a job starts; the flag describes the latest run only.
    pub fn clear_worker_skip(&self) {
        self.worker_skipped.store(false, Ordering::Relaxed);
    }

    pub fn note_reuse(&self) -> u32 {
        self.reuse_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn reset_reuse_count(&self) {
        self.reuse_count.store(0, Ordering::Relaxed);
    }

    pub fn set_priority(&self, priority: u8) {
        self.priority.store(priority, Ordering::Relaxed);
    }

    pub fn priority(&self) -> u8 {
        self.priority.load(Ordering::Relaxed)
    }

    pub fn set_task_epoch(&self, epoch: u64) {
        self.task_epoch.store(epoch, Ordering::Release);
    }

    pub fn task_epoch(&self) -> u64 {
        self.task_epoch.load(Ordering::Acquire)
    }

    /// Try to take the per-node draw guard. `None` means another call site is
    /// already drawing this node.
    pub fn try_begin_draw(&self) -> Option<DrawGuard<'_>> {
        if self
            .draw_busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(DrawGuard { holder: self })
        } else {
            self.multi_access_events.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// How many concurrent-access violations have been detected on this node.
    pub fn multi_access_events(&self) -> u32 {
        self.multi_access_events.load(Ordering::Relaxed)
    }
}

/// RAII token for the per-node draw guard.
pub struct DrawGuard<'a> {
    holder: &'a CacheSurfaceHolder,
}

impl Drop for DrawGuard<'_> {
    fn drop(&mut self) {
        self.holder.draw_busy.store(false, Ordering::Release);
    }
}

/// Id-keyed lookup of cache holders, shared between the render thread, the
/// wait protocol and worker jobs. Holders never extend node lifetime; a node
/// that left the tree simply stops resolving.
#[derive(Default)]
pub struct DrawableRegistry {
    map: RwLock<FxHashMap<NodeId, Arc<CacheSurfaceHolder>>>,
}

impl DrawableRegistry {
    pub fn new() -> DrawableRegistry {
        DrawableRegistry::default()
    }

    pub fn get(&self, id: NodeId) -> Option<Arc<CacheSurfaceHolder>> {
        self.map.read().get(&id).cloned()
    }

    /// Fetch the holder for `id`, creating it on first use.
    pub fn ensure(&self, id: NodeId) -> Arc<CacheSurfaceHolder> {
        if let Some(holder) = self.get(id) {
            return holder;
        }
        let holder = Arc::new(CacheSurfaceHolder::new(id));
        self.map.write().entry(id).or_insert(holder).clone()
    }

    pub fn remove(&self, id: NodeId) -> Option<Arc<CacheSurfaceHolder>> {
        self.map.write().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}
