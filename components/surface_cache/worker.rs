/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Worker-side execution of cache-production jobs.
//!
//! The pool itself is a conventional channel-fed thread pool; the interesting
//! part is [`run_cache_job`], which owns the job lifecycle on the worker:
//! `Doing` on entry, exactly one terminal state on exit, waiters notified,
//! and the result reported back into the scheduler's done/skipped queues.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use base::id::NodeId;
use base::surface::{CacheImage, JobState};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, trace, warn};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use crate::holder::CacheSurfaceHolder;
use crate::params::SurfaceParams;
use crate::wait::{ActiveRootScope, CompletionSignal};

/// Produces the actual pixels of a cached subtree. Rendering primitives are
/// outside this crate; the scheduler only drives the lifecycle around them.
pub trait SubtreeRenderer: Send + Sync {
    /// Render the subtree described by `params` into a new off-screen image.
    /// `None` means nothing usable was produced (for example the subtree
    /// became empty); the job is then marked skipped.
    fn render_cache(&self, params: &SurfaceParams) -> Option<CacheImage>;

    /// Drop renderer-side scratch resources kept for idle workers.
    fn release_idle_resources(&self) {}
}

/// Where workers report finished jobs. Appending is the only operation a
/// worker may perform on scheduler state.
#[derive(Clone, Default)]
pub struct CompletionSink {
    done: Arc<Mutex<Vec<NodeId>>>,
    skipped: Arc<Mutex<FxHashSet<NodeId>>>,
}

impl CompletionSink {
    pub fn new() -> CompletionSink {
        CompletionSink::default()
    }

    pub fn push_done(&self, id: NodeId) {
        trace!("job done {id:?}");
        self.done.lock().push(id);
    }

    pub fn push_skipped(&self, id: NodeId) {
        trace!("job skipped {id:?}");
        self.skipped.lock().insert(id);
    }

    pub fn take_done(&self) -> Vec<NodeId> {
        std::mem::take(&mut self.done.lock())
    }

    pub fn take_skipped(&self) -> FxHashSet<NodeId> {
        std::mem::take(&mut self.skipped.lock())
    }

    pub fn has_skipped(&self) -> bool {
        !self.skipped.lock().is_empty()
    }
}

/// One cache-production job, posted by the scheduler to the worker pool.
pub struct CacheJob {
    pub holder: Arc<CacheSurfaceHolder>,
    pub params: Arc<SurfaceParams>,
    /// Frame epoch when the job was posted, compared against the render
    /// thread's current epoch to detect stale posts.
    pub current_epoch: Arc<AtomicU64>,
}

/// The worker pool as the scheduler sees it. Posting is fire-and-forget and
/// must never block the render thread.
pub trait CacheTaskPool {
    fn schedule(&self, job: CacheJob);
    fn try_release_idle_resources(&self);
}

/// Execute one cache job on the current (worker) thread.
pub fn run_cache_job(
    job: CacheJob,
    worker_index: usize,
    renderer: &dyn SubtreeRenderer,
    signal: &CompletionSignal,
    sink: &CompletionSink,
) {
    let holder = &job.holder;
    let id = holder.id();

    // Mark this thread as the producer of the subtree so that re-entrant
    // wait-checks from nested draws return immediately.
    let _active = ActiveRootScope::new(job.params.first_level_id, job.params.cache_root_id);

    trace!("cache job for {id:?} running on worker {worker_index}");
    holder.set_state(JobState::Doing);
    holder.clear_worker_skip();

    // A post that is older than the current frame and already has a usable
    // texture is not worth re-rendering; the render thread substitutes the
    // existing image and the scheduler re-queues the node.
    let current_epoch = job.current_epoch.load(Ordering::Acquire);
    if holder.has_cached_texture() && holder.task_epoch() != current_epoch {
        debug!(
            "stale cache job for {id:?} (posted at epoch {}, current {current_epoch}), skipping",
            holder.task_epoch(),
        );
        holder.note_worker_skip();
        holder.set_state_terminal(signal, JobState::Skipped);
        sink.push_skipped(id);
        return;
    }

    match renderer.render_cache(&job.params) {
        Some(image) => {
            holder.store_produced_image(image);
            holder.set_state_terminal(signal, JobState::Done);
            sink.push_done(id);
        },
        None => {
            debug!("cache job for {id:?} produced nothing usable");
            holder.set_state_terminal(signal, JobState::Skipped);
            sink.push_skipped(id);
        },
    }
}

enum WorkerMessage {
    Run(CacheJob),
    ReleaseIdle,
    Quit,
}

/// A bounded pool of named worker threads executing cache jobs.
pub struct WorkerPool {
    sender: Sender<WorkerMessage>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(
        thread_count: usize,
        renderer: Arc<dyn SubtreeRenderer>,
        signal: Arc<CompletionSignal>,
        sink: CompletionSink,
    ) -> WorkerPool {
        let (sender, receiver) = crossbeam_channel::unbounded::<WorkerMessage>();
        let workers = (0..thread_count.max(1))
            .map(|index| {
                let receiver: Receiver<WorkerMessage> = receiver.clone();
                let renderer = renderer.clone();
                let signal = signal.clone();
                let sink = sink.clone();
                thread::Builder::new()
                    .name(format!("SurfaceCacheWorker#{index}"))
                    .spawn(move || {
                        while let Ok(message) = receiver.recv() {
                            match message {
                                WorkerMessage::Run(job) => {
                                    run_cache_job(job, index, &*renderer, &signal, &sink);
                                },
                                WorkerMessage::ReleaseIdle => {
                                    renderer.release_idle_resources();
                                },
                                WorkerMessage::Quit => return,
                            }
                        }
                    })
                    .expect("Could not create surface cache worker thread.")
            })
            .collect();
        WorkerPool { sender, workers }
    }
}

impl CacheTaskPool for WorkerPool {
    fn schedule(&self, job: CacheJob) {
        if self.sender.send(WorkerMessage::Run(job)).is_err() {
            warn!("Posting cache job to a stopped worker pool.");
        }
    }

    fn try_release_idle_resources(&self) {
        let _ = self.sender.send(WorkerMessage::ReleaseIdle);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for _ in &self.workers {
            let _ = self.sender.send(WorkerMessage::Quit);
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
