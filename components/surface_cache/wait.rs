/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The cross-thread wait protocol.
//!
//! A drawable whose correct pixels depend on another subtree's cache job may
//! block here until that job reaches a terminal state, bounded by a timeout
//! chosen to stay well under one frame interval. Timing out is not an error:
//! the caller proceeds with whatever state is available, because a stale
//! subtree beats a compositor stall.

use std::cell::Cell;
use std::time::{Duration, Instant};

use base::id::NodeId;
use base::surface::JobState;
use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::holder::DrawableRegistry;
use crate::params::SurfaceParams;

/// The condition variable every producer notifies when a job reaches a
/// terminal state. One instance is shared by a scheduler, its workers and all
/// waiting drawables.
#[derive(Default)]
pub struct CompletionSignal {
    lock: Mutex<()>,
    condvar: Condvar,
}

impl CompletionSignal {
    pub fn new() -> CompletionSignal {
        CompletionSignal::default()
    }

    /// Apply a terminal state transition and wake all waiters. The state
    /// store runs under the mutex, so a waiter re-checking its predicate
    /// after wakeup always observes the new state.
    pub fn notify_terminal(&self, apply: impl FnOnce()) {
        {
            let _guard = self.lock.lock();
            apply();
        }
        self.condvar.notify_all();
    }

    /// Block until `predicate` holds or `timeout` elapses. Returns the final
    /// predicate value.
    pub fn wait_while_false(&self, timeout: Duration, predicate: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock();
        while !predicate() {
            if self.condvar.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        drop(guard);
        predicate()
    }
}

#[derive(Clone, Copy, Default)]
struct ActiveRoot {
    first_level_id: Option<NodeId>,
    cache_root_id: Option<NodeId>,
}

thread_local! {
    static ACTIVE_ROOT: Cell<ActiveRoot> = const { Cell::new(ActiveRoot {
        first_level_id: None,
        cache_root_id: None,
    }) };
}

/// RAII token marking the subtree this thread is currently producing.
///
/// A worker holds one for the duration of a cache job (and nested subtree
/// draws), so that a wait-check performed from the producer thread itself
/// recognizes its own subtree and never self-deadlocks. The previous value is
/// restored on drop, which keeps nested scopes correct.
pub struct ActiveRootScope {
    previous: ActiveRoot,
}

impl ActiveRootScope {
    pub fn new(first_level_id: Option<NodeId>, cache_root_id: Option<NodeId>) -> ActiveRootScope {
        let current = ActiveRoot {
            first_level_id,
            cache_root_id,
        };
        let previous = ACTIVE_ROOT.with(|cell| cell.replace(current));
        ActiveRootScope { previous }
    }
}

impl Drop for ActiveRootScope {
    fn drop(&mut self) {
        ACTIVE_ROOT.with(|cell| cell.set(self.previous));
    }
}

/// Whether the calling thread is itself producing the subtree `params`
/// belongs to. With no active scope at all this is vacuously true: the
/// scheduler may not be driving this thread, and drawing must proceed.
fn current_root_matches(params: &SurfaceParams) -> bool {
    let active = ACTIVE_ROOT.with(Cell::get);
    if active.first_level_id.is_none() && active.cache_root_id.is_none() {
        return true;
    }
    (active.cache_root_id.is_some() && params.cache_root_id == active.cache_root_id) ||
        (active.first_level_id.is_some() && params.first_level_id == active.first_level_id)
}

/// Gate a drawable on its dependency root's cache job.
///
/// Returns `true` when drawing may proceed on consistent state: the caller is
/// the producer thread for this subtree, there is nothing to wait for, or the
/// root's job reached a terminal state in time. Returns `false` on timeout.
pub fn check_match_and_wait_notify(
    registry: &DrawableRegistry,
    signal: &CompletionSignal,
    params: &SurfaceParams,
    check_match: bool,
    timeout: Duration,
) -> bool {
    if check_match && current_root_matches(params) {
        return true;
    }

    let Some(root_id) = params.dependency_root() else {
        // No grouping root declared, so no cache job can be racing us.
        debug!("node {:?} has no dependency root, not waiting", params.id);
        return true;
    };
    let Some(root) = registry.get(root_id) else {
        // The root drawable is already gone; its job can never complete and
        // nothing it produced can be substituted. Draw un-gated.
        debug!("dependency root {root_id:?} not resolvable, not waiting");
        return true;
    };

    let observed_terminal = signal.wait_while_false(timeout, || {
        matches!(
            root.state(),
            JobState::Done | JobState::Unknown | JobState::Skipped
        )
    });
    if !observed_terminal {
        warn!(
            "node {:?} timed out after {}ms waiting for cache root {root_id:?}",
            params.id,
            timeout.as_millis(),
        );
    }
    observed_terminal
}
