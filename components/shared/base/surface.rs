/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The closed sets of surface-node kinds, cache modes and cache-job states,
//! shared between the scheduler, the classifier and the scene graph.

use bitflags::bitflags;

use crate::geometry::DeviceIntSize;

/// The kind of a surface node. The set is fixed at design time; all dispatch
/// over it is by `match`, never by a trait object.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SurfaceNodeKind {
    /// A window container whose children form one application window tree.
    LeashWindow,
    /// An application window with client-produced content.
    AppWindow,
    /// A surface composited from a client buffer, drawn by the client itself.
    SelfDrawing,
    /// An embedded widget (card) hosted inside another window's tree.
    Widget,
}

impl SurfaceNodeKind {
    pub fn is_window(self) -> bool {
        matches!(
            self,
            SurfaceNodeKind::LeashWindow | SurfaceNodeKind::AppWindow
        )
    }
}

/// The per-node cache-mode tag driving the asynchronous surface cache.
///
/// A transition between two enabled modes is not supported; the scheduler
/// coerces it into a disable first and lets the node re-enable on a later
/// frame once its reset has completed.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum CacheMode {
    #[default]
    None,
    LeashWindow,
    NonfocusWindow,
    Widget,
}

impl CacheMode {
    pub fn is_enabled(self) -> bool {
        self != CacheMode::None
    }
}

/// Lifecycle of one cache-production job.
///
/// `Doing` means a worker thread exclusively owns the node's cache surface;
/// nothing else may mutate or redraw the node until a terminal state is
/// observed.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum JobState {
    Unknown = 0,
    Waiting = 1,
    Doing = 2,
    Done = 3,
    Skipped = 4,
}

impl JobState {
    /// A state from which no further producer-side transition occurs for the
    /// current job instance.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Skipped)
    }

    pub fn from_u8(value: u8) -> JobState {
        match value {
            1 => JobState::Waiting,
            2 => JobState::Doing,
            3 => JobState::Done,
            4 => JobState::Skipped,
            _ => JobState::Unknown,
        }
    }
}

bitflags! {
    /// Special-layer policy bits attached to a surface node.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct SpecialLayerFlags: u8 {
        /// Must not appear on a security display unless exempted.
        const SECURITY = 1 << 0;
        /// Excluded from mirror and screenshot output.
        const SKIP_CAPTURE = 1 << 1;
        /// DRM-protected content; never cached off-screen.
        const PROTECTED = 1 << 2;
    }
}

/// The class of device the window server is composited on. It selects the
/// scheduling mode for the asynchronous surface cache.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeviceClass {
    Phone,
    Tablet,
    Desktop,
}

/// System-wide animated scenes reported by the control plane. Several of
/// them change cache eligibility while they run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SystemAnimatedScene {
    EnterRecents,
    ExitRecents,
    EnterMissionCenter,
    ExitMissionCenter,
    EnterSplitScreen,
    ExitSplitScreen,
    SnapshotRotation,
    Other,
}

/// An opaque handle to a GPU texture owned by the rendering backend.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TextureHandle(pub u64);

/// An off-screen rendered image produced by a cache job. The pixels live
/// behind [`TextureHandle`] in the rendering backend; the render service only
/// tracks ownership and lifecycle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CacheImage {
    pub texture: TextureHandle,
    pub size: DeviceIntSize,
    /// The frame epoch whose content this image reflects.
    pub content_epoch: u64,
}
