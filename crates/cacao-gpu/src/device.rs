//! Device traits implemented by concrete rendering backends.
//!
//! [`SurfaceDevice`] covers presentable-surface management shared by both
//! execution models. [`ImmediateDevice`] adds single-context execution,
//! [`QueuedDevice`] adds fenced hardware-queue submission. Every method
//! is called with the owning queue's mutex held, or from the thread that
//! exclusively owns the device, so implementations take `&mut self`.

use smallvec::SmallVec;
use thiserror::Error;

use cacao_core::{FenceId, GpuError, ImageId};

use crate::command::{Command, CommandList};

/// Width and height in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Extent2D {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Extent2D {
    /// Construct an extent.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Clamp each dimension into `[min, max]`, then to at least 1.
    pub fn clamp(self, min: Extent2D, max: Extent2D) -> Self {
        Self {
            width: self.width.clamp(min.width, max.width.max(min.width)).max(1),
            height: self.height.clamp(min.height, max.height.max(min.height)).max(1),
        }
    }
}

/// How presented images are paced against the display.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PresentMode {
    /// Present without waiting for vertical blank; may tear.
    Immediate,
    /// Vsync with a replaceable single-entry queue; lowest-latency vsync.
    Mailbox,
    /// Vsync with a FIFO queue; always available on real hardware.
    Fifo,
}

impl PresentMode {
    /// Pick a mode from `supported` for the requested vsync setting.
    ///
    /// Vsync prefers mailbox and falls back to FIFO; no vsync requires
    /// immediate.
    pub fn choose(supported: &[PresentMode], vsync: bool) -> Result<PresentMode, GpuError> {
        let wanted: &[PresentMode] = if vsync {
            &[PresentMode::Mailbox, PresentMode::Fifo]
        } else {
            &[PresentMode::Immediate]
        };
        wanted
            .iter()
            .copied()
            .find(|mode| supported.contains(mode))
            .ok_or_else(|| GpuError::Unsupported {
                what: format!("no present mode for vsync={vsync} among {supported:?}"),
            })
    }
}

/// Depth attachment formats, in the order backends usually prefer them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DepthFormat {
    /// 32-bit float depth.
    D32Float,
    /// 32-bit float depth with 8-bit stencil.
    D32FloatS8,
    /// 24-bit depth with 8-bit stencil.
    D24S8,
}

/// Capabilities of the presentable surface, re-queried on each
/// regeneration.
#[derive(Clone, Debug, PartialEq)]
pub struct SurfaceCaps {
    /// Minimum number of swapchain images.
    pub min_image_count: u32,
    /// Maximum number of swapchain images; `0` means unbounded.
    pub max_image_count: u32,
    /// Smallest allowed extent.
    pub min_extent: Extent2D,
    /// Largest allowed extent.
    pub max_extent: Extent2D,
    /// Supported present modes.
    pub present_modes: SmallVec<[PresentMode; 4]>,
    /// Depth format used for the depth buffer.
    pub depth_format: DepthFormat,
}

impl SurfaceCaps {
    /// One image beyond the minimum, clamped to the maximum.
    pub fn preferred_image_count(&self) -> u32 {
        let wanted = self.min_image_count + 1;
        if self.max_image_count == 0 {
            wanted
        } else {
            wanted.min(self.max_image_count)
        }
    }
}

/// Parameters of one swapchain creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainDesc {
    /// Image size.
    pub extent: Extent2D,
    /// Number of images to create.
    pub image_count: u32,
    /// Presentation pacing.
    pub present_mode: PresentMode,
}

/// Outcome of a failed acquire or present.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AcquireError {
    /// The surface no longer matches the swapchain; regenerate.
    #[error("surface out of date")]
    OutOfDate,
    /// Any other failure.
    #[error(transparent)]
    Device(#[from] GpuError),
}

/// The window collaborator, as seen by the surface manager.
pub trait SurfaceSource: Send + Sync {
    /// Current size of the window's content area in pixels.
    fn content_area_size(&self) -> Extent2D;
}

/// Presentable-surface operations common to both execution models.
pub trait SurfaceDevice: Send {
    /// Query the surface capabilities.
    fn surface_caps(&mut self) -> Result<SurfaceCaps, GpuError>;

    /// Create swapchain images (and their views).
    fn create_swapchain(&mut self, desc: &SwapchainDesc) -> Result<Vec<ImageId>, GpuError>;

    /// Destroy swapchain images. Only called once the device is idle.
    fn destroy_swapchain(&mut self, images: &[ImageId]);

    /// Create a depth buffer.
    fn create_depth_buffer(
        &mut self,
        extent: Extent2D,
        format: DepthFormat,
    ) -> Result<ImageId, GpuError>;

    /// Destroy a depth buffer. Only called once the device is idle.
    fn destroy_depth_buffer(&mut self, image: ImageId);

    /// Block until all submitted work has finished executing.
    fn wait_idle(&mut self) -> Result<(), GpuError>;

    /// Acquire the index of the next presentable image.
    fn acquire_next_image(&mut self) -> Result<u32, AcquireError>;

    /// Present a previously acquired image.
    fn present(&mut self, image_index: u32) -> Result<(), AcquireError>;
}

/// A device whose single graphics context is bound to one thread.
pub trait ImmediateDevice: SurfaceDevice {
    /// Bind the context to the calling (worker) thread.
    fn make_current(&mut self) -> Result<(), GpuError>;

    /// Unbind the context from the calling thread.
    fn release_current(&mut self);

    /// Execute one command synchronously.
    fn execute(&mut self, command: Command) -> Result<(), GpuError>;
}

/// A device with a hardware queue and fences.
pub trait QueuedDevice: SurfaceDevice {
    /// Submit `commands` to the hardware queue, rendering into
    /// `target_image` if given. Returns the fence that signals when the
    /// GPU has finished.
    fn submit(
        &mut self,
        commands: CommandList,
        target_image: Option<u32>,
    ) -> Result<FenceId, GpuError>;

    /// Non-blocking fence query.
    fn fence_signaled(&mut self, fence: FenceId) -> Result<bool, GpuError>;
}
