//! Headless backends: no real GPU behind them.
//!
//! Commands are no-ops except [`Command::Host`], which runs its closure.
//! Queued fences report signalled on the first poll. Useful for demos,
//! benches and CI machines without a display.

use std::sync::atomic::{AtomicU32, Ordering};

use smallvec::smallvec;

use cacao_core::{FenceId, GpuError, ImageId};

use crate::command::{Command, CommandList};
use crate::device::{
    AcquireError, DepthFormat, Extent2D, ImmediateDevice, PresentMode, QueuedDevice, SurfaceCaps,
    SurfaceDevice, SurfaceSource, SwapchainDesc,
};
use crate::module::{ImmediateBackend, QueuedBackend};

const MAX_EXTENT: Extent2D = Extent2D::new(16384, 16384);

// ── Surface ──────────────────────────────────────────────────────

/// A window stand-in whose content area can be resized.
#[derive(Debug)]
pub struct HeadlessSurface {
    width: AtomicU32,
    height: AtomicU32,
}

impl HeadlessSurface {
    /// A surface of the given size.
    pub fn new(extent: Extent2D) -> Self {
        Self {
            width: AtomicU32::new(extent.width),
            height: AtomicU32::new(extent.height),
        }
    }

    /// Change the reported content-area size.
    pub fn resize(&self, extent: Extent2D) {
        self.width.store(extent.width, Ordering::Relaxed);
        self.height.store(extent.height, Ordering::Relaxed);
    }
}

impl SurfaceSource for HeadlessSurface {
    fn content_area_size(&self) -> Extent2D {
        Extent2D::new(
            self.width.load(Ordering::Relaxed),
            self.height.load(Ordering::Relaxed),
        )
    }
}

// ── Shared device core ───────────────────────────────────────────

#[derive(Debug, Default)]
struct Swap {
    next_image: u64,
    image_count: u32,
    cursor: u32,
}

impl Swap {
    fn caps() -> SurfaceCaps {
        SurfaceCaps {
            min_image_count: 2,
            max_image_count: 0,
            min_extent: Extent2D::new(1, 1),
            max_extent: MAX_EXTENT,
            present_modes: smallvec![PresentMode::Fifo, PresentMode::Mailbox, PresentMode::Immediate],
            depth_format: DepthFormat::D32Float,
        }
    }

    fn alloc(&mut self) -> ImageId {
        self.next_image += 1;
        ImageId(self.next_image)
    }

    fn create(&mut self, desc: &SwapchainDesc) -> Vec<ImageId> {
        self.image_count = desc.image_count;
        self.cursor = 0;
        (0..desc.image_count).map(|_| self.alloc()).collect()
    }

    fn acquire(&mut self) -> Result<u32, AcquireError> {
        if self.image_count == 0 {
            return Err(AcquireError::OutOfDate);
        }
        let index = self.cursor;
        self.cursor = (self.cursor + 1) % self.image_count;
        Ok(index)
    }
}

macro_rules! headless_surface_device {
    ($device:ty) => {
        impl SurfaceDevice for $device {
            fn surface_caps(&mut self) -> Result<SurfaceCaps, GpuError> {
                Ok(Swap::caps())
            }

            fn create_swapchain(&mut self, desc: &SwapchainDesc) -> Result<Vec<ImageId>, GpuError> {
                Ok(self.swap.create(desc))
            }

            fn destroy_swapchain(&mut self, _images: &[ImageId]) {
                self.swap.image_count = 0;
            }

            fn create_depth_buffer(
                &mut self,
                _extent: Extent2D,
                _format: DepthFormat,
            ) -> Result<ImageId, GpuError> {
                Ok(self.swap.alloc())
            }

            fn destroy_depth_buffer(&mut self, _image: ImageId) {}

            fn wait_idle(&mut self) -> Result<(), GpuError> {
                Ok(())
            }

            fn acquire_next_image(&mut self) -> Result<u32, AcquireError> {
                self.swap.acquire()
            }

            fn present(&mut self, _image_index: u32) -> Result<(), AcquireError> {
                Ok(())
            }
        }
    };
}

fn run_host(command: Command) -> Result<(), GpuError> {
    match command {
        Command::Host(f) => f(),
        _ => Ok(()),
    }
}

// ── Immediate ────────────────────────────────────────────────────

/// Headless single-context backend.
#[derive(Debug, Default)]
pub struct HeadlessImmediate;

impl ImmediateBackend for HeadlessImmediate {
    fn init(&mut self) -> Result<(), GpuError> {
        Ok(())
    }

    fn connect(
        &mut self,
        _source: &dyn SurfaceSource,
    ) -> Result<Box<dyn ImmediateDevice>, GpuError> {
        Ok(Box::new(HeadlessImmediateDevice::default()))
    }

    fn term(&mut self) {}
}

/// Device created by [`HeadlessImmediate`].
#[derive(Debug, Default)]
pub struct HeadlessImmediateDevice {
    swap: Swap,
}

headless_surface_device!(HeadlessImmediateDevice);

impl ImmediateDevice for HeadlessImmediateDevice {
    fn make_current(&mut self) -> Result<(), GpuError> {
        Ok(())
    }

    fn release_current(&mut self) {}

    fn execute(&mut self, command: Command) -> Result<(), GpuError> {
        run_host(command)
    }
}

// ── Queued ───────────────────────────────────────────────────────

/// Headless hardware-queue backend.
#[derive(Debug, Default)]
pub struct HeadlessQueued;

impl QueuedBackend for HeadlessQueued {
    fn init(&mut self) -> Result<(), GpuError> {
        Ok(())
    }

    fn connect(&mut self, _source: &dyn SurfaceSource) -> Result<Box<dyn QueuedDevice>, GpuError> {
        Ok(Box::new(HeadlessQueuedDevice::default()))
    }

    fn term(&mut self) {}
}

/// Device created by [`HeadlessQueued`]. Commands run at submission.
#[derive(Debug, Default)]
pub struct HeadlessQueuedDevice {
    swap: Swap,
    next_fence: u64,
}

headless_surface_device!(HeadlessQueuedDevice);

impl QueuedDevice for HeadlessQueuedDevice {
    fn submit(
        &mut self,
        commands: CommandList,
        _target_image: Option<u32>,
    ) -> Result<FenceId, GpuError> {
        commands.into_iter().try_for_each(run_host)?;
        self.next_fence += 1;
        Ok(FenceId(self.next_fence))
    }

    fn fence_signaled(&mut self, _fence: FenceId) -> Result<bool, GpuError> {
        Ok(true)
    }
}
