//! Swapchain ownership and regeneration.
//!
//! [`SurfaceManager`] has no lock of its own. It always lives inside the
//! state guarded by its queue's submission mutex (queued model) or on the
//! worker thread that owns the context (immediate model), so a
//! regeneration can never overlap command buffer work.

use cacao_core::{FenceId, GpuError, ImageId, SurfaceGeneration};

use crate::device::{
    AcquireError, DepthFormat, Extent2D, PresentMode, SurfaceDevice, SurfaceSource, SwapchainDesc,
};

/// How many times an acquire regenerates and retries after "out of date"
/// before giving up.
pub const ACQUIRE_RETRIES: u8 = 1;

/// A presentable image acquired for one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameTarget {
    /// Index into the swapchain images.
    pub image_index: u32,
    /// Surface generation the image belongs to.
    pub generation: SurfaceGeneration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct DepthBuffer {
    image: ImageId,
    format: DepthFormat,
    extent: Extent2D,
}

#[derive(Debug)]
struct Swapchain {
    extent: Extent2D,
    present_mode: PresentMode,
    images: Vec<ImageId>,
    /// Fence of the last render into each image, while unretired.
    image_fences: Vec<Option<FenceId>>,
}

/// The presentable surface of one connected backend.
#[derive(Debug)]
pub struct SurfaceManager {
    generation: SurfaceGeneration,
    vsync: bool,
    swapchain: Option<Swapchain>,
    depth: Option<DepthBuffer>,
}

impl SurfaceManager {
    /// A manager with no swapchain yet.
    pub fn new(vsync: bool) -> Self {
        Self {
            generation: SurfaceGeneration::default(),
            vsync,
            swapchain: None,
            depth: None,
        }
    }

    /// Current generation; `0` until the first regeneration.
    pub fn generation(&self) -> SurfaceGeneration {
        self.generation
    }

    /// Whether a swapchain exists.
    pub fn is_live(&self) -> bool {
        self.swapchain.is_some()
    }

    /// Current vsync setting.
    pub fn vsync(&self) -> bool {
        self.vsync
    }

    /// Record a new vsync setting. Returns whether it changed; the new
    /// setting takes effect on the next regeneration.
    pub fn set_vsync(&mut self, vsync: bool) -> bool {
        let changed = self.vsync != vsync;
        self.vsync = vsync;
        changed
    }

    /// Extent of the current swapchain.
    pub fn extent(&self) -> Option<Extent2D> {
        self.swapchain.as_ref().map(|s| s.extent)
    }

    /// Present mode of the current swapchain.
    pub fn present_mode(&self) -> Option<PresentMode> {
        self.swapchain.as_ref().map(|s| s.present_mode)
    }

    /// Number of swapchain images.
    pub fn image_count(&self) -> usize {
        self.swapchain.as_ref().map_or(0, |s| s.images.len())
    }

    /// Number of images with an unretired render.
    pub fn frames_in_flight(&self) -> usize {
        self.swapchain.as_ref().map_or(0, |s| {
            s.image_fences.iter().filter(|f| f.is_some()).count()
        })
    }

    /// Remember that `fence` guards the render into `target`.
    pub fn track_fence(&mut self, target: FrameTarget, fence: FenceId) {
        if target.generation != self.generation {
            return;
        }
        if let Some(slot) = self
            .swapchain
            .as_mut()
            .and_then(|s| s.image_fences.get_mut(target.image_index as usize))
        {
            *slot = Some(fence);
        }
    }

    /// Forget `fence` once it has signalled.
    pub fn retire_fence(&mut self, target: FrameTarget, fence: FenceId) {
        if target.generation != self.generation {
            return;
        }
        if let Some(slot) = self
            .swapchain
            .as_mut()
            .and_then(|s| s.image_fences.get_mut(target.image_index as usize))
        {
            if *slot == Some(fence) {
                *slot = None;
            }
        }
    }

    /// Rebuild the swapchain at `extent`.
    ///
    /// Waits for the device to go idle, destroys the old images (and the
    /// depth buffer when its format or size changes), creates new ones and
    /// bumps the generation. Also used for the initial creation.
    pub fn regenerate<D: SurfaceDevice + ?Sized>(
        &mut self,
        device: &mut D,
        extent: Extent2D,
    ) -> Result<SurfaceGeneration, GpuError> {
        device.wait_idle()?;

        let caps = device.surface_caps()?;
        let extent = extent.clamp(caps.min_extent, caps.max_extent);
        let present_mode = PresentMode::choose(&caps.present_modes, self.vsync)?;
        let desc = SwapchainDesc {
            extent,
            image_count: caps.preferred_image_count(),
            present_mode,
        };

        if let Some(old) = self.swapchain.take() {
            device.destroy_swapchain(&old.images);
        }
        if let Some(depth) = self.depth {
            if depth.format != caps.depth_format || depth.extent != extent {
                device.destroy_depth_buffer(depth.image);
                self.depth = None;
            }
        }

        let images = device.create_swapchain(&desc)?;
        if self.depth.is_none() {
            let image = device.create_depth_buffer(extent, caps.depth_format)?;
            self.depth = Some(DepthBuffer {
                image,
                format: caps.depth_format,
                extent,
            });
        }

        self.generation = self.generation.next();
        tracing::info!(
            generation = %self.generation,
            width = extent.width,
            height = extent.height,
            images = images.len(),
            ?present_mode,
            "surface regenerated"
        );
        self.swapchain = Some(Swapchain {
            extent,
            present_mode,
            image_fences: vec![None; images.len()],
            images,
        });
        Ok(self.generation)
    }

    /// Acquire the next presentable image.
    ///
    /// On "out of date" the surface is regenerated at the source's current
    /// size and the acquire retried, at most [`ACQUIRE_RETRIES`] times; a
    /// further "out of date" is returned as [`GpuError::SurfaceOutOfDate`].
    pub fn acquire<D: SurfaceDevice + ?Sized>(
        &mut self,
        device: &mut D,
        source: &dyn SurfaceSource,
    ) -> Result<FrameTarget, GpuError> {
        self.acquire_with_retries(device, source, ACQUIRE_RETRIES)
    }

    fn acquire_with_retries<D: SurfaceDevice + ?Sized>(
        &mut self,
        device: &mut D,
        source: &dyn SurfaceSource,
        retries: u8,
    ) -> Result<FrameTarget, GpuError> {
        if !self.is_live() {
            self.regenerate(device, source.content_area_size())?;
        }
        match device.acquire_next_image() {
            Ok(image_index) => Ok(FrameTarget {
                image_index,
                generation: self.generation,
            }),
            Err(AcquireError::OutOfDate) if retries > 0 => {
                tracing::debug!(generation = %self.generation, "acquire reported out of date");
                self.regenerate(device, source.content_area_size())?;
                self.acquire_with_retries(device, source, retries - 1)
            }
            Err(AcquireError::OutOfDate) => Err(GpuError::SurfaceOutOfDate),
            Err(AcquireError::Device(e)) => Err(e),
        }
    }

    /// Destroy everything once the device is idle. The generation is kept
    /// so targets from before the teardown stay stale.
    pub fn destroy<D: SurfaceDevice + ?Sized>(&mut self, device: &mut D) {
        if let Err(e) = device.wait_idle() {
            tracing::warn!(error = %e, "wait_idle failed before surface teardown");
        }
        if let Some(old) = self.swapchain.take() {
            device.destroy_swapchain(&old.images);
        }
        if let Some(depth) = self.depth.take() {
            device.destroy_depth_buffer(depth.image);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SurfaceCaps;
    use smallvec::SmallVec;

    /// Minimal device that logs surface calls.
    struct LogDevice {
        log: Vec<String>,
        next_image: u64,
        out_of_date: u32,
        depth_format: DepthFormat,
    }

    impl LogDevice {
        fn new() -> Self {
            Self {
                log: Vec::new(),
                next_image: 100,
                out_of_date: 0,
                depth_format: DepthFormat::D32Float,
            }
        }
    }

    impl SurfaceDevice for LogDevice {
        fn surface_caps(&mut self) -> Result<SurfaceCaps, GpuError> {
            Ok(SurfaceCaps {
                min_image_count: 2,
                max_image_count: 3,
                min_extent: Extent2D::new(1, 1),
                max_extent: Extent2D::new(2048, 2048),
                present_modes: SmallVec::from_slice(&[PresentMode::Fifo, PresentMode::Immediate]),
                depth_format: self.depth_format,
            })
        }

        fn create_swapchain(&mut self, desc: &SwapchainDesc) -> Result<Vec<ImageId>, GpuError> {
            self.log.push(format!("create {}x{}", desc.extent.width, desc.extent.height));
            let images = (0..desc.image_count)
                .map(|_| {
                    self.next_image += 1;
                    ImageId(self.next_image)
                })
                .collect();
            Ok(images)
        }

        fn destroy_swapchain(&mut self, images: &[ImageId]) {
            self.log.push(format!("destroy {}", images.len()));
        }

        fn create_depth_buffer(
            &mut self,
            extent: Extent2D,
            _format: DepthFormat,
        ) -> Result<ImageId, GpuError> {
            self.log.push(format!("depth {}x{}", extent.width, extent.height));
            self.next_image += 1;
            Ok(ImageId(self.next_image))
        }

        fn destroy_depth_buffer(&mut self, _image: ImageId) {
            self.log.push("destroy depth".into());
        }

        fn wait_idle(&mut self) -> Result<(), GpuError> {
            self.log.push("idle".into());
            Ok(())
        }

        fn acquire_next_image(&mut self) -> Result<u32, AcquireError> {
            if self.out_of_date > 0 {
                self.out_of_date -= 1;
                return Err(AcquireError::OutOfDate);
            }
            Ok(0)
        }

        fn present(&mut self, _image_index: u32) -> Result<(), AcquireError> {
            Ok(())
        }
    }

    struct Window(Extent2D);

    impl SurfaceSource for Window {
        fn content_area_size(&self) -> Extent2D {
            self.0
        }
    }

    #[test]
    fn regenerate_waits_idle_before_destroying() {
        let mut dev = LogDevice::new();
        let mut surface = SurfaceManager::new(true);
        assert_eq!(
            surface.regenerate(&mut dev, Extent2D::new(640, 480)),
            Ok(SurfaceGeneration(1))
        );
        assert_eq!(surface.image_count(), 3);
        assert_eq!(surface.present_mode(), Some(PresentMode::Fifo));

        dev.log.clear();
        surface.regenerate(&mut dev, Extent2D::new(800, 600)).unwrap();
        assert_eq!(
            dev.log,
            vec!["idle", "destroy 3", "destroy depth", "create 800x600", "depth 800x600"]
        );
        assert_eq!(surface.generation(), SurfaceGeneration(2));
    }

    #[test]
    fn depth_buffer_kept_when_size_and_format_match() {
        let mut dev = LogDevice::new();
        let mut surface = SurfaceManager::new(false);
        surface.regenerate(&mut dev, Extent2D::new(320, 200)).unwrap();
        dev.log.clear();
        surface.regenerate(&mut dev, Extent2D::new(320, 200)).unwrap();
        assert!(!dev.log.iter().any(|l| l.contains("depth")));

        dev.depth_format = DepthFormat::D24S8;
        dev.log.clear();
        surface.regenerate(&mut dev, Extent2D::new(320, 200)).unwrap();
        assert!(dev.log.contains(&"destroy depth".to_string()));
    }

    #[test]
    fn acquire_retries_once_after_out_of_date() {
        let mut dev = LogDevice::new();
        let window = Window(Extent2D::new(100, 100));
        let mut surface = SurfaceManager::new(true);
        surface.regenerate(&mut dev, window.0).unwrap();

        dev.out_of_date = 1;
        let target = surface.acquire(&mut dev, &window).unwrap();
        assert_eq!(target.generation, SurfaceGeneration(2));

        dev.out_of_date = 2;
        assert_eq!(
            surface.acquire(&mut dev, &window),
            Err(GpuError::SurfaceOutOfDate)
        );
        assert_eq!(surface.generation(), SurfaceGeneration(3));
    }

    #[test]
    fn fences_of_old_generation_are_ignored() {
        let mut dev = LogDevice::new();
        let mut surface = SurfaceManager::new(true);
        surface.regenerate(&mut dev, Extent2D::new(64, 64)).unwrap();
        let target = FrameTarget {
            image_index: 1,
            generation: surface.generation(),
        };
        surface.track_fence(target, FenceId(9));
        assert_eq!(surface.frames_in_flight(), 1);

        surface.regenerate(&mut dev, Extent2D::new(64, 64)).unwrap();
        assert_eq!(surface.frames_in_flight(), 0);
        surface.track_fence(target, FenceId(10));
        assert_eq!(surface.frames_in_flight(), 0);
    }

    #[test]
    fn vsync_off_without_immediate_mode_fails() {
        struct FifoOnly(LogDevice);
        impl SurfaceDevice for FifoOnly {
            fn surface_caps(&mut self) -> Result<SurfaceCaps, GpuError> {
                let mut caps = self.0.surface_caps()?;
                caps.present_modes = SmallVec::from_slice(&[PresentMode::Fifo]);
                Ok(caps)
            }
            fn create_swapchain(&mut self, d: &SwapchainDesc) -> Result<Vec<ImageId>, GpuError> {
                self.0.create_swapchain(d)
            }
            fn destroy_swapchain(&mut self, i: &[ImageId]) {
                self.0.destroy_swapchain(i)
            }
            fn create_depth_buffer(
                &mut self,
                e: Extent2D,
                f: DepthFormat,
            ) -> Result<ImageId, GpuError> {
                self.0.create_depth_buffer(e, f)
            }
            fn destroy_depth_buffer(&mut self, i: ImageId) {
                self.0.destroy_depth_buffer(i)
            }
            fn wait_idle(&mut self) -> Result<(), GpuError> {
                self.0.wait_idle()
            }
            fn acquire_next_image(&mut self) -> Result<u32, AcquireError> {
                self.0.acquire_next_image()
            }
            fn present(&mut self, i: u32) -> Result<(), AcquireError> {
                self.0.present(i)
            }
        }

        let mut dev = FifoOnly(LogDevice::new());
        let mut surface = SurfaceManager::new(false);
        let err = surface.regenerate(&mut dev, Extent2D::new(8, 8)).unwrap_err();
        assert!(matches!(err, GpuError::Unsupported { .. }));
        assert!(!surface.is_live());
    }
}
