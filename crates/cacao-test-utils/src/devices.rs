//! Mock devices and backends with controllable fences and fault
//! injection.
//!
//! Every mock shares its state with a [`MockDeviceHandle`] that the test
//! keeps, so the test can signal fences, inject failures and inspect the
//! event log while the device itself is owned by a command queue.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use smallvec::smallvec;

use cacao_core::{FenceId, GpuError, ImageId};
use cacao_gpu::{
    AcquireError, Command, CommandList, DepthFormat, Extent2D, ImmediateBackend, ImmediateDevice,
    PresentMode, QueuedBackend, QueuedDevice, SurfaceCaps, SurfaceDevice, SurfaceSource,
    SwapchainDesc,
};

/// Upper bound on a mock `wait_idle`, so a broken test fails instead of
/// hanging.
const IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// One call observed by a mock device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceEvent {
    BackendInit,
    BackendTerm,
    MakeCurrent { thread: Option<String> },
    ReleaseCurrent,
    CreateSwapchain {
        extent: Extent2D,
        image_count: u32,
        present_mode: PresentMode,
    },
    DestroySwapchain { images: usize },
    CreateDepth { extent: Extent2D, format: DepthFormat },
    DestroyDepth,
    WaitIdle,
    Acquire { image: u32 },
    AcquireOutOfDate,
    Submit {
        fence: FenceId,
        labels: Vec<String>,
        image: Option<u32>,
    },
    Execute { label: String },
    Present { image: u32 },
    PresentOutOfDate,
}

struct Inner {
    caps: SurfaceCaps,
    events: Vec<DeviceEvent>,
    next_image: u64,
    next_fence: u64,
    image_count: u32,
    cursor: u32,
    unsignaled: BTreeSet<FenceId>,
    auto_signal: bool,
    acquire_out_of_date: u32,
    present_out_of_date: u32,
    fail_next_submit: Option<GpuError>,
    fail_marker: Option<String>,
    fail_init: bool,
    fail_make_current: bool,
    violations: Vec<String>,
}

impl Inner {
    fn alloc_image(&mut self) -> ImageId {
        self.next_image += 1;
        ImageId(self.next_image)
    }

    fn check_idle(&mut self, what: &str) {
        if !self.unsignaled.is_empty() {
            let pending = self.unsignaled.len();
            self.violations
                .push(format!("{what} destroyed with {pending} fence(s) unsignaled"));
        }
    }
}

struct Shared {
    inner: Mutex<Inner>,
    idle: Condvar,
}

fn default_caps() -> SurfaceCaps {
    SurfaceCaps {
        min_image_count: 2,
        max_image_count: 3,
        min_extent: Extent2D::new(1, 1),
        max_extent: Extent2D::new(4096, 4096),
        present_modes: smallvec![PresentMode::Fifo, PresentMode::Mailbox, PresentMode::Immediate],
        depth_format: DepthFormat::D32Float,
    }
}

/// The test's side of a mock device.
#[derive(Clone)]
pub struct MockDeviceHandle {
    shared: Arc<Shared>,
}

impl Default for MockDeviceHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDeviceHandle {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    caps: default_caps(),
                    events: Vec::new(),
                    next_image: 0,
                    next_fence: 0,
                    image_count: 0,
                    cursor: 0,
                    unsignaled: BTreeSet::new(),
                    auto_signal: false,
                    acquire_out_of_date: 0,
                    present_out_of_date: 0,
                    fail_next_submit: None,
                    fail_marker: None,
                    fail_init: false,
                    fail_make_current: false,
                    violations: Vec::new(),
                }),
                idle: Condvar::new(),
            }),
        }
    }

    /// A queued device sharing this handle's state.
    pub fn queued_device(&self) -> MockQueuedDevice {
        MockQueuedDevice {
            handle: self.clone(),
        }
    }

    /// An immediate device sharing this handle's state.
    pub fn immediate_device(&self) -> MockImmediateDevice {
        MockImmediateDevice {
            handle: self.clone(),
        }
    }

    pub fn set_caps(&self, caps: SurfaceCaps) {
        self.shared.inner.lock().caps = caps;
    }

    /// Signal fences as soon as they are created.
    pub fn set_auto_signal(&self, on: bool) {
        self.shared.inner.lock().auto_signal = on;
    }

    pub fn signal(&self, fence: FenceId) {
        self.shared.inner.lock().unsignaled.remove(&fence);
        self.shared.idle.notify_all();
    }

    pub fn signal_all(&self) {
        self.shared.inner.lock().unsignaled.clear();
        self.shared.idle.notify_all();
    }

    pub fn unsignaled(&self) -> Vec<FenceId> {
        self.shared.inner.lock().unsignaled.iter().copied().collect()
    }

    /// The next `n` acquires report "out of date".
    pub fn fail_acquire_out_of_date(&self, n: u32) {
        self.shared.inner.lock().acquire_out_of_date = n;
    }

    /// The next `n` presents report "out of date".
    pub fn fail_present_out_of_date(&self, n: u32) {
        self.shared.inner.lock().present_out_of_date = n;
    }

    pub fn fail_next_submit(&self, error: GpuError) {
        self.shared.inner.lock().fail_next_submit = Some(error);
    }

    /// Executing a marker with this label fails.
    pub fn fail_on_marker(&self, label: impl Into<String>) {
        self.shared.inner.lock().fail_marker = Some(label.into());
    }

    /// Backends built on this handle fail `init`.
    pub fn fail_init(&self, fail: bool) {
        self.shared.inner.lock().fail_init = fail;
    }

    /// Immediate devices on this handle fail `make_current`.
    pub fn fail_make_current(&self, fail: bool) {
        self.shared.inner.lock().fail_make_current = fail;
    }

    pub fn events(&self) -> Vec<DeviceEvent> {
        self.shared.inner.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.shared.inner.lock().events.clear();
    }

    /// Number of logged events matching `pred`.
    pub fn count(&self, pred: impl Fn(&DeviceEvent) -> bool) -> usize {
        self.shared.inner.lock().events.iter().filter(|e| pred(e)).count()
    }

    /// Marker labels in execution (immediate) or submission (queued) order.
    pub fn labels(&self) -> Vec<String> {
        self.shared
            .inner
            .lock()
            .events
            .iter()
            .flat_map(|e| match e {
                DeviceEvent::Execute { label } => vec![label.clone()],
                DeviceEvent::Submit { labels, .. } => labels.clone(),
                _ => Vec::new(),
            })
            .collect()
    }

    /// Resources destroyed while work was still pending on the GPU.
    pub fn violations(&self) -> Vec<String> {
        self.shared.inner.lock().violations.clone()
    }

    fn log(&self, event: DeviceEvent) {
        self.shared.inner.lock().events.push(event);
    }

    fn caps(&self) -> SurfaceCaps {
        self.shared.inner.lock().caps.clone()
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> Vec<ImageId> {
        let mut inner = self.shared.inner.lock();
        inner.image_count = desc.image_count;
        inner.cursor = 0;
        inner.events.push(DeviceEvent::CreateSwapchain {
            extent: desc.extent,
            image_count: desc.image_count,
            present_mode: desc.present_mode,
        });
        (0..desc.image_count).map(|_| inner.alloc_image()).collect()
    }

    fn destroy_swapchain(&self, images: &[ImageId]) {
        let mut inner = self.shared.inner.lock();
        inner.check_idle("swapchain");
        inner.image_count = 0;
        inner.events.push(DeviceEvent::DestroySwapchain {
            images: images.len(),
        });
    }

    fn create_depth(&self, extent: Extent2D, format: DepthFormat) -> ImageId {
        let mut inner = self.shared.inner.lock();
        inner.events.push(DeviceEvent::CreateDepth { extent, format });
        inner.alloc_image()
    }

    fn destroy_depth(&self) {
        let mut inner = self.shared.inner.lock();
        inner.check_idle("depth buffer");
        inner.events.push(DeviceEvent::DestroyDepth);
    }

    fn wait_idle(&self) -> Result<(), GpuError> {
        let mut inner = self.shared.inner.lock();
        inner.events.push(DeviceEvent::WaitIdle);
        while !inner.unsignaled.is_empty() {
            if self.shared.idle.wait_for(&mut inner, IDLE_TIMEOUT).timed_out() {
                return Err(GpuError::device("mock wait_idle timed out"));
            }
        }
        Ok(())
    }

    fn acquire(&self) -> Result<u32, AcquireError> {
        let mut inner = self.shared.inner.lock();
        if inner.acquire_out_of_date > 0 || inner.image_count == 0 {
            inner.acquire_out_of_date = inner.acquire_out_of_date.saturating_sub(1);
            inner.events.push(DeviceEvent::AcquireOutOfDate);
            return Err(AcquireError::OutOfDate);
        }
        let image = inner.cursor;
        inner.cursor = (inner.cursor + 1) % inner.image_count;
        inner.events.push(DeviceEvent::Acquire { image });
        Ok(image)
    }

    fn present(&self, image: u32) -> Result<(), AcquireError> {
        let mut inner = self.shared.inner.lock();
        if inner.present_out_of_date > 0 {
            inner.present_out_of_date -= 1;
            inner.events.push(DeviceEvent::PresentOutOfDate);
            return Err(AcquireError::OutOfDate);
        }
        inner.events.push(DeviceEvent::Present { image });
        Ok(())
    }

    fn init_backend(&self) -> Result<(), GpuError> {
        let mut inner = self.shared.inner.lock();
        if inner.fail_init {
            return Err(GpuError::device("injected init failure"));
        }
        inner.events.push(DeviceEvent::BackendInit);
        Ok(())
    }
}

fn label_of(command: &Command) -> String {
    match command {
        Command::BeginRendering { .. } => "begin".into(),
        Command::EndRendering => "end".into(),
        Command::Marker(label) => label.to_string(),
        Command::Host(_) => "host".into(),
    }
}

macro_rules! mock_surface_device {
    ($device:ty) => {
        impl SurfaceDevice for $device {
            fn surface_caps(&mut self) -> Result<SurfaceCaps, GpuError> {
                Ok(self.handle.caps())
            }

            fn create_swapchain(&mut self, desc: &SwapchainDesc) -> Result<Vec<ImageId>, GpuError> {
                Ok(self.handle.create_swapchain(desc))
            }

            fn destroy_swapchain(&mut self, images: &[ImageId]) {
                self.handle.destroy_swapchain(images);
            }

            fn create_depth_buffer(
                &mut self,
                extent: Extent2D,
                format: DepthFormat,
            ) -> Result<ImageId, GpuError> {
                Ok(self.handle.create_depth(extent, format))
            }

            fn destroy_depth_buffer(&mut self, _image: ImageId) {
                self.handle.destroy_depth();
            }

            fn wait_idle(&mut self) -> Result<(), GpuError> {
                self.handle.wait_idle()
            }

            fn acquire_next_image(&mut self) -> Result<u32, AcquireError> {
                self.handle.acquire()
            }

            fn present(&mut self, image_index: u32) -> Result<(), AcquireError> {
                self.handle.present(image_index)
            }
        }
    };
}

// ── Queued ───────────────────────────────────────────────────────

/// Fenced device. Fences stay unsignaled until the test signals them
/// (or auto-signal is on). `wait_idle` blocks until every fence has
/// signalled.
pub struct MockQueuedDevice {
    handle: MockDeviceHandle,
}

mock_surface_device!(MockQueuedDevice);

impl QueuedDevice for MockQueuedDevice {
    fn submit(
        &mut self,
        commands: CommandList,
        target_image: Option<u32>,
    ) -> Result<FenceId, GpuError> {
        let labels: Vec<String> = commands.iter().map(label_of).collect();
        for command in commands {
            if let Command::Host(f) = command {
                f()?;
            }
        }
        let mut inner = self.handle.shared.inner.lock();
        if let Some(e) = inner.fail_next_submit.take() {
            return Err(e);
        }
        inner.next_fence += 1;
        let fence = FenceId(inner.next_fence);
        if !inner.auto_signal {
            inner.unsignaled.insert(fence);
        }
        inner.events.push(DeviceEvent::Submit {
            fence,
            labels,
            image: target_image,
        });
        Ok(fence)
    }

    fn fence_signaled(&mut self, fence: FenceId) -> Result<bool, GpuError> {
        Ok(!self.handle.shared.inner.lock().unsignaled.contains(&fence))
    }
}

/// Backend whose devices are [`MockQueuedDevice`]s on one handle.
pub struct MockQueuedBackend {
    handle: MockDeviceHandle,
}

impl MockQueuedBackend {
    pub fn new(handle: &MockDeviceHandle) -> Self {
        Self {
            handle: handle.clone(),
        }
    }
}

impl QueuedBackend for MockQueuedBackend {
    fn init(&mut self) -> Result<(), GpuError> {
        self.handle.init_backend()
    }

    fn connect(&mut self, _source: &dyn SurfaceSource) -> Result<Box<dyn QueuedDevice>, GpuError> {
        Ok(Box::new(self.handle.queued_device()))
    }

    fn term(&mut self) {
        self.handle.log(DeviceEvent::BackendTerm);
    }
}

// ── Immediate ────────────────────────────────────────────────────

/// Single-context device that logs every executed command.
pub struct MockImmediateDevice {
    handle: MockDeviceHandle,
}

mock_surface_device!(MockImmediateDevice);

impl ImmediateDevice for MockImmediateDevice {
    fn make_current(&mut self) -> Result<(), GpuError> {
        self.handle.log(DeviceEvent::MakeCurrent {
            thread: thread::current().name().map(str::to_owned),
        });
        if self.handle.shared.inner.lock().fail_make_current {
            return Err(GpuError::device("context could not be made current"));
        }
        Ok(())
    }

    fn release_current(&mut self) {
        self.handle.log(DeviceEvent::ReleaseCurrent);
    }

    fn execute(&mut self, command: Command) -> Result<(), GpuError> {
        let label = label_of(&command);
        if let Command::Host(f) = command {
            f()?;
        }
        let mut inner = self.handle.shared.inner.lock();
        if inner.fail_marker.as_deref() == Some(label.as_str()) {
            return Err(GpuError::device(format!("injected failure at '{label}'")));
        }
        inner.events.push(DeviceEvent::Execute { label });
        Ok(())
    }
}

/// Backend whose devices are [`MockImmediateDevice`]s on one handle.
pub struct MockImmediateBackend {
    handle: MockDeviceHandle,
}

impl MockImmediateBackend {
    pub fn new(handle: &MockDeviceHandle) -> Self {
        Self {
            handle: handle.clone(),
        }
    }
}

impl ImmediateBackend for MockImmediateBackend {
    fn init(&mut self) -> Result<(), GpuError> {
        self.handle.init_backend()
    }

    fn connect(
        &mut self,
        _source: &dyn SurfaceSource,
    ) -> Result<Box<dyn ImmediateDevice>, GpuError> {
        Ok(Box::new(self.handle.immediate_device()))
    }

    fn term(&mut self) {
        self.handle.log(DeviceEvent::BackendTerm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fences_stay_pending_until_signalled() {
        let handle = MockDeviceHandle::new();
        let mut dev = handle.queued_device();
        let fence = dev.submit(CommandList::new(), None).unwrap();
        assert!(!dev.fence_signaled(fence).unwrap());
        handle.signal(fence);
        assert!(dev.fence_signaled(fence).unwrap());
    }

    #[test]
    fn wait_idle_blocks_until_signal() {
        let handle = MockDeviceHandle::new();
        let mut dev = handle.queued_device();
        let fence = dev.submit(CommandList::new(), None).unwrap();
        let signaller = handle.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            signaller.signal(fence);
        });
        dev.wait_idle().unwrap();
        assert!(handle.unsignaled().is_empty());
        t.join().unwrap();
    }

    #[test]
    fn destroy_with_pending_fence_is_a_violation() {
        let handle = MockDeviceHandle::new();
        let mut dev = handle.queued_device();
        dev.submit(CommandList::new(), None).unwrap();
        dev.destroy_swapchain(&[]);
        assert_eq!(handle.violations().len(), 1);
    }

    #[test]
    fn injected_out_of_date_counts_down() {
        let handle = MockDeviceHandle::new();
        let mut dev = handle.queued_device();
        let desc = SwapchainDesc {
            extent: Extent2D::new(4, 4),
            image_count: 2,
            present_mode: PresentMode::Fifo,
        };
        dev.create_swapchain(&desc).unwrap();
        handle.fail_acquire_out_of_date(1);
        assert_eq!(dev.acquire_next_image(), Err(AcquireError::OutOfDate));
        assert_eq!(dev.acquire_next_image(), Ok(0));
    }
}
