//! Immediate execution model against a mock single-context device.
//!
//! One worker thread owns the context; buffers execute strictly in
//! submission order and each handle resolves as its buffer finishes.
//! A context that cannot be bound fails `start` and leaves the queue
//! stopped.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cacao_core::{BackendKind, GpuError, LifecycleError, QueueError, SurfaceGeneration};
use cacao_gpu::{CommandBuffer, CommandQueue, CommandState, PresentMode};
use cacao_test_utils::{DeviceEvent, FixedSurface, MockDeviceHandle};

fn immediate(handle: &MockDeviceHandle) -> CommandQueue {
    let queue = CommandQueue::immediate(
        Box::new(handle.immediate_device()),
        FixedSurface::new(320, 240),
        true,
    );
    queue.start().unwrap();
    wait_until("initial surface", || {
        queue.surface_generation() == SurfaceGeneration(1)
    });
    queue
}

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !cond() {
        if Instant::now() > deadline {
            panic!("{what} not reached within 2s");
        }
        thread::sleep(Duration::from_millis(1));
    }
}

fn labelled(queue: &CommandQueue, label: &'static str) -> CommandBuffer {
    let mut buf = queue.create_buffer();
    buf.marker(label);
    buf
}

#[test]
fn context_is_current_on_the_worker_thread() {
    let handle = MockDeviceHandle::new();
    let queue = immediate(&handle);
    queue.stop().unwrap();
    let events = handle.events();
    assert_eq!(
        events.first(),
        Some(&DeviceEvent::MakeCurrent {
            thread: Some("cacao-gpu-immediate".into())
        })
    );
    assert_eq!(events.last(), Some(&DeviceEvent::ReleaseCurrent));
}

#[test]
fn buffers_execute_in_submission_order() {
    let handle = MockDeviceHandle::new();
    let queue = immediate(&handle);

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let mut buf = queue.create_buffer();
            buf.marker(format!("b{i}"));
            queue.submit(buf).unwrap()
        })
        .collect();
    for h in &handles {
        assert_eq!(h.wait_timeout(Duration::from_secs(2)), Some(Ok(())));
    }

    let expected: Vec<String> = (0..16).map(|i| format!("b{i}")).collect();
    assert_eq!(handle.labels(), expected);
    queue.stop().unwrap();
}

#[test]
fn buffer_states_move_forward_to_complete() {
    let handle = MockDeviceHandle::new();
    let queue = immediate(&handle);
    let buf = labelled(&queue, "one");
    let status = buf.status();
    queue.submit(buf).unwrap().wait().unwrap();
    assert_eq!(
        status.history().as_slice(),
        &[
            CommandState::Recording,
            CommandState::Submitted,
            CommandState::Executing,
            CommandState::Complete,
        ]
    );
    queue.stop().unwrap();
}

#[test]
fn failed_command_resolves_with_error() {
    let handle = MockDeviceHandle::new();
    handle.fail_on_marker("bad");
    let queue = immediate(&handle);

    let bad = queue.submit(labelled(&queue, "bad")).unwrap();
    let good = queue.submit(labelled(&queue, "good")).unwrap();
    assert!(matches!(bad.wait(), Err(GpuError::Device { .. })));
    assert_eq!(good.wait(), Ok(()));
    queue.stop().unwrap();
}

#[test]
fn detached_failures_are_not_surfaced() {
    let handle = MockDeviceHandle::new();
    handle.fail_on_marker("bad");
    let queue = immediate(&handle);

    queue.submit_detached(labelled(&queue, "bad")).unwrap();
    let after = queue.submit(labelled(&queue, "after")).unwrap();
    assert_eq!(after.wait(), Ok(()));
    assert_eq!(handle.labels(), vec!["after"]);
    queue.stop().unwrap();
}

#[test]
fn host_commands_run_on_the_worker() {
    let handle = MockDeviceHandle::new();
    let queue = immediate(&handle);
    let (tx, rx) = mpsc::channel();
    let mut buf = queue.create_buffer();
    buf.host(move || {
        tx.send(thread::current().name().map(str::to_owned))
            .map_err(|e| GpuError::device(e.to_string()))
    });
    queue.submit(buf).unwrap().wait().unwrap();
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(1)).unwrap().as_deref(),
        Some("cacao-gpu-immediate")
    );
    queue.stop().unwrap();
}

#[test]
fn stop_rejects_buffers_still_queued() {
    let handle = MockDeviceHandle::new();
    let queue = Arc::new(immediate(&handle));

    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (started_tx, started_rx) = mpsc::channel::<()>();
    let mut blocker = queue.create_buffer();
    blocker.host(move || {
        let _ = started_tx.send(());
        let _ = release_rx.recv();
        Ok(())
    });
    let first = queue.submit(blocker).unwrap();
    started_rx.recv_timeout(Duration::from_secs(2)).unwrap();

    let waiting = labelled(&queue, "waiting");
    let waiting_status = waiting.status();
    let second = queue.submit(waiting).unwrap();

    let stopper = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || queue.stop())
    };
    wait_until("stop requested", || !queue.is_running());
    thread::sleep(Duration::from_millis(20));
    release_tx.send(()).unwrap();
    stopper.join().unwrap().unwrap();

    assert_eq!(first.poll(), Some(Ok(())));
    assert_eq!(second.poll(), Some(Err(GpuError::ShuttingDown)));
    assert_eq!(waiting_status.state(), CommandState::Submitted);
    assert!(!handle.labels().contains(&"waiting".to_string()));
}

#[test]
fn restart_reuses_the_context() {
    let handle = MockDeviceHandle::new();
    let queue = immediate(&handle);
    queue.stop().unwrap();
    assert!(matches!(
        queue.submit(labelled(&queue, "x")),
        Err(QueueError::Lifecycle(LifecycleError::NotRunning { .. }))
    ));
    queue.start().unwrap();
    assert_eq!(queue.submit(labelled(&queue, "y")).unwrap().wait(), Ok(()));
    assert!(matches!(
        queue.start(),
        Err(QueueError::Lifecycle(LifecycleError::AlreadyRunning { .. }))
    ));
    queue.stop().unwrap();
}

#[test]
fn regeneration_is_ordered_behind_earlier_buffers() {
    let handle = MockDeviceHandle::new();
    let queue = immediate(&handle);
    let frame = queue.acquire_frame().unwrap().unwrap();
    let mut buf = queue.create_buffer();
    buf.set_target(frame).marker("frame");
    let h = queue.submit(buf).unwrap();

    let generation = queue.regenerate_surface(None).unwrap();
    assert_eq!(generation, SurfaceGeneration(2));
    assert_eq!(h.poll(), Some(Ok(())));

    let events = handle.events();
    let executed = events
        .iter()
        .position(|e| matches!(e, DeviceEvent::Execute { label } if label == "frame"));
    let destroyed = events
        .iter()
        .position(|e| matches!(e, DeviceEvent::DestroySwapchain { .. }));
    assert!(executed < destroyed);
    queue.stop().unwrap();
}

#[test]
fn vsync_off_selects_immediate_present_mode() {
    let handle = MockDeviceHandle::new();
    let queue = immediate(&handle);
    queue.set_vsync(false).unwrap();
    wait_until("surface regenerated without vsync", || {
        handle.count(|e| {
            matches!(
                e,
                DeviceEvent::CreateSwapchain {
                    present_mode: PresentMode::Immediate,
                    ..
                }
            )
        }) == 1
    });
    queue.stop().unwrap();
}

#[test]
fn queued_buffer_refused_by_immediate_queue() {
    let handle = MockDeviceHandle::new();
    let queue = immediate(&handle);
    assert_eq!(
        queue
            .submit_detached(CommandBuffer::new(BackendKind::Queued))
            .unwrap_err(),
        QueueError::BackendMismatch {
            expected: BackendKind::Immediate,
            found: BackendKind::Queued,
        }
    );
    queue.stop().unwrap();
}

#[test]
fn context_bind_failure_fails_start_and_leaves_queue_stopped() {
    let handle = MockDeviceHandle::new();
    handle.fail_make_current(true);
    let queue = CommandQueue::immediate(
        Box::new(handle.immediate_device()),
        FixedSurface::new(320, 240),
        true,
    );

    assert!(matches!(queue.start(), Err(QueueError::Gpu(GpuError::Device { .. }))));
    assert!(!queue.is_running());
    assert_eq!(
        queue.set_vsync(false),
        Err(LifecycleError::NotRunning {
            component: "command queue"
        })
    );
    assert!(queue.submit(queue.create_buffer()).is_err());
    assert_eq!(handle.count(|e| matches!(e, DeviceEvent::CreateSwapchain { .. })), 0);

    // The context came back, so a later start can succeed.
    handle.fail_make_current(false);
    queue.start().unwrap();
    assert!(queue.is_running());
    let done = queue.submit(queue.create_buffer()).unwrap();
    assert_eq!(done.wait_timeout(Duration::from_secs(2)), Some(Ok(())));
    queue.stop().unwrap();
}
