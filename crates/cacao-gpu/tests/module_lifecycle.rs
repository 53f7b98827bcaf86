//! Backend module lifecycle and registry selection with mock backends.

use std::time::Duration;

use cacao_core::{BackendKind, LifecycleError, ModuleState};
use cacao_gpu::{Backend, ConnectOptions, ModuleError, ModuleRegistry};
use cacao_test_utils::{
    DeviceEvent, FixedSurface, MockDeviceHandle, MockImmediateBackend, MockQueuedBackend,
};

fn registry(queued: &MockDeviceHandle, immediate: &MockDeviceHandle) -> ModuleRegistry {
    let mut reg = ModuleRegistry::new();
    reg.register("queued", Backend::Queued(Box::new(MockQueuedBackend::new(queued))))
        .unwrap();
    reg.register(
        "immediate",
        Backend::Immediate(Box::new(MockImmediateBackend::new(immediate))),
    )
    .unwrap();
    reg
}

#[test]
fn failed_backend_falls_back_to_next_preference() {
    let queued = MockDeviceHandle::new();
    let immediate = MockDeviceHandle::new();
    queued.fail_init(true);
    let mut reg = registry(&queued, &immediate);

    let picked = reg.init_first(&["queued", "immediate"]).unwrap().unwrap();
    let module = reg.get(picked).unwrap();
    assert_eq!(module.kind(), BackendKind::Immediate);
    assert_eq!(module.state(), ModuleState::Initialized);

    let queued_id = reg.find("queued").unwrap();
    assert_eq!(reg.get(queued_id).unwrap().state(), ModuleState::Uninitialized);
}

#[test]
fn no_backend_initializes() {
    let queued = MockDeviceHandle::new();
    let immediate = MockDeviceHandle::new();
    queued.fail_init(true);
    immediate.fail_init(true);
    let mut reg = registry(&queued, &immediate);
    assert_eq!(reg.init_first(&["queued", "immediate"]), Ok(None));
    assert_eq!(reg.active(), None);
}

#[test]
fn connected_queue_runs_until_disconnect() {
    let queued = MockDeviceHandle::new();
    queued.set_auto_signal(true);
    let immediate = MockDeviceHandle::new();
    let mut reg = registry(&queued, &immediate);
    let id = reg.init_first(&["queued"]).unwrap().unwrap();

    let module = reg.get_mut(id).unwrap();
    let queue = module
        .connect(
            FixedSurface::new(128, 128),
            ConnectOptions {
                vsync: false,
                max_frames_in_flight: Some(2),
            },
        )
        .unwrap();
    queue.start().unwrap();
    let h = queue.submit(queue.create_buffer()).unwrap();
    assert_eq!(h.wait_timeout(Duration::from_secs(2)), Some(Ok(())));

    module.disconnect().unwrap();
    assert!(!queue.is_running());
    module.term().unwrap();
    assert_eq!(queued.events().last(), Some(&DeviceEvent::BackendTerm));
    assert_eq!(
        queued.count(|e| matches!(e, DeviceEvent::DestroySwapchain { .. })),
        1
    );
    assert!(queued.violations().is_empty());

    let module = reg.destroy(id).unwrap();
    assert_eq!(module.state(), ModuleState::Terminated);
}

#[test]
fn destroy_refused_while_connected() {
    let queued = MockDeviceHandle::new();
    let immediate = MockDeviceHandle::new();
    let mut reg = registry(&queued, &immediate);
    let id = reg.find("immediate").unwrap();
    reg.init(id).unwrap();
    let module = reg.get_mut(id).unwrap();
    module
        .connect(FixedSurface::new(64, 64), ConnectOptions::default())
        .unwrap();

    assert_eq!(
        reg.destroy(id).unwrap_err(),
        LifecycleError::ModuleTransition {
            module: "immediate".into(),
            operation: "destroy",
            state: ModuleState::Connected,
        }
    );
    assert!(reg.get(id).is_ok());
}

#[test]
fn terminated_module_cannot_be_reinitialized() {
    let queued = MockDeviceHandle::new();
    let immediate = MockDeviceHandle::new();
    let mut reg = registry(&queued, &immediate);
    let id = reg.find("queued").unwrap();
    reg.init(id).unwrap();
    reg.get_mut(id).unwrap().term().unwrap();
    assert!(matches!(
        reg.init(id),
        Err(ModuleError::Lifecycle(LifecycleError::ModuleTransition {
            state: ModuleState::Terminated,
            ..
        }))
    ));
}

#[test]
fn connected_module_blocks_a_second_backend() {
    let queued = MockDeviceHandle::new();
    let immediate = MockDeviceHandle::new();
    let mut reg = registry(&queued, &immediate);
    let id = reg.init_first(&["queued"]).unwrap().unwrap();
    reg.get_mut(id)
        .unwrap()
        .connect(FixedSurface::new(64, 64), ConnectOptions::default())
        .unwrap();

    assert!(matches!(
        reg.init_first(&["immediate"]),
        Err(LifecycleError::ModuleActive { .. })
    ));
    assert!(!immediate.events().contains(&DeviceEvent::BackendInit));

    let module = reg.get_mut(id).unwrap();
    module.disconnect().unwrap();
    assert!(reg.init_first(&["immediate"]).is_err());
    reg.get_mut(id).unwrap().term().unwrap();
    assert_eq!(reg.init_first(&["immediate"]), Ok(reg.find("immediate")));
}
