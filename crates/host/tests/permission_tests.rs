//! Permission Broker integration tests
//!
//! Runs permission requests through `SerialPortModule` and the USB worker,
//! with the in-memory host standing in for the OS prompt.
//!
//! Run with: `cargo test -p host --test permission_tests`

use common::test_utils::{DEFAULT_TEST_TIMEOUT, with_timeout};
use host::SerialPortModule;
use host::usb::{
    MockController, MockDevice, MockUsbHost, PermissionEvent, PromptPolicy, WorkerSettings,
};
use protocol::{DeviceId, DeviceRef, ErrorCode, PermissionState};
use std::sync::Arc;
use std::time::Duration;

const POS_80: DeviceId = DeviceId(5);
const ADAPTER: DeviceId = DeviceId(1006);

fn start() -> (Arc<SerialPortModule>, MockController) {
    let (host, controller) = MockUsbHost::new();
    controller.attach(MockDevice::printer(POS_80.0, "POS-80"));
    controller.attach(MockDevice::cdc_serial(ADAPTER.0));

    let settings = WorkerSettings {
        poll_interval: Duration::from_millis(5),
        ..WorkerSettings::default()
    };
    let module = SerialPortModule::start(host, settings).unwrap();
    (Arc::new(module), controller)
}

/// Wait until the worker has shown a prompt for `device_id`
async fn wait_for_prompt(controller: &MockController, device_id: DeviceId) {
    with_timeout(DEFAULT_TEST_TIMEOUT, async {
        while !controller
            .outstanding_prompts()
            .iter()
            .any(|&(_, id)| id == device_id)
        {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_grant_resolves_request() {
    let (module, controller) = start();
    assert!(!module.has_permission(POS_80).await.unwrap());
    assert_eq!(
        module.permission_state(POS_80).await.unwrap(),
        PermissionState::Unknown
    );

    let request = tokio::spawn({
        let module = module.clone();
        async move { module.request_permission(DeviceRef::Id(POS_80)).await }
    });
    wait_for_prompt(&controller, POS_80).await;
    assert_eq!(
        module.permission_state(POS_80).await.unwrap(),
        PermissionState::PendingRequest
    );

    controller.grant(POS_80);
    with_timeout(DEFAULT_TEST_TIMEOUT, request)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert!(module.has_permission(POS_80).await.unwrap());
    assert_eq!(
        module.permission_state(POS_80).await.unwrap(),
        PermissionState::Granted
    );
    module.shutdown().await;
}

#[tokio::test]
async fn test_grant_for_other_device_does_not_resolve() {
    let (module, controller) = start();

    let request = tokio::spawn({
        let module = module.clone();
        async move { module.request_permission(DeviceRef::Id(POS_80)).await }
    });
    wait_for_prompt(&controller, POS_80).await;

    // Unrelated grant, then a forged event reusing the token for another device
    controller.grant(ADAPTER);
    let (token, _) = controller.outstanding_prompts()[0];
    controller.emit(PermissionEvent {
        token,
        device_id: ADAPTER,
        granted: true,
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!request.is_finished());
    assert!(!module.has_permission(POS_80).await.unwrap());

    controller.grant(POS_80);
    with_timeout(DEFAULT_TEST_TIMEOUT, request)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    module.shutdown().await;
}

#[tokio::test]
async fn test_deny_fails_request() {
    let (module, controller) = start();

    let request = tokio::spawn({
        let module = module.clone();
        async move { module.request_permission(DeviceRef::Id(POS_80)).await }
    });
    wait_for_prompt(&controller, POS_80).await;
    controller.deny(POS_80);

    let err = with_timeout(DEFAULT_TEST_TIMEOUT, request)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::PermissionDenied);
    assert_eq!(
        module.permission_state(POS_80).await.unwrap(),
        PermissionState::Denied
    );
    module.shutdown().await;
}

#[tokio::test]
async fn test_unknown_device_never_prompts() {
    let (module, controller) = start();

    let err = module
        .request_permission(DeviceRef::Id(DeviceId(42)))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::DeviceNotFound);
    assert_eq!(controller.prompt_count(), 0);

    let err = module.has_permission(DeviceId(42)).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::DeviceNotFound);
    module.shutdown().await;
}

#[tokio::test]
async fn test_already_granted_skips_prompt() {
    let (module, controller) = start();
    controller.attach(MockDevice::printer(POS_80.0, "POS-80").with_permission(true));

    module
        .request_permission(DeviceRef::Id(POS_80))
        .await
        .unwrap();
    assert_eq!(controller.prompt_count(), 0);
    module.shutdown().await;
}

#[tokio::test]
async fn test_suppressed_prompt_reports_current_grant() {
    let (module, controller) = start();
    controller.set_prompt_policy(PromptPolicy::Suppressed);

    let err = module
        .request_permission(DeviceRef::Id(ADAPTER))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::PermissionDenied);
    module.shutdown().await;
}

#[tokio::test]
async fn test_cancelled_request_leaves_no_listener() {
    let (module, controller) = start();

    let request = tokio::spawn({
        let module = module.clone();
        async move { module.request_permission(DeviceRef::Id(POS_80)).await }
    });
    wait_for_prompt(&controller, POS_80).await;

    request.abort();
    assert!(request.await.unwrap_err().is_cancelled());
    assert_eq!(
        module.permission_state(POS_80).await.unwrap(),
        PermissionState::Unknown
    );

    // A late answer finds no listener but the grant itself still sticks
    controller.grant(POS_80);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        module.permission_state(POS_80).await.unwrap(),
        PermissionState::Granted
    );
    module.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_requests_resolve_independently() {
    let (module, controller) = start();

    let printer = tokio::spawn({
        let module = module.clone();
        async move { module.request_permission(DeviceRef::Id(POS_80)).await }
    });
    let adapter = tokio::spawn({
        let module = module.clone();
        async move { module.request_permission(DeviceRef::Id(ADAPTER)).await }
    });
    wait_for_prompt(&controller, POS_80).await;
    wait_for_prompt(&controller, ADAPTER).await;

    controller.deny(ADAPTER);
    let err = with_timeout(DEFAULT_TEST_TIMEOUT, adapter)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::PermissionDenied);
    assert!(!printer.is_finished());

    controller.grant(POS_80);
    with_timeout(DEFAULT_TEST_TIMEOUT, printer)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    module.shutdown().await;
}

#[tokio::test]
async fn test_serial_number_requires_permission() {
    let (module, controller) = start();
    controller.attach(
        MockDevice::printer(POS_80.0, "POS-80").with_serial("POS80-000123"),
    );

    let err = module.get_serial_number(POS_80).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::PermissionRequired);

    controller.grant(POS_80);
    assert_eq!(
        module.get_serial_number(POS_80).await.unwrap().as_deref(),
        Some("POS80-000123")
    );

    // Devices without a serial string report none
    controller.grant(ADAPTER);
    assert_eq!(module.get_serial_number(ADAPTER).await.unwrap(), None);
    module.shutdown().await;
}
