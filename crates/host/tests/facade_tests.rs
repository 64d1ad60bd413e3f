//! Adapter Facade and bridge server tests
//!
//! Exercises the module the way the JavaScript side does: JSON request
//! lines in, JSON reply lines out.
//!
//! Run with: `cargo test -p host --test facade_tests`

use common::test_utils::{DEFAULT_TEST_TIMEOUT, create_mock_print_job, with_timeout};
use host::facade::{DATA_WRITTEN, PORT_CLOSED, PORT_OPENED};
use host::serve::{EOF_GRACE_PERIOD, serve};
use host::usb::mock::FailPoint;
use host::usb::{MockController, MockDevice, MockUsbHost, Preset, WorkerSettings};
use host::{HostError, SerialPortModule};
use protocol::{
    BridgeCall, DeviceId, DeviceRef, ErrorCode, LineOverrides, Payload, PermissionState, ReplyValue,
    SessionStatus,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, WriteHalf};
use tokio::task::JoinHandle;

const POS_80: DeviceId = DeviceId(5);

fn start(preset: Option<Preset>) -> (Arc<SerialPortModule>, MockController) {
    let (host, controller) = MockUsbHost::new();
    controller.attach(
        MockDevice::printer(POS_80.0, "POS-80")
            .with_serial("POS80-000123")
            .with_permission(true),
    );

    let settings = WorkerSettings {
        profile: preset.map(Preset::profile).unwrap_or_default(),
        poll_interval: Duration::from_millis(5),
        ..WorkerSettings::default()
    };
    let module = SerialPortModule::start(host, settings).unwrap();
    (Arc::new(module), controller)
}

mod dispatch {
    use super::*;

    #[tokio::test]
    async fn test_list_devices() {
        let (module, _controller) = start(None);

        let value = module.dispatch(BridgeCall::ListDevices).await.unwrap();
        let ReplyValue::Devices(devices) = value else {
            panic!("Expected device list, got {:?}", value);
        };
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device_id, POS_80);
        assert_eq!(devices[0].product_name.as_deref(), Some("POS-80"));
        module.shutdown().await;
    }

    #[tokio::test]
    async fn test_port_lifecycle_status_strings() {
        let (module, controller) = start(None);

        let opened = module
            .open_port(DeviceRef::Id(POS_80), LineOverrides::default())
            .await
            .unwrap();
        assert_eq!(opened, PORT_OPENED);
        assert!(matches!(
            module.session_status().await.unwrap(),
            SessionStatus::Open { device_id, endpoint_address: 0x01, .. } if device_id == POS_80
        ));

        let written = module
            .write_data(Payload::Text("hello".to_string()))
            .await
            .unwrap();
        assert_eq!(written, DATA_WRITTEN);
        assert_eq!(controller.written_bytes(POS_80), b"hello");

        assert_eq!(module.close_port().await.unwrap(), PORT_CLOSED);
        assert_eq!(
            module.session_status().await.unwrap(),
            SessionStatus::Closed
        );
        module.shutdown().await;
    }

    #[tokio::test]
    async fn test_state_errors_are_tagged() {
        let (module, _controller) = start(None);

        let err = module
            .write_data(Payload::Bytes(vec![0x1B, 0x40]))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::PortNotOpen);
        assert_eq!(err.message, "Serial port is not open");

        let err = module.close_port().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::PortNotOpen);

        module
            .open_port(DeviceRef::Id(POS_80), LineOverrides::default())
            .await
            .unwrap();
        let err = module
            .open_port(DeviceRef::Id(POS_80), LineOverrides::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::PortAlreadyOpen);
        module.shutdown().await;
    }

    #[tokio::test]
    async fn test_transfer_failure_is_tagged() {
        let (module, controller) = start(None);
        module
            .open_port(DeviceRef::Id(POS_80), LineOverrides::default())
            .await
            .unwrap();
        controller.fail(FailPoint::Transfer, HostError::Pipe);

        let err = module
            .write_data(Payload::Text("x".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::TransferFailed);
        assert!(matches!(
            module.session_status().await.unwrap(),
            SessionStatus::Open { .. }
        ));
        module.shutdown().await;
    }

    #[tokio::test]
    async fn test_enumeration_failure_is_usb_error() {
        let (module, controller) = start(None);
        controller.fail(FailPoint::Enumerate, HostError::Io);

        let err = module.list_devices().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::UsbError);
        module.shutdown().await;
    }

    #[tokio::test]
    async fn test_large_print_job() {
        let (module, controller) = start(Some(Preset::ReceiptPrinter));
        let job = create_mock_print_job(16 * 1024);

        module
            .open_port(DeviceRef::Name("POS-80".to_string()), LineOverrides::default())
            .await
            .unwrap();
        module
            .write_data(Payload::Bytes(job.clone()))
            .await
            .unwrap();

        let mut expected = job;
        expected.extend_from_slice(&[0x1D, 0x56, 0x41, 0x10]);
        assert_eq!(controller.written_bytes(POS_80), expected);
        module.shutdown().await;
    }

    #[tokio::test]
    async fn test_calls_after_shutdown_are_internal() {
        let (module, controller) = start(None);
        module
            .open_port(DeviceRef::Id(POS_80), LineOverrides::default())
            .await
            .unwrap();

        module.shutdown().await;
        // Shutdown closes the open session
        assert_eq!(controller.open_connections(), 0);

        let err = module.list_devices().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Internal);
        // A second shutdown is harmless
        module.shutdown().await;
    }
}

/// Client end of a served duplex stream
struct Client {
    writer: WriteHalf<DuplexStream>,
    replies: Lines<BufReader<tokio::io::ReadHalf<DuplexStream>>>,
    server: JoinHandle<anyhow::Result<()>>,
}

impl Client {
    fn connect(module: Arc<SerialPortModule>) -> Self {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (client_read, writer) = tokio::io::split(client);

        let server = tokio::spawn(serve(module, BufReader::new(server_read), server_write));
        Self {
            writer,
            replies: BufReader::new(client_read).lines(),
            server,
        }
    }

    async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    async fn reply(&mut self) -> Value {
        let line = with_timeout(DEFAULT_TEST_TIMEOUT, self.replies.next_line())
            .await
            .unwrap()
            .unwrap()
            .expect("Server closed the stream");
        serde_json::from_str(&line).unwrap()
    }

    async fn call(&mut self, request: Value) -> Value {
        self.send(&request.to_string()).await;
        self.reply().await
    }

    async fn finish(mut self) {
        self.writer.shutdown().await.unwrap();
        drop(self.writer);
        with_timeout(DEFAULT_TEST_TIMEOUT, self.server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}

mod serve_lines {
    use super::*;

    #[tokio::test]
    async fn test_receipt_printer_session() {
        let (module, controller) = start(Some(Preset::ReceiptPrinter));
        let mut client = Client::connect(module.clone());

        let reply = client.call(json!({"id": 1, "op": "listDevices"})).await;
        assert_eq!(reply["id"], 1);
        assert_eq!(reply["ok"][0]["productName"], "POS-80");

        let reply = client
            .call(json!({"id": 2, "op": "hasPermissionAsync", "args": {"deviceId": 5}}))
            .await;
        assert_eq!(reply["ok"], true);

        let reply = client
            .call(json!({"id": 3, "op": "getSerialNumberAsync", "args": {"deviceId": 5}}))
            .await;
        assert_eq!(reply["ok"], "POS80-000123");

        let reply = client
            .call(json!({"id": 4, "op": "openPort", "args": {"portName": "POS-80"}}))
            .await;
        assert_eq!(reply["ok"], PORT_OPENED);

        let reply = client
            .call(json!({"id": 5, "op": "writeData", "args": {"data": "TOTAL 12.50\n"}}))
            .await;
        assert_eq!(reply["ok"], DATA_WRITTEN);

        let mut expected = b"TOTAL 12.50\n".to_vec();
        expected.extend_from_slice(&[0x1D, 0x56, 0x41, 0x10]);
        assert_eq!(controller.written_bytes(POS_80), expected);

        // The printer profile releases the device after every write
        let reply = client.call(json!({"id": 6, "op": "getSessionStatus"})).await;
        assert_eq!(reply["ok"]["state"], "closed");
        let reply = client.call(json!({"id": 7, "op": "closePort"})).await;
        assert_eq!(reply["error"]["code"], "port_not_open");

        client.finish().await;
        module.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_line_has_null_id() {
        let (module, _controller) = start(None);
        let mut client = Client::connect(module.clone());

        client.send("{not json").await;
        let reply = client.reply().await;
        assert!(reply["id"].is_null());
        assert_eq!(reply["error"]["code"], "invalid_request");

        // The server keeps going after a bad line
        let reply = client.call(json!({"id": 2, "op": "getSessionStatus"})).await;
        assert_eq!(reply["id"], 2);
        assert_eq!(reply["ok"]["state"], "closed");

        client.finish().await;
        module.shutdown().await;
    }

    #[tokio::test]
    async fn test_bad_call_keeps_request_id() {
        let (module, _controller) = start(None);
        let mut client = Client::connect(module.clone());

        let reply = client.call(json!({"id": 9, "op": "formatDisk"})).await;
        assert_eq!(reply["id"], 9);
        assert_eq!(reply["error"]["code"], "invalid_request");

        let reply = client
            .call(json!({"id": 10, "op": "openPort", "args": {"baudRate": 9600}}))
            .await;
        assert_eq!(reply["id"], 10);
        assert_eq!(reply["error"]["code"], "invalid_request");

        client.finish().await;
        module.shutdown().await;
    }

    #[tokio::test]
    async fn test_device_not_found_reply() {
        let (module, _controller) = start(None);
        let mut client = Client::connect(module.clone());

        let reply = client
            .call(json!({"id": 1, "op": "openPort", "args": {"portName": 404}}))
            .await;
        assert_eq!(reply["error"]["code"], "device_not_found");
        assert_eq!(reply["error"]["message"], "Device not found: device 404");

        client.finish().await;
        module.shutdown().await;
    }

    #[tokio::test]
    async fn test_pending_permission_does_not_block_other_requests() {
        let (module, controller) = start(None);
        controller.attach(MockDevice::cdc_serial(1006));
        let mut client = Client::connect(module.clone());

        client
            .send(r#"{"id":1,"op":"requestPermissionAsync","args":{"device":1006}}"#)
            .await;
        let reply = client.call(json!({"id": 2, "op": "getSessionStatus"})).await;
        assert_eq!(reply["id"], 2);

        with_timeout(DEFAULT_TEST_TIMEOUT, async {
            while controller.outstanding_prompts().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        controller.grant(DeviceId(1006));

        let reply = client.reply().await;
        assert_eq!(reply["id"], 1);
        assert!(reply["ok"].is_null());
        assert!(reply.get("error").is_none());

        client.finish().await;
        module.shutdown().await;
    }

    #[tokio::test]
    async fn test_in_flight_request_finishes_at_end_of_input() {
        let (module, controller) = start(None);
        controller.attach(MockDevice::cdc_serial(1006));
        let mut client = Client::connect(module.clone());

        client
            .send(r#"{"id":1,"op":"requestPermissionAsync","args":{"device":1006}}"#)
            .await;
        with_timeout(DEFAULT_TEST_TIMEOUT, async {
            while controller.outstanding_prompts().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        client.writer.shutdown().await.unwrap();
        controller.deny(DeviceId(1006));

        let reply = client.reply().await;
        assert_eq!(reply["id"], 1);
        assert_eq!(reply["error"]["code"], "permission_denied");
        with_timeout(DEFAULT_TEST_TIMEOUT, client.server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        module.shutdown().await;
    }

    #[tokio::test]
    async fn test_unanswered_prompt_is_cancelled_at_end_of_input() {
        let (module, controller) = start(None);
        controller.attach(MockDevice::cdc_serial(1006));
        let mut client = Client::connect(module.clone());

        client
            .send(r#"{"id":1,"op":"requestPermissionAsync","args":{"device":1006}}"#)
            .await;
        with_timeout(DEFAULT_TEST_TIMEOUT, async {
            while controller.outstanding_prompts().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(
            module.permission_state(DeviceId(1006)).await.unwrap(),
            PermissionState::PendingRequest
        );

        // Nobody ever answers the prompt
        client.writer.shutdown().await.unwrap();
        with_timeout(EOF_GRACE_PERIOD + DEFAULT_TEST_TIMEOUT, client.server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        // The stream ends without a reply and the listener is gone
        let next = client.replies.next_line().await.unwrap();
        assert!(next.is_none());
        assert_eq!(
            module.permission_state(DeviceId(1006)).await.unwrap(),
            PermissionState::Unknown
        );
        module.shutdown().await;
    }

    #[tokio::test]
    async fn test_empty_args_for_unit_operations() {
        let (module, _controller) = start(None);
        let mut client = Client::connect(module.clone());

        let reply = client
            .call(json!({"id": 1, "op": "listDevices", "args": []}))
            .await;
        assert_eq!(reply["ok"][0]["deviceId"], 5);

        let reply = client
            .call(json!({"id": 2, "op": "closePort", "args": {}}))
            .await;
        assert_eq!(reply["error"]["code"], "port_not_open");

        client.finish().await;
        module.shutdown().await;
    }

    #[tokio::test]
    async fn test_open_without_permission_is_denied() {
        let (module, controller) = start(None);
        controller.attach(MockDevice::cdc_serial(1006));
        let mut client = Client::connect(module.clone());

        let reply = client
            .call(json!({"id": 1, "op": "openPort", "args": {"portName": 1006}}))
            .await;
        assert_eq!(reply["error"]["code"], "permission_denied");
        assert_eq!(controller.open_connections(), 0);

        client.finish().await;
        module.shutdown().await;
    }
}
