use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tophat_dashboard::{
    create_app, AppState, HardwareSupervisor, SimulatedHat, UsbMonitor, WebConfig,
};
use tower::ServiceExt;

const FAKE_LSUSB: &str = "printf 'Bus 001 Device 001: ID 1d6b:0002 Linux Foundation 2.0 root hub\\nBus 001 Device 002: ID 0403:6001 FT232 Serial\\n'";

async fn app_with(hat: &SimulatedHat) -> (Router, Arc<HardwareSupervisor>) {
    let supervisor = Arc::new(HardwareSupervisor::start(hat).unwrap());
    let usb = Arc::new(UsbMonitor::with_command("sh", ["-c", FAKE_LSUSB]));
    let app = create_app(WebConfig::default(), AppState::new(supervisor.clone(), usb))
        .await
        .unwrap();
    (app, supervisor)
}

async fn call(app: &Router, method: Method, uri: &str) -> (StatusCode, Value) {
    send(app, Request::builder().method(method).uri(uri).body(Body::empty()).unwrap()).await
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_health_check() {
    let hat = SimulatedHat::new();
    let (app, _hat) = app_with(&hat).await;

    let (status, body) = call(&app, Method::GET, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["services"].as_array().unwrap().len(), 5);
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_json_snapshot_shape() {
    let hat = SimulatedHat::new();
    hat.bus.set_adc_raw(0, 1024);
    let (app, _hat) = app_with(&hat).await;

    let (status, body) = call(&app, Method::GET, "/json").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["hardware_status"],
        json!({"mcp23017": true, "rs485": true, "rpi_gpio": true})
    );
    assert_eq!(body["adc"]["AIN0"], 2.048);
    assert_eq!(body["gpio"], json!({"A": "00000000", "B": "00000000"}));
    assert_eq!(body["outputs"], json!({"A": 0, "B": 0}));
    assert_eq!(body["rs485_last"], Value::Null);
    assert_eq!(body["rpi_gpio"]["configs"]["23"], "OUT");
    assert_eq!(body["rpi_gpio"]["states"]["23"], 0);
    assert_eq!(body["usb_connected"], true);
    assert_eq!(body["usb_devices"][0]["id"], "0403:6001");
}

#[tokio::test]
async fn test_gpio_write() {
    let hat = SimulatedHat::new();
    let (app, _hat) = app_with(&hat).await;

    let (status, body) = call(&app, Method::POST, "/gpio/write/a/3/1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["port"], "A");
    assert_eq!(body["outputs"], json!({"A": 8, "B": 0}));

    let (status, body) = call(&app, Method::POST, "/gpio/write/C/3/1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Port must be 'A' or 'B'");

    let (status, _) = call(&app, Method::POST, "/gpio/write/A/9/1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&app, Method::POST, "/gpio/write/A/x/1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unavailable_expander_is_503() {
    let hat = SimulatedHat::new();
    hat.bus.set_offline(0x20, true);
    let (app, _hat) = app_with(&hat).await;

    let (status, body) = call(&app, Method::POST, "/gpio/write/A/0/1").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "MCP23017 not available");
}

#[tokio::test]
async fn test_rpi_gpio_lifecycle() {
    let hat = SimulatedHat::new();
    let (app, _hat) = app_with(&hat).await;

    let (status, body) = call(&app, Method::POST, "/rpi_gpio/setup/17/out").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mode"], "OUT");
    assert_eq!(body["configs"]["17"], "OUT");

    let (status, body) = call(&app, Method::POST, "/rpi_gpio/write/17/1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["states"]["17"], 1);

    let (status, body) = call(&app, Method::POST, "/rpi_gpio/reset/17").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["configs"].get("17").is_none());

    let (status, body) = call(&app, Method::POST, "/rpi_gpio/setup/2/OUT").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Pin 2 is not safe to use");

    let (status, _) = call(&app, Method::POST, "/rpi_gpio/setup/17/PWM").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&app, Method::POST, "/rpi_gpio/write/17/1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rs485_send_json_and_form() {
    let hat = SimulatedHat::new();
    let (app, _hat) = app_with(&hat).await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/rs485/send")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"msg": "HELLO"}"#))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true, "sent": "HELLO"}));

    let request = Request::builder()
        .method(Method::POST)
        .uri("/rs485/send")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("msg=WORLD"))
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(hat.serial.sent(), b"HELLO\nWORLD\n");
}

#[tokio::test]
async fn test_rs485_send_validation() {
    let hat = SimulatedHat::new();
    let (app, _hat) = app_with(&hat).await;

    let empty = Request::builder()
        .method(Method::POST)
        .uri("/rs485/send")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"msg": "   "}"#))
        .unwrap();
    let (status, body) = send(&app, empty).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Message cannot be empty");

    let long = Request::builder()
        .method(Method::POST)
        .uri("/rs485/send")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "msg": "x".repeat(256) }).to_string()))
        .unwrap();
    let (status, _) = send(&app, long).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rs485_send_failure_is_500() {
    let hat = SimulatedHat::new();
    let (app, _hat) = app_with(&hat).await;
    hat.serial.set_fail_writes(true);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/rs485/send")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"msg": "lost"}"#))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Failed to send message");
}

#[tokio::test]
async fn test_rs485_last() {
    let hat = SimulatedHat::new();
    let (app, supervisor) = app_with(&hat).await;

    let (_, body) = call(&app, Method::GET, "/rs485/last").await;
    assert_eq!(body, json!({"last": null}));

    hat.serial.feed(b"TEMP:21.5\n");
    for _ in 0..300 {
        if supervisor.last_transceiver_message().is_some() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    let (_, body) = call(&app, Method::GET, "/rs485/last").await;
    assert_eq!(body, json!({"last": "TEMP:21.5"}));
}

#[tokio::test]
async fn test_usb_endpoint() {
    let hat = SimulatedHat::new();
    let (app, _hat) = app_with(&hat).await;

    let (status, body) = call(&app, Method::GET, "/usb").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["usb_connected"], true);
    assert_eq!(body["usb_devices"].as_array().unwrap().len(), 1);
    assert_eq!(body["usb_devices"][0]["description"], "FT232 Serial");
}

#[tokio::test]
async fn test_default_index_and_not_found() {
    let hat = SimulatedHat::new();
    let (app, _hat) = app_with(&hat).await;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(String::from_utf8_lossy(&bytes).contains("Top HAT Dashboard"));

    let (status, body) = call(&app, Method::GET, "/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"error": "Endpoint not found"}));
}
