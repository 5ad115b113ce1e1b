//! HTTP handlers for the dashboard and its control endpoints.

use crate::error::{HatError, Result};
use crate::hardware::HardwareSupervisor;
use crate::usb::UsbMonitor;
use axum::{
    extract::{FromRequest, Path, Request, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    Form,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub hat: Arc<HardwareSupervisor>,
    pub usb: Arc<UsbMonitor>,
}

impl AppState {
    pub fn new(hat: Arc<HardwareSupervisor>, usb: Arc<UsbMonitor>) -> Self {
        Self { hat, usb }
    }

    /// Run a facade call on the blocking pool; bus and serial I/O block.
    async fn with_hat<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&HardwareSupervisor) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let hat = self.hat.clone();
        tokio::task::spawn_blocking(move || f(&hat))
            .await
            .map_err(|e| HatError::web_server_error(format!("Hardware task failed: {}", e)))?
    }
}

impl IntoResponse for HatError {
    fn into_response(self) -> Response {
        let status = match &self {
            HatError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            e if e.is_caller_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match self {
            HatError::InvalidInput(message) => message,
            other => other.to_string(),
        };
        if status.is_server_error() {
            error!("Request failed: {}", message);
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn parse_number(value: &str, what: &str) -> Result<u8> {
    value
        .trim()
        .parse()
        .map_err(|_| HatError::invalid_input(format!("{} must be a number", what)))
}

/// Snapshot of all hardware plus the USB listing.
pub async fn get_json(State(state): State<AppState>) -> Result<Json<Value>> {
    let snapshot = state.with_hat(|hat| Ok(hat.snapshot())).await?;
    let devices = state.usb.list_devices().await;

    let mut body = serde_json::to_value(&snapshot)
        .map_err(|e| HatError::web_server_error(format!("Failed to serialize snapshot: {}", e)))?;
    body["usb_connected"] = json!(!devices.is_empty());
    body["usb_devices"] = json!(devices);
    Ok(Json(body))
}

/// Set or clear one MCP23017 output pin.
pub async fn gpio_write(
    State(state): State<AppState>,
    Path((port, pin, value)): Path<(String, String, String)>,
) -> Result<Json<Value>> {
    let pin = parse_number(&pin, "Pin")?;
    let value = parse_number(&value, "State")?;
    let port = port.to_ascii_uppercase();

    let outputs = {
        let port = port.clone();
        state
            .with_hat(move |hat| hat.set_expander_pin(&port, pin, value))
            .await?
    };

    Ok(Json(json!({
        "success": true,
        "port": port,
        "pin": pin,
        "state": value,
        "outputs": outputs,
    })))
}

/// Configure an onboard pin as `IN` or `OUT`.
pub async fn rpi_gpio_setup(
    State(state): State<AppState>,
    Path((pin, mode)): Path<(String, String)>,
) -> Result<Json<Value>> {
    let pin = parse_number(&pin, "Pin")?;
    let mode = mode.to_ascii_uppercase();

    let status = {
        let mode = mode.clone();
        state.with_hat(move |hat| hat.setup_native_pin(pin, &mode)).await?
    };

    Ok(Json(json!({
        "success": true,
        "pin": pin,
        "mode": mode,
        "configs": status.configs,
        "states": status.states,
    })))
}

/// Drive an onboard output pin.
pub async fn rpi_gpio_write(
    State(state): State<AppState>,
    Path((pin, value)): Path<(String, String)>,
) -> Result<Json<Value>> {
    let pin = parse_number(&pin, "Pin")?;
    let value = parse_number(&value, "State")?;

    let status = state.with_hat(move |hat| hat.write_native_pin(pin, value)).await?;

    Ok(Json(json!({
        "success": true,
        "pin": pin,
        "state": value,
        "states": status.states,
    })))
}

/// Return an onboard pin to the unconfigured state.
pub async fn rpi_gpio_reset(
    State(state): State<AppState>,
    Path(pin): Path<String>,
) -> Result<Json<Value>> {
    let pin = parse_number(&pin, "Pin")?;
    let status = state.with_hat(move |hat| hat.reset_native_pin(pin)).await?;

    Ok(Json(json!({
        "success": true,
        "pin": pin,
        "configs": status.configs,
        "states": status.states,
    })))
}

/// Body of `POST /rs485/send`, as JSON or a form.
#[derive(Debug, Default, Deserialize)]
pub struct SendRequest {
    pub msg: Option<String>,
}

impl SendRequest {
    async fn extract(request: Request) -> Result<Self> {
        let is_json = request
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/json"));

        if is_json {
            let Json(body) = Json::<SendRequest>::from_request(request, &())
                .await
                .map_err(|e| HatError::invalid_input(e.body_text()))?;
            Ok(body)
        } else {
            let Form(body) = Form::<SendRequest>::from_request(request, &())
                .await
                .map_err(|e| HatError::invalid_input(e.body_text()))?;
            Ok(body)
        }
    }
}

/// Transmit a message on RS-485.
pub async fn rs485_send(State(state): State<AppState>, request: Request) -> Result<Response> {
    let msg = SendRequest::extract(request).await?.msg.unwrap_or_default();

    let sent = {
        let msg = msg.clone();
        state
            .with_hat(move |hat| hat.send_transceiver_message(&msg))
            .await?
    };

    if !sent {
        error!("Failed to send RS-485 message: {}", msg);
        return Ok((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Failed to send message" })),
        )
            .into_response());
    }

    info!("RS-485 message sent: {}", msg);
    Ok(Json(json!({ "success": true, "sent": msg })).into_response())
}

/// Most recent RS-485 line received.
pub async fn rs485_last(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "last": state.hat.last_transceiver_message() }))
}

/// Attached USB devices.
pub async fn usb_status(State(state): State<AppState>) -> Json<Value> {
    let devices = state.usb.list_devices().await;
    Json(json!({
        "usb_connected": !devices.is_empty(),
        "usb_devices": devices,
    }))
}

/// Health check endpoint.
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "services": ["adc", "gpio", "rs485", "usb", "rpi_gpio"],
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Unknown routes.
pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Endpoint not found" })),
    )
}

/// Serve the dashboard page from the static directory.
pub async fn serve_index(index_file: PathBuf) -> std::result::Result<Html<String>, StatusCode> {
    match tokio::fs::read_to_string(&index_file).await {
        Ok(content) => Ok(Html(content)),
        Err(e) => {
            error!("Failed to read {:?}: {}", index_file, e);
            Err(StatusCode::NOT_FOUND)
        }
    }
}

/// Serve the built-in dashboard page.
pub async fn default_index() -> Html<&'static str> {
    Html(DEFAULT_INDEX_HTML)
}

/// Built-in dashboard, used when no static directory is configured.
const DEFAULT_INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Top HAT Dashboard</title>
    <style>
        * { margin: 0; padding: 0; box-sizing: border-box; }

        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Ubuntu, sans-serif;
            background: linear-gradient(135deg, #1f4037 0%, #99f2c8 100%);
            color: #333;
            min-height: 100vh;
            padding: 20px;
        }

        .container { max-width: 1200px; margin: 0 auto; }

        .header { text-align: center; margin-bottom: 30px; color: white; }
        .header h1 { font-size: 2.6rem; text-shadow: 2px 2px 4px rgba(0,0,0,0.3); }

        .dashboard {
            display: grid;
            grid-template-columns: repeat(auto-fit, minmax(320px, 1fr));
            gap: 20px;
        }

        .card {
            background: white;
            border-radius: 15px;
            padding: 22px;
            box-shadow: 0 10px 30px rgba(0,0,0,0.1);
        }

        .card h3 { color: #1f4037; margin-bottom: 12px; }

        .metric {
            display: flex;
            justify-content: space-between;
            padding: 6px 0;
            border-bottom: 1px solid #eee;
        }

        .bits { display: flex; gap: 4px; margin: 6px 0 12px; }

        .bit {
            width: 32px; height: 32px;
            border: none; border-radius: 6px;
            background: #ddd; cursor: pointer; font-weight: bold;
        }

        .bit.on { background: #2ecc71; color: white; }
        .off-line { color: #c0392b; }
        input[type=text] { width: 70%; padding: 6px; }
        button.send { padding: 6px 12px; }
    </style>
</head>
<body>
    <div class="container">
        <div class="header">
            <h1>Top HAT Dashboard</h1>
            <p id="status">Connecting...</p>
        </div>
        <div class="dashboard">
            <div class="card"><h3>ADC (ADS1015)</h3><div id="adc"></div></div>
            <div class="card"><h3>MCP23017 Outputs</h3><div id="mcp"></div></div>
            <div class="card"><h3>Raspberry Pi GPIO</h3><div id="rpi"></div></div>
            <div class="card">
                <h3>RS-485</h3>
                <div class="metric"><span>Last received</span><span id="rs485-last">-</span></div>
                <p style="margin-top:10px">
                    <input type="text" id="rs485-msg" maxlength="255" placeholder="Message">
                    <button class="send" onclick="sendRs485()">Send</button>
                </p>
            </div>
            <div class="card"><h3>USB</h3><div id="usb"></div></div>
        </div>
    </div>
    <script>
        const post = (url, body) => fetch(url, {
            method: 'POST',
            headers: body ? {'Content-Type': 'application/json'} : {},
            body: body ? JSON.stringify(body) : undefined,
        }).then(r => r.json());

        function row(label, value) {
            return `<div class="metric"><span>${label}</span><span>${value}</span></div>`;
        }

        function renderPort(port, outputs) {
            let html = `<div>Port ${port}</div><div class="bits">`;
            for (let pin = 0; pin < 8; pin++) {
                const on = (outputs[port] >> pin) & 1;
                html += `<button class="bit ${on ? 'on' : ''}" onclick="post('/gpio/write/${port}/${pin}/${on ? 0 : 1}').then(refresh)">${pin}</button>`;
            }
            return html + '</div>';
        }

        function render(data) {
            const hw = data.hardware_status;
            document.getElementById('status').textContent =
                `MCP23017 ${hw.mcp23017 ? 'up' : 'down'} | RS-485 ${hw.rs485 ? 'up' : 'down'} | RPi GPIO ${hw.rpi_gpio ? 'up' : 'down'}`;

            const adc = Object.entries(data.adc);
            document.getElementById('adc').innerHTML = adc.length
                ? adc.map(([k, v]) => row(k, `${v.toFixed(4)} V`)).join('')
                : '<span class="off-line">No ADC data</span>';

            document.getElementById('mcp').innerHTML = hw.mcp23017
                ? renderPort('A', data.outputs) + renderPort('B', data.outputs)
                  + row('Inputs A', data.gpio.A) + row('Inputs B', data.gpio.B)
                : '<span class="off-line">Not available</span>';

            const rpi = data.rpi_gpio;
            document.getElementById('rpi').innerHTML = hw.rpi_gpio
                ? Object.entries(rpi.configs).map(([pin, mode]) => {
                    const state = rpi.states[pin];
                    const toggle = mode === 'OUT'
                        ? ` <button onclick="post('/rpi_gpio/write/${pin}/${state ? 0 : 1}').then(refresh)">toggle</button>` : '';
                    return row(`GPIO${pin} (${mode})`, `${state === null ? '?' : state}${toggle}`);
                }).join('')
                : '<span class="off-line">Not available</span>';

            document.getElementById('rs485-last').textContent = data.rs485_last ?? '-';

            document.getElementById('usb').innerHTML = data.usb_devices.length
                ? data.usb_devices.map(d => row(d.id, d.description)).join('')
                : 'No USB devices';
        }

        function sendRs485() {
            const input = document.getElementById('rs485-msg');
            post('/rs485/send', {msg: input.value}).then(r => {
                if (r.error) alert(r.error); else input.value = '';
            });
        }

        function refresh() {
            fetch('/json').then(r => r.json()).then(render).catch(e => {
                document.getElementById('status').textContent = 'Connection error: ' + e;
            });
        }

        refresh();
        setInterval(refresh, 2000);
    </script>
</body>
</html>
"#;
