//! Web application router and middleware setup.

use crate::error::Result;
use crate::web::config::WebConfig;
use crate::web::handlers::{self, AppState};
use axum::{
    routing::{get, post},
    Router,
};
use std::path::PathBuf;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{info, warn};

/// Create the main axum application with all routes and middleware.
pub async fn create_app(config: WebConfig, state: AppState) -> Result<Router> {
    let mut app = Router::new()
        .route("/json", get(handlers::get_json))
        .route("/gpio/write/:port/:pin/:state", post(handlers::gpio_write))
        .route("/rpi_gpio/setup/:pin/:mode", post(handlers::rpi_gpio_setup))
        .route("/rpi_gpio/write/:pin/:state", post(handlers::rpi_gpio_write))
        .route("/rpi_gpio/reset/:pin", post(handlers::rpi_gpio_reset))
        .route("/rs485/send", post(handlers::rs485_send))
        .route("/rs485/last", get(handlers::rs485_last))
        .route("/usb", get(handlers::usb_status))
        .route("/health", get(handlers::health_check));

    // Serve the dashboard from the static directory when it has one
    let mut index_file = None;
    if let Some(static_path) = &config.static_path {
        let static_path = PathBuf::from(static_path);

        if static_path.exists() {
            info!("Serving static files from: {:?}", static_path);
            app = app.nest_service("/static", ServeDir::new(&static_path));

            let index = static_path.join("index.html");
            if index.exists() {
                index_file = Some(index);
            }
        } else {
            warn!(
                "Static path {:?} does not exist, serving default index",
                static_path
            );
        }
    }

    app = match index_file {
        Some(index) => app.route("/", get(move || handlers::serve_index(index.clone()))),
        None => app.route("/", get(handlers::default_index)),
    };

    let mut app = app.fallback(handlers::not_found).with_state(state);

    if config.enable_cors {
        app = app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    app = app.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    Ok(app)
}
