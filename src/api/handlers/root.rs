//! Root endpoint.

use axum::response::IntoResponse;

/// Landing route; undocumented on purpose, it only names the service.
pub async fn root() -> impl IntoResponse {
    concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"))
}
