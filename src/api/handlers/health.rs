use super::Backend;
use crate::GIT_COMMIT_HASH;
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use sqlx::Connection;
use tracing::{debug, error, info_span, Instrument};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    database: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DatabaseStatus {
    /// Postgres is reachable and answered a ping.
    Ok,
    /// Postgres is configured but unreachable.
    Error,
    /// In-memory store, nothing external to ping.
    Memory,
}

impl DatabaseStatus {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Memory => "memory",
        }
    }

    const fn is_healthy(self) -> bool {
        !matches!(self, Self::Error)
    }
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Service and its store are healthy", body = [Health]),
        (status = 503, description = "Database is unreachable", body = [Health])
    ),
    tag= "health"
)]
// axum handler for health
pub async fn health(method: Method, backend: Extension<Backend>) -> impl IntoResponse {
    let status = match &backend.0 {
        Backend::Postgres(pool) => {
            let acquire_span = info_span!(
                "db.acquire",
                db.system = "postgresql",
                db.operation = "ACQUIRE"
            );
            match pool.acquire().instrument(acquire_span).await {
                Ok(mut conn) => {
                    let ping_span =
                        info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
                    match conn.ping().instrument(ping_span).await {
                        Ok(()) => DatabaseStatus::Ok,
                        Err(error) => {
                            error!("Failed to ping database: {}", error);

                            DatabaseStatus::Error
                        }
                    }
                }

                Err(error) => {
                    error!("Failed to acquire database connection: {}", error);

                    DatabaseStatus::Error
                }
            }
        }
        Backend::Memory => DatabaseStatus::Memory,
    };

    // Create a health struct
    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: status.as_str().to_string(),
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    // Create headers using the map method
    let headers = format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            debug!("X-App header: {:?}", x_app_header_value);

            let mut headers = HeaderMap::new();

            headers.insert("X-App", x_app_header_value);

            headers
        })
        .map_err(|err| {
            error!("Failed to parse X-App header: {}", err);
        });

    // Unwrap the headers or provide a default value (empty headers) in case of an error
    let headers = headers.unwrap_or_else(|()| HeaderMap::new());

    match status {
        DatabaseStatus::Ok => debug!("Database connection is healthy"),
        DatabaseStatus::Error => debug!("Database connection is unhealthy"),
        DatabaseStatus::Memory => debug!("In-memory store, no database to check"),
    }

    if status.is_healthy() {
        (StatusCode::OK, headers, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_status_labels() {
        assert_eq!(DatabaseStatus::Ok.as_str(), "ok");
        assert_eq!(DatabaseStatus::Error.as_str(), "error");
        assert_eq!(DatabaseStatus::Memory.as_str(), "memory");
    }

    #[test]
    fn memory_counts_as_healthy() {
        assert!(DatabaseStatus::Ok.is_healthy());
        assert!(DatabaseStatus::Memory.is_healthy());
        assert!(!DatabaseStatus::Error.is_healthy());
    }

    #[tokio::test]
    async fn health_on_memory_backend_is_ok() {
        let response = health(Method::GET, Extension(Backend::Memory))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("X-App"));
    }

    #[tokio::test]
    async fn options_health_has_empty_body() {
        let response = health(Method::OPTIONS, Extension(Backend::Memory))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
