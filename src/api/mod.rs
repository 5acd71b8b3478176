use crate::{
    api::handlers::{health, root, Backend},
    challenge::{ChallengeLedger, CodeGenerator},
    cli::globals::GlobalArgs,
    config::AuthConfig,
    delivery::{CodeSender, LogCodeSender, ResendCodeSender},
    identity::IdentityService,
    login::LoginFlow,
    session::SessionManager,
    stepup::StepUpAuthorizer,
    store::{ChallengeStore, GrantStore, IdentityStore, MemoryStore, PgStore, SessionStore},
};
use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    routing::{get, options},
    Extension,
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, signal, sync::mpsc};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{error, info, info_span, warn, Span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;
use utoipa_swagger_ui::SwaggerUi;
// Keep these internal to the crate while allowing CLI/server wiring to reference them.
pub(crate) mod handlers;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;
mod purge;

pub use openapi::openapi;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// One shared store implementation viewed through each persistence trait.
struct Stores {
    identities: Arc<dyn IdentityStore>,
    challenges: Arc<dyn ChallengeStore>,
    sessions: Arc<dyn SessionStore>,
    grants: Arc<dyn GrantStore>,
}

impl Stores {
    fn shared<S>(store: Arc<S>) -> Self
    where
        S: IdentityStore + ChallengeStore + SessionStore + GrantStore + 'static,
    {
        Self {
            identities: store.clone(),
            challenges: store.clone(),
            sessions: store.clone(),
            grants: store,
        }
    }
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    dsn: Option<String>,
    globals: &GlobalArgs,
    config: AuthConfig,
) -> Result<()> {
    // Graceful shutdown rides on ctrl-c
    let (tx, mut rx) = mpsc::unbounded_channel();
    shutdown_on_ctrl_c(tx);

    let (backend, stores) = match dsn {
        Some(dsn) => {
            // Connect to database
            let pool = PgPoolOptions::new()
                .min_connections(1)
                .max_connections(5)
                .max_lifetime(Duration::from_secs(60 * 2))
                .test_before_acquire(true)
                .connect(&dsn)
                .await
                .context("Failed to connect to database")?;

            let store = Arc::new(PgStore::new(pool.clone()));
            (Backend::Postgres(pool), Stores::shared(store))
        }
        None => {
            warn!("No DSN configured; state lives in memory and dies with the process");
            (Backend::Memory, Stores::shared(Arc::new(MemoryStore::new())))
        }
    };

    let delivery = code_sender(globals)?;
    let codes = CodeGenerator::new(&config, globals.code_pepper.clone());
    let ledger = Arc::new(ChallengeLedger::new(
        stores.challenges.clone(),
        codes,
        config.clone(),
    ));
    let sessions = Arc::new(SessionManager::new(stores.sessions.clone(), config.clone()));
    let identity = Arc::new(IdentityService::new(
        stores.identities.clone(),
        stores.challenges.clone(),
        ledger.clone(),
        delivery.clone(),
    ));
    let login = Arc::new(LoginFlow::new(
        stores.identities.clone(),
        ledger.clone(),
        sessions.clone(),
        delivery.clone(),
        &config,
    ));
    let stepup = Arc::new(StepUpAuthorizer::new(
        stores.grants.clone(),
        stores.identities.clone(),
        ledger,
        delivery,
        config.clone(),
    ));

    // Background task deletes terminal challenges, sessions, and grants once
    // they age past the retention window.
    purge::spawn_purge_worker(
        stores.challenges.clone(),
        stores.sessions.clone(),
        stores.grants.clone(),
        config.retention_seconds(),
    );

    let frontend_origin = frontend_origin(&globals.frontend_url)?;
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);

    // Build the router from OpenAPI-wired routes, then extend it with non-doc routes like `/` and
    // preflight-only `OPTIONS /health`. The OpenAPI document itself lives in openapi.rs.
    let (router, api_doc) = router().split_for_parts();
    let app = router
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api_doc))
        .route("/", get(root::root))
        .route("/health", options(health::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(identity))
                .layer(Extension(login))
                .layer(Extension(sessions))
                .layer(Extension(stepup))
                .layer(Extension(backend)),
        );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            rx.recv().await;
            info!("Gracefully shutdown");
        })
        .await?;

    // Flush pending spans before the process exits.
    crate::cli::telemetry::shutdown_tracer();

    Ok(())
}

/// Pick the code sender: Resend when an API key is configured, the log
/// otherwise.
fn code_sender(globals: &GlobalArgs) -> Result<Arc<dyn CodeSender>> {
    match &globals.resend_api_key {
        Some(key) => {
            let sender = ResendCodeSender::new(key.clone(), globals.email_from.clone())?;
            Ok(Arc::new(sender))
        }
        None => {
            warn!("No Resend API key configured; one-time codes go to the log");
            Ok(Arc::new(LogCodeSender))
        }
    }
}

fn shutdown_on_ctrl_c(tx: mpsc::UnboundedSender<()>) {
    tokio::spawn(async move {
        if let Err(err) = signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", err);
        }
        let _ = tx.send(());
    });
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(frontend_url: &str) -> Result<HeaderValue> {
    let parsed =
        Url::parse(frontend_url).with_context(|| format!("Invalid frontend URL: {frontend_url}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Frontend URL must include a valid host: {frontend_url}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}
