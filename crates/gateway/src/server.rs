use std::{
    any::Any,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use {
    anyhow::Context,
    axum::{
        Json, Router,
        extract::{DefaultBodyLimit, Request, State},
        http::{
            HeaderName, HeaderValue, Method, StatusCode,
            header::{
                ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
                ACCESS_CONTROL_ALLOW_ORIGIN, AUTHORIZATION, CONTENT_TYPE,
            },
        },
        middleware,
        response::{IntoResponse, Response},
    },
    serde_json::json,
    tokio::task::JoinSet,
    tower_http::{
        catch_panic::CatchPanicLayer,
        cors::{Any as AnyOrigin, CorsLayer},
        limit::RequestBodyLimitLayer,
        set_header::SetResponseHeaderLayer,
    },
    tracing::{error, info},
};

use {
    swarm_config::SwarmConfig,
    swarm_protocol::{BotError, Envelope, Reply},
    swarm_sessions::{MemorySessionStore, SessionStore},
};

use crate::{
    bots::{BotRegistry, BotRequest, RegistryTokenResolver, TokenResolver},
    dispatch,
    listener::{ListenerManager, PortState, Protocol},
    pipeline::front_door,
    routes::{RouteOptions, RouteRegistrar, context_of},
    state::GatewayState,
};

const ALLOW_METHODS: &str = "GET, PUT, POST, DELETE, OPTIONS";
const ALLOW_HEADERS: &str = "Hashcash, Authorization, Content-Type";
const PANIC_MESSAGE: &str = "oops, something wrong...";
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

// ── Router ───────────────────────────────────────────────────────────────────

/// Built-in routes followed by every bot's routes. Built-ins win collisions.
pub fn gateway_routes(state: &GatewayState) -> RouteRegistrar {
    let mut routes = RouteRegistrar::new(Arc::clone(&state.bots));
    let info = json!({ "name": state.name, "version": state.version });
    for path in ["/", "/version"] {
        let info = info.clone();
        routes.register(RouteOptions::get(), path, move |_request: BotRequest| {
            let info = info.clone();
            async move { Ok::<_, BotError>(Reply::data(info).with_message("Application Information")) }
        });
    }
    state.bots.register_routes(&mut routes);
    routes
}

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>, routes: RouteRegistrar) -> Router {
    let max_body = state.config.server.max_body_bytes;

    let cors = CorsLayer::new()
        .allow_origin(AnyOrigin)
        .allow_methods([
            Method::GET,
            Method::PUT,
            Method::POST,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            HeaderName::from_static("hashcash"),
            AUTHORIZATION,
            CONTENT_TYPE,
        ]);

    routes
        .into_router()
        .fallback(unmatched)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            front_door,
        ))
        .layer(DefaultBodyLimit::max(max_body))
        .layer(RequestBodyLimitLayer::new(max_body))
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOW_METHODS),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOW_HEADERS),
        ))
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state)
}

async fn unmatched(State(state): State<Arc<GatewayState>>, request: Request) -> Response {
    match context_of(&request) {
        Some(ctx) => dispatch::respond(&state, &ctx, Envelope::pending()).await,
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    };
    error!(panic = %detail, "request handler panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "result": 0, "message": PANIC_MESSAGE })),
    )
        .into_response()
}

// ── Server startup ───────────────────────────────────────────────────────────

fn parse_bind(bind: &str) -> anyhow::Result<IpAddr> {
    if bind.eq_ignore_ascii_case("localhost") {
        return Ok(IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
    bind.parse()
        .with_context(|| format!("invalid bind address '{bind}'"))
}

/// The error of the first listener task that stopped.
async fn first_failure(tasks: &mut JoinSet<anyhow::Result<()>>) -> anyhow::Error {
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Err(e)) => return e,
            Err(e) => return anyhow::Error::from(e).context("listener task panicked"),
            Ok(Ok(())) => {},
        }
    }
    anyhow::anyhow!("listener stopped before binding")
}

/// Start the receptor: boot the bots, bind HTTP (and HTTPS when enabled) with
/// port fallback, then mark every bot ready. Runs until a listener fails.
pub async fn start_gateway(config: SwarmConfig, bots: BotRegistry) -> anyhow::Result<()> {
    let bots = Arc::new(bots);
    bots.start_all().await?;

    let store = Arc::new(MemorySessionStore::new(Duration::from_secs(
        config.session.ttl_secs,
    )));
    let _sweeper = store.spawn_sweeper(SESSION_SWEEP_INTERVAL);
    let sessions: Arc<dyn SessionStore> = store;
    let resolver: Arc<dyn TokenResolver> =
        Arc::new(RegistryTokenResolver::new(Arc::clone(&bots)));
    let state = GatewayState::with_parts(config.clone(), Arc::clone(&bots), sessions, resolver);

    let routes = gateway_routes(&state);
    let route_count = routes.len();
    let app = build_gateway_app(Arc::clone(&state), routes);

    let server = &config.server;
    let addr = parse_bind(&server.bind)?;
    let mut tasks = JoinSet::new();

    let mut http = ListenerManager::new(
        Protocol::Http,
        addr,
        PortState::new(server.http_port, server.http_fallback_ports.clone()),
        server.max_bind_attempts,
    );
    let http_ready = http.on_listening();
    let http_app = app.clone();
    tasks.spawn(async move {
        http.run(move |listener| {
            let app = http_app.clone();
            async move {
                axum::serve(
                    listener,
                    app.into_make_service_with_connect_info::<SocketAddr>(),
                )
                .await
            }
        })
        .await
        .map_err(anyhow::Error::from)
    });

    #[cfg(feature = "tls")]
    let https_ready = if config.tls.enabled {
        let paths = crate::tls::resolve_paths(&config.tls, &swarm_config::data_dir());
        crate::tls::ensure_certificate(&paths)?;
        let rustls = crate::tls::rustls_config(&paths).await?;

        let mut https = ListenerManager::new(
            Protocol::Https,
            addr,
            PortState::new(server.https_port, server.https_fallback_ports.clone()),
            server.max_bind_attempts,
        );
        let ready = https.on_listening();
        let https_app = app.clone();
        tasks.spawn(async move {
            https
                .run(move |listener| {
                    let app = https_app.clone();
                    let rustls = rustls.clone();
                    async move {
                        let listener = listener.into_std()?;
                        axum_server::from_tcp_rustls(listener, rustls)
                            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                            .await
                    }
                })
                .await
                .map_err(anyhow::Error::from)
        });
        Some(ready)
    } else {
        None
    };
    #[cfg(not(feature = "tls"))]
    let https_ready: Option<tokio::sync::oneshot::Receiver<u16>> = None;

    let Ok(http_port) = http_ready.await else {
        return Err(first_failure(&mut tasks).await);
    };
    let https_port = match https_ready {
        Some(ready) => match ready.await {
            Ok(port) => Some(port),
            Err(_) => return Err(first_failure(&mut tasks).await),
        },
        None => None,
    };

    // Startup banner.
    let names = bots.names();
    let lines = [
        format!("{} receptor v{} on {}", state.name, state.version, state.hostname),
        format!("http listening on {addr}:{http_port}"),
        match https_port {
            Some(port) => format!("https listening on {addr}:{port}"),
            None => "https disabled".to_string(),
        },
        format!("{} bots registered: {}", names.len(), names.join(", ")),
        format!("{route_count} routes registered"),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    bots.ready_all().await?;

    while let Some(joined) = tasks.join_next().await {
        joined.context("listener task panicked")??;
    }
    Ok(())
}
