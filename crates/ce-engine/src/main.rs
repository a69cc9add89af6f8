use axum::http::{header, HeaderValue, Method};
use ce_engine::bootstrap;
use ce_engine::cli::{Cli, Command, ConfigCommand};
use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _config_path) = ce_engine::cli::load_config()?;
            run_server(config).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = ce_engine::cli::load_config()?;
            let valid = ce_engine::cli::config::validate(&config, &config_path);
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = ce_engine::cli::load_config()?;
            ce_engine::cli::config::show(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("clinical-extractor {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,ce_engine=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: ce_domain::config::EngineConfig) -> anyhow::Result<()> {
    tracing::info!("clinical extraction engine starting");

    let host = config.server.host.clone();
    let port = config.server.port;

    let cors_layer = build_cors_layer(&config.server.cors);

    let state = bootstrap::build_app_state(config)?;
    bootstrap::spawn_background_tasks(&state);

    let app = ce_engine::api::router().layer(cors_layer).with_state(state);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("binding to {addr}: {e}"))?;

    tracing::info!(addr = %addr, "clinical extraction engine listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("axum server error: {e}"))?;

    Ok(())
}

/// Build a [`CorsLayer`] from the configured allowed origins. An origin
/// ending in `:*` matches any port on that host; a single `"*"` entry
/// allows all origins (credentials are then disabled, since the two are
/// mutually exclusive).
fn build_cors_layer(cors: &ce_domain::config::CorsConfig) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS];

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(methods)
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();

    for origin in &cors.allowed_origins {
        if let Some(prefix) = origin.strip_suffix('*') {
            wildcard_prefixes.push(prefix.to_string());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(methods)
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
