//! MeritBase auth service entry point.
//!
//! Bootstraps the server:
//! 1. Load configuration from environment
//! 2. Pick the nonce store (Redis when configured, otherwise in-memory)
//! 3. Start the expired-nonce cleanup loop
//! 4. Build router with auth routes, CORS, body limit and security headers
//! 5. Start Axum server
//!
//! Also supports a `keygen` subcommand that prints a fresh `SESSION_KEY`.

use meritbase_auth::{
    auth::{
        middleware::AppState, NonceAuthority, SignatureVerifier, SystemClock, VerifierOptions,
    },
    cleanup,
    config::{Config, MIN_SESSION_KEY_BYTES},
    middleware::security_headers,
    routes,
    storage::{memory::MemoryNonceStore, redis_store::RedisNonceStore, NonceStore},
};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use zeroize::Zeroizing;

/// Random cookie key, base64 encoded, suitable for `SESSION_KEY`.
fn keygen() -> String {
    let mut key = Zeroizing::new([0u8; MIN_SESSION_KEY_BYTES]);
    rand::rng().fill(&mut key[..]);
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &key[..])
}

fn print_keygen_usage() {
    eprintln!("Usage: meritbase-auth keygen");
    eprintln!();
    eprintln!("Generate a random cookie encryption key for SESSION_KEY.");
    eprintln!();
    eprintln!("Then set in .env:");
    eprintln!("  SESSION_KEY=<output>");
}

#[tokio::main]
async fn main() {
    // Check for keygen subcommand
    let args: Vec<String> = std::env::args().collect();
    if args.len() >= 2 && args[1] == "keygen" {
        if args.len() != 2 {
            print_keygen_usage();
            std::process::exit(1);
        }
        println!("{}", keygen());
        return;
    }

    // Initialize tracing with env filter support (RUST_LOG)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config from environment
    let config = Config::from_env().expect("Failed to load config");
    tracing::info!("Starting meritbase-auth on {}", config.bind_addr);
    tracing::debug!(?config, "Loaded configuration");

    let store: Arc<dyn NonceStore> = match &config.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.as_str()).expect("Invalid Redis URL");

            // Verify Redis connection
            client
                .get_multiplexed_async_connection()
                .await
                .expect("Failed to connect to Redis");
            tracing::info!("Nonce store: Redis");
            Arc::new(RedisNonceStore::new(client))
        }
        None => {
            tracing::warn!("REDIS_URL not set, nonces are held in memory by this process only");
            Arc::new(MemoryNonceStore::new())
        }
    };

    let nonces = NonceAuthority::new(store, Arc::new(SystemClock), config.nonce_ttl());
    let verifier = SignatureVerifier::new(
        nonces.clone(),
        VerifierOptions {
            expected_domain: config.siwe_domain.clone(),
        },
    );
    tracing::info!(binding = %config.nonce_binding, "Nonce binding configured");

    tokio::spawn(cleanup::run_cleanup_loop(
        nonces,
        Duration::from_secs(config.cleanup_interval_secs),
    ));

    let state = AppState::new(config.clone(), verifier);

    // Explicit CORS: deny all cross-origin requests (single-origin deployment).
    // CorsLayer::new() with no allowed origins rejects all CORS preflight requests.
    let cors = CorsLayer::new();

    let app = routes::api_router()
        .layer(axum::extract::DefaultBodyLimit::max(config.max_body_bytes))
        .layer(cors)
        .layer(axum::middleware::from_fn(security_headers))
        .with_state(state);

    // Bind to configured address
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .expect("Failed to bind");
    tracing::info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
