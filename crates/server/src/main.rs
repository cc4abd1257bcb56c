//! anchornet server entry point.

#![allow(clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;

use anchornet_common::{AppConfig, RequestSigner, generate_rsa_keypair};
use anchornet_federation::{
    AcceptAllFollowPolicy, Collaborators, FederationService, HttpSignatureVerifier,
    HttpTransport, LoggingMonitoringService, LoggingUndeliverableHandler, MinWitnessProofs,
    ServiceConfig, Transport,
};
use anchornet_store::{
    ActivityStore, Credential, MemoryActivityStore, MemoryAnchorCredentialStore, MemoryWitnessStore,
};
use tokio::signal;
use tokio::sync::mpsc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "anchornet=debug,tower_http=debug".into()),
        )
        .init();

    info!("Starting anchornet server...");

    let config = AppConfig::load()?;
    let service_config = ServiceConfig::from_app_config(&config)?;

    // The service key signs every outbound request. A deployment would load
    // it from a key store; a fresh node generates one.
    let keypair = generate_rsa_keypair()?;
    let key_id = format!("{}#main-key", service_config.service_iri);
    let signer = RequestSigner::new(&keypair.private_key_pem, key_id)?;

    let user_agent = format!("anchornet/{}", env!("CARGO_PKG_VERSION"));
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(signer, user_agent));
    let verifier = Arc::new(HttpSignatureVerifier::new(Arc::clone(&transport)));

    let store = Arc::new(MemoryActivityStore::new());
    let witness_store = Arc::new(MemoryWitnessStore::new());
    let vc_store = Arc::new(MemoryAnchorCredentialStore::new());

    // Fully witnessed credentials land here; the ledger writer drains it.
    let (vc_tx, mut vc_rx) = mpsc::channel::<Credential>(100);
    tokio::spawn(async move {
        while let Some(credential) = vc_rx.recv().await {
            info!(vc_id = %credential.id, proofs = credential.proofs.len(), "Credential witnessed");
        }
    });

    let service = FederationService::new(
        service_config,
        store as Arc<dyn ActivityStore>,
        Collaborators {
            transport,
            verifier,
            monitoring: Arc::new(LoggingMonitoringService),
            witness_store,
            vc_store,
            witness_policy: Arc::new(MinWitnessProofs(1)),
            witness: None,
            follow_policy: Arc::new(AcceptAllFollowPolicy),
            undeliverable: Arc::new(LoggingUndeliverableHandler),
            vc_tx,
        },
    );

    service.start().await?;

    let app = service
        .router()
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    service.stop().await?;

    info!("Server shutdown complete");
    Ok(())
}
