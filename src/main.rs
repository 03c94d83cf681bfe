// src/main.rs
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use apolo_charging_engine::agents::diameter::{CcrProcessor, DiameterAgent};
use apolo_charging_engine::api::{self, bijson::BiJsonServer, AppState};
use apolo_charging_engine::cdrc::{group_by_in_dir, Cdrc};
use apolo_charging_engine::cgrates::{CgratesClient, EventPublisher, ResourceLimiter};
use apolo_charging_engine::config::Config;
use apolo_charging_engine::esl::FreeSwitchCluster;
use apolo_charging_engine::sessions::{
    BiRpcDispatcher, ExternalConnections, SessionContext, SessionManager,
};

fn init_tracing(format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing(&std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string()));

    info!("🚀 Starting Apolo Charging Engine (Rust)");

    let config = Arc::new(Config::from_env().context("Failed to load configuration")?);
    info!("Environment: {}, node {}", config.environment, config.node_id);

    let cgrates = Arc::new(
        CgratesClient::new(&config.cgrates_url, config.cgrates_timeout_ms)
            .context("Failed to create rating engine client")?,
    );
    info!("✅ Rating engine client ready: {}", config.cgrates_url);

    let manager = SessionManager::new(
        config.session_manager_config(),
        SessionContext {
            responder: cgrates.clone(),
            cdrs: cgrates.clone(),
            connections: Arc::new(ExternalConnections::new()),
            defaults: config.event_defaults(),
            post_action_trigger: config.post_action_trigger,
        },
    );
    let dispatcher = BiRpcDispatcher::new(manager.clone());
    let shutdown = CancellationToken::new();

    // FreeSWITCH ESL cluster
    let resources: Option<Arc<dyn ResourceLimiter>> = if config.resources_enabled {
        Some(cgrates.clone())
    } else {
        None
    };
    let fs_cluster = if config.freeswitch_servers.is_empty() {
        info!("⚠️  No FreeSWITCH servers configured");
        None
    } else {
        let cluster = FreeSwitchCluster::new(
            config.freeswitch_servers.clone(),
            Arc::new(config.freeswitch.clone()),
            manager.clone(),
            resources,
        );
        cluster.start();
        info!("✅ FreeSWITCH ESL cluster started");
        Some(cluster)
    };

    // Diameter agent
    if let Some(da_cfg) = &config.diameter_agent {
        let publisher: Option<Arc<dyn EventPublisher>> = if config.pubsub_enabled {
            Some(cgrates.clone())
        } else {
            None
        };
        let processor = Arc::new(CcrProcessor::new(
            Arc::new(da_cfg.clone()),
            manager.clone(),
            publisher,
        ));
        let agent = DiameterAgent::new(processor);
        let token = agent.shutdown_token();
        let parent = shutdown.clone();
        tokio::spawn(async move {
            parent.cancelled().await;
            token.cancel();
        });
        tokio::spawn(async move {
            if let Err(e) = agent.listen().await {
                error!("❌ Diameter agent error: {}", e);
            }
        });
    }

    // Bidirectional JSON listener
    if let Some(addr) = config.bijson_listen.clone() {
        let timeout = config
            .bijson_reply_timeout
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(2));
        let server = BiJsonServer::new(dispatcher.clone(), timeout);
        let token = server.shutdown_token();
        let parent = shutdown.clone();
        tokio::spawn(async move {
            parent.cancelled().await;
            token.cancel();
        });
        tokio::spawn(async move {
            if let Err(e) = server.listen(&addr).await {
                error!("❌ BiJSON listener error: {}", e);
            }
        });
    }

    // CDR file mediation, one reader per input folder
    for profiles in group_by_in_dir(config.cdrc.clone()) {
        match Cdrc::new(profiles, &config.default_timezone, cgrates.clone(), shutdown.child_token()) {
            Ok(cdrc) => {
                info!("✅ CDR reader watching {}", cdrc.in_dir().display());
                tokio::spawn(async move {
                    let dir = cdrc.in_dir().display().to_string();
                    if let Err(e) = cdrc.run().await {
                        error!("❌ CDR reader on {} stopped: {}", dir, e);
                    }
                });
            }
            Err(e) => error!("❌ Could not start CDR reader: {}", e),
        }
    }

    // HTTP server
    let bind_address = format!("{}:{}", config.host, config.port);
    info!("🌐 Starting HTTP server on {}", bind_address);

    let state = web::Data::new(AppState::new(dispatcher, config.node_id.clone()));
    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .wrap(tracing_actix_web::TracingLogger::default())
            .app_data(state.clone())
            .configure(api::routes::configure)
    })
    .workers(8)
    .bind(&bind_address)?
    .run()
    .await?;

    warn!("🛑 HTTP server stopped, shutting down");
    shutdown.cancel();
    if let Some(cluster) = fs_cluster {
        cluster.shutdown().await;
    }
    manager.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}
