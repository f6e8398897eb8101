#[macro_use]
extern crate failure;

use env_logger::Env;
use log::{error, info};
use std::sync::Arc;
use tokio::sync::watch;
use violation_pipeline::config::{Config, FAST_LANE_QUEUE, PERSISTENCE_QUEUE};
use violation_pipeline::db::{self, ViolationStore};
use violation_pipeline::detector::Detector;
use violation_pipeline::error::Result;
use violation_pipeline::metadata::HttpMetadataStore;
use violation_pipeline::notifier::{HttpPublisher, Notifier};
use violation_pipeline::ocr::HttpTextDetector;
use violation_pipeline::orchestrator::Orchestrator;
use violation_pipeline::persister::Persister;
use violation_pipeline::queue::{MessageQueue, SqliteQueue};
use violation_pipeline::reader::PlateReader;
use violation_pipeline::reference::ReferenceResolver;
use violation_pipeline::router::Router;
use violation_pipeline::webhook;
use violation_pipeline::worker::Worker;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    info!("Starting violation-pipeline");

    if let Err(e) = run().await {
        error!("Fatal: {}", e);
        std::process::exit(1);
    }
    info!("Exiting main");
}

async fn run() -> Result<()> {
    let config = Config::from_env()?;
    let conn = db::open(&config.database_path)
        .map_err(|e| format_err!("Unable to open {:?}: {}", config.database_path, e))?;
    let store = ViolationStore::new(conn.clone());
    let fast_lane: Arc<dyn MessageQueue> = Arc::new(SqliteQueue::new(
        conn.clone(),
        FAST_LANE_QUEUE,
        config.visibility_timeout,
    ));
    let persistence: Arc<dyn MessageQueue> = Arc::new(SqliteQueue::new(
        conn,
        PERSISTENCE_QUEUE,
        config.visibility_timeout,
    ));
    let resolver = Arc::new(ReferenceResolver::load(
        &config.dmv_json_path,
        &config.dmv_xml_path,
    ));
    let client = reqwest::Client::new();

    let reader = Arc::new(PlateReader::new(
        Detector::new(&config.home_jurisdiction),
        Arc::new(HttpTextDetector::new(
            client.clone(),
            config.ocr_url.clone(),
            config.access_token.clone(),
        )),
        Arc::new(HttpMetadataStore::new(
            client.clone(),
            config.images_url.clone(),
            config.access_token.clone(),
        )),
        Router::new(&config.home_jurisdiction, fast_lane.clone(), store.clone()),
    ));
    let orchestrator = Worker::new(
        fast_lane,
        Orchestrator::new(resolver, persistence.clone()),
        config.poll,
    );
    let persister = Worker::new(
        persistence,
        Persister::new(
            store.clone(),
            Notifier::new(
                Box::new(HttpPublisher::new(
                    client,
                    config.notify_url.clone(),
                    config.access_token.clone(),
                )),
                &config.notify_topic,
            ),
        ),
        config.poll,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let orchestrator_rx = shutdown_rx.clone();
    let orchestrator_task = tokio::spawn(async move { orchestrator.run(orchestrator_rx).await });
    let persister_task = tokio::spawn(async move { persister.run(shutdown_rx).await });
    let webhook_task = tokio::spawn(webhook::run(reader, store, config.webhook_port));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Shutdown requested"),
        result = webhook_task => {
            if let Err(e) = result {
                error!("Webhook task failed: {}", e);
            }
        }
    }

    // Workers finish their in-flight message before stopping.
    let _ = shutdown_tx.send(true);
    if let Err(e) = orchestrator_task.await {
        error!("Orchestrator task failed: {}", e);
    }
    if let Err(e) = persister_task.await {
        error!("Persister task failed: {}", e);
    }
    Ok(())
}
