use clap::Parser;
use log::{info, warn};
use miette::{IntoDiagnostic, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_graceful_shutdown::{SubsystemBuilder, Toplevel};

use geoguard_server::{
    config::{self, GeofenceSettings},
    oracle::{ContainmentOracle, GeometrySource, StaticOracle},
    postgis::{PostgisOracle, PostgisSchema},
    service::GeofenceService,
    storage::{AlertStore, FileAlertStore, MemoryAlertStore},
    web::Web,
    Cli, VERSION,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let mut logger = env_logger::Builder::new();
    logger
        .filter_level(args.verbose.log_level_filter())
        .parse_default_env()
        .init();

    info!("Geoguard server {} starting", VERSION);

    let settings = GeofenceSettings::from_cli(&args);

    let (oracle, geometry): (Arc<dyn ContainmentOracle>, Arc<dyn GeometrySource>) =
        match &args.database_url {
            Some(url) => {
                let postgis = Arc::new(
                    PostgisOracle::connect_lazy(url, PostgisSchema::default()).into_diagnostic()?,
                );
                let oracle: Arc<dyn ContainmentOracle> = postgis.clone();
                let geometry: Arc<dyn GeometrySource> = postgis;
                (oracle, geometry)
            }
            None => {
                warn!("No --database-url given: using a static oracle, no vessel will ever be inside a zone");
                let oracle = Arc::new(StaticOracle::new());
                let geometry: Arc<dyn GeometrySource> = oracle.clone();
                let oracle: Arc<dyn ContainmentOracle> = oracle;
                (oracle, geometry)
            }
        };

    let alerts: Arc<dyn AlertStore> = if args.memory_store {
        warn!("Alert logs are kept in memory only");
        Arc::new(MemoryAlertStore::new())
    } else {
        let dir = config::alert_log_dir(&args);
        info!("Alert logs in {}", dir.display());
        Arc::new(FileAlertStore::new(dir).await.into_diagnostic()?)
    };

    let service = GeofenceService::new(oracle, geometry, alerts, settings);
    let web = Web::new(service.clone());
    let port = args.port;

    Toplevel::new(move |s| async move {
        s.start(SubsystemBuilder::new("Geofence", move |a| service.run(a)));
        s.start(SubsystemBuilder::new("Webserver", move |a| web.run(a, port)));
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_secs(5))
    .await
    .map_err(|e| miette::miette!("{e}"))
}
