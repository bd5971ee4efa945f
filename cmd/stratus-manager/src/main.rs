use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use pkg_api::{AppState, server::start_server};
use pkg_controllers::{
    ApplicationReconciler, BrokerHealthReconciler, ManagedResourceReconciler, TeamReconciler,
    TenantReconciler,
};
use pkg_dispatch::HttpDispatcher;
use pkg_manager::{ControllerManager, ControllerOptions};
use pkg_registry::Registry;
use pkg_state::SlateStore;
use pkg_state::leader::LeaderElection;
use pkg_types::application::Application;
use pkg_types::broker::Broker;
use pkg_types::config::{ManagerConfigFile, load_config_file};
use pkg_types::resource::ManagedResource;
use pkg_types::team::Team;
use pkg_types::tenant::Tenant;

#[derive(Parser, Debug)]
#[command(name = "stratus-manager", about = "stratus control plane manager")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = "/etc/stratus/config.yaml")]
    config: String,

    /// Address for the callback receiver to listen on
    #[arg(long)]
    listen_addr: Option<String>,

    /// Directory for record storage
    #[arg(long)]
    data_dir: Option<String>,

    /// Base URL brokers must POST callbacks to
    #[arg(long)]
    callback_url: Option<String>,

    /// Token brokers present when registering
    #[arg(long)]
    join_token: Option<String>,

    /// Run with leader election
    #[arg(long)]
    leader_elect: bool,

    /// Reconcile worker concurrency per kind
    #[arg(long)]
    workers: Option<usize>,

    /// Periodic full resync interval in seconds (0 disables)
    #[arg(long)]
    resync_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let file_cfg: ManagerConfigFile = load_config_file(&cli.config)?;
    info!("Config file: {}", cli.config);

    // Merge: CLI args > config file > defaults
    let listen_addr: SocketAddr = cli
        .listen_addr
        .or(file_cfg.listen_addr)
        .unwrap_or_else(|| "0.0.0.0:9090".to_string())
        .parse()?;
    let data_dir = cli
        .data_dir
        .or(file_cfg.data_dir)
        .unwrap_or_else(|| "/var/lib/stratus/data".to_string());
    let callback_url = cli
        .callback_url
        .or(file_cfg.callback_url)
        .unwrap_or_else(|| format!("http://{}", listen_addr));
    let join_token = cli
        .join_token
        .or(file_cfg.join_token)
        .unwrap_or_else(|| "demo-token-123".to_string());
    let leader_elect = cli.leader_elect || file_cfg.leader_elect.unwrap_or(false);
    let workers = cli.workers.or(file_cfg.workers).unwrap_or(2);
    let resync = match cli.resync_secs.or(file_cfg.resync_secs) {
        Some(0) => None,
        Some(secs) => Some(Duration::from_secs(secs)),
        None => Some(Duration::from_secs(300)),
    };

    info!("Starting stratus-manager");
    info!("  Listen:       {}", listen_addr);
    info!("  Data dir:     {}", data_dir);
    info!("  Callback URL: {}", callback_url);
    info!("  Leader elect: {}", leader_elect);

    // An unreachable store at startup is fatal.
    let store = Arc::new(SlateStore::open(&data_dir).await?);

    let registry = Arc::new(Registry::new(store.clone()));
    let dispatcher = Arc::new(HttpDispatcher::new());

    let mut manager = ControllerManager::new(store.clone());
    if leader_elect {
        let server_id = format!("stratus-manager-{}", Uuid::new_v4().simple());
        let election = LeaderElection::new(store.clone(), server_id);
        let (_handle, leader_rx) = election.start();
        manager = manager.with_leader_election(leader_rx);
    }

    let options = ControllerOptions {
        workers,
        resync,
        ..Default::default()
    };
    manager.register::<Tenant>(Arc::new(TenantReconciler::new(store.clone())), options.clone());
    manager.register::<Team>(Arc::new(TeamReconciler::new(store.clone())), options.clone());
    manager.register::<Application>(
        Arc::new(ApplicationReconciler::new(store.clone())),
        options.clone(),
    );
    manager.register::<ManagedResource>(
        Arc::new(ManagedResourceReconciler::new(
            store.clone(),
            registry.clone(),
            dispatcher,
            callback_url.clone(),
        )),
        options.clone(),
    );
    // Health probes self-schedule through requeue-after; no resync.
    manager.register::<Broker>(
        Arc::new(BrokerHealthReconciler::new(store.clone())),
        ControllerOptions {
            workers,
            resync: None,
            ..Default::default()
        },
    );

    // Callback receiver serves independently of leadership so brokers
    // can always deliver.
    let api_state = AppState {
        store: store.clone(),
        join_token,
    };
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_server(listen_addr, api_state).await {
            warn!("Callback receiver exited: {}", e);
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
        }
    });

    let result = manager.run(shutdown_rx).await;
    api_handle.abort();
    info!("stratus-manager exited");
    result
}
