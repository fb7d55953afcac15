use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kantaloupe_gateway::backend::KubeBackendFactory;
use kantaloupe_gateway::cli::{
    apply_serve_overrides, build_gateway, format_cluster_list, format_config_summary,
    format_kubeconfig_check, validate_kubeconfig_file, Cli, ClustersArgs, Commands, ServeArgs,
    ValidateKubeconfigArgs,
};
use kantaloupe_gateway::cluster::health;
use kantaloupe_gateway::config::{load_config, GatewayConfig};
use kantaloupe_gateway::server;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // Load .env file if specified
    if let Some(ref env_file) = cli.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref()).context("failed to load config")?;

    match cli.command {
        Commands::Serve(args) => serve(config, args).await,
        Commands::Clusters(args) => clusters(args).await,
        Commands::ValidateKubeconfig(args) => validate_kubeconfig(&config, args).await,
        Commands::CheckConfig => {
            print!("{}", format_config_summary(&config));
            Ok(())
        }
    }
}

async fn serve(mut config: GatewayConfig, args: ServeArgs) -> anyhow::Result<()> {
    apply_serve_overrides(&mut config, &args);
    config.validate().context("invalid serve options")?;
    let addr = config.server.socket_addr()?;

    let fanout = config.fanout.to_fanout();
    let factory = Arc::new(KubeBackendFactory::new(fanout.call_timeout));
    let state = build_gateway(&config, factory).await?;
    info!("Loaded {} clusters", state.registry().list().await.len());

    let cancel = CancellationToken::new();
    let checker = tokio::spawn(health::run(
        state.registry().clone(),
        config.health.clone(),
        cancel.clone(),
    ));

    let shutdown = {
        let cancel = cancel.clone();
        async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Shutdown requested"),
                _ = cancel.cancelled() => {}
            }
        }
    };

    let served = server::serve(state, addr, config.server.max_concurrency, shutdown).await;
    cancel.cancel();
    let _ = checker.await;
    served.with_context(|| format!("server on {} failed", addr))
}

async fn clusters(args: ClustersArgs) -> anyhow::Result<()> {
    let client = kantaloupe_gateway::cli::GatewayClient::new(&args.url);
    let clusters = client.list_clusters(args.name.as_deref()).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&clusters)?);
    } else {
        print!("{}", format_cluster_list(&clusters));
    }
    Ok(())
}

async fn validate_kubeconfig(
    config: &GatewayConfig,
    args: ValidateKubeconfigArgs,
) -> anyhow::Result<()> {
    let factory = args
        .connect
        .then(|| KubeBackendFactory::new(config.fanout.to_fanout().call_timeout));
    let check = validate_kubeconfig_file(
        &args.file,
        factory.as_ref().map(|f| f as &dyn kantaloupe_gateway::backend::BackendFactory),
    )
    .await
    .with_context(|| format!("{} is not usable", args.file.display()))?;
    print!("{}", format_kubeconfig_check(&check));
    Ok(())
}
