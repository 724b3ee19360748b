use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
use server_registry::{CoordinationStore, RegistrationClient, ZkStore};
use tokio::{runtime::Builder, signal, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

mod config;

use config::{
    cli::{self, Command, Parser},
    trace,
};

type Client<S = ZkStore> = Arc<RegistrationClient<S>>;

fn main() -> Result<()> {
    let dotenv = dotenv::dotenv();
    // parses from cli or environment var
    let config = cli::Config::parse();
    let trace_config = trace::Config::parse(&config.registrar_log, &config.log_format)?;
    debug!(?config, ?trace_config);
    if let Err(err) = dotenv {
        debug!(?err, ".env file not loaded");
    }

    let mut builder = Builder::new_multi_thread();
    builder.thread_name(&config.thread_name).enable_all();
    if let Some(num) = config.threads {
        builder.worker_threads(num);
    }
    let rt = builder.build()?;

    rt.block_on(async move {
        match tokio::spawn(async move { start(config).await }).await {
            Err(err) => {
                error!(?err, "registrar task failed");
                Err(anyhow!(err))
            }
            Ok(Err(err)) => {
                error!(?err, "exited with error");
                Err(err)
            }
            Ok(Ok(())) => {
                debug!("exiting...");
                Ok(())
            }
        }
    })
}

async fn start(config: cli::Config) -> Result<()> {
    let registry_cfg = config.registry_config()?;
    info!(
        connect_string = %registry_cfg.connect_string,
        root = %registry_cfg.root_path,
        session_timeout = ?registry_cfg.session_timeout,
        "using registry"
    );

    let client = Arc::new(
        RegistrationClient::connect(&registry_cfg)
            .await
            .context("failed to connect to zookeeper")?,
    );

    match config.command {
        Command::Announce {
            info,
            check_interval_secs,
        } => announce(client, info, check_interval_secs.map(Duration::from_secs)).await,
        Command::List => list(client).await,
    }
}

/// Register, then hold the entry until ctrl-c.
async fn announce(client: Client, info: String, check_interval: Option<Duration>) -> Result<()> {
    let outcome = client
        .register(info.as_bytes())
        .await
        .context("failed to register server")?;
    info!(path = outcome.path(), "registered");

    let token = CancellationToken::new();
    let refresh = check_interval
        .map(|interval| spawn_refresh_task(Arc::clone(&client), info, interval, token.clone()));

    let shutdown = shutdown_signal(token).await;
    if let Some(task) = refresh {
        if let Err(err) = task.await {
            error!(?err, "refresh task panicked");
        }
    }

    info!("shutting down, removing registration");
    client
        .close()
        .await
        .context("failed to remove registration")?;
    shutdown
}

async fn list(client: Client) -> Result<()> {
    let servers = client.servers().await.context("failed to list servers")?;
    debug!(count = servers.len(), root = client.root(), "listed servers");
    for server in servers {
        println!("{}\t{}", server.name, String::from_utf8_lossy(&server.info));
    }
    client
        .close_session()
        .await
        .context("failed to close zookeeper session")?;
    Ok(())
}

/// Re-announce whenever our entry is found missing.
fn spawn_refresh_task<S: CoordinationStore>(
    client: Client<S>,
    info: String,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // first tick completes immediately, we just registered
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("refresh task stopping");
                    return;
                }
                _ = ticker.tick() => {
                    match client.is_registered().await {
                        Ok(true) => debug!("registration still present"),
                        Ok(false) => {
                            warn!("registration missing, announcing again");
                            match client.update(info.as_bytes()).await {
                                Ok(path) => info!(%path, "registered again"),
                                Err(err) => warn!(?err, "failed to re-register"),
                            }
                        }
                        Err(err) => warn!(?err, "failed to check registration"),
                    }
                }
            }
        }
    })
}

async fn shutdown_signal(token: CancellationToken) -> Result<()> {
    let ret = signal::ctrl_c().await.map_err(|err| anyhow!(err));
    token.cancel();
    ret
}
