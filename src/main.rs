use anyhow::Result;
use certstream_server::api::{ExampleStore, WebServer};
use certstream_server::broadcast::{kafka, Dispatcher};
use certstream_server::checkpoint::{CheckpointStore, FLUSH_INTERVAL};
use certstream_server::ct_logs::{watcher, LogCounts, Watcher};
use certstream_server::{Args, Config};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.version {
        println!("certstream-server v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Initialize logging - respect RUST_LOG environment variable
    let log_level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse::<Level>().ok())
        .unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");

    info!("Starting certstream-server v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load(&args.config)?;
    let index_path = PathBuf::from(&config.general.recovery.ct_index_file);

    if args.create_index_file {
        let store = CheckpointStore::new();
        watcher::create_index_file(&config, &store, &index_path).await?;
        return Ok(());
    }

    // Process-wide state, created once at startup
    let counts = Arc::new(LogCounts::new());
    let checkpoints = Arc::new(if config.general.recovery.enabled {
        CheckpointStore::load(&index_path)?
    } else {
        CheckpointStore::new()
    });

    let dispatcher = Dispatcher::new();
    let example = ExampleStore::new();

    let (tx, rx) = mpsc::channel(config.general.buffer_sizes.dispatcher);
    let dispatcher_task = tokio::spawn(dispatcher.clone().run(
        rx,
        example.clone(),
        counts.clone(),
        checkpoints.clone(),
    ));

    // Downstream message-bus producers
    for processor in &config.stream_processing {
        if !processor.enabled {
            continue;
        }
        info!("Initializing stream processor: {}", processor.name);
        kafka::spawn(&dispatcher, processor, config.general.buffer_sizes.websocket)?;
    }

    let server = WebServer::new(
        config.clone(),
        dispatcher.clone(),
        example.clone(),
        counts.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!("Webserver failed: {}", e);
            std::process::exit(1);
        }
    });

    let cancel = CancellationToken::new();

    if config.general.recovery.enabled {
        let store = checkpoints.clone();
        let path = index_path.clone();
        let flush_cancel = cancel.clone();
        tokio::spawn(async move {
            store
                .flush_periodically(&path, FLUSH_INTERVAL, flush_cancel)
                .await;
        });
    }

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal");
        signal_cancel.cancel();
    });

    let ct_watcher = Arc::new(Watcher::new(
        config,
        tx,
        checkpoints.clone(),
        counts.clone(),
    )?);
    ct_watcher.run(cancel).await;

    // All pollers have exited and their senders are gone; the dispatcher
    // drains the channel and stops.
    let _ = dispatcher_task.await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
