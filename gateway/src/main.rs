//! `ag-gateway` entry point: loads configuration, publishes the map
//! document, starts the reversion daemon, the MS-client uploader, the
//! event-channel dispatcher, and (if configured) the directory monitor,
//! then serves the block/manifest HTTP surface, per spec §2/§5/§6.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use gateway::config::{self, Config};
use gateway::control::{EventChannel, Opcode, FIFO_PREFIX};
use gateway::engine::{Engine, EngineConfig};
use gateway::error::GatewayError;
use gateway::handlers;
use gateway::map_parser;
use gateway::monitor::{DirEvent, DirectoryMonitor};
use gateway::ms_client::{MsClient, MsConfig};

#[derive(Parser, Debug)]
#[command(name = "ag-gateway", about = "Acquisition Gateway metadata-publishing and block-serving engine")]
struct Args {
    /// Path to the process configuration TOML file.
    #[arg(long, default_value = "ag-gateway.toml")]
    config: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "ag-gateway exiting");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

fn run() -> Result<(), GatewayError> {
    let args = Args::parse();
    let config = config::load_config(&args.config);

    let ms_client = MsClient::new(MsConfig {
        ms_url: config.ms_url.clone(),
        gateway_id: config.gateway_id,
        username: config.ms_username.clone(),
        password: config.ms_password.clone(),
        connect_timeout: config.ms_connect_timeout(),
        transfer_timeout: config.ms_transfer_timeout(),
    })?;

    // Fatal per spec §7: "failed volume metadata fetch at startup: the
    // process exits non-zero".
    let volume = ms_client.fetch_startup_volume_metadata(&config.volume_name, &config.volume_secret)?;

    let engine = Engine::new(
        EngineConfig {
            content_url: config.content_url.clone(),
            blocksize: if volume.blocksize > 0 { volume.blocksize } else { config.blocksize },
            gateway_id: config.gateway_id,
            owner_id: volume.owner_id,
            volume_id: volume.volume_id,
            publish_deadline_ms: config.publish_deadline_ms,
            coalesce_delta_ms: config.coalesce_delta_ms,
            mutation_authority: config.mutation_authority.into(),
        },
        ms_client.clone(),
    );

    let map_document = std::fs::read_to_string(&config.map_document_path)
        .map_err(|e| GatewayError::Config(format!("reading map document `{}`: {e}", config.map_document_path.display())))?;
    let map_entries = map_parser::parse(&map_document)
        .map_err(|e| GatewayError::Config(format!("parsing map document: {e}")))?;
    engine.publish_map_entries(map_entries)?;

    engine.reversion.run();
    ms_client.start_uploader();

    let event_channel = EventChannel::open_for_pid(std::process::id())
        .map_err(|e| GatewayError::ThreadStart(format!("event channel: {e}")))?;
    register_control_handlers(&event_channel, Arc::clone(&engine), config.map_document_path.clone());
    event_channel.run();

    if !config.watch_roots.is_empty() {
        spawn_directory_monitor(Arc::clone(&engine), config.clone());
    }

    let runtime = tokio::runtime::Runtime::new().map_err(GatewayError::Io)?;
    let result = runtime.block_on(serve_http(Arc::clone(&engine), &config.bind_addr));

    engine.reversion.stop();
    ms_client.shutdown();
    event_channel.stop();

    result
}

fn register_control_handlers(event_channel: &Arc<EventChannel>, engine: Arc<Engine>, map_document_path: PathBuf) {
    let term_engine = Arc::clone(&engine);
    event_channel.register(
        Opcode::Term,
        Box::new(move || {
            tracing::info!(published = term_engine.published_count(), "TERM received, stopping reversion daemon");
            term_engine.reversion.stop();
        }),
    );

    let rcon_engine = Arc::clone(&engine);
    event_channel.register(
        Opcode::Rcon,
        Box::new(move || reload_map_document(&rcon_engine, &map_document_path)),
    );

    let stat_engine = Arc::clone(&engine);
    event_channel.register(Opcode::Stat, Box::new(move || write_stat_file(&stat_engine)));
}

/// `RCON`: re-reads and re-parses the map document and reconciles the
/// published set against it (spec §6 "reconfigure"). A read or parse
/// failure is logged and leaves the currently published set untouched,
/// matching spec §4.A's atomic-parse guarantee.
fn reload_map_document(engine: &Arc<Engine>, map_document_path: &std::path::Path) {
    let document = match std::fs::read_to_string(map_document_path) {
        Ok(d) => d,
        Err(err) => {
            tracing::warn!(path = %map_document_path.display(), error = %err, "RCON: failed to read map document, keeping current state");
            return;
        }
    };
    let entries = match map_parser::parse(&document) {
        Ok(e) => e,
        Err(err) => {
            tracing::warn!(error = %err, "RCON: failed to parse map document, keeping current state");
            return;
        }
    };
    let count = entries.len();
    match engine.reload_map_entries(entries) {
        Ok(()) => tracing::info!(entries = count, "RCON: map document reloaded"),
        Err(err) => tracing::warn!(error = %err, "RCON: reload failed partway through"),
    }
}

/// `STAT`: dumps a one-line JSON health summary to the response
/// side-channel file `${FIFO_PREFIX}<pid>.stat`, per SPEC_FULL.md §6.
fn write_stat_file(engine: &Arc<Engine>) {
    let path = PathBuf::from(format!("{FIFO_PREFIX}{}.stat", std::process::id()));
    let summary = serde_json::json!({
        "published_count": engine.published_count(),
        "pending_updates": engine.ms_client.pending_len(),
        "last_reversion_tick_ms": engine.reversion.last_tick_ms(),
    });
    match std::fs::write(&path, summary.to_string()) {
        Ok(()) => tracing::info!(path = %path.display(), "STAT: health snapshot written"),
        Err(err) => tracing::warn!(path = %path.display(), error = %err, "STAT: failed to write health snapshot"),
    }
}

fn spawn_directory_monitor(engine: Arc<Engine>, config: Config) {
    std::thread::spawn(move || {
        // One monitor per watched root: `check_modified`'s `cached` map is
        // keyed root-relative, and roots are otherwise independent trees.
        let monitors: Vec<DirectoryMonitor> = config.watch_roots.iter().map(|_| DirectoryMonitor::new()).collect();
        loop {
            for (root, monitor) in config.watch_roots.iter().zip(&monitors) {
                let engine = Arc::clone(&engine);
                // Events carry paths relative to `root`; joined back against
                // it, they become the same absolute fs_path the map
                // document registers a backend under.
                let result = monitor.check_modified(root, |event| match event {
                    DirEvent::New(path) | DirEvent::Modified(path) => {
                        engine.handle_directory_new_or_modified(&root.join(path).to_string_lossy());
                    }
                    DirEvent::Removed(path) => {
                        engine.handle_directory_removed(&root.join(path).to_string_lossy());
                    }
                });
                if let Err(err) = result {
                    tracing::warn!(root = %root.display(), error = %err, "directory monitor walk failed");
                }
            }
            std::thread::sleep(Duration::from_secs(config.monitor_interval_secs.max(1)));
        }
    });
}

async fn serve_http(engine: Arc<Engine>, bind_addr: &str) -> Result<(), GatewayError> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(%bind_addr, "ag-gateway listening");
    axum::serve(listener, handlers::router(engine)).await?;
    Ok(())
}
