use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

use prism_frame::album::AlbumFetcher;
use prism_frame::cache::CacheStore;
use prism_frame::config::Configuration;
use prism_frame::events::{DisplayCommand, ToDisplay, ToHelper};
use prism_frame::resolver::ImageResolver;
use prism_frame::rotation::RotationController;
use prism_frame::tasks::display::loader::ImageLoader;
use prism_frame::tasks::display::state::DisplayState;
use prism_frame::tasks::display::{self, DisplayPorts};
use prism_frame::tasks::helper::{self, HelperContext};

#[derive(Debug, Parser)]
#[command(name = "prism-frame", version, about = "photo frame for a remote album")]
struct Args {
    /// Path to YAML config
    #[arg(value_name = "CONFIG")]
    config: PathBuf,
    /// Sync the album once, print the first N photos of the rotation and exit
    #[arg(long = "album-dry-run", value_name = "COUNT")]
    album_dry_run: Option<usize>,
    /// Deterministic RNG seed for random selection
    #[arg(long = "seed", value_name = "SEED")]
    seed: Option<u64>,
    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(default_filter: &str, verbosity: u8) {
    let fallback = match verbosity {
        0 => default_filter.to_string(),
        1 => "prism_frame=debug,info".to_string(),
        _ => "prism_frame=trace,debug".to_string(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let Args {
        config,
        album_dry_run,
        seed,
        verbose,
    } = Args::parse();

    let cfg = Configuration::from_yaml_file(&config)
        .with_context(|| format!("failed to load configuration from {}", config.display()))?
        .validated()
        .context("invalid configuration values")?;
    init_tracing(&cfg.log_level, verbose);
    tracing::info!(
        config = %config.display(),
        album = %cfg.album.album_id,
        api = %cfg.album.api_base(),
        "configuration loaded"
    );

    let settings = cfg.album;
    let client =
        prism_frame::http_client(settings.request_timeout).context("failed to build HTTP client")?;

    if let Some(count) = album_dry_run {
        return run_album_dry_run(&settings, client, count, seed).await;
    }

    let cache = if settings.cache.enabled {
        match CacheStore::open(&settings.cache.dir, settings.cache.public_mount.as_str()) {
            Ok(store) => Some(store),
            Err(err) => {
                tracing::error!("local cache disabled: {err}");
                None
            }
        }
    } else {
        None
    };

    // Channels (small/bounded)
    let (to_helper_tx, to_helper_rx) = mpsc::channel::<ToHelper>(16); // Display -> Helper
    let (to_display_tx, to_display_rx) = mpsc::channel::<ToDisplay>(16); // Helper -> Display
    let (control_tx, control_rx) = mpsc::channel::<DisplayCommand>(8); // External -> Display
    let (state_tx, state_rx) = watch::channel(DisplayState::Loading);

    let cancel = CancellationToken::new();

    // Ctrl-D/Ctrl-C cancel the pipeline
    if io::stdin().is_terminal() {
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            let mut sink = Vec::new();
            match io::stdin().read_to_end(&mut sink) {
                Ok(_) => tracing::info!("stdin closed; initiating shutdown"),
                Err(err) => tracing::warn!("stdin watcher failed: {err}"),
            }
            cancel.cancel();
        });
    } else {
        tracing::debug!("stdin is not a terminal; skipping shutdown watcher");
    }

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            tracing::info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    #[cfg(unix)]
    {
        let cancel = cancel.clone();
        let control = control_tx.clone();
        tokio::spawn(async move {
            match signal(SignalKind::user_defined1()) {
                Ok(mut sigusr1) => loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        received = sigusr1.recv() => {
                            if received.is_none() {
                                break;
                            }
                            tracing::info!("SIGUSR1 received; toggling suspend");
                            if let Err(err) = control.send(DisplayCommand::ToggleSuspend).await {
                                tracing::warn!("failed to forward suspend toggle: {err}");
                                break;
                            }
                        }
                    }
                },
                Err(err) => tracing::warn!("failed to register SIGUSR1 handler: {err}"),
            }
        });
    }

    let mut tasks = JoinSet::new();

    // Helper: album sync, rotation, resolution
    tasks.spawn({
        let ctx = HelperContext::new(client.clone(), cache, seed);
        let cancel = cancel.clone();
        async move {
            helper::run(ctx, to_helper_rx, to_display_tx, cancel)
                .await
                .context("helper task failed")
        }
    });

    // Display: loading, retries, pacing
    tasks.spawn({
        let settings = settings.clone();
        let ports = DisplayPorts {
            to_helper: to_helper_tx,
            from_helper: to_display_rx,
            commands: control_rx,
            state: state_tx,
        };
        let loader = ImageLoader::new(client.clone());
        let cancel = cancel.clone();
        async move {
            display::run(settings, ports, loader, cancel)
                .await
                .context("display task failed")
        }
    });

    // Presentation: reports what is on screen
    tasks.spawn({
        let cancel = cancel.clone();
        let fade = settings.fade_speed;
        async move {
            present(state_rx, fade, cancel).await;
            Ok(())
        }
    });

    // First task to finish takes the rest down with it
    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("task error: {e:?}"),
            Err(e) => tracing::error!("join error: {e}"),
        }
        cancel.cancel();
    }

    Ok(())
}

async fn present(
    mut state_rx: watch::Receiver<DisplayState>,
    fade: std::time::Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                match &*state_rx.borrow_and_update() {
                    DisplayState::Loading => tracing::info!("loading album"),
                    DisplayState::Displaying(photo) => tracing::info!(
                        photo = %photo.photo_id,
                        title = %photo.title,
                        taken = ?photo.taken_at,
                        source = %photo.source,
                        ?fade,
                        "on screen"
                    ),
                    DisplayState::Error(message) => tracing::warn!("showing error: {message}"),
                }
            }
        }
    }
}

async fn run_album_dry_run(
    settings: &config_model::AlbumSettings,
    client: reqwest::Client,
    count: usize,
    seed: Option<u64>,
) -> Result<()> {
    let mut fetcher = AlbumFetcher::new(client.clone());
    let snapshot = fetcher.sync(settings).await.context("album sync failed")?;

    println!(
        "# album dry run\n# album: {}\n# photos: {} ({} dropped)\n# selection: {:?}\n# seed: {}\n",
        settings.album_id,
        snapshot.photos.len(),
        snapshot.dropped,
        settings.selection,
        seed.map_or_else(|| "(random)".to_string(), |s| s.to_string())
    );

    let mut rotation = RotationController::new(settings.selection, seed);
    let ticket = rotation.begin_sync();
    rotation.apply_sync(ticket, snapshot.photos);
    if rotation.photos().is_empty() {
        println!("(album {} has no displayable photos)", settings.album_id);
        return Ok(());
    }

    // Remote URLs only; a dry run never writes to the cache.
    let resolver = ImageResolver::new(client, None);
    for step in 0..count {
        if step > 0 {
            rotation.advance()?;
        }
        let photo = rotation.current()?;
        let descriptor = resolver
            .resolve(photo, fetcher.tokens().current(), settings)
            .await?;
        println!(
            "{:>4}  {:<20}  {}  {}",
            step + 1,
            descriptor.photo_id,
            descriptor.title,
            descriptor.source
        );
    }

    Ok(())
}
