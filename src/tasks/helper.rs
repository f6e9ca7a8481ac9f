use std::future::Future;
use std::pin::Pin;

use anyhow::{Context, Result};
use config_model::AlbumSettings;
use reqwest::Client;
use tokio::select;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::album::{AlbumFetcher, AlbumSnapshot};
use crate::cache::CacheStore;
use crate::error::{ErrorReport, FetchError, ResolveError};
use crate::events::{ImageDescriptor, PhotoRecord, ToDisplay, ToHelper};
use crate::resolver::ImageResolver;
use crate::rotation::{RotationController, SyncTicket};
use crate::schedule::ScheduledTask;
use crate::tokens::AccessTokens;

type SyncFuture = Pin<Box<dyn Future<Output = (SyncTicket, Result<AlbumSnapshot, FetchError>)> + Send>>;
type ResolveFuture = Pin<Box<dyn Future<Output = Resolved> + Send>>;

/// Outcome of resolving one photo, with how many photos in a row failed before it.
struct Resolved {
    photo_id: String,
    failures: usize,
    result: Result<ImageDescriptor, ResolveError>,
}

/// Everything the helper side owns between cycles.
#[derive(Debug)]
pub struct HelperContext {
    pub fetcher: AlbumFetcher,
    pub resolver: ImageResolver,
    pub rotation: RotationController,
}

impl HelperContext {
    pub fn new(client: Client, cache: Option<CacheStore>, seed: Option<u64>) -> Self {
        Self {
            fetcher: AlbumFetcher::new(client.clone()),
            resolver: ImageResolver::new(client, cache),
            rotation: RotationController::new(Default::default(), seed),
        }
    }
}

/// Album sync and rotation service.
///
/// Rules:
/// - `Config` adopts the settings, (re)arms the periodic re-sync and runs a cycle.
/// - At most one sync is in flight; a cycle requested meanwhile runs right after it.
/// - A successful sync replaces the list and tokens, then the first photo is resolved and
///   sent as `ImageReady`. A failed sync leaves both untouched and sends one `Error`.
/// - Resolving runs beside the loop; a newer selection, `Suspend` or shutdown drops it.
/// - A photo that cannot be resolved is skipped. Only when a whole lap fails does one
///   Resolve `Error` go out, naming the photo the rotation stopped on.
/// - `Next` advances only if it names the photo currently selected.
/// - `Suspend` disarms the re-sync and discards whatever sync or resolve is still running.
#[instrument(skip_all, name = "helper")]
pub async fn run(
    mut ctx: HelperContext,
    mut from_display: Receiver<ToHelper>,
    to_display: Sender<ToDisplay>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut settings: Option<AlbumSettings> = None;
    let mut resync = ScheduledTask::new("album-resync");
    let mut in_flight: Option<SyncFuture> = None;
    let mut resolving: Option<ResolveFuture> = None;
    let mut cycle_queued = false;

    loop {
        select! {
            _ = cancel.cancelled() => break,

            msg = from_display.recv() => {
                let Some(msg) = msg else {
                    info!("display side closed; stopping");
                    break;
                };
                match msg {
                    ToHelper::Config(new_settings) => {
                        let new_settings = *new_settings;
                        debug!(album = %new_settings.album_id, "config received");
                        ctx.rotation.set_policy(new_settings.selection);
                        resync.arm(new_settings.update_interval);
                        if in_flight.is_some() {
                            cycle_queued = true;
                        } else {
                            in_flight = Some(start_cycle(&mut ctx, &new_settings));
                        }
                        settings = Some(new_settings);
                    }
                    ToHelper::Next(after) => {
                        if let Some(settings) = settings.as_ref() {
                            advance(&mut ctx, settings, after.as_deref(), &mut resolving, &to_display).await?;
                        } else {
                            debug!("next requested before any config; ignoring");
                        }
                    }
                    ToHelper::Suspend => {
                        info!("suspending album sync");
                        resync.disarm();
                        ctx.rotation.invalidate();
                        resolving = None;
                        cycle_queued = false;
                    }
                }
            }

            _ = resync.fired(), if resync.is_armed() => {
                if let Some(settings) = settings.as_ref() {
                    resync.arm(settings.update_interval);
                    if in_flight.is_some() {
                        debug!("previous sync still running; queueing");
                        cycle_queued = true;
                    } else {
                        in_flight = Some(start_cycle(&mut ctx, settings));
                    }
                }
            }

            (ticket, result) = wait_for(&mut in_flight), if in_flight.is_some() => {
                in_flight = None;
                if let Some(settings) = settings.as_ref() {
                    finish_cycle(&mut ctx, settings, ticket, result, &mut resolving, &to_display).await?;
                    if std::mem::take(&mut cycle_queued) {
                        in_flight = Some(start_cycle(&mut ctx, settings));
                    }
                }
            }

            resolved = wait_for(&mut resolving), if resolving.is_some() => {
                resolving = None;
                if let Some(settings) = settings.as_ref() {
                    finish_resolve(&mut ctx, settings, resolved, &mut resolving, &to_display).await?;
                }
            }
        }
    }

    Ok(())
}

async fn wait_for<T>(slot: &mut Option<Pin<Box<dyn Future<Output = T> + Send>>>) -> T {
    match slot {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

/// Sweeps the cache, then queries the album, under a fresh generation ticket.
fn start_cycle(ctx: &mut HelperContext, settings: &AlbumSettings) -> SyncFuture {
    let ticket = ctx.rotation.begin_sync();
    let request = ctx.fetcher.request(settings);
    let sweep = ctx
        .resolver
        .cache()
        .filter(|_| settings.cache.enabled)
        .cloned()
        .map(|cache| (cache, settings.cache.retention));

    Box::pin(async move {
        if let Some((cache, retention)) = sweep {
            match tokio::task::spawn_blocking(move || cache.sweep(retention)).await {
                Ok(Ok(report)) => debug!(?report, "cache sweep done"),
                Ok(Err(err)) => warn!("cache sweep failed: {err}"),
                Err(err) => warn!("cache sweep task failed: {err}"),
            }
        }
        (ticket, request.send().await)
    })
}

async fn finish_cycle(
    ctx: &mut HelperContext,
    settings: &AlbumSettings,
    ticket: SyncTicket,
    result: Result<AlbumSnapshot, FetchError>,
    resolving: &mut Option<ResolveFuture>,
    to_display: &Sender<ToDisplay>,
) -> Result<()> {
    if !ctx.rotation.is_current(ticket) {
        debug!("sync finished after suspend or supersede; discarding");
        return Ok(());
    }
    match result {
        Ok(snapshot) => {
            let cycle = ctx.fetcher.commit(&snapshot);
            ctx.rotation.apply_sync(ticket, snapshot.photos);
            debug!(cycle, photos = ctx.rotation.photos().len(), "album applied");
            show_current(ctx, settings, resolving, to_display).await
        }
        Err(err) => {
            warn!("album sync failed: {err}");
            send(to_display, ToDisplay::Error(ErrorReport::from(&err))).await
        }
    }
}

async fn advance(
    ctx: &mut HelperContext,
    settings: &AlbumSettings,
    after: Option<&str>,
    resolving: &mut Option<ResolveFuture>,
    to_display: &Sender<ToDisplay>,
) -> Result<()> {
    if !ctx.rotation.is_synced() {
        debug!("next requested before first sync; ignoring");
        return Ok(());
    }
    if let Some(after) = after {
        let current = ctx.rotation.current().ok().map(|photo| photo.id.as_str());
        if current != Some(after) {
            debug!(after, ?current, "stale next request; ignoring");
            return Ok(());
        }
    }
    match ctx.rotation.advance() {
        Ok(_) => show_current(ctx, settings, resolving, to_display).await,
        Err(err) => {
            warn!("{err}");
            send(to_display, ToDisplay::Error(err.into())).await
        }
    }
}

/// Starts resolving the current photo, replacing any resolve still running.
async fn show_current(
    ctx: &HelperContext,
    settings: &AlbumSettings,
    resolving: &mut Option<ResolveFuture>,
    to_display: &Sender<ToDisplay>,
) -> Result<()> {
    match ctx.rotation.current() {
        Ok(photo) => {
            let tokens = ctx.fetcher.tokens().current();
            *resolving = Some(resolve_job(&ctx.resolver, photo, tokens, settings, 0));
            Ok(())
        }
        Err(err) => {
            *resolving = None;
            warn!("{err}");
            send(to_display, ToDisplay::Error(err.into())).await
        }
    }
}

fn resolve_job(
    resolver: &ImageResolver,
    photo: &PhotoRecord,
    tokens: &AccessTokens,
    settings: &AlbumSettings,
    failures: usize,
) -> ResolveFuture {
    let resolver = resolver.clone();
    let photo = photo.clone();
    let tokens = tokens.clone();
    let settings = settings.clone();
    Box::pin(async move {
        let result = resolver.resolve(&photo, &tokens, &settings).await;
        Resolved {
            photo_id: photo.id,
            failures,
            result,
        }
    })
}

async fn finish_resolve(
    ctx: &mut HelperContext,
    settings: &AlbumSettings,
    resolved: Resolved,
    resolving: &mut Option<ResolveFuture>,
    to_display: &Sender<ToDisplay>,
) -> Result<()> {
    let Resolved {
        photo_id,
        failures,
        result,
    } = resolved;
    if !ctx.rotation.current().is_ok_and(|photo| photo.id == photo_id) {
        debug!(photo = %photo_id, "resolve finished for a photo no longer selected; discarding");
        return Ok(());
    }
    let err = match result {
        Ok(descriptor) => {
            info!(photo = %descriptor.photo_id, index = ctx.rotation.current_index(), "image ready");
            return send(to_display, ToDisplay::ImageReady(descriptor)).await;
        }
        Err(err) => err,
    };
    warn!(photo = %photo_id, "could not prepare image: {err}");

    let failures = failures + 1;
    if failures < ctx.rotation.photos().len() {
        if let Ok(next) = ctx.rotation.advance() {
            debug!(skipped = %photo_id, photo = %next.id, "trying next photo");
            let tokens = ctx.fetcher.tokens().current();
            *resolving = Some(resolve_job(&ctx.resolver, next, tokens, settings, failures));
            return Ok(());
        }
    }
    let report = ErrorReport::from(&err).for_photo(photo_id);
    send(to_display, ToDisplay::Error(report)).await
}

async fn send(to_display: &Sender<ToDisplay>, msg: ToDisplay) -> Result<()> {
    to_display
        .send(msg)
        .await
        .context("display channel closed")
}
