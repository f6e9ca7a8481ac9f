pub mod loader;
pub mod state;

use std::collections::VecDeque;

use anyhow::{Context, Result};
use config_model::AlbumSettings;
use tokio::select;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::events::{DisplayCommand, ToDisplay, ToHelper};
use crate::schedule::ScheduledTask;
use loader::ImageLoader;
use state::{DisplayAction, DisplayState, DisplayStateMachine};

/// Channels and collaborators of the display task.
pub struct DisplayPorts {
    pub to_helper: Sender<ToHelper>,
    pub from_helper: Receiver<ToDisplay>,
    pub commands: Receiver<DisplayCommand>,
    /// Latest state, for whatever renders it.
    pub state: watch::Sender<DisplayState>,
}

/// Presentation side of the frame.
///
/// Rules:
/// - Sends `Config` on start and on resume; everything else follows helper messages.
/// - A loaded photo stays for `slide-duration`, then `Next` names it so the helper can
///   drop requests that arrive after the album moved on.
/// - A failed load retries the fallback URL up to `max-retries` times, then asks for the
///   next photo once.
/// - While suspended the slide timer is off and helper messages are dropped.
#[instrument(skip_all, name = "display")]
pub async fn run(
    settings: AlbumSettings,
    ports: DisplayPorts,
    mut loader: ImageLoader,
    cancel: CancellationToken,
) -> Result<()> {
    let DisplayPorts {
        to_helper,
        mut from_helper,
        mut commands,
        state,
    } = ports;
    let mut machine = DisplayStateMachine::new(settings.max_retries);
    let mut advance = ScheduledTask::new("slide-advance");
    let mut suspended = false;

    request_fetch(&settings, &mut machine, &to_helper, &state).await?;

    loop {
        select! {
            _ = cancel.cancelled() => break,

            Some(cmd) = commands.recv() => {
                let suspend = match cmd {
                    DisplayCommand::Suspend => true,
                    DisplayCommand::Resume => false,
                    DisplayCommand::ToggleSuspend => !suspended,
                };
                if suspend == suspended {
                    continue;
                }
                suspended = suspend;
                if suspended {
                    info!("suspended");
                    advance.disarm();
                    send(&to_helper, ToHelper::Suspend).await?;
                } else {
                    info!("resumed");
                    request_fetch(&settings, &mut machine, &to_helper, &state).await?;
                }
            }

            msg = from_helper.recv() => {
                let Some(msg) = msg else {
                    info!("helper side closed; stopping");
                    break;
                };
                if suspended {
                    debug!(?msg, "suspended; dropping helper message");
                    continue;
                }
                let actions = match msg {
                    ToDisplay::ImageReady(descriptor) => {
                        if settings.preload_in_browser {
                            if let Err(err) = loader.preload(&descriptor.source).await {
                                debug!("preload of {} failed: {err:#}", descriptor.source);
                            }
                        }
                        info!(photo = %descriptor.photo_id, title = %descriptor.title, "showing");
                        machine.on_image_ready(descriptor)
                    }
                    ToDisplay::Error(report) => {
                        warn!(kind = ?report.kind, stage = ?report.stage, "{report}");
                        machine.on_error(&report)
                    }
                };
                drive(&settings, &mut machine, &mut loader, &mut advance, &to_helper, actions).await?;
                publish(&state, &machine);
            }

            _ = advance.fired(), if advance.is_armed() && !suspended => {
                if let Some(id) = machine.advance_after() {
                    debug!(photo = id, "slide time elapsed");
                    send(&to_helper, ToHelper::Next(Some(id.to_string()))).await?;
                }
            }
        }
    }

    Ok(())
}

async fn request_fetch(
    settings: &AlbumSettings,
    machine: &mut DisplayStateMachine,
    to_helper: &Sender<ToHelper>,
    state: &watch::Sender<DisplayState>,
) -> Result<()> {
    send(to_helper, ToHelper::Config(Box::new(settings.clone()))).await?;
    machine.on_fetch_requested();
    publish(state, machine);
    Ok(())
}

/// Carries out actions until the machine has nothing more to say.
async fn drive(
    settings: &AlbumSettings,
    machine: &mut DisplayStateMachine,
    loader: &mut ImageLoader,
    advance: &mut ScheduledTask,
    to_helper: &Sender<ToHelper>,
    actions: Vec<DisplayAction>,
) -> Result<()> {
    let mut queue: VecDeque<DisplayAction> = actions.into();
    while let Some(action) = queue.pop_front() {
        match action {
            DisplayAction::Load(source) => {
                let follow_up = match loader.load(&source).await {
                    Ok(image) => {
                        debug!(%source, ?image, "loaded");
                        machine.on_load_success()
                    }
                    Err(err) => {
                        warn!(retry = machine.retry_count(), "load failed: {err:#}");
                        machine.on_load_failure()
                    }
                };
                queue.extend(follow_up);
            }
            DisplayAction::RequestNext(id) => {
                send(to_helper, ToHelper::Next(Some(id))).await?;
            }
            DisplayAction::ArmAdvance => advance.arm(settings.slide_duration),
            DisplayAction::DisarmAdvance => advance.disarm(),
        }
    }
    Ok(())
}

fn publish(state: &watch::Sender<DisplayState>, machine: &DisplayStateMachine) {
    state.send_if_modified(|current| {
        if current == machine.state() {
            false
        } else {
            *current = machine.state().clone();
            true
        }
    });
}

async fn send(to_helper: &Sender<ToHelper>, msg: ToHelper) -> Result<()> {
    to_helper.send(msg).await.context("helper channel closed")
}
