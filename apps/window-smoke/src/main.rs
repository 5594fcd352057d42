//! Drives one channel session against the in-memory backend and prints every
//! update as a JSON line on stdout.

mod config;
mod logging;

use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tokio::{sync::broadcast::error::RecvError, time::timeout};
use tracing::{info, warn};
use window_core::{
    FetchStatus, PushEvent, SessionChannelError, SessionCommand, SessionUpdate, UpdateStream,
    WindowSnapshot,
};
use window_runtime::{
    HeadlessViewport, InMemoryBackend, RuntimeConfig, SessionHandle, spawn_session,
};

use crate::config::{ConfigError, SmokeConfig};

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
enum SmokeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Channel(#[from] SessionChannelError),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("update stream closed")]
    StreamClosed,
    #[error("failed to encode update: {0}")]
    Encode(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() {
    logging::init();

    if let Err(err) = run().await {
        eprintln!("window-smoke failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), SmokeError> {
    let config = SmokeConfig::from_env()?;
    info!(
        channel_id = %config.channel_id,
        seed = config.seed_messages,
        capacity = ?config.window.capacity,
        "starting smoke run"
    );

    let backend = Arc::new(InMemoryBackend::new());
    backend
        .seed(&config.channel_id, config.seed_messages)
        .await;

    let handle = spawn_session(
        Arc::clone(&backend),
        Arc::new(HeadlessViewport),
        RuntimeConfig {
            window: config.window.clone(),
            sender_id: Some("me".to_owned()),
            ..RuntimeConfig::default()
        },
    );
    let mut updates = handle.subscribe();
    let channel_id = config.channel_id.clone();

    let opened = step(
        &handle,
        &mut updates,
        SessionCommand::Open {
            channel_id: channel_id.clone(),
        },
        "latest page",
        |s| s.fetch_status.latest != FetchStatus::Loading && s.channel_id.is_some(),
    )
    .await?;

    if opened.has_older {
        step(
            &handle,
            &mut updates,
            SessionCommand::LoadOlder,
            "older page",
            |s| matches!(s.fetch_status.previous, FetchStatus::Success | FetchStatus::Fail),
        )
        .await?;
    }

    step(
        &handle,
        &mut updates,
        SessionCommand::BottomVisibility {
            intersection_ratio: 0.0,
        },
        "scroll lock",
        |s| s.scroll_locked,
    )
    .await?;

    let message = backend
        .post(&channel_id, "alice", "new message while scrolled away")
        .await;
    step(
        &handle,
        &mut updates,
        SessionCommand::Push(PushEvent::MessageReceived {
            channel_id: channel_id.clone(),
            message,
        }),
        "buffered push",
        |s| s.overflow_len > 0,
    )
    .await?;

    step(
        &handle,
        &mut updates,
        SessionCommand::JumpToLatest,
        "jump to latest",
        |s| !s.scroll_locked && s.overflow_len == 0,
    )
    .await?;

    handle
        .send(SessionCommand::SendText {
            body: "smoke check".to_owned(),
        })
        .await?;
    wait_for(&mut updates, "send ack", |update| {
        matches!(update, SessionUpdate::SendAck(_))
    })
    .await?;

    step(
        &handle,
        &mut updates,
        SessionCommand::Close,
        "close",
        |s| s.channel_id.is_none(),
    )
    .await?;

    info!("smoke run finished");
    Ok(())
}

async fn step(
    handle: &SessionHandle,
    updates: &mut UpdateStream,
    command: SessionCommand,
    label: &'static str,
    done: impl Fn(&WindowSnapshot) -> bool,
) -> Result<WindowSnapshot, SmokeError> {
    info!(step = label, "sending command");
    handle.send(command).await?;
    let update = wait_for(updates, label, |update| match update {
        SessionUpdate::Snapshot(snapshot) => done(snapshot),
        _ => false,
    })
    .await?;
    match update {
        SessionUpdate::Snapshot(snapshot) => Ok(snapshot),
        _ => Err(SmokeError::StreamClosed),
    }
}

/// Print updates until one satisfies `done`.
async fn wait_for(
    updates: &mut UpdateStream,
    label: &'static str,
    done: impl Fn(&SessionUpdate) -> bool,
) -> Result<SessionUpdate, SmokeError> {
    loop {
        let update = match timeout(STEP_TIMEOUT, updates.recv()).await {
            Err(_) => return Err(SmokeError::Timeout(label)),
            Ok(Err(RecvError::Closed)) => return Err(SmokeError::StreamClosed),
            Ok(Err(RecvError::Lagged(skipped))) => {
                warn!(skipped, "update stream lagged");
                continue;
            }
            Ok(Ok(update)) => update,
        };

        println!("{}", serde_json::to_string(&update)?);
        if done(&update) {
            return Ok(update);
        }
    }
}
