//! Sync subcommands.
//!
//! User-facing output uses writeln! to stdout (this is a CLI binary, not debug output).

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use dialoguer::Confirm;
use manylla_core::SyncSnapshot;
use manylla_core::time::unix_millis;
use manylla_sync::SyncEvent;
use manylla_sync::invite::format_for_display;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::context::{Context, read_snapshot, write_json};

pub async fn enable(ctx: &Context, snapshot: Option<&Path>) -> anyhow::Result<()> {
    let mut out = io::stdout();
    let session = ctx.session()?;
    session.restore().await?;
    let initial = snapshot
        .map(read_snapshot)
        .transpose()?
        .unwrap_or_else(SyncSnapshot::empty);
    let enabled = session.enable_as_new(&initial).await?;

    writeln!(out, "Sync enabled.")?;
    writeln!(out, "  Recovery phrase: {}", enabled.phrase.as_str())?;
    writeln!(out, "  Sync ID:         {}", enabled.sync_id)?;
    writeln!(
        out,
        "\nWrite the recovery phrase down. It is the only way to join this group from another device."
    )?;
    Ok(())
}

pub async fn join(ctx: &Context, input: &str, path: Option<&Path>) -> anyhow::Result<()> {
    let mut out = io::stdout();
    let session = ctx.session()?;
    session.restore().await?;
    let snapshot = session.enable_by_joining(input).await?;

    writeln!(
        out,
        "Joined sync group {}.",
        session.sync_id().unwrap_or_default()
    )?;
    for profile in &snapshot.profiles {
        writeln!(
            out,
            "  {} ({} entries)",
            profile.display_name(),
            profile.entries.len()
        )?;
    }
    if let Some(path) = path {
        write_json(&snapshot, Some(path), &mut out)?;
        writeln!(out, "Snapshot written to {}", path.display())?;
    }
    Ok(())
}

pub async fn push(ctx: &Context, file: &Path) -> anyhow::Result<()> {
    let snapshot = read_snapshot(file)?;
    let session = ctx.enabled_session().await?;
    session.push(&snapshot).await?;
    writeln!(
        io::stdout(),
        "Pushed {} profile(s).",
        snapshot.profiles.len()
    )?;
    Ok(())
}

pub async fn pull(ctx: &Context, path: Option<&Path>) -> anyhow::Result<()> {
    let mut out = io::stdout();
    let session = ctx.enabled_session().await?;
    match session.pull().await? {
        Some(snapshot) => write_json(&snapshot, path, &mut out)?,
        None => writeln!(out, "Nothing stored for this group yet.")?,
    }
    Ok(())
}

pub async fn status(ctx: &Context) -> anyhow::Result<()> {
    let mut out = io::stdout();
    let session = ctx.session()?;
    let enabled = session.restore().await?;
    let healthy = ctx.remote.check_health().await;

    writeln!(out, "Sync:    {}", session.status())?;
    if enabled {
        writeln!(
            out,
            "Sync ID: {}",
            session.sync_id().unwrap_or_default()
        )?;
    }
    writeln!(out, "Server:  {}", ctx.config.sync.api_url)?;
    writeln!(
        out,
        "Health:  {}",
        if healthy { "healthy" } else { "unreachable" }
    )?;
    writeln!(out, "Data:    {}", ctx.data_dir.display())?;
    Ok(())
}

pub async fn invite(ctx: &Context) -> anyhow::Result<()> {
    let mut out = io::stdout();
    let session = ctx.enabled_session().await?;
    let invite = session.create_invite(unix_millis())?;

    writeln!(out, "Invite code: {}", format_for_display(invite.code.as_str()))?;
    writeln!(out, "Invite link: {}", invite.url)?;
    writeln!(out, "\nValid for 24 hours.")?;
    Ok(())
}

pub async fn watch(
    ctx: &Context,
    interval: Option<u64>,
    path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut out = io::stdout();
    let session = ctx.enabled_session().await?;
    let interval = interval.map_or_else(|| ctx.config.sync.poll_interval(), Duration::from_secs);
    let mut events = session.subscribe_events();
    session.start_polling(interval)?;
    writeln!(
        out,
        "Watching for changes every {}s. Press Ctrl-C to stop.",
        interval.as_secs()
    )?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping watch");
                break;
            }
            event = events.recv() => match event {
                Ok(SyncEvent::Pulled { snapshot, .. }) => {
                    writeln!(out, "Pulled {} profile(s).", snapshot.profiles.len())?;
                    if let Some(path) = &path {
                        write_json(snapshot.as_ref(), Some(path), &mut out)?;
                    }
                }
                Ok(SyncEvent::Failed(kind)) => writeln!(out, "Sync failed: {kind}")?,
                Ok(SyncEvent::Disabled) | Err(RecvError::Closed) => break,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event receiver lagged"),
            }
        }
    }
    session.stop_polling();
    Ok(())
}

pub async fn disable(ctx: &Context, yes: bool) -> anyhow::Result<()> {
    let mut out = io::stdout();
    let session = ctx.session()?;
    if !session.restore().await? {
        writeln!(out, "Sync is not enabled.")?;
        return Ok(());
    }
    if !yes
        && !Confirm::new()
            .with_prompt(
                "Disable sync on this device? You will need the recovery phrase to rejoin.",
            )
            .default(false)
            .interact()?
    {
        writeln!(out, "Cancelled.")?;
        return Ok(());
    }
    session.disable().await?;
    writeln!(out, "Sync disabled.")?;
    Ok(())
}
