//! Share subcommands.
//!
//! User-facing output uses writeln! to stdout (this is a CLI binary, not debug output).

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use manylla_core::ChildProfile;
use manylla_core::time::unix_millis;
use manylla_sync::share::open_share;
use manylla_sync::{ShareLink, ShareLinkBuilder, ShareOptions};
use serde_json::Value;

use crate::cli::ShareArgs;
use crate::context::{Context, read_snapshot, write_json};

pub async fn share(ctx: &Context, args: ShareArgs) -> anyhow::Result<()> {
    let mut out = io::stdout();
    let snapshot = read_snapshot(&args.snapshot)?;
    let profile = pick_profile(&snapshot.profiles, args.profile.as_deref())?;

    let builder = ShareLinkBuilder::from_config(Arc::clone(&ctx.remote), &ctx.config);
    let options = ShareOptions {
        categories: args.categories,
        include_photo: args.include_photo,
        expiration_days: args
            .days
            .unwrap_or(ctx.config.share.default_expiration_days),
        recipient: args.recipient,
    };
    let link = builder.build(profile, &options).await?;

    writeln!(out, "{}", link.url)?;
    writeln!(out, "\n{}", link.message(profile.display_name()))?;
    Ok(())
}

pub fn open(url: &str, data: &Path, out: &mut impl Write) -> anyhow::Result<()> {
    let (_, key) = ShareLink::parse_url(url)?;
    let raw = std::fs::read_to_string(data)
        .with_context(|| format!("Failed to read {}", data.display()))?;
    let envelope = open_share(&extract_payload(&raw), &key)?;
    if envelope.is_expired(unix_millis()) {
        anyhow::bail!("This share link has expired");
    }
    write_json(&envelope.profile, None, out)
}

fn pick_profile<'a>(
    profiles: &'a [ChildProfile],
    id: Option<&str>,
) -> anyhow::Result<&'a ChildProfile> {
    match id {
        Some(id) => profiles
            .iter()
            .find(|p| p.id == id)
            .with_context(|| format!("No profile with id {id}")),
        None => profiles.first().context("Snapshot has no profiles"),
    }
}

/// The ciphertext, given either bare or wrapped in the server's
/// `{"encrypted_data": ...}` response.
fn extract_payload(raw: &str) -> String {
    serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|v| v.get("encrypted_data")?.as_str().map(str::to_string))
        .unwrap_or_else(|| raw.trim().to_string())
}
