//! Security helpers for the tubedrop server binary.

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// Fails fast when the server is started as root. The process shells out to
/// yt-dlp and ffmpeg with client-influenced arguments and writes files named
/// after remote titles, none of which should happen with root privileges.
pub fn ensure_not_root(process: &str) -> Result<()> {
    if Uid::current().is_root() {
        bail!("{process} must not be run as root; use an unprivileged service account");
    }
    Ok(())
}
