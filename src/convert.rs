//! Post-download conversions via the `ffmpeg` binary.

use std::process::{Command, Stdio};

use anyhow::{Context, Result, bail};

use crate::{sanitize::truncate, store::DownloadStore};

/// Conversion targets the API accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertTarget {
    Mp3,
    Wav,
    Mp4,
}

impl ConvertTarget {
    pub fn from_request(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "mp3" => Some(Self::Mp3),
            "wav" => Some(Self::Wav),
            "mp4" => Some(Self::Mp4),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
            Self::Mp4 => "mp4",
        }
    }

    /// Codec arguments between the input and output paths. mp3 and wav strip
    /// the video stream; mp4 remuxes without re-encoding.
    fn codec_args(self) -> &'static [&'static str] {
        match self {
            Self::Mp3 => &["-vn", "-b:a", "192k"],
            Self::Wav => &["-vn"],
            Self::Mp4 => &["-c", "copy"],
        }
    }
}

/// Name for the converted file; `_converted` avoids clobbering the source
/// when it already carries the target extension.
pub fn output_name(filename: &str, target: ConvertTarget) -> String {
    let stem = filename
        .rsplit_once('.')
        .map_or(filename, |(stem, _)| stem);
    let candidate = format!("{stem}.{}", target.extension());
    if candidate == filename {
        format!("{stem}_converted.{}", target.extension())
    } else {
        candidate
    }
}

/// Converts a stored file, returning the new filename. ffmpeg failures carry
/// a 200-character stderr excerpt.
pub fn convert_file(store: &DownloadStore, filename: &str, target: ConvertTarget) -> Result<String> {
    let input = store.resolve(filename)?;
    if !input.is_file() {
        bail!("file not found: {filename}");
    }
    let out_name = output_name(filename, target);
    let output_path = store.root().join(&out_name);

    let mut command = Command::new("ffmpeg");
    command.arg("-y").arg("-i").arg(&input);
    for arg in target.codec_args() {
        command.arg(arg);
    }
    let result = command
        .arg(&output_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .output()
        .context("invoking ffmpeg")?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        bail!("conversion failed: {}", truncate(stderr.trim(), 200));
    }

    Ok(out_name)
}
