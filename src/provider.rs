//! Metadata, download and search provider backed by the `yt-dlp` binary.
//!
//! Everything network-facing is delegated to yt-dlp; this module builds the
//! command lines and parses the JSON it prints. Parsing is kept separate from
//! process invocation so it can be tested against captured payloads.

use std::{
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::store::DownloadStore;

/// Requested output container. Anything that is not `mp3` is treated as mp4,
/// mirroring how requests arrive from the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFormat {
    Mp3,
    Mp4,
}

impl MediaFormat {
    pub fn from_request(value: &str) -> Self {
        if value.eq_ignore_ascii_case("mp3") {
            Self::Mp3
        } else {
            Self::Mp4
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Mp4 => "mp4",
        }
    }
}

/// One entry of an expanded playlist.
#[derive(Debug, Clone, Serialize)]
pub struct PlaylistEntry {
    pub id: String,
    pub title: String,
    pub url: String,
    pub duration: i64,
}

/// What `/api/info` returns: either a single video or a flat playlist.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MediaInfo {
    Video {
        title: String,
        channel: String,
        duration: String,
        thumbnail: String,
    },
    Playlist {
        title: String,
        channel: String,
        count: usize,
        videos: Vec<PlaylistEntry>,
        thumbnail: String,
    },
}

/// A finished single download: the provider reports the real output path, so
/// no directory-scanning heuristic is needed on the happy path.
#[derive(Debug, Clone)]
pub struct Downloaded {
    pub title: String,
    pub filename: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub channel: String,
    pub duration: i64,
    pub thumbnail: String,
    pub url: String,
    pub views: i64,
}

/// Seam between orchestration and the real yt-dlp binary; batch tests swap in
/// a scripted implementation.
pub trait MediaProvider: Send + Sync {
    fn fetch_info(&self, url: &str) -> Result<MediaInfo>;
    fn download(&self, url: &str, format: MediaFormat, quality: &str) -> Result<Downloaded>;
    fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>>;
}

/// Playlist references get expanded before dispatch; everything else is
/// treated as a single video URL.
pub fn looks_like_playlist(url: &str) -> bool {
    url.contains("list=") || url.contains("/playlist")
}

pub struct YtDlp {
    program: String,
    store: DownloadStore,
}

impl YtDlp {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: "yt-dlp".to_string(),
            store: DownloadStore::new(download_dir),
        }
    }

    fn output_template(&self) -> String {
        self.store
            .root()
            .join("%(title)s.%(ext)s")
            .to_string_lossy()
            .into_owned()
    }
}

impl MediaProvider for YtDlp {
    fn fetch_info(&self, url: &str) -> Result<MediaInfo> {
        let output = Command::new(&self.program)
            .arg("--dump-single-json")
            .arg("--flat-playlist")
            .arg("--skip-download")
            .arg("--no-warnings")
            .arg(url)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("fetching metadata for {}", url))?;

        if !output.status.success() {
            bail!(
                "metadata command failed for {}: {}",
                url,
                stderr_excerpt(&output.stderr)
            );
        }

        let raw = String::from_utf8(output.stdout).context("metadata JSON was not UTF-8")?;
        parse_info_json(&raw)
    }

    fn download(&self, url: &str, format: MediaFormat, quality: &str) -> Result<Downloaded> {
        let mut command = Command::new(&self.program);
        for arg in download_args(format, quality) {
            command.arg(arg);
        }
        command
            .arg("--output")
            .arg(self.output_template())
            .arg("--no-warnings")
            .arg("--no-progress")
            .arg("--no-simulate")
            .arg("--print")
            .arg("title")
            .arg("--print")
            .arg("after_move:filepath")
            .arg(url)
            .stdin(Stdio::null());

        let output = command
            .output()
            .with_context(|| format!("downloading {}", url))?;

        if !output.status.success() {
            bail!(
                "download failed for {}: {}",
                url,
                stderr_excerpt(&output.stderr)
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let (title, printed_path) = parse_print_output(&stdout);

        let filename = match printed_path {
            Some(path) if self.store.root().join(&path).is_file() => path,
            // yt-dlp did not report a usable path (old version, odd
            // post-processor chain); fall back to the newest matching file.
            _ => self
                .store
                .newest_file_with_ext(format.extension())?
                .unwrap_or_else(|| {
                    format!(
                        "{}.{}",
                        crate::sanitize::sanitize_filename(&title),
                        format.extension()
                    )
                }),
        };

        Ok(Downloaded { title, filename })
    }

    fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        let output = Command::new(&self.program)
            .arg("--dump-json")
            .arg("--flat-playlist")
            .arg("--no-warnings")
            .arg(format!("ytsearch{}:{}", max_results, query))
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("searching for {:?}", query))?;

        if !output.status.success() {
            bail!(
                "search failed for {:?}: {}",
                query,
                stderr_excerpt(&output.stderr)
            );
        }

        parse_search_lines(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Format selector and post-processing arguments for one download.
pub fn download_args(format: MediaFormat, quality: &str) -> Vec<String> {
    match format {
        MediaFormat::Mp3 => vec![
            "--format".into(),
            "bestaudio/best".into(),
            "--extract-audio".into(),
            "--audio-format".into(),
            "mp3".into(),
            "--audio-quality".into(),
            quality.to_string(),
            "--no-playlist".into(),
        ],
        MediaFormat::Mp4 => vec![
            "--format".into(),
            mp4_format_selector(quality),
            "--merge-output-format".into(),
            "mp4".into(),
            "--no-playlist".into(),
        ],
    }
}

fn mp4_format_selector(quality: &str) -> String {
    if quality == "best" {
        "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best".to_string()
    } else {
        format!(
            "bestvideo[height<={q}][ext=mp4]+bestaudio[ext=m4a]/best[height<={q}]",
            q = quality
        )
    }
}

/// First printed line is the title, last is the post-move filepath. yt-dlp
/// interleaves nothing else because `--no-progress` and `--no-warnings` are
/// set and `--print` implies quiet output.
fn parse_print_output(stdout: &str) -> (String, Option<String>) {
    let lines: Vec<&str> = stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let title = lines.first().map_or_else(
        || "video".to_string(),
        |line| line.to_string(),
    );
    let path = if lines.len() >= 2 {
        Path::new(lines[lines.len() - 1])
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    } else {
        None
    };
    (title, path)
}

/// Raw `--dump-single-json` payload; only what we surface is declared and
/// everything is optional because flat extraction omits a lot.
#[derive(Deserialize)]
struct RawInfo {
    title: Option<String>,
    channel: Option<String>,
    uploader: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    thumbnails: Option<Vec<RawThumbnail>>,
    entries: Option<Vec<Option<RawEntry>>>,
}

#[derive(Deserialize)]
struct RawThumbnail {
    url: Option<String>,
}

#[derive(Deserialize)]
struct RawEntry {
    id: Option<String>,
    title: Option<String>,
    url: Option<String>,
    duration: Option<f64>,
}

#[derive(Deserialize)]
struct RawSearchEntry {
    id: Option<String>,
    title: Option<String>,
    channel: Option<String>,
    uploader: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    thumbnails: Option<Vec<RawThumbnail>>,
    url: Option<String>,
    view_count: Option<i64>,
}

pub fn parse_info_json(raw: &str) -> Result<MediaInfo> {
    let info: RawInfo = serde_json::from_str(raw).context("deserializing metadata JSON")?;

    let title = info.title.unwrap_or_else(|| "Unknown".to_string());
    let channel = info
        .channel
        .or(info.uploader)
        .unwrap_or_else(|| "Unknown".to_string());

    if let Some(entries) = info.entries {
        let videos: Vec<PlaylistEntry> = entries
            .into_iter()
            .flatten()
            .map(|entry| {
                let id = entry.id.unwrap_or_default();
                let url = entry
                    .url
                    .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={id}"));
                PlaylistEntry {
                    title: entry.title.unwrap_or_else(|| "Unknown".to_string()),
                    duration: entry.duration.unwrap_or(0.0) as i64,
                    id,
                    url,
                }
            })
            .collect();
        // Flat playlist dumps list thumbnails largest-last.
        let thumbnail = info
            .thumbnails
            .and_then(|thumbs| thumbs.into_iter().next_back())
            .and_then(|thumb| thumb.url)
            .unwrap_or_default();
        Ok(MediaInfo::Playlist {
            count: videos.len(),
            title,
            channel,
            videos,
            thumbnail,
        })
    } else {
        Ok(MediaInfo::Video {
            title,
            channel,
            duration: format_duration(info.duration.unwrap_or(0.0) as i64),
            thumbnail: info.thumbnail.unwrap_or_default(),
        })
    }
}

pub fn parse_search_lines(stdout: &str) -> Result<Vec<SearchResult>> {
    let mut results = Vec::new();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let entry: RawSearchEntry =
            serde_json::from_str(line).context("deserializing search result line")?;
        let id = entry.id.unwrap_or_default();
        results.push(SearchResult {
            title: entry.title.unwrap_or_else(|| "Unknown".to_string()),
            channel: entry
                .channel
                .or(entry.uploader)
                .unwrap_or_else(|| "Unknown".to_string()),
            duration: entry.duration.unwrap_or(0.0) as i64,
            thumbnail: entry
                .thumbnail
                .or_else(|| {
                    entry
                        .thumbnails
                        .and_then(|thumbs| thumbs.into_iter().next_back())
                        .and_then(|thumb| thumb.url)
                })
                .unwrap_or_default(),
            url: entry
                .url
                .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={id}")),
            views: entry.view_count.unwrap_or(0),
            id,
        });
    }
    Ok(results)
}

/// `m:ss`, with minutes running past 59 for long videos.
pub fn format_duration(seconds: i64) -> String {
    let (minutes, secs) = (seconds / 60, seconds % 60);
    format!("{minutes}:{secs:02}")
}

fn stderr_excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    text.lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("no error output")
        .trim()
        .to_string()
}

/// Verifies the provider binaries exist before the server starts serving, so
/// misconfiguration fails loudly instead of at the first request.
pub fn ensure_program_available(name: &str) -> Result<()> {
    let status = Command::new(name)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => bail!("{name} --version exited with {status}"),
        Err(err) => bail!("{name} is not available on PATH: {err}"),
    }
}
