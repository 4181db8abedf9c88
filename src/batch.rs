//! Sequential multi-URL download orchestration.
//!
//! One worker owns one task: it walks the URL list in order, records every
//! per-item outcome in the registry, appends successes to the history, and
//! finishes by zipping whatever downloaded. Item failures never abort the
//! rest of the batch, and a failed ZIP still leaves the task completed.

use std::sync::Arc;

use chrono::Utc;

use crate::{
    archive::build_zip,
    history::{HistoryEntry, HistoryStore, now_millis},
    provider::{MediaFormat, MediaProvider},
    sanitize::truncate,
    store::DownloadStore,
    tasks::{DownloadResult, TaskRegistry, TaskStatus},
};

/// Shared collaborators a batch worker needs.
pub struct BatchContext {
    pub registry: Arc<TaskRegistry>,
    pub history: Arc<HistoryStore>,
    pub store: DownloadStore,
}

/// Inputs describing one batch.
pub struct BatchRequest {
    pub urls: Vec<String>,
    pub format: MediaFormat,
    pub quality: String,
    pub task_id: String,
    pub label: String,
    pub is_playlist: bool,
}

/// Runs a batch to completion on the calling thread. The caller must already
/// have registered the task as pending so status polling works while the
/// batch waits for a worker slot.
pub fn run_batch(provider: &dyn MediaProvider, ctx: &BatchContext, request: &BatchRequest) {
    let total = request.urls.len();
    let task_id = request.task_id.as_str();

    ctx.registry.update(task_id, |state| {
        state.status = TaskStatus::Downloading;
    });

    let settings = ctx.history.load_settings();
    if settings.auto_cleanup_enabled {
        match ctx.store.cleanup_old_files(settings.cleanup_days) {
            Ok(deleted) if !deleted.is_empty() => {
                println!("[{}] auto-cleanup removed {} file(s)", task_id, deleted.len());
            }
            Ok(_) => {}
            Err(err) => eprintln!("[{}] auto-cleanup failed: {:#}", task_id, err),
        }
    }

    let mut downloaded_files: Vec<String> = Vec::new();

    for (index, raw_url) in request.urls.iter().enumerate() {
        let url = raw_url.trim();
        if url.is_empty() {
            ctx.registry.update(task_id, |state| state.completed = index + 1);
            continue;
        }

        ctx.registry.update(task_id, |state| {
            state.current_title = format!("Downloading {}/{}", index + 1, total);
            state.current_speed.clear();
        });

        match provider.download(url, request.format, &request.quality) {
            Ok(done) => {
                if ctx.store.root().join(&done.filename).is_file() {
                    downloaded_files.push(done.filename.clone());
                }
                record_history(ctx, request, &done.title, &done.filename, url);
                ctx.registry.update(task_id, |state| {
                    state.current_title = done.title.clone();
                    state.results.push(DownloadResult::success(
                        done.title.clone(),
                        done.filename.clone(),
                        url.to_string(),
                    ));
                });
            }
            Err(err) => {
                let message = truncate(&format!("{:#}", err), 100);
                eprintln!("[{}] item {} failed: {}", task_id, index + 1, message);
                ctx.registry.update(task_id, |state| {
                    state
                        .results
                        .push(DownloadResult::failure(message.clone(), url.to_string()));
                });
            }
        }

        ctx.registry.update(task_id, |state| {
            state.completed = index + 1;
            state.current_progress = format!("{}%", (index + 1) * 100 / total.max(1));
        });
    }

    let zip_file = if downloaded_files.is_empty() {
        None
    } else {
        ctx.registry.update(task_id, |state| {
            state.current_title = "Creating ZIP...".to_string();
        });
        match build_zip(&ctx.store, &downloaded_files, &request.label, now_millis()) {
            Ok(name) => Some(name),
            Err(err) => {
                eprintln!("[{}] zip creation failed: {:#}", task_id, err);
                None
            }
        }
    };

    ctx.registry.update(task_id, |state| {
        state.status = TaskStatus::Completed;
        state.zip_file = zip_file.clone();
        state.current_title = "Done".to_string();
    });
    println!("[{}] batch finished ({} url(s))", task_id, total);
}

fn record_history(ctx: &BatchContext, request: &BatchRequest, title: &str, filename: &str, url: &str) {
    let entry = HistoryEntry {
        id: now_millis(),
        title: title.to_string(),
        filename: filename.to_string(),
        format: request.format.extension().to_string(),
        url: url.to_string(),
        date: Utc::now().to_rfc3339(),
        is_playlist: request.is_playlist,
        playlist_name: request
            .is_playlist
            .then(|| request.label.clone()),
    };
    if let Err(err) = ctx.history.add_to_history(entry) {
        eprintln!("[{}] history write failed: {:#}", request.task_id, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        provider::{Downloaded, MediaInfo, SearchResult},
        sanitize::sanitize_filename,
        tasks::TaskState,
    };
    use anyhow::{Result, bail};
    use std::fs;
    use tempfile::TempDir;

    /// Scripted provider: URLs containing "fail" error out, everything else
    /// writes a file named after the URL tail into the store.
    struct ScriptedProvider {
        root: std::path::PathBuf,
    }

    impl MediaProvider for ScriptedProvider {
        fn fetch_info(&self, _url: &str) -> Result<MediaInfo> {
            bail!("not used in batch tests")
        }

        fn download(&self, url: &str, format: MediaFormat, _quality: &str) -> Result<Downloaded> {
            if url.contains("fail") {
                bail!("simulated provider failure for {url}");
            }
            let tail = url.rsplit('/').next().unwrap_or("video");
            let title = format!("Title {tail}");
            let filename = format!("{}.{}", sanitize_filename(&title), format.extension());
            fs::write(self.root.join(&filename), b"media")?;
            Ok(Downloaded { title, filename })
        }

        fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<SearchResult>> {
            bail!("not used in batch tests")
        }
    }

    fn context(dir: &TempDir) -> BatchContext {
        let store = DownloadStore::new(dir.path());
        store.ensure().unwrap();
        BatchContext {
            registry: Arc::new(TaskRegistry::new()),
            history: Arc::new(HistoryStore::new(dir.path())),
            store,
        }
    }

    fn request(urls: &[&str]) -> BatchRequest {
        BatchRequest {
            urls: urls.iter().map(|u| u.to_string()).collect(),
            format: MediaFormat::Mp3,
            quality: "192".into(),
            task_id: "task_test".into(),
            label: "My Batch".into(),
            is_playlist: false,
        }
    }

    #[test]
    fn failed_item_is_recorded_and_batch_continues() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let request = request(&["https://x/a", "https://x/fail", "https://x/c"]);
        ctx.registry
            .put(&request.task_id, TaskState::pending(request.urls.len()));

        let provider = ScriptedProvider {
            root: dir.path().to_path_buf(),
        };
        run_batch(&provider, &ctx, &request);

        let state = ctx.registry.get("task_test").unwrap();
        assert_eq!(state.status, TaskStatus::Completed);
        assert_eq!(state.completed, 3);
        assert_eq!(state.results.len(), 3);
        let failures: Vec<_> = state.results.iter().filter(|r| !r.is_success()).collect();
        assert_eq!(failures.len(), 1);

        // ZIP holds exactly the two successful downloads.
        let zip_name = state.zip_file.expect("zip should exist");
        assert!(zip_name.starts_with("My Batch_"));
        let archive_file = fs::File::open(dir.path().join(&zip_name)).unwrap();
        let archive = zip::ZipArchive::new(archive_file).unwrap();
        assert_eq!(archive.len(), 2);
    }

    #[test]
    fn all_failures_leave_no_zip_but_complete() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let request = request(&["https://x/fail1", "https://x/fail2"]);
        ctx.registry
            .put(&request.task_id, TaskState::pending(request.urls.len()));

        let provider = ScriptedProvider {
            root: dir.path().to_path_buf(),
        };
        run_batch(&provider, &ctx, &request);

        let state = ctx.registry.get("task_test").unwrap();
        assert_eq!(state.status, TaskStatus::Completed);
        assert!(state.zip_file.is_none());
        assert!(state.results.iter().all(|r| !r.is_success()));
    }

    #[test]
    fn successes_land_in_history_newest_first() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let mut req = request(&["https://x/a", "https://x/b"]);
        req.is_playlist = true;
        ctx.registry
            .put(&req.task_id, TaskState::pending(req.urls.len()));

        let provider = ScriptedProvider {
            root: dir.path().to_path_buf(),
        };
        run_batch(&provider, &ctx, &req);

        let history = ctx.history.load_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].title, "Title b");
        assert!(history[0].is_playlist);
        assert_eq!(history[0].playlist_name.as_deref(), Some("My Batch"));
    }

    #[test]
    fn error_messages_are_truncated_to_100_chars() {
        struct LongError;
        impl MediaProvider for LongError {
            fn fetch_info(&self, _url: &str) -> Result<MediaInfo> {
                bail!("unused")
            }
            fn download(
                &self,
                _url: &str,
                _format: MediaFormat,
                _quality: &str,
            ) -> Result<Downloaded> {
                bail!("{}", "e".repeat(500))
            }
            fn search(&self, _q: &str, _m: usize) -> Result<Vec<SearchResult>> {
                bail!("unused")
            }
        }

        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let request = request(&["https://x/a"]);
        ctx.registry.put(&request.task_id, TaskState::pending(1));
        run_batch(&LongError, &ctx, &request);

        let state = ctx.registry.get("task_test").unwrap();
        match &state.results[0] {
            DownloadResult::Failure { error, .. } => {
                assert_eq!(error.chars().count(), 100);
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn blank_urls_are_skipped_but_counted() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let request = request(&["https://x/a", "   ", "https://x/b"]);
        ctx.registry.put(&request.task_id, TaskState::pending(3));

        let provider = ScriptedProvider {
            root: dir.path().to_path_buf(),
        };
        run_batch(&provider, &ctx, &request);

        let state = ctx.registry.get("task_test").unwrap();
        assert_eq!(state.completed, 3);
        assert_eq!(state.results.len(), 2);
    }
}
