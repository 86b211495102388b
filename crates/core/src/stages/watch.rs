//! Directory watching on top of `notify`.

use std::path::Path;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::warn;

/// Watches `dir` and calls `on_event` for every change.
///
/// The returned watcher must be kept alive for events to keep flowing.
pub fn watch_dir<F>(dir: &Path, recursive: bool, on_event: F) -> notify::Result<RecommendedWatcher>
where
    F: Fn(Event) + Send + 'static,
{
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => on_event(event),
        Err(e) => warn!("Filesystem watch error: {}", e),
    })?;

    let mode = if recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };
    watcher.watch(dir, mode)?;

    Ok(watcher)
}
