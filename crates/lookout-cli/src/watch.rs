use lookout_core::store::summarize_diagnostics;
use lookout_core::{EncodingStore, FaceEmbedder, GalleryHandle, GalleryManifest, StopSignal, StoreError};
use std::sync::Arc;
use std::time::Duration;

/// Rebuilds the gallery when the reference directory changes and swaps the
/// result into a running session.
pub struct GalleryWatcher<E> {
    store: EncodingStore,
    embedder: E,
    current: GalleryManifest,
    handle: Arc<GalleryHandle>,
}

impl<E: FaceEmbedder> GalleryWatcher<E> {
    pub fn new(store: EncodingStore, embedder: E, current: GalleryManifest, handle: Arc<GalleryHandle>) -> Self {
        Self {
            store,
            embedder,
            current,
            handle,
        }
    }

    /// Rebuild if stale. Returns whether a new gallery was published.
    pub fn check(&mut self) -> Result<bool, StoreError> {
        let Some(report) = self.store.refresh(&self.current, &mut self.embedder)? else {
            return Ok(false);
        };

        for diag in &report.diagnostics {
            tracing::warn!("{diag}");
        }
        tracing::info!(
            labels = report.manifest.gallery.label_count(),
            encodings = report.manifest.gallery.len(),
            skipped = ?summarize_diagnostics(&report.diagnostics),
            "reference directory changed; gallery swapped"
        );
        self.handle.replace(report.manifest.gallery.clone());
        self.current = report.manifest;
        Ok(true)
    }
}

impl<E: FaceEmbedder + Send + 'static> GalleryWatcher<E> {
    /// Check every `interval` until `stop` is raised. Rebuilds run on the
    /// blocking pool; a failed rebuild keeps the current gallery.
    pub async fn run(mut self, interval: Duration, stop: StopSignal) {
        tracing::info!(interval_secs = interval.as_secs(), "watching reference directory");
        loop {
            tokio::time::sleep(interval).await;
            if stop.is_stopped() {
                break;
            }
            let joined = tokio::task::spawn_blocking(move || {
                let outcome = self.check();
                (self, outcome)
            })
            .await;
            match joined {
                Ok((watcher, outcome)) => {
                    self = watcher;
                    if let Err(e) = outcome {
                        tracing::warn!(error = %e, "gallery rebuild failed; keeping current gallery");
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "gallery watcher task failed");
                    break;
                }
            }
        }
    }
}
