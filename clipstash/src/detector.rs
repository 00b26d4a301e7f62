//! Clipboard change detector
//!
//! Idle until `start`, then polls the reader on a fixed interval from a tokio
//! task. Reader calls run on the blocking pool. Each observed change is filtered, extracted, fingerprinted and sent
//! on the capture channel. `stop` cancels the task and waits for it, which
//! drops the sender and so closes the channel for the consumer.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::{self, JoinError, JoinHandle};
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clipboard::ClipboardReader;
use crate::config::{HashConfig, SettingsProvider};
use crate::models::CapturedContent;

/// Captures buffered between detector and consumer
pub const CAPTURE_CHANNEL_CAPACITY: usize = 64;

pub struct Detector<R: ClipboardReader> {
    settings: Arc<dyn SettingsProvider>,
    hashing: HashConfig,
    /// Present while idle; moved into the polling task while running
    reader: Option<R>,
    /// Yields the reader back on a clean exit
    handle: Option<JoinHandle<Option<R>>>,
    cancel_token: Option<CancellationToken>,
}

impl<R: ClipboardReader> Detector<R> {
    pub fn new(reader: R, settings: Arc<dyn SettingsProvider>, hashing: HashConfig) -> Self {
        Self {
            settings,
            hashing,
            reader: Some(reader),
            handle: None,
            cancel_token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Begin polling. Returns the capture stream, or None if already polling.
    ///
    /// The poll interval is read from settings here and held until `stop`.
    /// Content already on the clipboard at start is not captured.
    pub fn start(&mut self) -> Option<mpsc::Receiver<CapturedContent>> {
        if self.handle.is_some() {
            debug!("Detector already polling, start ignored");
            return None;
        }
        let Some(reader) = self.reader.take() else {
            warn!("Clipboard reader was lost by a failed polling task; cannot start");
            return None;
        };

        let interval = self.settings.poll_interval();
        let (tx, rx) = mpsc::channel(CAPTURE_CHANNEL_CAPACITY);
        let cancel_token = CancellationToken::new();

        let handle = tokio::spawn(poll_loop(
            reader,
            tx,
            Arc::clone(&self.settings),
            self.hashing,
            interval,
            cancel_token.clone(),
        ));

        info!(interval_ms = interval.as_millis() as u64, "Clipboard detector started");
        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Some(rx)
    }

    /// Stop polling and wait for the task to exit. No-op when idle.
    pub async fn stop(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            match handle.await {
                Ok(Some(reader)) => self.reader = Some(reader),
                Ok(None) => warn!("Detector task lost the clipboard reader"),
                Err(e) => warn!(error = %e, "Detector task failed to join"),
            }
        }
    }
}

impl<R: ClipboardReader> Drop for Detector<R> {
    fn drop(&mut self) {
        if let Some(token) = &self.cancel_token {
            token.cancel();
        }
    }
}

async fn poll_loop<R: ClipboardReader>(
    reader: R,
    tx: mpsc::Sender<CapturedContent>,
    settings: Arc<dyn SettingsProvider>,
    hashing: HashConfig,
    interval: Duration,
    cancel_token: CancellationToken,
) -> Option<R> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Platform clipboard calls block, so every read runs on the blocking pool
    let baseline = task::spawn_blocking(move || {
        let mut reader = reader;
        let count = reader.change_count();
        (reader, count)
    })
    .await;
    let (mut reader, mut last_change) = match baseline {
        Ok(state) => state,
        Err(e) => {
            warn!(error = %e, "Clipboard baseline read failed, detector exiting");
            return None;
        }
    };

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let step = sample_blocking(reader, last_change, Arc::clone(&settings), hashing).await;
                let (returned, change, capture) = match step {
                    Ok(step) => step,
                    Err(e) => {
                        warn!(error = %e, "Clipboard sample failed, detector exiting");
                        return None;
                    }
                };
                reader = returned;
                last_change = change;
                let Some(capture) = capture else {
                    continue;
                };
                tokio::select! {
                    sent = tx.send(capture) => {
                        if sent.is_err() {
                            debug!("Capture receiver dropped, detector exiting");
                            break;
                        }
                    }
                    _ = cancel_token.cancelled() => break,
                }
            }
            _ = cancel_token.cancelled() => break,
        }
    }

    info!("Clipboard detector stopped");
    Some(reader)
}

/// Run one `sample` on the blocking pool, handing the reader back afterwards
async fn sample_blocking<R: ClipboardReader>(
    mut reader: R,
    mut last_change: u64,
    settings: Arc<dyn SettingsProvider>,
    hashing: HashConfig,
) -> Result<(R, u64, Option<CapturedContent>), JoinError> {
    task::spawn_blocking(move || {
        let capture = sample(&mut reader, &mut last_change, settings.as_ref(), &hashing);
        (reader, last_change, capture)
    })
    .await
}

/// One poll step: returns a capture if the clipboard changed and the change
/// survives filtering.
fn sample<R: ClipboardReader>(
    reader: &mut R,
    last_change: &mut u64,
    settings: &dyn SettingsProvider,
    hashing: &HashConfig,
) -> Option<CapturedContent> {
    let current = reader.change_count();
    if current == *last_change {
        return None;
    }
    // Record before any filtering so a slow consumer never sees a change twice
    *last_change = current;

    if settings.filter_sensitive() && reader.has_sensitive_markers() {
        debug!("Sensitive clipboard content skipped");
        return None;
    }

    let source = reader.source_app();
    if let Some(bundle_id) = source.bundle_id.as_deref() {
        if settings.ignored_sources().contains(bundle_id) {
            debug!(source = %bundle_id, "Clipboard content from ignored source skipped");
            return None;
        }
    }

    let representations = reader.read();
    if representations.is_empty() {
        debug!("Empty clipboard change skipped");
        return None;
    }

    Some(CapturedContent::new(representations, source, Utc::now(), hashing))
}
