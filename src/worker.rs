//! Worker Runtime: the in-context half of the job protocol.
//!
//! Holds at most one active extraction strategy. `start` replaces a running
//! strategy after a cooperative stop; `cancel` and channel close both stop
//! it. Results and failures are reported back over the channel; the active
//! slot is cleared on every exit path so a later `start` is accepted cleanly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::browser::WorkerChannel;
use crate::config::ScraperConfig;
use crate::domain::Site;
use crate::page::PageDriver;
use crate::protocol::{ControllerMessage, WorkerMessage};
use crate::scrapers::{self, ProgressSink};

/// Forwards strategy progress over the job channel.
struct ChannelProgress {
    tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl ProgressSink for ChannelProgress {
    fn report(&self, count: usize) {
        let _ = self.tx.send(WorkerMessage::Progress { count });
    }
}

/// Stop handle for the run in the active slot.
///
/// A run can be stopped for two reasons: the controller asked for a cancel
/// (or closed the channel), or a newer `start` replaced it. Only the first
/// earns a `cancel` acknowledgment; a replaced run reports whatever it
/// collected and stays silent otherwise.
struct ActiveRun {
    stop: CancellationToken,
    cancel_requested: Arc<AtomicBool>,
}

impl ActiveRun {
    fn new() -> Self {
        Self {
            stop: CancellationToken::new(),
            cancel_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    fn cancel(self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
        self.stop.cancel();
    }

    fn replace(self) {
        self.stop.cancel();
    }
}

pub struct WorkerRuntime {
    page: Arc<dyn PageDriver>,
    config: ScraperConfig,
}

impl WorkerRuntime {
    pub fn new(page: Arc<dyn PageDriver>, config: ScraperConfig) -> Self {
        Self { page, config }
    }

    /// Serve one job channel until the controller closes it.
    pub async fn run(self, mut channel: WorkerChannel) {
        let mut active: Option<ActiveRun> = None;

        loop {
            match channel.recv().await {
                Some(ControllerMessage::Start {
                    query,
                    site,
                    target_count,
                }) => {
                    if let Some(run) = active.take() {
                        debug!("replacing active extraction run");
                        run.replace();
                    }
                    let run = ActiveRun::new();
                    let stop = run.stop.clone();
                    let cancel_requested = Arc::clone(&run.cancel_requested);
                    active = Some(run);

                    let page = Arc::clone(&self.page);
                    let config = self.config.clone();
                    let tx = channel.sender();
                    tokio::spawn(async move {
                        run_strategy(
                            site,
                            query,
                            target_count,
                            page,
                            config,
                            tx,
                            stop,
                            cancel_requested,
                        )
                        .await;
                    });
                }
                Some(ControllerMessage::Cancel) => {
                    if let Some(run) = active.take() {
                        run.cancel();
                    }
                }
                // controller side closed; stop whatever is running
                None => {
                    if let Some(run) = active.take() {
                        run.cancel();
                    }
                    break;
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_strategy(
    site: Site,
    query: String,
    target_count: usize,
    page: Arc<dyn PageDriver>,
    config: ScraperConfig,
    tx: mpsc::UnboundedSender<WorkerMessage>,
    stop: CancellationToken,
    cancel_requested: Arc<AtomicBool>,
) {
    let strategy = match scrapers::for_site(site, &config) {
        Ok(strategy) => strategy,
        Err(e) => {
            warn!(%site, error = %e, "could not build extraction strategy");
            let _ = tx.send(WorkerMessage::Error {
                message: e.to_string(),
            });
            return;
        }
    };

    info!(%site, query, target_count, "extraction started");
    let progress = ChannelProgress { tx: tx.clone() };
    let outcome = strategy
        .run(&query, target_count, page.as_ref(), &progress, stop.clone())
        .await;

    // the flag is set before the token fires, so a stopped run reads it
    // reliably here
    let cancelled = cancel_requested.load(Ordering::SeqCst);
    let replaced = stop.is_cancelled() && !cancelled;

    match outcome {
        Ok(_) if cancelled => {
            debug!(%site, query, "extraction cancelled");
            let _ = tx.send(WorkerMessage::Cancel);
        }
        Ok(items) if replaced => {
            debug!(%site, query, count = items.len(), "run replaced by a newer start");
            if !items.is_empty() {
                let _ = tx.send(WorkerMessage::Result { items });
            }
        }
        Ok(items) if items.is_empty() => {
            warn!(%site, query, "extraction produced no items");
            let _ = tx.send(WorkerMessage::Error {
                message: "no items extracted".to_string(),
            });
        }
        Ok(items) => {
            info!(%site, query, count = items.len(), "extraction finished");
            let _ = tx.send(WorkerMessage::Result { items });
        }
        Err(e) if cancelled => {
            debug!(%site, query, error = %e, "extraction cancelled mid-failure");
            let _ = tx.send(WorkerMessage::Cancel);
        }
        Err(e) if replaced => {
            debug!(%site, query, error = %e, "replaced run failed, ignoring");
        }
        Err(e) => {
            warn!(%site, query, error = %e, "extraction failed");
            let _ = tx.send(WorkerMessage::Error {
                message: e.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::browser::channel_pair;
    use crate::page::PageError;

    /// Serves a fixed sequence of rendered states; clicks advance the state.
    struct ScriptedPage {
        states: Vec<String>,
        cursor: std::sync::Mutex<usize>,
    }

    impl ScriptedPage {
        fn new(states: Vec<String>) -> Self {
            Self {
                states,
                cursor: std::sync::Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl PageDriver for ScriptedPage {
        async fn wait_for(&self, _selector: &str, _timeout: Duration) -> bool {
            true
        }

        async fn content(&self) -> Result<String, PageError> {
            let cursor = *self.cursor.lock().unwrap();
            self.states.get(cursor).cloned().ok_or(PageError::Gone)
        }

        async fn fetch(&self, _url: &str) -> Result<Option<String>, PageError> {
            Ok(None)
        }

        async fn scroll_to_bottom(&self) {}

        async fn click(&self, _selector: &str) -> bool {
            let mut cursor = self.cursor.lock().unwrap();
            if *cursor + 1 < self.states.len() {
                *cursor += 1;
                true
            } else {
                false
            }
        }

        fn current_url(&self) -> String {
            "https://www.falabella.com.pe/falabella-pe/search?Ntt=tv".into()
        }
    }

    fn pod(title: &str, href: &str) -> String {
        format!(
            r#"<div class="grid-pod"><a href="{href}">
                 <b class="pod-subTitle subTitle-rebrand">{title}</b>
                 <span class="copy10">S/ 999</span>
               </a></div>"#
        )
    }

    fn fast_config() -> ScraperConfig {
        let mut config = ScraperConfig::default();
        config.content_wait_ms = 10;
        config.falabella.batch_pause_ms = 5;
        config
    }

    #[tokio::test]
    async fn start_runs_strategy_and_reports_result() {
        let page = Arc::new(ScriptedPage::new(vec![format!(
            "<body>{}{}</body>",
            pod("TV A", "https://f.pe/a"),
            pod("TV B", "https://f.pe/b"),
        )]));
        let (mut ctl, wrk) = channel_pair();
        tokio::spawn(WorkerRuntime::new(page, fast_config()).run(wrk));

        ctl.send(ControllerMessage::Start {
            query: "tv".into(),
            site: Site::Falabella,
            target_count: 2,
        })
        .unwrap();

        let mut rx = ctl.take_receiver().unwrap();
        assert_eq!(rx.recv().await, Some(WorkerMessage::Progress { count: 2 }));
        match rx.recv().await {
            Some(WorkerMessage::Result { items }) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[0].url, "https://f.pe/a");
            }
            other => panic!("expected result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_is_acknowledged() {
        // Two states with a long settle pause keeps the run alive long
        // enough for the cancel to land between batches.
        let mut config = fast_config();
        config.falabella.batch_pause_ms = 5_000;
        let page = Arc::new(ScriptedPage::new(vec![
            format!("<body>{}</body>", pod("TV A", "https://f.pe/a")),
            format!("<body>{}</body>", pod("TV B", "https://f.pe/b")),
        ]));

        let (mut ctl, wrk) = channel_pair();
        tokio::spawn(WorkerRuntime::new(page, config).run(wrk));

        ctl.send(ControllerMessage::Start {
            query: "tv".into(),
            site: Site::Falabella,
            target_count: 10,
        })
        .unwrap();

        let mut rx = ctl.take_receiver().unwrap();
        // first interim progress means the run is inside its loop
        assert_eq!(rx.recv().await, Some(WorkerMessage::Progress { count: 1 }));

        ctl.send(ControllerMessage::Cancel).unwrap();
        loop {
            match rx.recv().await {
                Some(WorkerMessage::Cancel) => break,
                Some(WorkerMessage::Progress { .. }) => continue,
                other => panic!("expected cancel ack, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn replacement_start_is_not_a_cancel_ack() {
        let mut config = fast_config();
        config.falabella.batch_pause_ms = 5_000;
        let page = Arc::new(ScriptedPage::new(vec![
            format!("<body>{}</body>", pod("TV A", "https://f.pe/a")),
            format!("<body>{}</body>", pod("TV B", "https://f.pe/b")),
        ]));

        let (mut ctl, wrk) = channel_pair();
        tokio::spawn(WorkerRuntime::new(page, config).run(wrk));

        let start = |query: &str| ControllerMessage::Start {
            query: query.into(),
            site: Site::Falabella,
            target_count: 10,
        };
        ctl.send(start("tv")).unwrap();

        let mut rx = ctl.take_receiver().unwrap();
        assert_eq!(rx.recv().await, Some(WorkerMessage::Progress { count: 1 }));

        // replace the run while it sits in its inter-batch pause
        ctl.send(start("tv 4k")).unwrap();

        // the replaced run surrenders its partial batch as a result and the
        // new run finishes normally; neither may emit a cancel ack
        let mut results: Vec<Vec<crate::domain::Product>> = Vec::new();
        while results.len() < 2 {
            match rx.recv().await {
                Some(WorkerMessage::Result { items }) => results.push(items),
                Some(WorkerMessage::Progress { .. }) => continue,
                other => panic!("expected only progress and results, got {other:?}"),
            }
        }

        let mut urls: Vec<String> = results.iter().flatten().map(|p| p.url.clone()).collect();
        urls.sort();
        assert_eq!(urls, ["https://f.pe/a", "https://f.pe/b"]);
    }

    #[tokio::test]
    async fn page_failure_reports_error() {
        let page = Arc::new(ScriptedPage::new(Vec::new()));
        let (mut ctl, wrk) = channel_pair();
        tokio::spawn(WorkerRuntime::new(page, fast_config()).run(wrk));

        ctl.send(ControllerMessage::Start {
            query: "tv".into(),
            site: Site::Falabella,
            target_count: 2,
        })
        .unwrap();

        let mut rx = ctl.take_receiver().unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(WorkerMessage::Error { .. })
        ));
    }
}
