use chrono::Utc;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::LedgerWriteError;
use crate::ledger::DedupLedger;
use crate::models::{
    merge_newest_first, Article, OutcomeStatus, PipelineRun, RunOutcome, SkipReason, SourceError,
    Trigger,
};
use crate::status::{log_line, LiveStatus, LogLevel};
use crate::traits::{BodyExtractor, Fetcher, Publisher, Transformer};

const LEDGER_RETRY_DELAY_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// League codes, fetched in this order
    pub categories: Vec<String>,
    /// Most articles attempted per run
    pub max_posts: usize,
}

/// Candidates split into the ones to attempt and the ones already decided.
#[derive(Debug, Default)]
pub struct Selection {
    pub attempt: Vec<Article>,
    pub decided: Vec<(Article, OutcomeStatus)>,
}

/// Drop videos and ledgered ids, then keep the `max_posts` newest.
///
/// `candidates` must already be ordered newest first.
pub fn select_candidates(
    candidates: &[Article],
    ledger: &DedupLedger,
    max_posts: usize,
) -> Selection {
    let mut selection = Selection::default();
    let mut seen: HashSet<&str> = HashSet::new();

    for article in candidates {
        let skip = if article.is_video {
            Some(SkipReason::Video)
        } else if ledger.contains(&article.id) || !seen.insert(article.id.as_str()) {
            Some(SkipReason::Duplicate)
        } else {
            None
        };

        match skip {
            Some(reason) => selection.decided.push((
                article.clone(),
                OutcomeStatus::Skipped {
                    reason,
                    detail: None,
                },
            )),
            None if selection.attempt.len() < max_posts => {
                selection.attempt.push(article.clone())
            }
            None => selection
                .decided
                .push((article.clone(), OutcomeStatus::Deferred)),
        }
    }

    selection
}

/// Fetch, filter, rewrite and publish. Owns the dedup ledger.
pub struct Pipeline {
    config: PipelineConfig,
    fetcher: Arc<dyn Fetcher>,
    extractor: Option<Arc<dyn BodyExtractor>>,
    transformer: Arc<dyn Transformer>,
    publisher: Arc<dyn Publisher>,
    ledger: Mutex<DedupLedger>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        fetcher: Arc<dyn Fetcher>,
        transformer: Arc<dyn Transformer>,
        publisher: Arc<dyn Publisher>,
        ledger: DedupLedger,
    ) -> Self {
        Self {
            config,
            fetcher,
            extractor: None,
            transformer,
            publisher,
            ledger: Mutex::new(ledger),
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn BodyExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Copy ledger health into the status board.
    pub async fn sync_ledger_status(&self, status: &watch::Sender<LiveStatus>) {
        let ledger = self.ledger.lock().await;
        publish_ledger(status, &ledger);
    }

    pub async fn ledger_contains(&self, id: &str) -> bool {
        self.ledger.lock().await.contains(id)
    }

    /// Execute one full pass. Per-article failures are recorded in the
    /// returned run, never propagated.
    pub async fn run(&self, trigger: Trigger, status: &watch::Sender<LiveStatus>) -> PipelineRun {
        let mut run = PipelineRun::start(trigger);
        info!(?trigger, categories = ?self.config.categories, "Pipeline run starting");
        log_line(status, LogLevel::Info, format!("Run started ({:?})", trigger));

        self.transformer.start_run();

        let batches = self.fetch_all(&mut run, status).await;
        if !self.config.categories.is_empty()
            && run.source_errors.len() == self.config.categories.len()
        {
            error!("Every news source failed; nothing to publish this run");
            log_line(status, LogLevel::Error, "Every news source failed");
            run.outcome = RunOutcome::SourcesUnavailable;
            return finish(run, status);
        }

        run.candidates = merge_newest_first(batches);

        let mut ledger = self.ledger.lock().await;
        let selection = select_candidates(&run.candidates, &ledger, self.config.max_posts);

        for (article, outcome) in &selection.decided {
            run.record(article, outcome.clone());
        }
        info!(
            candidates = run.candidates.len(),
            attempting = selection.attempt.len(),
            "Filtered candidates"
        );
        log_line(
            status,
            LogLevel::Info,
            format!(
                "{} candidates, {} new articles to process",
                run.candidates.len(),
                selection.attempt.len()
            ),
        );
        publish_progress(status, &run);

        for (index, article) in selection.attempt.iter().enumerate() {
            info!(id = %article.id, league = %article.category_name, headline = %article.headline, "Processing article");

            let body = self.article_body(article).await;

            let styled = match self.transformer.transform(&article.headline, &body).await {
                Ok(styled) => styled,
                Err(e) => {
                    warn!(id = %article.id, error = %e, "Rewrite failed; skipping article");
                    log_line(
                        status,
                        LogLevel::Warn,
                        format!("Skipped \"{}\": rewrite failed ({})", article.headline, e),
                    );
                    run.record(
                        article,
                        OutcomeStatus::Skipped {
                            reason: SkipReason::TransformFailure,
                            detail: Some(e.to_string()),
                        },
                    );
                    publish_progress(status, &run);
                    continue;
                }
            };

            let post_id = match self.publisher.publish(&styled, article).await {
                Ok(post_id) => post_id,
                Err(e) => {
                    warn!(id = %article.id, error = %e, "Publish failed; skipping article");
                    log_line(
                        status,
                        LogLevel::Warn,
                        format!("Skipped \"{}\": publish failed ({})", article.headline, e),
                    );
                    run.record(
                        article,
                        OutcomeStatus::Skipped {
                            reason: SkipReason::PublishFailure,
                            detail: Some(e.to_string()),
                        },
                    );
                    publish_progress(status, &run);
                    continue;
                }
            };

            match confirm(&mut ledger, &article.id).await {
                Ok(()) => {
                    info!(id = %article.id, post_id = %post_id, "Published article");
                    log_line(
                        status,
                        LogLevel::Info,
                        format!("Published \"{}\" as {}", styled.headline, post_id),
                    );
                    run.record(article, OutcomeStatus::Published { post_id });
                }
                Err(e) => {
                    error!(id = %article.id, post_id = %post_id, error = %e, "Ledger write failed after publish; stopping run");
                    ledger.remember_unpersisted(&article.id);
                    log_line(
                        status,
                        LogLevel::Error,
                        format!("Posted {} but could not record it: {}", article.id, e),
                    );
                    run.record(
                        article,
                        OutcomeStatus::Unconfirmed {
                            post_id,
                            error: e.to_string(),
                        },
                    );
                    for rest in &selection.attempt[index + 1..] {
                        run.record(rest, OutcomeStatus::Deferred);
                    }
                    run.outcome = RunOutcome::LedgerDefect;
                    publish_ledger(status, &ledger);
                    break;
                }
            }

            publish_ledger(status, &ledger);
            publish_progress(status, &run);
        }

        if run.outcome == RunOutcome::InProgress {
            run.outcome = RunOutcome::Completed;
        }
        drop(ledger);

        finish(run, status)
    }

    async fn fetch_all(
        &self,
        run: &mut PipelineRun,
        status: &watch::Sender<LiveStatus>,
    ) -> Vec<Vec<Article>> {
        let results = join_all(self.config.categories.iter().map(|category| async move {
            (category, self.fetcher.fetch(category).await)
        }))
        .await;

        let mut batches = Vec::with_capacity(results.len());
        for (category, result) in results {
            match result {
                Ok(articles) => {
                    info!(category = %category, count = articles.len(), "Fetched articles");
                    batches.push(articles);
                }
                Err(e) => {
                    warn!(category = %category, error = %e, "Could not fetch news source");
                    log_line(
                        status,
                        LogLevel::Warn,
                        format!("Could not fetch {}: {}", category, e),
                    );
                    run.source_errors.push(SourceError {
                        category: category.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }
        batches
    }

    /// Full story text when it can be scraped, else the fetched summary.
    async fn article_body(&self, article: &Article) -> String {
        let (Some(extractor), Some(link)) = (&self.extractor, &article.link) else {
            return article.body.clone();
        };

        if !is_web_link(link) {
            debug!(id = %article.id, link = %link, "Not a web link; using summary body");
            return article.body.clone();
        }

        match extractor.extract(link).await {
            Ok(Some(text)) if !text.trim().is_empty() => text,
            Ok(_) => {
                debug!(id = %article.id, "No article text found; using summary body");
                article.body.clone()
            }
            Err(e) => {
                warn!(id = %article.id, error = %format!("{:#}", e), "Article scrape failed; using summary body");
                article.body.clone()
            }
        }
    }
}

fn is_web_link(link: &str) -> bool {
    Url::parse(link)
        .map(|u| u.scheme() == "http" || u.scheme() == "https")
        .unwrap_or(false)
}

/// Record a published id, retrying the write once.
async fn confirm(ledger: &mut DedupLedger, id: &str) -> Result<(), LedgerWriteError> {
    match ledger.add(id) {
        Ok(()) => Ok(()),
        Err(first) => {
            warn!(id, error = %first, "Ledger write failed; retrying once");
            tokio::time::sleep(tokio::time::Duration::from_millis(LEDGER_RETRY_DELAY_MS)).await;
            ledger.add(id)
        }
    }
}

fn publish_progress(status: &watch::Sender<LiveStatus>, run: &PipelineRun) {
    let snapshot = run.clone();
    status.send_modify(|s| s.current = Some(snapshot));
}

fn publish_ledger(status: &watch::Sender<LiveStatus>, ledger: &DedupLedger) {
    let size = ledger.len();
    let store = ledger.describe();
    let degraded = ledger.degraded().map(str::to_string);
    let unpersisted = ledger.unpersisted().to_vec();
    status.send_modify(|s| {
        s.ledger_size = size;
        s.ledger_store = store;
        s.ledger_degraded = degraded;
        s.unpersisted = unpersisted;
    });
}

fn finish(mut run: PipelineRun, status: &watch::Sender<LiveStatus>) -> PipelineRun {
    run.finished_at = Some(Utc::now());
    info!(summary = %run.summary_line(), "Pipeline run finished");
    log_line(status, LogLevel::Info, format!("Run finished: {}", run.summary_line()));
    publish_progress(status, &run);
    run
}
