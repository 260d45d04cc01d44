use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A story as fetched from a news source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub headline: String,
    pub body: String,
    pub image_url: Option<String>,
    pub link: Option<String>,
    pub is_video: bool,
    pub published_at: DateTime<Utc>,
    /// Display label used in the post credit line
    pub source: String,
    /// League code the article was fetched under
    pub category: String,
    pub category_name: String,
}

/// Rewritten headline and body, only alive for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyledContent {
    pub headline: String,
    pub body: String,
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Trigger {
    Startup,
    Scheduled,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    Video,
    Duplicate,
    TransformFailure,
    PublishFailure,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Video => "video",
            SkipReason::Duplicate => "duplicate",
            SkipReason::TransformFailure => "transform-failure",
            SkipReason::PublishFailure => "publish-failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum OutcomeStatus {
    Published {
        post_id: String,
    },
    Skipped {
        reason: SkipReason,
        detail: Option<String>,
    },
    /// Cut by the per-run cap or by an aborted run; eligible next time.
    Deferred,
    /// Posted, but the ledger write failed.
    Unconfirmed {
        post_id: String,
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleOutcome {
    pub id: String,
    pub headline: String,
    pub category_name: String,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceError {
    pub category: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunOutcome {
    InProgress,
    Completed,
    /// Every configured source failed to respond.
    SourcesUnavailable,
    /// A publish succeeded but could not be recorded in the ledger.
    LedgerDefect,
}

/// Record of one pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub candidates: Vec<Article>,
    pub outcomes: Vec<ArticleOutcome>,
    pub source_errors: Vec<SourceError>,
    pub outcome: RunOutcome,
}

impl PipelineRun {
    pub fn start(trigger: Trigger) -> Self {
        Self {
            trigger,
            started_at: Utc::now(),
            finished_at: None,
            candidates: Vec::new(),
            outcomes: Vec::new(),
            source_errors: Vec::new(),
            outcome: RunOutcome::InProgress,
        }
    }

    pub fn record(&mut self, article: &Article, status: OutcomeStatus) {
        self.outcomes.push(ArticleOutcome {
            id: article.id.clone(),
            headline: article.headline.clone(),
            category_name: article.category_name.clone(),
            status,
        });
    }

    pub fn published_ids(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, OutcomeStatus::Published { .. }))
            .map(|o| o.id.as_str())
            .collect()
    }

    pub fn skipped(&self) -> Vec<(&str, SkipReason)> {
        self.outcomes
            .iter()
            .filter_map(|o| match o.status {
                OutcomeStatus::Skipped { reason, .. } => Some((o.id.as_str(), reason)),
                _ => None,
            })
            .collect()
    }

    pub fn deferred_ids(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, OutcomeStatus::Deferred))
            .map(|o| o.id.as_str())
            .collect()
    }

    pub fn unconfirmed_ids(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, OutcomeStatus::Unconfirmed { .. }))
            .map(|o| o.id.as_str())
            .collect()
    }

    pub fn summary_line(&self) -> String {
        format!(
            "{} candidates, {} published, {} skipped, {} deferred, {} source errors ({:?})",
            self.candidates.len(),
            self.published_ids().len(),
            self.skipped().len(),
            self.deferred_ids().len(),
            self.source_errors.len(),
            self.outcome
        )
    }
}

/// Merge per-source batches into one list, newest first. The sort is stable,
/// so articles with equal timestamps keep the order of their sources.
pub fn merge_newest_first(batches: Vec<Vec<Article>>) -> Vec<Article> {
    let mut merged: Vec<Article> = batches.into_iter().flatten().collect();
    merged.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    merged
}


#[cfg(test)]
mod tests {
    use super::fixtures::article;
    use super::*;

    #[test]
    fn test_merge_orders_newest_first() {
        let merged = merge_newest_first(vec![
            vec![article("old", 1), article("newest", 30)],
            vec![article("middle", 10)],
        ]);
        let ids: Vec<_> = merged.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["newest", "middle", "old"]);
    }

    #[test]
    fn test_merge_ties_keep_source_order() {
        let merged = merge_newest_first(vec![
            vec![article("first-source", 5)],
            vec![article("second-source", 5)],
        ]);
        assert_eq!(merged[0].id, "first-source");
        assert_eq!(merged[1].id, "second-source");
    }

    #[test]
    fn test_skip_reason_serializes_kebab_case() {
        let json = serde_json::to_string(&SkipReason::TransformFailure).unwrap();
        assert_eq!(json, "\"transform-failure\"");
        assert_eq!(SkipReason::PublishFailure.as_str(), "publish-failure");
    }

    #[test]
    fn test_run_accessors_split_outcomes() {
        let mut run = PipelineRun::start(Trigger::Manual);
        run.record(
            &article("a", 1),
            OutcomeStatus::Published {
                post_id: "p1".to_string(),
            },
        );
        run.record(
            &article("b", 2),
            OutcomeStatus::Skipped {
                reason: SkipReason::Video,
                detail: None,
            },
        );
        run.record(&article("c", 3), OutcomeStatus::Deferred);

        assert_eq!(run.published_ids(), vec!["a"]);
        assert_eq!(run.skipped(), vec![("b", SkipReason::Video)]);
        assert_eq!(run.deferred_ids(), vec!["c"]);
        assert!(run.unconfirmed_ids().is_empty());
    }
}
