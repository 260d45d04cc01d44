use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use shared::{LiveStatus, LogLevel, OutcomeStatus, PipelineRun};

pub struct PanelRenderer;

impl PanelRenderer {
    /// Full control panel page: health, latest run and the recent log.
    pub fn generate(status: &LiveStatus, schedule: &str, timezone: Tz) -> String {
        let mut html = String::new();

        html.push_str("<!DOCTYPE html>\n<html>\n<head>\n");
        html.push_str("  <meta charset=\"UTF-8\">\n");
        html.push_str("  <meta http-equiv=\"refresh\" content=\"15\">\n");
        html.push_str("  <title>Sports Poster</title>\n");
        html.push_str("  <style>\n");
        html.push_str("    body { font-family: Arial, sans-serif; max-width: 1000px; margin: 40px auto; padding: 0 20px; line-height: 1.5; }\n");
        html.push_str("    h1 { color: #2c3e50; border-bottom: 3px solid #3498db; padding-bottom: 10px; }\n");
        html.push_str("    h2 { color: #34495e; margin-top: 30px; }\n");
        html.push_str("    table { border-collapse: collapse; width: 100%; }\n");
        html.push_str("    th, td { text-align: left; padding: 6px 10px; border-bottom: 1px solid #ddd; vertical-align: top; }\n");
        html.push_str("    .published { color: #27ae60; }\n");
        html.push_str("    .skipped, .warn { color: #e67e22; }\n");
        html.push_str("    .deferred { color: #7f8c8d; }\n");
        html.push_str("    .error, .unconfirmed { color: #e74c3c; font-weight: bold; }\n");
        html.push_str("    .log { font-family: monospace; font-size: 0.85em; }\n");
        html.push_str("  </style>\n");
        html.push_str("</head>\n<body>\n");
        html.push_str("<h1>Sports Poster</h1>\n");

        // Health
        html.push_str("<table>\n");
        html.push_str(&format!(
            "  <tr><th>State</th><td>{}</td></tr>\n",
            if status.running { "Running" } else { "Idle" }
        ));
        html.push_str(&format!(
            "  <tr><th>Schedule</th><td>{}</td></tr>\n",
            Self::escape_html(schedule)
        ));
        html.push_str(&format!(
            "  <tr><th>Next run</th><td>{}</td></tr>\n",
            status
                .next_scheduled
                .map(|t| Self::format_time(t, timezone))
                .unwrap_or_else(|| "-".to_string())
        ));
        html.push_str(&format!(
            "  <tr><th>Ledger</th><td>{} published ids ({})</td></tr>\n",
            status.ledger_size,
            Self::escape_html(&status.ledger_store)
        ));
        if let Some(reason) = &status.ledger_degraded {
            html.push_str(&format!(
                "  <tr><th>Ledger load</th><td class=\"error\">FAILED, started empty: {}</td></tr>\n",
                Self::escape_html(reason)
            ));
        }
        if !status.unpersisted.is_empty() {
            html.push_str(&format!(
                "  <tr><th>Not recorded</th><td class=\"error\">Posted but missing from ledger: {}</td></tr>\n",
                Self::escape_html(&status.unpersisted.join(", "))
            ));
        }
        html.push_str("</table>\n");

        html.push_str("<p><button onclick=\"fetch('/api/run', {method: 'POST'}).then(r => r.json()).then(() => location.reload())\">Run now</button></p>\n");

        match status.latest_run() {
            Some(run) => html.push_str(&Self::render_run(run, timezone)),
            None => html.push_str("<h2>Latest run</h2>\n<p>No runs yet.</p>\n"),
        }

        html.push_str("<h2>Log</h2>\n<div class=\"log\">\n");
        for line in status.log.iter().rev() {
            let class = match line.level {
                LogLevel::Info => "info",
                LogLevel::Warn => "warn",
                LogLevel::Error => "error",
            };
            html.push_str(&format!(
                "  <div class=\"{}\">{} {}</div>\n",
                class,
                Self::format_time(line.at, timezone),
                Self::escape_html(&line.message)
            ));
        }
        html.push_str("</div>\n");

        html.push_str("</body>\n</html>");
        html
    }

    fn render_run(run: &PipelineRun, timezone: Tz) -> String {
        let mut html = String::new();

        html.push_str(&format!(
            "<h2>Latest run ({:?}, started {})</h2>\n",
            run.trigger,
            Self::format_time(run.started_at, timezone)
        ));
        html.push_str(&format!(
            "<p>{}</p>\n",
            Self::escape_html(&run.summary_line())
        ));

        for source in &run.source_errors {
            html.push_str(&format!(
                "<p class=\"warn\">Source {} failed: {}</p>\n",
                Self::escape_html(&source.category),
                Self::escape_html(&source.message)
            ));
        }

        html.push_str("<table>\n  <tr><th>Article</th><th>League</th><th>Result</th></tr>\n");
        for outcome in &run.outcomes {
            let (class, result) = match &outcome.status {
                OutcomeStatus::Published { post_id } => {
                    ("published", format!("Published ({})", post_id))
                }
                OutcomeStatus::Skipped { reason, detail } => (
                    "skipped",
                    match detail {
                        Some(detail) => format!("Skipped: {} ({})", reason.as_str(), detail),
                        None => format!("Skipped: {}", reason.as_str()),
                    },
                ),
                OutcomeStatus::Deferred => ("deferred", "Deferred to a later run".to_string()),
                OutcomeStatus::Unconfirmed { post_id, error } => (
                    "unconfirmed",
                    format!("Posted ({}) but NOT recorded: {}", post_id, error),
                ),
            };
            html.push_str(&format!(
                "  <tr><td>{}</td><td>{}</td><td class=\"{}\">{}</td></tr>\n",
                Self::escape_html(&outcome.headline),
                Self::escape_html(&outcome.category_name),
                class,
                Self::escape_html(&result)
            ));
        }
        html.push_str("</table>\n");

        html
    }

    fn format_time(at: DateTime<Utc>, timezone: Tz) -> String {
        at.with_timezone(&timezone)
            .format("%-d %b %Y %H:%M:%S %Z")
            .to_string()
    }

    fn escape_html(text: &str) -> String {
        text.replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
            .replace('"', "&quot;")
            .replace('\'', "&#39;")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Article, SkipReason, Trigger};

    fn article(id: &str, headline: &str) -> Article {
        Article {
            id: id.to_string(),
            headline: headline.to_string(),
            body: String::new(),
            image_url: None,
            link: None,
            is_video: false,
            published_at: Utc::now(),
            source: "ESPN".to_string(),
            category: "eng.1".to_string(),
            category_name: "Premier League".to_string(),
        }
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            PanelRenderer::escape_html("<b>Spurs & \"Arsenal\"</b>"),
            "&lt;b&gt;Spurs &amp; &quot;Arsenal&quot;&lt;/b&gt;"
        );
    }

    #[test]
    fn test_page_lists_outcomes_and_defects() {
        let mut run = PipelineRun::start(Trigger::Manual);
        run.record(
            &article("1", "City <win>"),
            OutcomeStatus::Published {
                post_id: "p_1".to_string(),
            },
        );
        run.record(
            &article("2", "Highlights"),
            OutcomeStatus::Skipped {
                reason: SkipReason::Video,
                detail: None,
            },
        );

        let status = LiveStatus {
            last: Some(run),
            ledger_size: 7,
            ledger_store: "file posted_articles.txt".to_string(),
            ledger_degraded: Some("permission denied".to_string()),
            ..LiveStatus::default()
        };

        let html = PanelRenderer::generate(&status, "01:00 (Asia/Bangkok)", chrono_tz::Asia::Bangkok);

        assert!(html.contains("City &lt;win&gt;"));
        assert!(html.contains("Published (p_1)"));
        assert!(html.contains("Skipped: video"));
        assert!(html.contains("7 published ids"));
        assert!(html.contains("FAILED, started empty: permission denied"));
    }

    #[test]
    fn test_page_without_runs() {
        let html = PanelRenderer::generate(&LiveStatus::default(), "-", chrono_tz::UTC);
        assert!(html.contains("No runs yet."));
        assert!(html.contains("Idle"));
    }
}
