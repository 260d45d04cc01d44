mod panel;
mod web;

use anyhow::{Context, Result};
use clap::Parser;
use shared::{
    open_store, Config, ContentExtractor, Controller, DedupLedger, EspnClient, FacebookPublisher,
    OpenRouterStylist, OutcomeStatus, Pipeline, PipelineRun, RunOutcome, Trigger,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sports-poster")]
#[command(about = "Fetch football news, restyle it in Thai and post it to a Facebook page on a schedule")]
struct Args {
    /// Run the pipeline once, print what happened and exit
    #[arg(long)]
    once: bool,

    /// Don't run immediately at startup, wait for the first scheduled time
    #[arg(long)]
    no_startup_run: bool,

    /// Control panel address (overrides CONTROL_PANEL_ADDR)
    #[arg(long)]
    addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("sports_poster=info".parse()?)
                .add_directive("shared=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;

    let controller = Arc::new(build_controller(&config).await?);

    if args.once {
        println!("\n⚽ Running pipeline once...");
        let run = controller
            .run_now(Trigger::Manual)
            .await
            .context("Pipeline is already running")?;
        print_run(&run);
        if run.outcome == RunOutcome::LedgerDefect {
            anyhow::bail!(
                "Articles were posted but could not be recorded in the ledger: {:?}",
                run.unconfirmed_ids()
            );
        }
        return Ok(());
    }

    tokio::spawn(shared::run_scheduler(
        controller.clone(),
        config.schedule.clone(),
    ));

    if !args.no_startup_run {
        let controller = controller.clone();
        tokio::spawn(async move {
            match controller.run_now(Trigger::Startup).await {
                Ok(run) => info!(summary = %run.summary_line(), "Startup run complete"),
                Err(e) => warn!(error = %e, "Startup run skipped"),
            }
        });
    }

    let state = Arc::new(web::AppState {
        controller: controller.clone(),
        schedule: config.schedule.describe(),
        timezone: config.schedule.timezone(),
    });
    let app = web::router(state);

    let addr = args.addr.unwrap_or(config.panel_addr);
    info!(%addr, "Control panel listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind control panel to {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Control panel server failed")?;

    // Let a run that is mid-publish record its ledger entry before exiting
    let _permit = controller.drain().await;
    info!("Shut down");
    Ok(())
}

async fn build_controller(config: &Config) -> Result<Controller> {
    let ledger = DedupLedger::open(open_store(&config.ledger_path));
    if let Some(reason) = ledger.degraded() {
        error!(
            reason,
            "Publish ledger unavailable; previously posted articles may be posted again"
        );
    }

    let pipeline = Pipeline::new(
        config.pipeline.clone(),
        Arc::new(EspnClient::new(config.espn.clone())?),
        Arc::new(OpenRouterStylist::new(config.stylist.clone())?),
        Arc::new(FacebookPublisher::new(config.facebook.clone())?),
        ledger,
    )
    .with_extractor(Arc::new(ContentExtractor::new()?));

    Ok(Controller::new(pipeline).await)
}

fn print_run(run: &PipelineRun) {
    for source in &run.source_errors {
        println!("⚠ Could not fetch {}: {}", source.category, source.message);
    }

    println!("✓ Considered {} articles", run.candidates.len());
    for outcome in &run.outcomes {
        match &outcome.status {
            OutcomeStatus::Published { post_id } => {
                println!("  ✓ \"{}\" → {}", outcome.headline, post_id)
            }
            OutcomeStatus::Skipped { reason, detail } => match detail {
                Some(detail) => println!(
                    "  ✗ \"{}\" ({}: {})",
                    outcome.headline,
                    reason.as_str(),
                    detail
                ),
                None => println!("  · \"{}\" ({})", outcome.headline, reason.as_str()),
            },
            OutcomeStatus::Deferred => println!("  … \"{}\" (deferred)", outcome.headline),
            OutcomeStatus::Unconfirmed { post_id, error } => println!(
                "  ‼ \"{}\" posted as {} but NOT recorded: {}",
                outcome.headline, post_id, error
            ),
        }
    }

    println!("\n✅ {}", run.summary_line());
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
