use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use reviewsignal_common::Config;
use reviewsignal_scout::classifier::Classifier;
use reviewsignal_scout::notifier::{LogNotifier, Notifier};
use reviewsignal_scout::orchestrator::ScrapeOrchestrator;
use reviewsignal_scout::pipeline::{Pipeline, PipelineDeps};
use reviewsignal_scout::router::DepartmentRouter;
use reviewsignal_scout::sources;

#[derive(Parser)]
#[command(name = "reviewsignal", about = "Scrape, classify, and route product feedback")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline on the configured interval until Ctrl-C (default)
    Run,
    /// Run the pipeline once and print stats
    Once,
    /// Classify ad-hoc text and print the analysis as JSON
    Classify {
        #[arg(long)]
        text: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        rating: Option<f64>,
    },
    /// Print the department catalogue as JSON
    Departments,
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("reviewsignal=info".parse()?);
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

fn build_pipeline(config: &Config) -> Pipeline {
    let orchestrator = ScrapeOrchestrator::new(sources::build_sources(&config.scrapers))
        .with_timeout(config.scrape_timeout());
    info!(sources = ?orchestrator.enabled_sources(), "Sources enabled");

    let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();
    if config.notifier.log_enabled {
        notifiers.push(Arc::new(LogNotifier));
    }

    let deps = PipelineDeps::builder()
        .orchestrator(Arc::new(orchestrator))
        .classifier(Arc::new(Classifier::from_config(&config.analyzer)))
        .router(Arc::new(DepartmentRouter::from_config(&config.router)))
        .notifiers(notifiers)
        .recent_capacity(config.notifier.recent_reviews)
        .build();
    Pipeline::new(deps)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;

    let cli = Cli::parse();
    let config = Config::load().context("Failed to load configuration")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            info!("Review Signal starting...");
            config.log_redacted();
            let pipeline = build_pipeline(&config);

            let shutdown = CancellationToken::new();
            tokio::spawn({
                let shutdown = shutdown.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("Shutdown requested");
                    }
                    shutdown.cancel();
                }
            });

            pipeline
                .run_scheduled(config.scraping_interval(), shutdown)
                .await;
        }
        Command::Once => {
            config.log_redacted();
            let pipeline = build_pipeline(&config);
            let stats = pipeline
                .run_once(&CancellationToken::new())
                .await
                .context("Pipeline run failed")?;
            println!("{stats}");
        }
        Command::Classify {
            text,
            title,
            rating,
        } => {
            let classifier = Classifier::from_config(&config.analyzer);
            let analysis = classifier
                .analyze_text(&text, title.as_deref(), rating)
                .await
                .context("Classification failed")?;
            println!("{}", serde_json::to_string_pretty(&analysis)?);
        }
        Command::Departments => {
            let router = DepartmentRouter::from_config(&config.router);
            println!("{}", serde_json::to_string_pretty(&router.departments())?);
        }
    }

    Ok(())
}
