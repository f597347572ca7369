use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use tia_crawler::config::AppConfig;
use tia_crawler::models::{
    AssessmentFilters, AssessmentStatus, CompanyFilters, ListFilters, RecordKind,
};
use tia_crawler::service::CrawlerService;
use tia_crawler::storage::Repository;
use tia_crawler::utils::{self, Timer};

#[derive(Parser)]
#[command(
    name = "tia-crawler",
    about = "KATIA member directory and MOLIT traffic impact assessment crawler",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl a site and replace its stored records
    Crawl {
        /// companies | assessments
        kind: RecordKind,

        /// Add detail page links to the output
        #[arg(long)]
        urls: bool,
    },

    /// Print stored records without crawling
    List {
        kind: RecordKind,

        #[command(flatten)]
        filters: FilterArgs,

        #[arg(long)]
        urls: bool,
    },

    /// Find member companies by name, ignoring 주식회사/(주)/㈜ and spacing
    Lookup { name: String },

    /// Assessment counts by year and status
    Stats {
        /// Human-readable table instead of JSON
        #[arg(long)]
        text: bool,
    },

    /// Apply schema migrations
    Migrate,
}

#[derive(Args, Default)]
struct FilterArgs {
    /// Companies: substring of name, representative or address
    #[arg(short, long)]
    query: Option<String>,

    #[arg(long)]
    project_name: Option<String>,

    /// Business owner or assessment agency
    #[arg(long)]
    company: Option<String>,

    #[arg(long)]
    location: Option<String>,

    /// 진행중 | 완료 | 계획
    #[arg(long)]
    status: Option<AssessmentStatus>,

    /// 공동주택 | 지구단위계획 | 도시개발 | 물류창고 | 주상복합 | 기타
    #[arg(long)]
    project_type: Option<String>,

    #[arg(long)]
    authority: Option<String>,

    #[arg(long)]
    year: Option<String>,
}

impl FilterArgs {
    fn into_filters(self, kind: RecordKind) -> ListFilters {
        match kind {
            RecordKind::Companies => ListFilters::Companies(CompanyFilters { query: self.query }),
            RecordKind::Assessments => ListFilters::Assessments(AssessmentFilters {
                project_name: self.project_name,
                company: self.company,
                location: self.location,
                status: self.status,
                project_type: self.project_type,
                approval_authority: self.authority,
                year: self.year,
            }),
        }
    }
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

/// Serialize `doc` and attach `detailUrls` when asked for.
fn with_urls(doc: &impl Serialize, urls: Option<Vec<String>>) -> Result<serde_json::Value> {
    let mut value = serde_json::to_value(doc)?;
    if let (Some(urls), Some(obj)) = (urls, value.as_object_mut()) {
        obj.insert("detailUrls".into(), urls.into());
    }
    Ok(value)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "tia_crawler=info,warn",
        1 => "tia_crawler=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false).with_writer(std::io::stderr))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Crawl { kind, urls } => {
            let _t = Timer::start(format!("{} crawl", kind));
            let service = CrawlerService::from_config(config);
            let response = service.crawl(kind).await;

            let links = match (&response.records, urls) {
                (Some(records), true) => Some(service.detail_urls(records)),
                _ => None,
            };
            print_json(&with_urls(&response, links)?)?;

            if !response.success {
                return Ok(ExitCode::FAILURE);
            }
        }

        Command::List { kind, filters, urls } => {
            let service = CrawlerService::from_config(config);
            let response = service.list(kind, &filters.into_filters(kind));
            info!("{} {} records", response.total_count, kind);

            let links = urls.then(|| service.detail_urls(&response.records));
            print_json(&with_urls(&response, links)?)?;
        }

        Command::Lookup { name } => {
            let service = CrawlerService::from_config(config);
            let response = service.lookup_companies(&name);
            let links = Some(service.detail_urls(&response.records));
            print_json(&with_urls(&response, links)?)?;
        }

        Command::Stats { text } => {
            let stats = CrawlerService::from_config(config).assessment_stats();
            if text {
                println!("{}", utils::render_stats(&stats));
            } else {
                print_json(&stats)?;
            }
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)
                .and_then(|repo| repo.run_migrations())
                .with_context(|| format!("Migrating {:?}", config.storage.db_path))?;
            println!("Migrations applied.");
        }
    }

    Ok(ExitCode::SUCCESS)
}
