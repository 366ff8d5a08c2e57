//! rivulet command-line interface

use clap::Parser;
use rivulet::config::load_config_with_hash;
use rivulet::crawler::{backend_from_config, CrawlerBuilder};
use rivulet::sink::CrawlResult;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// rivulet: a polite, resumable web crawler
///
/// Crawls the configured seed URLs while honoring robots.txt and per-domain
/// rate limits, streaming one JSON line per crawled page to stdout.
#[derive(Parser, Debug)]
#[command(name = "rivulet")]
#[command(version)]
#[command(about = "A polite, resumable web crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Resume a persisted session instead of starting fresh
    #[arg(long, value_name = "SESSION_ID")]
    resume: Option<String>,

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with_all = ["resume", "sessions"])]
    dry_run: bool,

    /// List persisted sessions and exit
    #[arg(long, conflicts_with_all = ["resume", "dry_run"])]
    sessions: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<std::process::ExitCode> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from {}", cli.config.display());
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            return Ok(std::process::ExitCode::from(2));
        }
    };

    if cli.dry_run {
        handle_dry_run(&config);
        return Ok(std::process::ExitCode::SUCCESS);
    }

    if cli.sessions {
        handle_sessions(&config).await?;
        return Ok(std::process::ExitCode::SUCCESS);
    }

    handle_crawl(config, config_hash, cli.resume).await
}

/// Maps verbosity flags onto the tracing filter
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("rivulet=info,warn"),
            1 => EnvFilter::new("rivulet=debug,info"),
            2 => EnvFilter::new("rivulet=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn handle_dry_run(config: &rivulet::Config) {
    println!("=== rivulet dry run ===\n");

    println!("Crawler:");
    println!("  Max pages: {}", config.crawler.max_pages);
    println!("  Max depth: {}", config.crawler.max_depth);
    println!(
        "  Workers: {} global, {} per domain",
        config.crawler.max_concurrent_workers, config.crawler.max_concurrent_per_domain
    );
    println!(
        "  Rate limit: {}/s per domain",
        config.crawler.max_requests_per_second_per_domain
    );
    println!(
        "  Robots.txt: {}",
        if config.crawler.ignore_robots_txt {
            "ignored"
        } else {
            "honored"
        }
    );

    println!("\nUser agent: {}", config.user_agent.header_value());

    if config.persistence.enabled {
        println!(
            "\nPersistence: {:?} strategy, {:?} backend",
            config.persistence.strategy, config.persistence.backend
        );
    } else {
        println!("\nPersistence: disabled");
    }

    if !config.filters.allowed_domains.is_empty() {
        println!("\nAllowed domains:");
        for domain in &config.filters.allowed_domains {
            println!("  - {}", domain);
        }
    }
    if !config.filters.blocked_domains.is_empty() {
        println!("\nBlocked domains:");
        for domain in &config.filters.blocked_domains {
            println!("  - {}", domain);
        }
    }

    println!("\nSeeds ({}):", config.seeds.len());
    for seed in &config.seeds {
        println!("  - {}", seed);
    }

    println!("\n✓ Configuration is valid");
}

async fn handle_sessions(config: &rivulet::Config) -> anyhow::Result<()> {
    let backend = backend_from_config(config)?;
    backend.initialize().await?;
    let sessions = backend.list_sessions().await?;

    if sessions.is_empty() {
        println!("No persisted sessions");
        return Ok(());
    }

    println!("{:<24} {:<20} CREATED", "SESSION", "NAME");
    for session in sessions {
        println!(
            "{:<24} {:<20} {}",
            session.id,
            session.name.as_deref().unwrap_or("-"),
            session.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    Ok(())
}

async fn handle_crawl(
    config: rivulet::Config,
    config_hash: String,
    resume: Option<String>,
) -> anyhow::Result<std::process::ExitCode> {
    // One JSON line per result on stdout; seed failures tracked for the
    // exit code.
    let seed_failures = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&seed_failures);
    let sink = Arc::new(move |result: CrawlResult| {
        if result.depth == 0 && result.is_failure() {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        match serde_json::to_string(&result) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!("Failed to serialize result: {}", e),
        }
    });

    let crawler = CrawlerBuilder::new(config)
        .with_config_hash(config_hash)
        .with_sink(sink)
        .build()?;

    // Ctrl-C cancels cooperatively; the scheduler unwinds within the
    // shutdown grace period and the session stays resumable.
    let cancel = crawler.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            cancel.cancel();
        }
    });

    let report = match resume {
        Some(session_id) => crawler.resume(&session_id).await?,
        None => crawler.run().await?,
    };

    tracing::info!(
        "Crawl {} after {:?}: {} pages ({} errors) across {} domains",
        if report.cancelled {
            "interrupted"
        } else {
            "finished"
        },
        report.elapsed,
        report.pages,
        report.errors,
        report.domains.len()
    );
    if let Some(session_id) = &report.session_id {
        tracing::info!("Session id: {}", session_id);
    }

    if seed_failures.load(Ordering::Relaxed) > 0 {
        return Ok(std::process::ExitCode::FAILURE);
    }
    Ok(std::process::ExitCode::SUCCESS)
}
