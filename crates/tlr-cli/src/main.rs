use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tlr_reconcile::ReconcilerConfig;
use tlr_storage::TenderRepository;

#[derive(Debug, Parser)]
#[command(name = "tlr")]
#[command(about = "Tender lifecycle reconciler command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Close expired open tenders and print before/after stats.
    Reconcile,
    /// Fetch missing deadlines for a batch of tenders, then reconcile.
    Backfill {
        /// Tenders to process this run; keep this modest to stay polite
        /// towards the source site.
        #[arg(long)]
        batch_size: Option<i64>,
    },
    /// Read-only audit of the status distribution.
    StatusReport,
    /// Apply database migrations.
    Migrate,
    /// Serve the HTTP reconcile endpoint (and the cron scheduler if enabled).
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Reconcile) {
        Commands::Reconcile => {
            let report = tlr_reconcile::run_reconcile_once_from_env().await?;
            println!(
                "reconcile complete: updated={} at={}",
                report.updated_count, report.timestamp
            );
            print_histogram("before", &report.before_stats);
            print_histogram("after", &report.after_stats);
        }
        Commands::Backfill { batch_size } => {
            let (summary, report) = tlr_reconcile::run_backfill_once_from_env(batch_size).await?;
            println!(
                "backfill complete: processed={} updated={} fetch_failed={} no_deadline={}",
                summary.processed, summary.updated, summary.fetch_failed, summary.no_deadline
            );
            if let Some(report) = report {
                println!(
                    "chained reconcile: updated={} at={}",
                    report.updated_count, report.timestamp
                );
            }
        }
        Commands::StatusReport => {
            let audit = tlr_reconcile::run_status_audit_from_env().await?;
            print_histogram("all tenders", &audit.histogram);
            print_histogram("expired tenders", &audit.expired_histogram);
            println!("pending close: {}", audit.pending_close);
            if !audit.mismatches.is_empty() {
                println!("expired but not closed (showing up to 10):");
                for tender in &audit.mismatches {
                    let deadline = tender
                        .deadline_date
                        .map(|d| d.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string());
                    // Terminal states show up here too; only open rows will
                    // actually close on the next run.
                    let will_close = tlr_core::should_close(
                        tender.status,
                        tender.deadline_date,
                        audit.timestamp,
                    );
                    let verdict = if will_close { " -> will close" } else { " -> left alone" };
                    println!(
                        "  [{}] {} (deadline {}){}",
                        tender.status, tender.title, deadline, verdict
                    );
                }
            }
        }
        Commands::Migrate => {
            let config = ReconcilerConfig::from_env();
            let repo = TenderRepository::connect_lazy(&config.database_url)?;
            repo.run_migrations().await?;
            println!("migrations applied");
        }
        Commands::Serve => {
            tlr_web::serve_from_env().await?;
        }
    }

    Ok(())
}

fn print_histogram(label: &str, histogram: &std::collections::BTreeMap<String, i64>) {
    println!("{label}:");
    if histogram.is_empty() {
        println!("  (empty)");
    }
    for (status, count) in histogram {
        println!("  {status}: {count}");
    }
}
