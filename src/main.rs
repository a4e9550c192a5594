use std::path::PathBuf;

use anyhow::Context;
use certificate_dashboard::{
    aggregate, fetch_raw, metrics, normalize, report, DataSource, KpiSummary, NormalizedRecord,
    RecordFilter, SessionCache,
};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// One year.
const MAX_CACHE_TTL_MINUTES: i64 = 525_600;
/// Ten years of daily buckets.
const MAX_WINDOW_DAYS: i64 = 3_660;

#[derive(Parser)]
#[command(name = "certificate-dashboard")]
#[command(
    about = "Certificate and enrollment dashboard over student spreadsheet exports",
    long_about = None
)]
struct Cli {
    /// Primary spreadsheet export (CSV, or JSON by extension)
    #[arg(long, env = "DASHBOARD_SOURCE")]
    source: PathBuf,
    /// Local export used when the primary source is unavailable or empty
    #[arg(long, env = "DASHBOARD_FALLBACK")]
    fallback: Option<PathBuf>,
    /// How long a fetched export is reused before reading it again
    #[arg(
        long,
        env = "DASHBOARD_CACHE_TTL_MINUTES",
        default_value_t = 15,
        value_parser = clap::value_parser!(i64).range(0..=MAX_CACHE_TTL_MINUTES)
    )]
    cache_ttl_minutes: i64,
    #[command(flatten)]
    filters: FilterArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct FilterArgs {
    /// Student name (case-insensitive) or CPF fragment
    #[arg(long)]
    search: Option<String>,
    #[arg(long)]
    course: Option<String>,
    #[arg(long)]
    class: Option<String>,
    #[arg(long)]
    enrollment_status: Option<String>,
    /// Digital or printed certificate type
    #[arg(long)]
    certificate_type: Option<String>,
    /// Earliest start date (YYYY-MM-DD), inclusive
    #[arg(long)]
    start_from: Option<NaiveDate>,
    /// Latest start date (YYYY-MM-DD), inclusive
    #[arg(long)]
    start_to: Option<NaiveDate>,
}

impl From<FilterArgs> for RecordFilter {
    fn from(args: FilterArgs) -> Self {
        RecordFilter {
            course: args.course,
            class: args.class,
            enrollment_status: args.enrollment_status,
            certificate_type: args.certificate_type,
            start_from: args.start_from,
            start_to: args.start_to,
            search: args.search,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the top-level indicators
    Kpis {
        #[arg(long)]
        json: bool,
    },
    /// Print every calculator output as JSON
    Metrics {
        #[arg(
            long,
            default_value_t = 30,
            value_parser = clap::value_parser!(u32).range(0..=MAX_WINDOW_DAYS)
        )]
        window_days: u32,
    },
    /// Daily digital/printed certificate requests over a trailing window
    Timeline {
        #[arg(
            long,
            default_value_t = 30,
            value_parser = clap::value_parser!(u32).range(0..=MAX_WINDOW_DAYS)
        )]
        days: u32,
    },
    /// Generate a markdown report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Export the student table as CSV, with the indicators beside it in kpis.csv
    Export {
        #[arg(long, default_value = "students.csv")]
        out: PathBuf,
    },
    /// Reload and print indicators periodically until interrupted
    Watch {
        #[arg(
            long,
            default_value_t = 15,
            value_parser = clap::value_parser!(u64).range(1..=MAX_CACHE_TTL_MINUTES as u64)
        )]
        interval_minutes: u64,
        /// Bypass the session cache on every refresh
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let source = DataSource {
        primary: cli.source,
        fallback: cli.fallback,
    };
    let mut cache = SessionCache::new(chrono::Duration::minutes(cli.cache_ttl_minutes));
    let filter = RecordFilter::from(cli.filters);

    match cli.command {
        Commands::Kpis { json } => {
            let records = load(&source, &mut cache, &filter, false).await?;
            let summary = aggregate(&records);
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
        }
        Commands::Metrics { window_days } => {
            let records = load(&source, &mut cache, &filter, false).await?;
            let snapshot =
                metrics::metrics_snapshot_as_of(&records, window_days, metrics::today());
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::Timeline { days } => {
            let records = load(&source, &mut cache, &filter, false).await?;
            let timeline = metrics::certificate_timeline(&records, days);
            for (day, bucket) in &timeline {
                println!("{day}  digital {:>3}  printed {:>3}", bucket.digital, bucket.printed);
            }
            println!(
                "{} certificate requests in the last {} days.",
                metrics::total_requests(&timeline),
                days
            );
        }
        Commands::Report { out } => {
            let records = load(&source, &mut cache, &filter, false).await?;
            let summary = aggregate(&records);
            let snapshot = metrics::metrics_snapshot_as_of(&records, 30, summary.as_of);
            let report = report::build_report(
                filter.describe().as_deref(),
                &summary,
                &snapshot,
                &records,
            );
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Export { out } => {
            let records = load(&source, &mut cache, &filter, false).await?;
            let file = std::fs::File::create(&out)
                .with_context(|| format!("failed to create {}", out.display()))?;
            report::write_table_csv(file, &records)?;

            let kpis_out = out.with_file_name("kpis.csv");
            let file = std::fs::File::create(&kpis_out)
                .with_context(|| format!("failed to create {}", kpis_out.display()))?;
            report::write_kpis_csv(file, &aggregate(&records))?;
            println!(
                "Exported {} students to {} and indicators to {}.",
                records.len(),
                out.display(),
                kpis_out.display()
            );
        }
        Commands::Watch {
            interval_minutes,
            force,
        } => {
            let period = std::time::Duration::from_secs(interval_minutes * 60);
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match load(&source, &mut cache, &filter, force).await {
                            Ok(records) => print_summary(&aggregate(&records)),
                            Err(err) => warn!(error = %format!("{err:#}"), "refresh failed"),
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("stopping refresh loop");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

async fn load(
    source: &DataSource,
    cache: &mut SessionCache,
    filter: &RecordFilter,
    force_refresh: bool,
) -> anyhow::Result<Vec<NormalizedRecord>> {
    let raw = fetch_raw(source, cache, force_refresh)
        .await
        .context("could not load data")?;
    let records = normalize(&raw);
    if filter.is_empty() {
        return Ok(records);
    }

    let filtered = filter.apply(&records);
    debug!(total = records.len(), kept = filtered.len(), "applied filters");
    Ok(filtered)
}

fn print_summary(summary: &KpiSummary) {
    println!("Indicators as of {}:", summary.as_of);
    println!("- Students: {}", summary.total_students);
    println!("- On time: {:.1}%", summary.percent_on_time);
    println!("- Delinquent: {:.1}%", summary.percent_delinquent);
    println!(
        "- Average discipline progress: {:.1}%",
        summary.avg_discipline_progress
    );
    println!(
        "- Documents complete: {:.1}%",
        summary.percent_documents_complete
    );
    println!(
        "- Certificate requests: {} (7d), {} (30d), {} (90d)",
        summary.certificate_requests_7d,
        summary.certificate_requests_30d,
        summary.certificate_requests_90d
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(
            ["certificate-dashboard", "--source", "export.csv"]
                .iter()
                .chain(args),
        )
    }

    #[test]
    fn defaults_are_within_bounds() {
        let cli = parse(&["metrics"]).unwrap();
        assert_eq!(cli.cache_ttl_minutes, 15);
        assert!(matches!(cli.command, Commands::Metrics { window_days: 30 }));
    }

    #[test]
    fn oversized_cache_ttl_is_rejected() {
        assert!(parse(&["--cache-ttl-minutes", "525600", "kpis"]).is_ok());
        assert!(parse(&["--cache-ttl-minutes", "525601", "kpis"]).is_err());
        assert!(parse(&["--cache-ttl-minutes", "-1", "kpis"]).is_err());
        assert!(parse(&["--cache-ttl-minutes", "9223372036854775807", "kpis"]).is_err());
    }

    #[test]
    fn oversized_windows_are_rejected() {
        assert!(parse(&["timeline", "--days", "3660"]).is_ok());
        assert!(parse(&["timeline", "--days", "4294967295"]).is_err());
        assert!(parse(&["metrics", "--window-days", "3661"]).is_err());
        assert!(parse(&["watch", "--interval-minutes", "0"]).is_err());
    }

    #[test]
    fn search_flag_reaches_the_filter() {
        let cli = parse(&["--search", "souza", "kpis"]).unwrap();
        let filter = RecordFilter::from(cli.filters);
        assert_eq!(filter.search.as_deref(), Some("souza"));
        assert!(!filter.is_empty());
    }
}
