use std::sync::Arc;

use tracing::{error, info};

use cnr_harvest::cnr::{CnrNumber, CnrRange};
use cnr_harvest::core::config::{load_harvest_config, HarvestConfig};
use cnr_harvest::sink::SqliteSink;
use cnr_harvest::tools::batch;
use cnr_harvest::AppState;

struct CliArgs {
    cnrs: Vec<String>,
    file: Option<String>,
    range: Option<String>,
    portal: Option<String>,
    out_dir: Option<String>,
    db_path: Option<String>,
    concurrency: Option<usize>,
    max_attempts: Option<u32>,
}

fn print_usage() {
    eprintln!(
        "usage: cnr-harvest [CNR...] [options]\n\
         \n\
         options:\n\
           --file PATH            newline-separated CNR list\n\
           --range P:S-E:Y        expand PREFIX:START-END:YEAR into CNRs\n\
           --portal NAME          district (default) or highcourt\n\
           --out DIR              JSON output directory (default: ./cases)\n\
           --db PATH              write to a SQLite database instead of JSON files\n\
           --concurrency N        concurrent lookups (default: 4)\n\
           --max-attempts N       attempt budget per CNR (default: 5)\n\
         \n\
         Config file cnr-harvest.json and CNR_HARVEST_* env vars supply the\n\
         captcha backend (2captcha API key or local OCR service URL)."
    );
}

fn parse_args() -> Result<CliArgs, String> {
    let mut parsed = CliArgs {
        cnrs: Vec::new(),
        file: None,
        range: None,
        portal: None,
        out_dir: None,
        db_path: None,
        concurrency: None,
        max_attempts: None,
    };

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        let mut take = |name: &str| {
            args.next()
                .ok_or_else(|| format!("{} requires a value", name))
        };
        match arg.as_str() {
            "--help" | "-h" => return Err(String::new()),
            "--file" => parsed.file = Some(take("--file")?),
            "--range" => parsed.range = Some(take("--range")?),
            "--portal" => parsed.portal = Some(take("--portal")?),
            "--out" => parsed.out_dir = Some(take("--out")?),
            "--db" => parsed.db_path = Some(take("--db")?),
            "--concurrency" => {
                parsed.concurrency = Some(
                    take("--concurrency")?
                        .parse()
                        .map_err(|_| "--concurrency wants a number".to_string())?,
                )
            }
            "--max-attempts" => {
                parsed.max_attempts = Some(
                    take("--max-attempts")?
                        .parse()
                        .map_err(|_| "--max-attempts wants a number".to_string())?,
                )
            }
            other if other.starts_with("--") => {
                return Err(format!("unknown option {}", other));
            }
            cnr => parsed.cnrs.push(cnr.to_string()),
        }
    }
    Ok(parsed)
}

/// Gather CNRs from positionals, `--file` and `--range`, dropping (and
/// logging) anything that fails validation rather than aborting the run.
fn collect_cnrs(args: &CliArgs) -> anyhow::Result<Vec<CnrNumber>> {
    let mut raw: Vec<String> = args.cnrs.clone();

    if let Some(path) = &args.file {
        let contents = std::fs::read_to_string(path)?;
        raw.extend(
            contents
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(String::from),
        );
    }

    let mut cnrs = Vec::new();
    for candidate in raw {
        match CnrNumber::parse(&candidate) {
            Ok(cnr) => cnrs.push(cnr),
            Err(e) => error!("skipping invalid CNR: {}", e),
        }
    }

    if let Some(spec) = &args.range {
        cnrs.extend(CnrRange::parse(spec)?.expand()?);
    }

    // Order-preserving dedup; the same CNR can arrive via several inputs.
    let mut seen = std::collections::HashSet::new();
    cnrs.retain(|cnr| seen.insert(cnr.clone()));
    Ok(cnrs)
}

fn apply_cli_overrides(config: &mut HarvestConfig, args: &CliArgs) {
    if args.portal.is_some() {
        config.portal = args.portal.clone();
    }
    if args.out_dir.is_some() {
        config.output_dir = args.out_dir.clone();
    }
    if args.concurrency.is_some() {
        config.max_concurrent = args.concurrency;
    }
    if args.max_attempts.is_some() {
        config.max_attempts = args.max_attempts;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {}\n", msg);
            }
            print_usage();
            std::process::exit(if msg.is_empty() { 0 } else { 2 });
        }
    };

    let cnrs = collect_cnrs(&args)?;
    if cnrs.is_empty() {
        eprintln!("error: no valid CNRs to look up\n");
        print_usage();
        std::process::exit(2);
    }

    let mut config = load_harvest_config();
    apply_cli_overrides(&mut config, &args);

    let mut state = AppState::new(config)?;
    if let Some(db_path) = &args.db_path {
        state = state.with_sink(Arc::new(SqliteSink::open(db_path)?));
        info!("persisting to SQLite database {}", db_path);
    }
    let state = Arc::new(state);
    info!("{:?}", state);

    let report = batch::run_batch(&state, cnrs).await?;

    println!(
        "attempted {} | succeeded {} | failed {} | {:.1}s avg per lookup",
        report.total,
        report.successful,
        report.failed,
        report.avg_seconds_per_lookup()
    );

    if report.successful == 0 {
        std::process::exit(1);
    }
    Ok(())
}
