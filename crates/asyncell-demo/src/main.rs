use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use asyncell::test_host::TestHost;
use asyncell::{AsyncScheduler, CallArguments, CallError, ResolvedReference, SchedulerConfig, XlValue};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "asyncell-demo", about = "Evaluate a chain of AsyncAdd cells")]
struct Cli {
    /// Number of cells in column A.
    #[arg(long, default_value_t = 5)]
    chain: u32,

    /// How long each AsyncAdd call sleeps.
    #[arg(long = "delay-ms", default_value_t = 50)]
    delay_ms: u64,

    /// Scheduler settings as JSON; missing fields keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Worker pool size, overriding the config file.
    #[arg(long)]
    threads: Option<usize>,

    /// Give up after this many seconds.
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Print the effective config and exit.
    #[arg(long)]
    dump_config: bool,
}

fn load_config(cli: &Cli) -> Result<SchedulerConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => SchedulerConfig::default(),
    };
    if let Some(threads) = cli.threads {
        config = config.with_max_threads(threads);
    }
    Ok(config)
}

fn async_add(
    delay: Duration,
) -> impl Fn(&ResolvedReference, &CallArguments) -> Result<XlValue, CallError> + Send + Sync + 'static
{
    move |at: &ResolvedReference, args: &CallArguments| {
        std::thread::sleep(delay);
        let mut sum = 0.0;
        for arg in &args.converted_args {
            match arg.as_f64() {
                Some(n) => sum += n,
                None => {
                    return Err(CallError::Failed(format!(
                        "{}: {arg} is not a number",
                        at.range()
                    )));
                }
            }
        }
        Ok(XlValue::Number(sum))
    }
}

fn build_chain(len: u32) -> TestHost {
    let mut host = TestHost::new().with_formula("Sheet1", "A1", "=AsyncAdd(1, 2)");
    for row in 2..=len {
        let formula = format!("=AsyncAdd(A{}, {row})", row - 1);
        host = host.with_formula("Sheet1", &format!("A{row}"), &formula);
    }
    host
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    if cli.chain == 0 {
        bail!("--chain must be at least 1");
    }
    let config = load_config(&cli)?;
    if cli.dump_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let host = build_chain(cli.chain);
    let mut scheduler =
        AsyncScheduler::new(host.clone(), async_add(Duration::from_millis(cli.delay_ms)), config)?
            .with_notifier(Arc::new(host.clone()));
    scheduler.register_async_func("AsyncAdd");

    info!(cells = cli.chain, delay_ms = cli.delay_ms, "recalculating");
    let started = Instant::now();
    let report = host.recalculate_all(&mut scheduler, Duration::from_secs(cli.timeout_secs))?;
    let elapsed = started.elapsed();

    for row in 1..=cli.chain {
        let cell = host.cell("Sheet1", &format!("A{row}"));
        println!(
            "{:<6} {:>12}  invoked {}x",
            cell.a1(),
            host.value(&cell).to_string(),
            host.invocations(&cell)
        );
    }
    println!(
        "{} waves, {} invocations, {} computations in {:.1?}",
        report.waves,
        report.invocations,
        scheduler.computations_started(),
        elapsed
    );
    if !report.settled {
        bail!("timed out with cells still pending");
    }
    Ok(())
}
