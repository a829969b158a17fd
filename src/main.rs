use std::fs::{self, File};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use auspex::{AnalyzerConfig, HeapReport, RunContext, analyze_file};
use clap::Parser;
use clap_cargo::style::CLAP_STYLING;
use env_logger::{Builder, Env};
use log::info;

#[derive(Parser, Debug, Clone, Default)]
#[command(version, about, long_about = None, styles = CLAP_STYLING)]
struct Args {
    /// Heap snapshot to analyze
    hprof: PathBuf,

    /// YAML analyzer configuration
    ///
    /// Unset fields keep their defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the JSON report here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print a text summary to stderr
    #[arg(long)]
    summary: bool,

    /// Compute the retained size of every leaking object
    #[arg(long)]
    retained_size: bool,

    /// Flag at most this many instances per leaking class
    #[arg(long)]
    leak_cap: Option<u32>,

    /// Why the snapshot was taken, copied into the report
    #[arg(long)]
    reason: Option<String>,

    /// Screen shown when the snapshot was taken, copied into the report
    #[arg(long)]
    current_page: Option<String>,

    /// Process uptime in seconds, copied into the report
    #[arg(long)]
    usage_seconds: Option<u64>,

    /// Path to write log
    ///
    /// Set env `RUST_LOG` to change log level
    #[arg(long)]
    log_path: Option<String>,
}

impl Args {
    fn analyzer_config(&self) -> anyhow::Result<AnalyzerConfig> {
        let mut config = match &self.config {
            Some(path) => AnalyzerConfig::from_yaml_file(path)
                .with_context(|| format!("Could not load config `{}`", path.display()))?,
            None => AnalyzerConfig::default(),
        };
        if self.retained_size {
            config.path_finder.compute_retained_size = true;
        }
        if let Some(cap) = self.leak_cap {
            config.scanner.same_class_leak_cap = cap;
        }
        Ok(config)
    }

    fn run_context(&self) -> RunContext {
        RunContext {
            dump_reason: self.reason.clone(),
            current_page: self.current_page.clone(),
            usage_seconds: self.usage_seconds,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // initialize logging, to log_path if available
    init_logging(args.log_path.as_ref())?;

    let config = args.analyzer_config()?;
    let report = analyze_file(&args.hprof, config, &args.run_context())
        .with_context(|| format!("Could not analyze `{}`", args.hprof.display()))?;

    // nothing is written unless the whole analysis succeeded
    write_report(&report, args.output.as_ref())?;
    if args.summary {
        eprint!("{}", report.render_text());
    }
    Ok(())
}

fn write_report(report: &HeapReport, output: Option<&PathBuf>) -> anyhow::Result<()> {
    let json = report.to_json().context("Could not serialize report")?;
    match output {
        Some(path) => {
            fs::write(path, json)
                .with_context(|| format!("Could not write report `{}`", path.display()))?;
            info!("report written to {}", path.display());
        }
        None => {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{json}").context("Could not write report to stdout")?;
        }
    }
    Ok(())
}

fn init_logging(log_path: Option<&String>) -> anyhow::Result<()> {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    if let Some(log_path) = log_path {
        let log_file = File::create(log_path).context("Could not create log file")?;
        let log_file = Arc::new(Mutex::new(log_file));
        builder
            .format(move |buf, record| {
                let log_msg = format!(
                    "{} [{}] - {}\n",
                    chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                    record.level(),
                    record.args()
                );
                if let Ok(mut log_file) = log_file.lock() {
                    log_file.write_all(log_msg.as_bytes())?;
                }
                writeln!(buf, "{}", log_msg.trim_end())
            })
            .target(env_logger::Target::Pipe(Box::new(io::sink()))); // Disable stdout/stderr
    }
    builder.init();
    Ok(())
}
