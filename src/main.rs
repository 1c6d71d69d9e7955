use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use bindepot::config;
use bindepot::counters;
use bindepot::ui;

/// Content-addressed storage and distribution for versioned binary
/// packages.
#[derive(Debug, Parser)]
#[command(verbatim_doc_comment)]
struct Args {
    /// Verbosity (-v, -vv, -vvv, etc.)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    subcommand: Subcommand,
}

#[derive(Debug, clap::Subcommand)]
enum Subcommand {
    Init(ui::init::Args),
    Limits(ui::limits::Args),
    Publish(ui::publish::Args),
    Fetch(ui::fetch::Args),
    Check(ui::check::Args),
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(args.verbose);

    let result = match args.subcommand {
        Subcommand::Init(a) => ui::init::run(a),
        Subcommand::Limits(a) => ui::limits::run(config::load()?, a),
        Subcommand::Publish(a) => ui::publish::run(config::load()?, a).await,
        Subcommand::Fetch(a) => ui::fetch::run(config::load()?, a),
        Subcommand::Check(a) => ui::check::run(config::load()?, a),
    };

    counters::log_counts();
    result
}

/// Set up a `tracing-subscriber` fmt layer on stderr, with verbosity
/// controlled by repeated `-v` flags.
fn init_logger(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(level).unwrap())
        .with_span_events(FmtSpan::NONE)
        .with_writer(std::io::stderr)
        .init();
}
