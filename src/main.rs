mod cli;

use clap::Parser;
use std::process::ExitCode;

use cardbench::config::BenchConfig;
use cardbench::diag::ConsoleSink;
use cardbench::error::user_friendly_message;
use cardbench::io::mount::DirectoryMount;
use cardbench::run::run_benchmark;
use cardbench::Result;

use cli::Cli;

fn main() -> ExitCode {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("{}", user_friendly_message(&e));
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every phase succeeded
fn run(cli: &Cli) -> Result<bool> {
    let loaded = match &cli.config {
        Some(path) => BenchConfig::load_from(path)?,
        None => BenchConfig::load()?,
    };
    let config = cli.apply(loaded);
    config.validate()?;

    if cli.save_config {
        match &cli.config {
            Some(path) => config.save_to(path)?,
            None => {
                let path = config.save()?;
                log::info!("Configuration saved to {}", path.display());
            }
        }
    }

    let sink = ConsoleSink::new();
    let mut mount = DirectoryMount::new();
    let report = run_benchmark(&config, &mut mount, &sink)?;

    if cli.json {
        println!("{}", report.to_json()?);
    } else {
        println!("{}", report.summary());
    }
    Ok(report.succeeded())
}
