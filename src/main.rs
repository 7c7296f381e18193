//! MirrorSync CLI - incremental backup/mirror tool

use clap::Parser;
use mirrorsync::config::{CliArgs, ConfigParser};
use mirrorsync::core::SyncOrchestrator;

fn main() {
    let args = CliArgs::parse();

    let log_path = match mirrorsync::logging::init(&args.log_dir, args.verbose) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Error: cannot initialize logging: {e}");
            std::process::exit(1);
        }
    };

    println!("Starting MirrorSync");

    let mut parser = ConfigParser::new();
    let config = match parser.parse(&args.config, &args.cache_dir, &args.log_dir) {
        Ok(config) => config,
        Err(_) => {
            for error in parser.errors() {
                eprintln!("Config Error: {error}");
                tracing::error!("{error}");
            }
            eprintln!("Check errors and fix them, exiting sync.");
            std::process::exit(1);
        }
    };
    for info in parser.infos() {
        println!("Config Info: {info}");
        tracing::info!("{info}");
    }
    println!("Config parsed successfully.");
    tracing::info!("config parsed successfully");

    let orchestrator = match SyncOrchestrator::new(config, args.assume_continue) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {e}");
            tracing::error!("{e}");
            std::process::exit(1);
        }
    };

    match orchestrator.run() {
        Ok(report) => {
            report.print_summary();
            println!("Logs saved to: {}", log_path.display());
            println!("Sync complete");
        }
        Err(e) => {
            eprintln!("Error: {e}");
            tracing::error!("{e}");
            std::process::exit(1);
        }
    }
}
