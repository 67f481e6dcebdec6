use clap::Parser;
use nwm_streamflow::cli::{self, Args};
use std::process;

fn main() {
    let args = Args::parse();

    let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("Failed to create async runtime: {}", e);
        process::exit(1);
    });

    let result = runtime.block_on(async {
        tokio::select! {
            result = cli::run(args) => result,
            signal = tokio::signal::ctrl_c() => {
                eprintln!("\nReceived CTRL+C, aborting retrieval...");
                match signal {
                    Ok(()) => Err(anyhow::anyhow!("Retrieval interrupted by user")),
                    Err(e) => Err(anyhow::anyhow!("Failed to listen for CTRL+C: {}", e)),
                }
            }
        }
    });

    match result {
        Ok(_stats) => process::exit(0),
        Err(error) => {
            eprintln!("Error: {:#}", error);
            process::exit(1);
        }
    }
}
