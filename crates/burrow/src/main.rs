use anyhow::Result;
use burrow_core::errors::BurrowError;
use clap::Parser;

mod cli;
mod commands;

#[tokio::main]
async fn main() -> Result<()> {
    let parsed = cli::Cli::parse();

    match parsed.dispatch().await {
        Ok(()) => Ok(()),
        Err(err) => {
            // Rejected input exits 2; remote and I/O failures fall through to 1.
            if let Some(burrow_error) = err.downcast_ref::<BurrowError>() {
                if burrow_error.is_usage_error() {
                    eprintln!("Error: {:#}", err);
                    std::process::exit(2);
                }
            }
            Err(err)
        }
    }
}
