mod builtin;
mod cli;
mod common;
mod config;
mod exec;
mod job;
mod parser;
mod rsh;
mod sh;
mod signal;

use cli::*;
use std::process;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() {
    // silent unless RUST_LOG says otherwise
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let mut client = match Cli::new(config::Config::from_env()) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("quash: {}", e);
            process::exit(1);
        }
    };
    client.go();
}
