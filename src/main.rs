pub mod builtins;
pub mod error;
pub mod execution;
pub mod history;
pub mod parser;
pub mod pipeline;
pub mod session;

use std::error::Error;
use std::io;

use tracing_subscriber::EnvFilter;

use crate::execution::Streams;
use crate::session::Session;

/// Environment variable holding the `tracing` filter, e.g. `PIPESH_LOG=debug`.
const LOG_ENV: &str = "PIPESH_LOG";

fn main() -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("off"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let mut session = Session::new(Streams::inherit()?);
    session.run(io::stdin().lock())?;

    Ok(())
}
