#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

#[cfg(not(unix))]
compile_error!("Only unix is currently supported");

use std::path::PathBuf;

use hermod::config;

/// Usage: `hermod [CONFIG]`
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = config::find_config_file(std::env::args_os().nth(1).map(PathBuf::from))?;
    let hermod = config::load(&config_path)?;

    hermod.run().await
}
