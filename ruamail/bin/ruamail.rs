#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

use clap::Parser;
use ruamail::{Cli, Controller};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let controller = Controller::from_cli(&cli)?;

    controller.run(cli.action()).await
}
