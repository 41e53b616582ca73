//! Feed exporter CLI

use clap::Parser;
use feed_exporter::cli::{Cli, Runner};
use feed_exporter::logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let runner = Runner::new(cli);
    if let Err(e) = runner.run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
