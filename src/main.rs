//! fleetwatch entry point.

use fleetwatch_lib::cli::{self, Cli};
use fleetwatch_lib::core::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli::execute(cli).await
}
