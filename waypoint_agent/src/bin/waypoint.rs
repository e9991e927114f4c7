//! Waypoint command-line entry point.

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    waypoint_agent::cli::run().await
}
