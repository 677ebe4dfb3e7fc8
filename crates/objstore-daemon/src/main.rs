use anyhow::Result;

use objstore_daemon::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry = telemetry::init("objstore-daemon")?;
    objstore_daemon::server::run().await
}
