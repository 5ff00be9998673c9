use tracing::debug;
use wss_probe::{config::DEFAULT_ENDPOINT, probe::client::ConnectionProbe};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let mut connection = ConnectionProbe::reporting(std::io::stdout()).start(DEFAULT_ENDPOINT)?;

    let state = connection.settled().await;
    debug!(url = %connection.url(), %state, "probe settled");

    // No close handling: an open connection keeps the process alive.
    connection.closed().await;
    Ok(())
}
