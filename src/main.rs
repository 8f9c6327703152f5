// shadowdb server entry point.

use shadowdb::config::Configuration;
use shadowdb::service::server::Server;
use shadowdb::service::ServiceContext;
use shadowdb::Result;
use tracing::{info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => Configuration::from_file(path)?,
        None => Configuration::default(),
    };

    let level = config.log_level.parse::<Level>().unwrap_or(Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    info!("Starting shadowdb {}", shadowdb::VERSION);
    info!(
        "Version history collection {}:{}",
        config.version_history.database, config.version_history.collection
    );

    let port = config.port;
    let ctx = ServiceContext::new(config);
    let server = Server::bind(ctx, &format!("0.0.0.0:{}", port)).await?;
    server.run().await
}
