use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use granite_fe::catalog::MemoryCatalog;
use granite_fe::query::NullPlanner;
use granite_fe::{Config, ConnectionPool, Gateway, StateMachine};

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "granite_fe=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Granite FE gateway");

    let config = Config::load()?;
    info!("Configuration loaded: {:?}", config);

    let catalog = Arc::new(MemoryCatalog::new());
    for user in &config.users {
        catalog.add_user(&user.username, &user.password, &user.namespace);
    }

    let machine = Arc::new(StateMachine::new(
        catalog,
        Arc::new(NullPlanner),
        Arc::new(ConnectionPool::new()),
        &config,
    ));

    let gateway = Gateway::new(machine, &config);
    info!("MySQL gateway listening on port {}", config.mysql_port);
    gateway.serve()?;

    info!("Shutting down Granite FE");
    Ok(())
}
