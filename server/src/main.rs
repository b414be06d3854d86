//! Dolmetscher Server – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet den Server.

use anyhow::Result;
use dolmetscher_observability::logging_initialisieren;
use dolmetscher_server::{config::ServerConfig, Server};

#[tokio::main]
async fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad =
        std::env::var("DOLMETSCHER_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = ServerConfig::laden(&config_pfad)?;

    logging_initialisieren(&config.logging.level, &config.logging.format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        "Dolmetscher Server wird initialisiert"
    );

    Server::neu(config)?.starten().await
}
