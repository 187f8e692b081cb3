//! Resolves the node a client would talk to and prints what the cluster looks like from there.
//!
//! ```text
//! select_node [settings.toml]
//! ```
//!
//! Without a settings file, a standalone node on `localhost:2113` is used.
#[macro_use]
extern crate log;

use eventstore_topology::{Client, ClientSettings};
use std::time::Duration;

fn load_settings() -> eyre::Result<ClientSettings> {
    match std::env::args().nth(1) {
        None => Ok(ClientSettings::default()),
        Some(path) => {
            let content = std::fs::read_to_string(&path)?;
            let settings = toml::from_str(&content)?;

            info!("Settings loaded from {}", path);

            Ok(settings)
        }
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    pretty_env_logger::init();

    let settings = load_settings()?;
    debug!("{:?}", settings);

    if let Some(creds) = settings.default_authenticated_user() {
        info!("Gossip requests are authenticated as {}", creds.login());
    }

    let client = Client::new(settings)?;
    let node = client.current_selected_node().await?;

    println!("Selected node: {}", node);

    if client.settings().cluster_mode().is_standalone() {
        return Ok(());
    }

    match client.read_gossip().await {
        Ok(members) => {
            for member in members {
                println!(
                    "  {} {:?} alive={} ({})",
                    member.http_end_point, member.state, member.is_alive, member.instance_id
                );
            }
        }

        Err(e) => warn!("Failed to read gossip from {}: {}", node, e),
    }

    // Selection is reused within the discovery interval.
    tokio::time::sleep(Duration::from_millis(100)).await;
    println!("Selected node: {}", client.current_selected_node().await?);

    Ok(())
}
