use anyhow::Result;
use tracing::{info, warn};
use treewatch::{Client, ClientConfig, Credentials, SubscriptionOptions};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let base_url =
        std::env::var("BASE_URL").unwrap_or_else(|_| "http://localhost/woopsa".to_string());
    let paths = std::env::var("WATCH_PATHS").unwrap_or_else(|_| "/".to_string());

    let credentials = match (
        std::env::var("WOOPSA_USER"),
        std::env::var("WOOPSA_PASSWORD"),
    ) {
        (Ok(user), Ok(password)) => Some(Credentials::new(user, password)),
        _ => None,
    };

    let config = ClientConfig::builder()
        .base_url(base_url.clone())
        .maybe_credentials(credentials)
        .build();
    let client = Client::http(config)?;

    client.on_error(|class, err| {
        warn!(class = %class, error = %err, "Request failed");
    });

    info!(base_url = %base_url, "Watching remote object tree");

    for path in paths.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let watched = path.to_string();
        let handle = client
            .on_change(
                path,
                move |value| info!(path = %watched, value = %value, "Value changed"),
                SubscriptionOptions::default(),
            )
            .await?;
        info!(path = %path, handle = %handle, "Subscribed");
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    client.shutdown();

    Ok(())
}
