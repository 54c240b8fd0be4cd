use std::error::Error;

use tracing_subscriber::EnvFilter;
use xfeed_sdk::{ClientConfig, FeedClient};

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let server_uri = "https://REPLACE_WITH_FEED_HOST".to_string();
    let config = ClientConfig::new(server_uri).with_client_name("REPLACE_WITH_CLIENT_NAME");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let client = FeedClient::connect(config).await?;
        let session = client.session()?;

        for sport in session.entities("en").await? {
            println!(
                "sport_id={} name={} market_types={}",
                sport.sport_id,
                sport.name,
                sport.market_types.len()
            );
        }

        let (events, markets) = session.events_feed().await?;
        let event_reader = tokio::spawn(async move {
            while let Some(envelope) = events.recv().await {
                println!(
                    "event id={} action={:?} generated_at={}",
                    envelope.event_diff.id, envelope.action, envelope.generated_at
                );
            }
        });
        while let Some(envelope) = markets.recv().await {
            println!(
                "market event_id={} id={} action={:?} suspended={}",
                envelope.event_id,
                envelope.market_diff.id,
                envelope.action,
                envelope.market_diff.suspended
            );
        }
        event_reader.await?;

        println!("feed closed; stats={:?}", session.stats());
        client.close();
        Ok::<(), Box<dyn Error>>(())
    })
}
