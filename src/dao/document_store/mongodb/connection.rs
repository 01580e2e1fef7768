use std::time::Duration;

use mongodb::{Client, Database, bson::doc, options::ClientOptions};
use tokio::time::sleep;
use tracing::warn;

use super::error::{MongoDaoError, MongoResult};

struct RetryPolicy;

impl RetryPolicy {
    const MAX_ATTEMPTS: u32 = 10;
    const INITIAL_DELAY: Duration = Duration::from_millis(250);
    const MAX_DELAY: Duration = Duration::from_secs(5);

    fn next_delay(current: Duration) -> Duration {
        (current * 2).min(Self::MAX_DELAY)
    }
}

/// Build a client and wait until the deployment answers a ping, backing off between tries.
pub async fn establish_connection(
    options: &ClientOptions,
    database_name: &str,
) -> MongoResult<(Client, Database)> {
    let client = Client::with_options(options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(database_name);

    let mut attempts = 0;
    let mut delay = RetryPolicy::INITIAL_DELAY;
    while let Err(err) = database.run_command(doc! { "ping": 1 }).await {
        attempts += 1;
        if attempts >= RetryPolicy::MAX_ATTEMPTS {
            return Err(MongoDaoError::InitialPing {
                attempts,
                source: err,
            });
        }
        warn!(
            attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "MongoDB not reachable yet; retrying"
        );
        sleep(delay).await;
        delay = RetryPolicy::next_delay(delay);
    }

    Ok((client, database))
}
