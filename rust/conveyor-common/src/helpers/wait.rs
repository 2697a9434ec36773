use anyhow::{anyhow, Result};
use std::{future::Future, time::Duration};

/// Repeatedly evaluates `condition`, sleeping `interval` between checks,
/// until it yields `true` or `attempts` checks have been made.
pub async fn wait_until<F, Fut>(attempts: usize, interval: Duration, mut condition: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..attempts {
        if condition().await {
            return Ok(());
        }
        tokio::time::sleep(interval).await;
    }
    Err(anyhow!("Condition not met after {} checks", attempts))
}
