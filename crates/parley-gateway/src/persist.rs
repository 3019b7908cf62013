use tracing::error;

use parley_types::ChatError;

/// Run a blocking store call off the async runtime.
///
/// Store errors and join errors both become [`ChatError::Persistence`],
/// tagged with `operation` ("send message", "join chat", ...).
pub async fn blocking<F, T>(operation: &'static str, f: F) -> Result<T, ChatError>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            error!("Store error during {}: {:#}", operation, e);
            Err(ChatError::persistence(operation, format!("{:#}", e)))
        }
        Err(e) => {
            error!("spawn_blocking join error during {}: {}", operation, e);
            Err(ChatError::persistence(operation, e))
        }
    }
}
