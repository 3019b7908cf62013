use std::future::Future;

use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use tracing::debug;

use parley_types::api::HistoryQuery;
use parley_types::{Message, NewMessage};

use crate::error::ClientError;

/// Where older pages come from.
pub trait HistorySource {
    /// Ascending page of at most `limit` messages strictly older than
    /// `before` (the newest page when `before` is `None`). Empty means there
    /// is nothing earlier.
    fn fetch_before(
        &self,
        before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<Message>, ClientError>> + Send;
}

/// History over the server's `/api/messages` endpoint.
#[derive(Debug, Clone)]
pub struct HttpHistory {
    client: Client,
    base_url: String,
}

impl HttpHistory {
    /// `base_url` is the server root, e.g. `http://localhost:5000`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Store a public message over HTTP instead of the live connection.
    pub async fn post_message(&self, message: &NewMessage) -> Result<Message, ClientError> {
        let resp = self
            .client
            .post(format!("{}/api/messages", self.base_url))
            .json(message)
            .send()
            .await?;

        Ok(ok_or_status(resp).await?.json().await?)
    }
}

impl HistorySource for HttpHistory {
    async fn fetch_before(&self, before: Option<DateTime<Utc>>, limit: u32) -> Result<Vec<Message>, ClientError> {
        let query = HistoryQuery {
            before,
            limit: Some(limit),
        };
        let resp = self
            .client
            .get(format!("{}/api/messages", self.base_url))
            .query(&query)
            .send()
            .await?;

        let page: Vec<Message> = ok_or_status(resp).await?.json().await?;
        debug!("Fetched {} messages before {:?}", page.len(), before);
        Ok(page)
    }
}

async fn ok_or_status(resp: Response) -> Result<Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ClientError::Status {
        status: status.as_u16(),
        body,
    })
}
