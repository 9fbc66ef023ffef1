//! Snapshot hub adapter.
//!
//! Queries the hub's GraphQL endpoint for the latest active proposals of a space.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use snapbot_core::{domain::Proposal, errors::Error, ports::ProposalSource, FetchError, Result};

const PROPOSALS_QUERY: &str = "query Proposals($space: String!, $first: Int!) {
  proposals(
    where: { space: $space, state: \"active\" }
    first: $first
    orderBy: \"created\"
    orderDirection: desc
  ) {
    id
    title
    end
  }
}";

#[derive(Clone, Debug)]
pub struct SnapshotClient {
    endpoint: String,
    limit: usize,
    http: reqwest::Client,
}

impl SnapshotClient {
    pub fn new(endpoint: impl Into<String>, limit: usize, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("snapbot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;
        Ok(Self {
            endpoint: endpoint.into(),
            limit,
            http,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, space: &str) -> std::result::Result<Value, FetchError> {
        let resp = self
            .http
            .post(&self.endpoint)
            .json(&request_body(space, self.limit))
            .send()
            .await
            .map_err(|e| FetchError::new(describe_reqwest(&e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::new(format!(
                "hub returned {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        resp.json()
            .await
            .map_err(|e| FetchError::new(format!("invalid JSON from hub: {e}")))
    }
}

#[async_trait]
impl ProposalSource for SnapshotClient {
    async fn open_proposals(&self, space: &str) -> std::result::Result<Vec<Proposal>, FetchError> {
        let body = self.post(space).await?;
        let proposals = parse_proposals(&body)?;
        debug!(%space, count = proposals.len(), "hub query ok");
        Ok(proposals)
    }
}

/// The JSON body posted to the hub. The space travels as a variable, never spliced
/// into the query text.
pub fn request_body(space: &str, limit: usize) -> Value {
    json!({
        "query": PROPOSALS_QUERY,
        "variables": { "space": space, "first": limit },
    })
}

/// Extract `data.proposals` from a hub response.
pub fn parse_proposals(body: &Value) -> std::result::Result<Vec<Proposal>, FetchError> {
    if let Some(errors) = body.get("errors").and_then(Value::as_array) {
        if let Some(first) = errors.first() {
            let msg = first
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown GraphQL error");
            return Err(FetchError::new(format!("hub error: {msg}")));
        }
    }

    let Some(items) = body.pointer("/data/proposals") else {
        return Err(FetchError::new("response has no data.proposals"));
    };
    let Some(items) = items.as_array() else {
        return Err(FetchError::new("data.proposals is not a list"));
    };

    items
        .iter()
        .map(|item| {
            serde_json::from_value::<Proposal>(item.clone())
                .map_err(|e| FetchError::new(format!("malformed proposal: {e}")))
        })
        .collect()
}

fn describe_reqwest(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "request timed out".to_string()
    } else if e.is_connect() {
        "could not connect to hub".to_string()
    } else {
        format!("request failed: {e}")
    }
}
