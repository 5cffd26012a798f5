use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde_json::Value;
use std::time::Duration;

use crate::archive::download::RosterSource;
use crate::archive::fetch::{HistoryPage, HistorySource};
use crate::archive::partition::ConversationKind;
use crate::error::ArchiveError;

/// Blocking Slack Web API client. Every call is a single attempt.
pub struct SlackClient {
    http: Client,
    base_url: String,
    token: String,
}

pub fn history_method(kind: ConversationKind) -> &'static str {
    match kind {
        ConversationKind::Channel => "channels.history",
        ConversationKind::Group => "groups.history",
        ConversationKind::Im => "im.history",
    }
}

/// Unwraps the `{"ok": ..}` envelope every Web API response carries.
pub fn check_envelope(method: &str, body: Value) -> Result<Value, ArchiveError> {
    if body.get("ok").and_then(Value::as_bool) == Some(true) {
        return Ok(body);
    }
    let reason = body
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("response without ok=true")
        .to_string();
    Err(ArchiveError::Api {
        method: method.to_string(),
        reason,
    })
}

fn take_list(method: &str, mut body: Value, field: &str) -> Result<Vec<Value>> {
    match body.get_mut(field).map(Value::take) {
        Some(Value::Array(items)) => Ok(items),
        _ => Err(ArchiveError::Api {
            method: method.to_string(),
            reason: format!("response missing `{field}` list"),
        }
        .into()),
    }
}

impl SlackClient {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn call(&self, method: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}/{method}", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .with_context(|| format!("request to {method} failed"))?;
        if !response.status().is_success() {
            return Err(ArchiveError::Api {
                method: method.to_string(),
                reason: format!("http status {}", response.status()),
            }
            .into());
        }
        let body: Value = response
            .json()
            .with_context(|| format!("{method} returned invalid json"))?;
        Ok(check_envelope(method, body)?)
    }

    fn list(&self, method: &str, field: &str) -> Result<Vec<Value>> {
        let body = self.call(method, &[])?;
        take_list(method, body, field)
    }
}

impl RosterSource for SlackClient {
    fn team_domain(&self) -> Result<String> {
        let body = self.call("team.info", &[])?;
        body.get("team")
            .and_then(|team| team.get("domain"))
            .and_then(Value::as_str)
            .filter(|domain| !domain.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                ArchiveError::Api {
                    method: "team.info".to_string(),
                    reason: "response missing team.domain".to_string(),
                }
                .into()
            })
    }

    fn list_users(&self) -> Result<Vec<Value>> {
        self.list("users.list", "members")
    }

    fn list_channels(&self) -> Result<Vec<Value>> {
        self.list("channels.list", "channels")
    }

    fn list_groups(&self) -> Result<Vec<Value>> {
        self.list("groups.list", "groups")
    }

    fn list_ims(&self) -> Result<Vec<Value>> {
        self.list("im.list", "ims")
    }
}

impl HistorySource for SlackClient {
    fn history(
        &self,
        kind: ConversationKind,
        conversation_id: &str,
        oldest: f64,
        latest: Option<&str>,
        count: u32,
    ) -> Result<HistoryPage> {
        let method = history_method(kind);
        let mut query = vec![
            ("channel", conversation_id.to_string()),
            ("oldest", oldest.to_string()),
            ("count", count.to_string()),
        ];
        if let Some(latest) = latest {
            query.push(("latest", latest.to_string()));
        }
        let body = self.call(method, &query)?;
        serde_json::from_value(body).with_context(|| format!("{method} returned an unexpected page"))
    }
}
