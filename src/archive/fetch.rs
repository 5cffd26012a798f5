use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::thread;
use std::time::Duration;

use crate::archive::partition::ConversationKind;
use crate::archive::timestamp::ts_str;
use crate::archive::warn::{self, WarnEvent};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryPage {
    #[serde(default)]
    pub messages: Vec<Value>,
    #[serde(default)]
    pub has_more: bool,
}

/// Paginated message history of one conversation.
pub trait HistorySource {
    fn history(
        &self,
        kind: ConversationKind,
        conversation_id: &str,
        oldest: f64,
        latest: Option<&str>,
        count: u32,
    ) -> Result<HistoryPage>;
}

#[derive(Debug, Clone, Copy)]
pub struct PaginatedFetcher {
    pub page_size: u32,
    pub delay: Duration,
}

impl PaginatedFetcher {
    pub fn new(page_size: u32, delay: Duration) -> Self {
        Self { page_size, delay }
    }

    /// Every message newer than `watermark`, pages concatenated in the order
    /// the source returned them. Request errors are not retried.
    pub fn fetch(
        &self,
        source: &dyn HistorySource,
        kind: ConversationKind,
        conversation_id: &str,
        watermark: f64,
    ) -> Result<Vec<Value>> {
        let mut messages: Vec<Value> = Vec::new();
        let mut latest: Option<String> = None;

        loop {
            let page = source
                .history(
                    kind,
                    conversation_id,
                    watermark,
                    latest.as_deref(),
                    self.page_size,
                )
                .with_context(|| format!("history request failed for {kind} {conversation_id}"))?;
            let received = page.messages.len();
            messages.extend(page.messages);

            if !page.has_more {
                break;
            }
            let cursor = messages.last().and_then(ts_str).map(str::to_string);
            if received == 0 || cursor.is_none() || cursor == latest {
                warn::emit(WarnEvent {
                    code: "PAGINATION_STALLED",
                    stage: "fetch",
                    action: "stop-paging",
                    path: conversation_id,
                    reason: "has_more-without-new-cursor",
                    err: "",
                });
                break;
            }
            latest = cursor;
            thread::sleep(self.delay);
        }

        Ok(messages)
    }
}
