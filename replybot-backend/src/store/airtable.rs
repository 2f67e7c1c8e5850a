//! Reply ledger kept in an Airtable table.
//!
//! Rows use the column names of the existing reply log plus a `dedup_key`
//! column. Rows written before that column existed are matched on
//! `mentioned_conversation_tweet_id`.

use super::DedupLedger;
use crate::error::StoreError;
use crate::models::LedgerRecord;
use crate::twitter::percent_encode;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Airtable's maximum page size
const PAGE_SIZE: &str = "100";

/// Safety stop for the full-table scan
const MAX_SCAN_PAGES: usize = 500;

#[derive(Debug, Serialize, Deserialize, Default)]
struct LedgerFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    dedup_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mentioned_conversation_tweet_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mentioned_conversation_tweet_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tweet_response_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tweet_response_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tweet_response_created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mentioned_at: Option<String>,
}

impl LedgerFields {
    fn matches(&self, key: &str) -> bool {
        match &self.dedup_key {
            Some(stored) => stored == key,
            None => self.mentioned_conversation_tweet_id.as_deref() == Some(key),
        }
    }
}

impl From<&LedgerRecord> for LedgerFields {
    fn from(record: &LedgerRecord) -> Self {
        LedgerFields {
            dedup_key: Some(record.dedup_key.clone()),
            mentioned_conversation_tweet_id: Some(record.target_post_id.clone()),
            mentioned_conversation_tweet_text: Some(record.target_text.clone()),
            tweet_response_id: Some(record.reply_post_id.clone()),
            tweet_response_text: Some(record.reply_text.clone()),
            tweet_response_created_at: Some(record.replied_at.clone()),
            mentioned_at: record.mentioned_at.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    records: Vec<ListedRecord>,
    offset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListedRecord {
    #[serde(default)]
    fields: LedgerFields,
}

#[derive(Debug, Serialize)]
struct CreateRequest {
    fields: LedgerFields,
}

pub struct AirtableLedger {
    client: reqwest::Client,
    table_url: String,
    api_key: String,
}

impl AirtableLedger {
    pub fn new(
        client: reqwest::Client,
        api_base: &str,
        base_key: &str,
        table_name: &str,
        api_key: &str,
    ) -> Self {
        Self {
            client,
            table_url: format!(
                "{}/{}/{}",
                api_base.trim_end_matches('/'),
                base_key,
                percent_encode(table_name)
            ),
            api_key: api_key.to_string(),
        }
    }

    async fn list_page(&self, offset: Option<&str>) -> Result<ListResponse, StoreError> {
        let mut query: Vec<(&str, &str)> = vec![("pageSize", PAGE_SIZE)];
        if let Some(offset) = offset {
            query.push(("offset", offset));
        }

        let response = self
            .client
            .get(&self.table_url)
            .bearer_auth(&self.api_key)
            .query(&query)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(format!("Airtable request failed: {}", e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(StoreError::Unavailable(format!(
                "Airtable list returned {}: {}",
                status,
                crate::text::shorten_for_log(&body, 200)
            )));
        }
        serde_json::from_str(&body)
            .map_err(|e| StoreError::Corrupt(format!("Airtable list response: {}", e)))
    }
}

#[async_trait]
impl DedupLedger for AirtableLedger {
    async fn insert(&self, record: &LedgerRecord) -> Result<(), StoreError> {
        if self.contains(&record.dedup_key).await? {
            log::warn!(
                "[store] Airtable ledger already has key {}, reply {} not recorded",
                record.dedup_key,
                record.reply_post_id
            );
            return Ok(());
        }

        let response = self
            .client
            .post(&self.table_url)
            .bearer_auth(&self.api_key)
            .json(&CreateRequest {
                fields: LedgerFields::from(record),
            })
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(format!("Airtable request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Unavailable(format!(
                "Airtable insert returned {}: {}",
                status,
                crate::text::shorten_for_log(&body, 200)
            )));
        }
        Ok(())
    }

    async fn contains(&self, dedup_key: &str) -> Result<bool, StoreError> {
        let mut offset: Option<String> = None;
        for _ in 0..MAX_SCAN_PAGES {
            let page = self.list_page(offset.as_deref()).await?;
            if page.records.iter().any(|r| r.fields.matches(dedup_key)) {
                return Ok(true);
            }
            match page.offset {
                Some(next) => offset = Some(next),
                None => return Ok(false),
            }
        }
        Err(StoreError::Unavailable(format!(
            "Airtable scan exceeded {} pages",
            MAX_SCAN_PAGES
        )))
    }
}
