//! MediaWiki Action API client.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use url::Url;

use super::types::{AllImagesQuery, ApiResponse, RecentChange, RecentChangesQuery, RevisionsQuery};
use super::{OriginClient, OriginError, RetryPolicy};
use crate::models::{ChangeEntry, FileInfo, PageId, RevisionId, RevisionRecord};

/// Default user agent. Wikimedia requires a descriptive one.
pub const USER_AGENT: &str = concat!(
    "wikisync/",
    env!("CARGO_PKG_VERSION"),
    " (incremental mirror; +https://github.com/monokrome)"
);

/// Seconds of replication lag the client tolerates before the server refuses.
const MAXLAG_SECONDS: u32 = 5;

/// Revisions per page of a `prop=revisions` request that includes content.
const REVISION_BATCH: u32 = 50;

type Params = Vec<(String, String)>;

/// Origin client over `api.php`.
#[derive(Clone)]
pub struct MediaWikiClient {
    client: Client,
    api_url: Url,
    request_delay: Duration,
    retry: RetryPolicy,
}

impl MediaWikiClient {
    pub fn new(
        api_url: &str,
        user_agent: Option<&str>,
        timeout: Duration,
        request_delay: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, OriginError> {
        let api_url =
            Url::parse(api_url).map_err(|e| OriginError::Decode(format!("{}: {}", api_url, e)))?;
        let client = Client::builder()
            .user_agent(user_agent.unwrap_or(USER_AGENT))
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            client,
            api_url,
            request_delay,
            retry,
        })
    }

    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    /// One GET against the API, retried per the policy.
    async fn query<Q: DeserializeOwned>(
        &self,
        label: &str,
        params: &Params,
    ) -> Result<ApiResponse<Q>, OriginError> {
        let response = self
            .retry
            .run(label, || async {
                let resp = self
                    .client
                    .get(self.api_url.clone())
                    .query(&[
                        ("action", "query"),
                        ("format", "json"),
                        ("formatversion", "2"),
                    ])
                    .query(&[("maxlag", MAXLAG_SECONDS.to_string())])
                    .query(params)
                    .send()
                    .await?;

                let status = resp.status();
                if !status.is_success() {
                    return Err(OriginError::Status {
                        status: status.as_u16(),
                        url: resp.url().to_string(),
                    });
                }

                let body = resp.bytes().await?;
                let parsed: ApiResponse<Q> = serde_json::from_slice(&body)?;
                if let Some(error) = &parsed.error {
                    return Err(OriginError::Api {
                        code: error.code.clone(),
                        info: error.info.clone(),
                    });
                }
                Ok(parsed)
            })
            .await;

        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }
        response
    }

    /// Follow `continue` until exhausted, collecting what `extract` yields per page.
    async fn query_all<Q, T, F>(
        &self,
        label: &str,
        base: Params,
        mut extract: F,
    ) -> Result<Vec<T>, OriginError>
    where
        Q: DeserializeOwned,
        F: FnMut(Q) -> Vec<T>,
    {
        let mut items = Vec::new();
        let mut continuation: Option<BTreeMap<String, serde_json::Value>> = None;

        loop {
            let mut params = base.clone();
            if let Some(cont) = &continuation {
                params.extend(cont.iter().map(|(k, v)| {
                    let value = match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), value)
                }));
            }

            let response: ApiResponse<Q> = self.query(label, &params).await?;
            if let Some(query) = response.query {
                items.extend(extract(query));
            }

            match response.continuation {
                Some(next) => continuation = Some(next),
                None => break,
            }
        }

        Ok(items)
    }
}

fn params(pairs: &[(&str, &str)]) -> Params {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[async_trait]
impl OriginClient for MediaWikiClient {
    async fn changes_since(&self, since: DateTime<Utc>) -> Result<Vec<ChangeEntry>, OriginError> {
        let start = since.to_rfc3339_opts(SecondsFormat::Secs, true);
        let base = params(&[
            ("list", "recentchanges"),
            ("rcstart", &start),
            ("rcdir", "newer"),
            ("rctype", "new|edit|log"),
            ("rcprop", "title|ids|timestamp|loginfo"),
            ("rclimit", "max"),
        ]);

        let entries = self
            .query_all("recentchanges", base, |q: RecentChangesQuery| {
                q.recentchanges
                    .into_iter()
                    .filter_map(RecentChange::into_entry)
                    .collect()
            })
            .await?;

        tracing::debug!("Change feed since {}: {} entries", start, entries.len());
        Ok(entries)
    }

    async fn revisions_since(
        &self,
        page_id: PageId,
        after: Option<RevisionId>,
    ) -> Result<Vec<RevisionRecord>, OriginError> {
        let page = page_id.to_string();
        let limit = REVISION_BATCH.to_string();
        let mut base = params(&[
            ("prop", "revisions"),
            ("pageids", &page),
            ("rvprop", "ids|flags|timestamp|user|userid|size|sha1|comment|tags|content"),
            ("rvslots", "main"),
            ("rvdir", "newer"),
            ("rvlimit", &limit),
        ]);
        if let Some(after) = after {
            // rvstartid is inclusive; the known revision is filtered below.
            base.push(("rvstartid".to_string(), after.to_string()));
        }

        let mut missing = false;
        let records = self
            .query_all("revisions", base, |q: RevisionsQuery| {
                let mut out = Vec::new();
                for page in q.pages {
                    if page.missing || page.pageid.is_none() {
                        missing = true;
                        continue;
                    }
                    out.extend(page.revisions.into_iter().map(|r| r.into_record(page_id)));
                }
                out
            })
            .await?;

        if missing && records.is_empty() {
            return Err(OriginError::NotFound(format!("page {}", page_id)));
        }

        let mut records: Vec<RevisionRecord> = records
            .into_iter()
            .filter(|r| after.map_or(true, |a| r.revision_id > a))
            .collect();
        records.sort_by_key(|r| r.revision_id);
        Ok(records)
    }

    async fn all_file_metadata(&self) -> Result<Vec<FileInfo>, OriginError> {
        let base = params(&[
            ("list", "allimages"),
            ("aiprop", "timestamp|url|size|mime|sha1"),
            ("ailimit", "max"),
        ]);

        self.query_all("allimages", base, |q: AllImagesQuery| {
            q.allimages.into_iter().map(FileInfo::from).collect()
        })
        .await
    }

    async fn download(&self, file: &FileInfo) -> Result<Vec<u8>, OriginError> {
        let label = format!("download {}", file.name);
        let bytes = self
            .retry
            .run(&label, || async {
                let resp = self.client.get(&file.url).send().await?;
                let status = resp.status();
                if status == reqwest::StatusCode::NOT_FOUND {
                    return Err(OriginError::NotFound(file.url.clone()));
                }
                if !status.is_success() {
                    return Err(OriginError::Status {
                        status: status.as_u16(),
                        url: file.url.clone(),
                    });
                }
                Ok(resp.bytes().await?.to_vec())
            })
            .await;

        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_api_url() {
        let result = MediaWikiClient::new(
            "not a url",
            None,
            Duration::from_secs(5),
            Duration::ZERO,
            RetryPolicy::none(),
        );
        assert!(matches!(result, Err(OriginError::Decode(_))));
    }

    #[test]
    fn test_user_agent_names_the_crate() {
        assert!(USER_AGENT.starts_with("wikisync/"));
    }
}
