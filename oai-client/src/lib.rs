//! OAI-PMH over HTTP.
//!
//! [`OaiClient`] implements [`ProtocolAdapter`] with plain `GET` requests
//! carrying the `verb` query parameter, following `resumptionToken`s until a
//! listing is exhausted. [`OaiConnector`] shares one connection pool across
//! every endpoint it connects to.

#![deny(clippy::print_stdout, clippy::print_stderr)]

mod parse;
mod xml;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use oxomo_core::{
    AdapterConnector, HttpConfig, Identify, ProtocolAdapter, ProtocolError, Record, RecordHeader,
    SetSpec,
};
use url::Url;

use crate::parse::Page;
use crate::xml::Element;

/// `<error code>` values that mean "empty result" rather than failure.
const NO_RECORDS_MATCH: &str = "noRecordsMatch";
const NO_SET_HIERARCHY: &str = "noSetHierarchy";

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub timeout: Duration,
    pub user_agent: String,
}

impl From<&HttpConfig> for ClientOptions {
    fn from(http: &HttpConfig) -> Self {
        Self {
            timeout: Duration::from_secs(http.timeout_secs),
            user_agent: http.user_agent.clone(),
        }
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from(&HttpConfig::default())
    }
}

fn build_http(options: &ClientOptions) -> Result<reqwest::Client, ProtocolError> {
    reqwest::Client::builder()
        .timeout(options.timeout)
        .user_agent(options.user_agent.clone())
        .build()
        .map_err(|e| ProtocolError::transport_with_source("failed to build HTTP client", false, e))
}

/// Client for one OAI-PMH base URL.
#[derive(Debug, Clone)]
pub struct OaiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl OaiClient {
    pub fn new(base_url: &str, options: &ClientOptions) -> Result<Self, ProtocolError> {
        Self::with_client(build_http(options)?, base_url)
    }

    fn with_client(http: reqwest::Client, base_url: &str) -> Result<Self, ProtocolError> {
        let base_url = Url::parse(base_url).map_err(|e| {
            ProtocolError::malformed_with_source(format!("invalid base URL {base_url:?}"), e)
        })?;
        Ok(Self { http, base_url })
    }

    async fn request(&self, params: &[(&str, &str)]) -> Result<Element, ProtocolError> {
        let mut url = self.base_url.clone();
        url.query_pairs_mut().extend_pairs(params);
        tracing::debug!(url = %url, "OAI-PMH request");

        let response = self.http.get(url.clone()).send().await.map_err(|e| {
            ProtocolError::transport_with_source(format!("GET {url} failed"), e.is_timeout(), e)
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProtocolError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.text().await.map_err(|e| {
            ProtocolError::transport_with_source(
                format!("reading body of {url} failed"),
                e.is_timeout(),
                e,
            )
        })?;

        let root = xml::parse(&body)?;
        parse::check_envelope(&root)?;
        Ok(root)
    }

    /// Walk a paged listing to the end.
    ///
    /// `empty_code` is the OAI error code meaning "no items". A token seen
    /// twice is treated as a malformed response to avoid looping forever.
    async fn collect_pages<T>(
        &self,
        first: &[(&str, &str)],
        verb: &str,
        empty_code: &str,
        decode: fn(&Element) -> Result<Page<T>, ProtocolError>,
    ) -> Result<Vec<T>, ProtocolError> {
        let mut items = Vec::new();
        let mut seen = HashSet::new();
        let mut token: Option<String> = None;

        loop {
            let root = match &token {
                None => self.request(first).await,
                Some(token) => {
                    self.request(&[("verb", verb), ("resumptionToken", token.as_str())])
                        .await
                }
            };
            let root = match root {
                Ok(root) => root,
                Err(err) if err.oai_code() == Some(empty_code) => break,
                Err(err) => return Err(err),
            };

            let page = decode(&root)?;
            items.extend(page.items);
            match page.resumption_token {
                Some(next) => {
                    if !seen.insert(next.clone()) {
                        return Err(ProtocolError::malformed(format!(
                            "resumptionToken {next:?} repeated"
                        )));
                    }
                    token = Some(next);
                }
                None => break,
            }
        }
        Ok(items)
    }
}

#[async_trait]
impl ProtocolAdapter for OaiClient {
    async fn identify(&self) -> Result<Identify, ProtocolError> {
        let root = self.request(&[("verb", "Identify")]).await?;
        parse::identify(&root)
    }

    async fn list_identifiers(
        &self,
        metadata_prefix: &str,
        set: Option<&str>,
    ) -> Result<Vec<RecordHeader>, ProtocolError> {
        let mut first = vec![
            ("verb", "ListIdentifiers"),
            ("metadataPrefix", metadata_prefix),
        ];
        if let Some(set) = set {
            first.push(("set", set));
        }
        self.collect_pages(
            &first,
            "ListIdentifiers",
            NO_RECORDS_MATCH,
            parse::list_identifiers,
        )
        .await
    }

    async fn list_sets(&self) -> Result<Vec<SetSpec>, ProtocolError> {
        self.collect_pages(
            &[("verb", "ListSets")],
            "ListSets",
            NO_SET_HIERARCHY,
            parse::list_sets,
        )
        .await
    }

    async fn get_record(
        &self,
        identifier: &str,
        metadata_prefix: &str,
    ) -> Result<Record, ProtocolError> {
        let root = self
            .request(&[
                ("verb", "GetRecord"),
                ("identifier", identifier),
                ("metadataPrefix", metadata_prefix),
            ])
            .await?;
        parse::get_record(&root, metadata_prefix)
    }
}

/// Connects [`OaiClient`]s that share one HTTP connection pool.
#[derive(Debug, Clone)]
pub struct OaiConnector {
    http: reqwest::Client,
}

impl OaiConnector {
    pub fn new(options: &ClientOptions) -> Result<Self, ProtocolError> {
        Ok(Self {
            http: build_http(options)?,
        })
    }
}

impl AdapterConnector for OaiConnector {
    fn connect(&self, base_url: &str) -> Result<Arc<dyn ProtocolAdapter>, ProtocolError> {
        Ok(Arc::new(OaiClient::with_client(self.http.clone(), base_url)?))
    }
}
