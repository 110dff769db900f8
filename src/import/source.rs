use crate::config::ImporterSettings;
use crate::error::FetchError;
use crate::parser::FeedParser;
use async_trait::async_trait;
use bytes::Bytes;
use feed_types::feed::FeedConfig;
use reqwest::Client;

/// Where feed bodies come from.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, feed: &FeedConfig) -> Result<Bytes, FetchError>;
}

pub struct HttpFeedSource {
    client: Client,
    settings: ImporterSettings,
}

impl HttpFeedSource {
    pub fn new(client: Client, settings: ImporterSettings) -> Self {
        Self { client, settings }
    }
}

pub fn http_client() -> Result<Client, reqwest::Error> {
    Client::builder().gzip(true).brotli(true).deflate(true).build()
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, feed: &FeedConfig) -> Result<Bytes, FetchError> {
        FeedParser::for_feed(feed, &self.settings)
            .download(&self.client)
            .await
    }
}
