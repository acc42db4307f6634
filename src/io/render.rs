use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use super::HttpClient;
use crate::error::{FetchError, RenderError};

/// Default timeout for fetching a viewer page.
pub const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// The view of a rendered viewer page that tile-source detection needs.
///
/// A headless browser provides all three capabilities. Lighter contexts may
/// answer [`RenderError::Unsupported`] for the ones they lack; detection
/// then skips that strategy.
#[async_trait]
pub trait RenderingContext: Send + Sync {
    /// URL of the page, used to resolve relative tile-source URLs.
    fn page_url(&self) -> &str;

    /// Evaluate a script in the page and return its JSON-serializable result.
    async fn run_script(&self, script: &str) -> Result<serde_json::Value, RenderError>;

    /// The page's HTML source.
    async fn static_markup(&self) -> Result<String, RenderError>;

    /// URLs of the requests the page issued while loading.
    async fn observed_requests(&self) -> Result<Vec<String>, RenderError>;
}

/// Rendering context that only speaks plain HTTP.
///
/// Markup is fetched once through the wrapped [`HttpClient`] and cached.
/// Script execution is unsupported. Observed requests come from the caller,
/// typically a request log captured elsewhere.
pub struct HttpPageContext<C: HttpClient> {
    client: Arc<C>,
    page_url: String,
    timeout: Duration,
    observed: Vec<String>,
    markup: OnceCell<String>,
}

impl<C: HttpClient> HttpPageContext<C> {
    pub fn new(client: Arc<C>, page_url: impl Into<String>) -> Self {
        Self {
            client,
            page_url: page_url.into(),
            timeout: DEFAULT_PAGE_TIMEOUT,
            observed: Vec::new(),
            markup: OnceCell::new(),
        }
    }

    /// Use a custom timeout for the page fetch.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Supply request URLs observed while the page loaded.
    pub fn with_observed_requests(mut self, requests: Vec<String>) -> Self {
        self.observed = requests;
        self
    }
}

#[async_trait]
impl<C: HttpClient + 'static> RenderingContext for HttpPageContext<C> {
    fn page_url(&self) -> &str {
        &self.page_url
    }

    async fn run_script(&self, _script: &str) -> Result<serde_json::Value, RenderError> {
        Err(RenderError::Unsupported("script execution"))
    }

    async fn static_markup(&self) -> Result<String, RenderError> {
        let markup = self
            .markup
            .get_or_try_init(|| async {
                let body = self.client.get(&self.page_url, self.timeout).await?;
                debug!(url = %self.page_url, bytes = body.len(), "Fetched page markup");
                Ok::<_, FetchError>(String::from_utf8_lossy(&body).into_owned())
            })
            .await?;

        Ok(markup.clone())
    }

    async fn observed_requests(&self) -> Result<Vec<String>, RenderError> {
        Ok(self.observed.clone())
    }
}
