//! Canvas REST client
//!
//! [`CanvasApi`] is the seam the migration components talk to; [`CanvasClient`]
//! implements it over HTTP with retries, rate limiting and a request
//! concurrency cap applied to every call.

use async_trait::async_trait;
use log::{debug, trace};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};

use super::constants::{API_PREFIX, DEFAULT_PAGE_SIZE, REQUEST_TIMEOUT, USER_AGENT};
use super::error::ApiError;
use super::models::{Account, Course, EnrollmentTerm, ExternalTool, Tab, TabUpdate};
use super::pagination::{Page, next_page_url};
use super::resilience::{ConcurrencyLimiter, RateLimiter, ResilienceConfig, RetryPolicy};

/// Canvas operations needed to migrate tool placements
#[async_trait]
pub trait CanvasApi: Send + Sync {
    async fn get_account(&self, account_id: u64) -> Result<Account, ApiError>;

    async fn get_term(&self, account_id: u64, term_id: u64) -> Result<EnrollmentTerm, ApiError>;

    /// Tools installed in the account, including ones inherited from parents
    async fn list_account_tools(&self, account_id: u64) -> Result<Vec<ExternalTool>, ApiError>;

    /// One page of the account's courses in a term; `cursor` is the previous page's next URL
    async fn list_courses_page(
        &self,
        account_id: u64,
        term_id: u64,
        cursor: Option<&str>,
    ) -> Result<Page<Course>, ApiError>;

    async fn list_course_tabs(&self, course_id: u64) -> Result<Vec<Tab>, ApiError>;

    async fn update_course_tab(
        &self,
        course_id: u64,
        tab_id: &str,
        update: &TabUpdate,
    ) -> Result<Tab, ApiError>;
}

#[derive(Debug, Clone)]
pub struct CanvasClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
    rate_limiter: RateLimiter,
    concurrency: ConcurrencyLimiter,
}

impl CanvasClient {
    /// `api_url` is the Canvas root, e.g. `https://umich.instructure.com`
    pub fn new(api_url: &str, api_key: &str, resilience: &ResilienceConfig) -> Result<Self, ApiError> {
        Self::with_builder(api_url, api_key, resilience, reqwest::Client::builder())
    }

    fn with_builder(
        api_url: &str,
        api_key: &str,
        resilience: &ResilienceConfig,
        builder: reqwest::ClientBuilder,
    ) -> Result<Self, ApiError> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|e| ApiError::Setup(format!("API key is not a valid header value: {}", e)))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let http = builder
            .default_headers(headers)
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Setup(e.to_string()))?;

        Ok(Self {
            http,
            base_url: format!("{}{}", api_url.trim_end_matches('/'), API_PREFIX),
            retry: RetryPolicy::new(resilience.retry.clone()),
            rate_limiter: RateLimiter::new(resilience.rate_limit.clone()),
            concurrency: ConcurrencyLimiter::new(resilience.concurrency.clone()),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn concurrency(&self) -> &ConcurrencyLimiter {
        &self.concurrency
    }

    /// Issue a request with retries; `query` is ignored for follow-up page URLs
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Page<T>, ApiError>
    where
        T: Send,
    {
        let label = format!("{} {}", method, url);
        self.retry
            .execute(&label, || {
                let method = method.clone();
                async move { self.send_once(method, url, query).await }
            })
            .await
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Page<T>, ApiError> {
        self.rate_limiter.acquire().await;
        let _permit = self.concurrency.acquire().await;

        let started = Instant::now();
        let response = self
            .http
            .request(method.clone(), url)
            .query(query)
            .send()
            .await
            .map_err(|e| ApiError::transport(method.as_str(), url, &e))?;

        let status = response.status();
        debug!("{} {} -> {} in {:?}", method, url, status.as_u16(), started.elapsed());

        let next = next_page_url(response.headers());
        let retry_after = retry_after(response.headers(), status);
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::transport(method.as_str(), url, &e))?;

        if !status.is_success() {
            return Err(
                ApiError::status(method.as_str(), url, status.as_u16(), &body)
                    .with_retry_after(retry_after),
            );
        }

        trace!("{} {} body: {}", method, url, body);
        let parsed = serde_json::from_str::<serde_json::Value>(&body)
            .and_then(|value| {
                // List endpoints return arrays, single resources are wrapped to share the path
                match value {
                    serde_json::Value::Array(_) => serde_json::from_value::<Vec<T>>(value),
                    other => serde_json::from_value::<T>(other).map(|item| vec![item]),
                }
            })
            .map_err(|e| ApiError::Decode {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        Ok(Page { items: parsed, next })
    }

    async fn get_one<T: DeserializeOwned + Send>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.endpoint(path);
        let page = self.request::<T>(Method::GET, &url, &[]).await?;
        single(page, &url)
    }

    /// Follow `next` links until the list is exhausted
    async fn get_all<T: DeserializeOwned + Send>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, ApiError> {
        let mut items = Vec::new();
        let mut query: Vec<(&str, String)> = query.to_vec();
        query.push(("per_page", DEFAULT_PAGE_SIZE.to_string()));

        let mut page = self.request::<T>(Method::GET, &self.endpoint(path), &query).await?;
        let mut pages = 1;
        loop {
            items.append(&mut page.items);
            match page.next.take() {
                Some(next) => {
                    pages += 1;
                    page = self.request::<T>(Method::GET, &next, &[]).await?;
                }
                None => break,
            }
        }

        debug!("{}: {} results over {} pages", path, items.len(), pages);
        Ok(items)
    }
}

fn single<T>(page: Page<T>, url: &str) -> Result<T, ApiError> {
    page.items.into_iter().next().ok_or_else(|| ApiError::Decode {
        url: url.to_string(),
        message: "expected an object, got an empty list".to_string(),
    })
}

fn retry_after(headers: &HeaderMap, status: StatusCode) -> Option<Duration> {
    if status.is_success() {
        return None;
    }
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl CanvasApi for CanvasClient {
    async fn get_account(&self, account_id: u64) -> Result<Account, ApiError> {
        self.get_one(&format!("/accounts/{}", account_id)).await
    }

    async fn get_term(&self, account_id: u64, term_id: u64) -> Result<EnrollmentTerm, ApiError> {
        self.get_one(&format!("/accounts/{}/terms/{}", account_id, term_id))
            .await
    }

    async fn list_account_tools(&self, account_id: u64) -> Result<Vec<ExternalTool>, ApiError> {
        self.get_all(
            &format!("/accounts/{}/external_tools", account_id),
            &[("include_parents", "true".to_string())],
        )
        .await
    }

    async fn list_courses_page(
        &self,
        account_id: u64,
        term_id: u64,
        cursor: Option<&str>,
    ) -> Result<Page<Course>, ApiError> {
        match cursor {
            Some(next) => self.request(Method::GET, next, &[]).await,
            None => {
                let url = self.endpoint(&format!("/accounts/{}/courses", account_id));
                let query = [
                    ("enrollment_term_id", term_id.to_string()),
                    ("per_page", DEFAULT_PAGE_SIZE.to_string()),
                ];
                self.request(Method::GET, &url, &query).await
            }
        }
    }

    async fn list_course_tabs(&self, course_id: u64) -> Result<Vec<Tab>, ApiError> {
        self.get_all(&format!("/courses/{}/tabs", course_id), &[]).await
    }

    async fn update_course_tab(
        &self,
        course_id: u64,
        tab_id: &str,
        update: &TabUpdate,
    ) -> Result<Tab, ApiError> {
        let url = self.endpoint(&format!("/courses/{}/tabs/{}", course_id, tab_id));
        let mut query = vec![("hidden", update.hidden.to_string())];
        if let Some(position) = update.position {
            query.push(("position", position.to_string()));
        }

        let page = self.request::<Tab>(Method::PUT, &url, &query).await?;
        single(page, &url)
    }
}
