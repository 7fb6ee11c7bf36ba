//! HTTP client for the billing-subscription API.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use url::Url;

use crate::config::Config;

use super::types::{
  ActivityItem, CategorySpending, DashboardStats, Fields, MonthlySpending, NewSubscription,
  RatesResponse, Subscription, UpcomingBill,
};
use super::{ApiError, ApiResult, RateSource, SubscriptionApi};

/// Overall per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Exchange-rate fetches get a shorter leash so a slow provider cannot
/// stall conversions; the caller falls back to cached rates instead.
const RATE_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Subscription API client wrapper
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base: String,
}

impl ApiClient {
  pub fn new(config: &Config) -> Result<Self> {
    let token = Config::get_api_token()?;

    // Fail fast on an unparseable base URL instead of on the first call.
    Url::parse(&config.api.url).map_err(|e| eyre!("Invalid API url {}: {}", config.api.url, e))?;

    let mut headers = reqwest::header::HeaderMap::new();
    let mut auth = reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token))
      .map_err(|e| eyre!("Invalid API token: {}", e))?;
    auth.set_sensitive(true);
    headers.insert(reqwest::header::AUTHORIZATION, auth);

    let http = reqwest::Client::builder()
      .timeout(REQUEST_TIMEOUT)
      .default_headers(headers)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base: config.api.url.trim_end_matches('/').to_string(),
    })
  }

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.base, path)
  }

  /// Send a request and decode the JSON body, classifying every failure.
  async fn send<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> ApiResult<T> {
    let response = req.send().await.map_err(ApiError::from_transport)?;
    let status = response.status();

    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(ApiError::from_status(status.as_u16(), &body));
    }

    response.json::<T>().await.map_err(ApiError::from_transport)
  }

  /// Send a request where the response body is irrelevant.
  async fn send_unit(&self, req: reqwest::RequestBuilder) -> ApiResult<()> {
    let response = req.send().await.map_err(ApiError::from_transport)?;
    let status = response.status();

    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(ApiError::from_status(status.as_u16(), &body));
    }

    Ok(())
  }

  async fn get<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
    self.send(self.http.get(self.url(path))).await
  }

  async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> ApiResult<T> {
    self.send(self.http.post(self.url(path)).json(body)).await
  }

  pub async fn create(&self, draft: &NewSubscription) -> ApiResult<Subscription> {
    self.post("/api/v1/subscriptions", draft).await
  }

  pub async fn update(&self, id: i64, fields: &Fields) -> ApiResult<Subscription> {
    let path = format!("/api/v1/subscriptions/{}", id);
    self.send(self.http.patch(self.url(&path)).json(fields)).await
  }

  pub async fn delete(&self, id: i64) -> ApiResult<()> {
    let path = format!("/api/v1/subscriptions/{}", id);
    self.send_unit(self.http.delete(self.url(&path))).await
  }

  pub async fn cancel(&self, id: i64) -> ApiResult<Subscription> {
    let path = format!("/api/v1/subscriptions/{}/cancel", id);
    self.send(self.http.post(self.url(&path))).await
  }

  pub async fn reactivate(&self, id: i64) -> ApiResult<Subscription> {
    let path = format!("/api/v1/subscriptions/{}/reactivate", id);
    self.send(self.http.post(self.url(&path))).await
  }

  pub async fn list(&self) -> ApiResult<Vec<Subscription>> {
    self.get("/api/v1/subscriptions").await
  }

  pub async fn get_one(&self, id: i64) -> ApiResult<Subscription> {
    self.get(&format!("/api/v1/subscriptions/{}", id)).await
  }

  pub async fn stats(&self, currency: &str) -> ApiResult<DashboardStats> {
    self
      .get(&format!("/api/v1/dashboard/stats?currency={}", currency))
      .await
  }

  pub async fn category_spending(&self, currency: &str) -> ApiResult<Vec<CategorySpending>> {
    self
      .get(&format!(
        "/api/v1/dashboard/spending/categories?currency={}",
        currency
      ))
      .await
  }

  pub async fn monthly(&self, currency: &str) -> ApiResult<Vec<MonthlySpending>> {
    self
      .get(&format!(
        "/api/v1/dashboard/spending/monthly?currency={}",
        currency
      ))
      .await
  }

  pub async fn bills(&self, days: u32) -> ApiResult<Vec<UpcomingBill>> {
    self
      .get(&format!("/api/v1/dashboard/upcoming?days={}", days))
      .await
  }

  pub async fn activity(&self, limit: u32) -> ApiResult<Vec<ActivityItem>> {
    self
      .get(&format!("/api/v1/dashboard/activity?limit={}", limit))
      .await
  }

  pub async fn rates(&self, base: &str) -> ApiResult<RatesResponse> {
    let path = format!("/api/v1/rates?base={}", base);
    self
      .send(self.http.get(self.url(&path)).timeout(RATE_FETCH_TIMEOUT))
      .await
  }
}

impl SubscriptionApi for ApiClient {
  fn create_subscription(
    &self,
    draft: NewSubscription,
  ) -> BoxFuture<'static, ApiResult<Subscription>> {
    let client = self.clone();
    Box::pin(async move { client.create(&draft).await })
  }

  fn update_subscription(
    &self,
    id: i64,
    fields: Fields,
  ) -> BoxFuture<'static, ApiResult<Subscription>> {
    let client = self.clone();
    Box::pin(async move { client.update(id, &fields).await })
  }

  fn delete_subscription(&self, id: i64) -> BoxFuture<'static, ApiResult<()>> {
    let client = self.clone();
    Box::pin(async move { client.delete(id).await })
  }

  fn cancel_subscription(&self, id: i64) -> BoxFuture<'static, ApiResult<Subscription>> {
    let client = self.clone();
    Box::pin(async move { client.cancel(id).await })
  }

  fn reactivate_subscription(&self, id: i64) -> BoxFuture<'static, ApiResult<Subscription>> {
    let client = self.clone();
    Box::pin(async move { client.reactivate(id).await })
  }

  fn list_subscriptions(&self) -> BoxFuture<'static, ApiResult<Vec<Subscription>>> {
    let client = self.clone();
    Box::pin(async move { client.list().await })
  }

  fn get_subscription(&self, id: i64) -> BoxFuture<'static, ApiResult<Subscription>> {
    let client = self.clone();
    Box::pin(async move { client.get_one(id).await })
  }

  fn dashboard_stats(&self, currency: &str) -> BoxFuture<'static, ApiResult<DashboardStats>> {
    let client = self.clone();
    let currency = currency.to_string();
    Box::pin(async move { client.stats(&currency).await })
  }

  fn spending_by_category(
    &self,
    currency: &str,
  ) -> BoxFuture<'static, ApiResult<Vec<CategorySpending>>> {
    let client = self.clone();
    let currency = currency.to_string();
    Box::pin(async move { client.category_spending(&currency).await })
  }

  fn monthly_spending(
    &self,
    currency: &str,
  ) -> BoxFuture<'static, ApiResult<Vec<MonthlySpending>>> {
    let client = self.clone();
    let currency = currency.to_string();
    Box::pin(async move { client.monthly(&currency).await })
  }

  fn upcoming_bills(&self, days: u32) -> BoxFuture<'static, ApiResult<Vec<UpcomingBill>>> {
    let client = self.clone();
    Box::pin(async move { client.bills(days).await })
  }

  fn recent_activity(&self, limit: u32) -> BoxFuture<'static, ApiResult<Vec<ActivityItem>>> {
    let client = self.clone();
    Box::pin(async move { client.activity(limit).await })
  }
}

impl RateSource for ApiClient {
  fn fetch_rates(&self, base: &str) -> BoxFuture<'static, ApiResult<RatesResponse>> {
    let client = self.clone();
    let base = base.to_string();
    Box::pin(async move { client.rates(&base).await })
  }
}
