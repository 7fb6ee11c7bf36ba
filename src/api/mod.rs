//! Remote billing-subscription API: typed client, wire types, and the
//! classified error taxonomy the retry policy and sync engine gate on.

mod client;
mod error;
pub mod types;

use futures::future::BoxFuture;

pub use client::ApiClient;
pub use error::{ApiError, FieldError};

use types::{
  ActivityItem, CategorySpending, DashboardStats, Fields, MonthlySpending, NewSubscription,
  RatesResponse, Subscription, UpcomingBill,
};

pub type ApiResult<T> = Result<T, ApiError>;

/// The resource operations the sync core depends on, one function per
/// action type plus the read aggregates.
///
/// `ApiClient` is the production implementation; tests substitute mocks.
pub trait SubscriptionApi: Send + Sync {
  fn create_subscription(&self, draft: NewSubscription)
    -> BoxFuture<'static, ApiResult<Subscription>>;
  fn update_subscription(&self, id: i64, fields: Fields)
    -> BoxFuture<'static, ApiResult<Subscription>>;
  fn delete_subscription(&self, id: i64) -> BoxFuture<'static, ApiResult<()>>;
  fn cancel_subscription(&self, id: i64) -> BoxFuture<'static, ApiResult<Subscription>>;
  fn reactivate_subscription(&self, id: i64) -> BoxFuture<'static, ApiResult<Subscription>>;

  fn list_subscriptions(&self) -> BoxFuture<'static, ApiResult<Vec<Subscription>>>;
  fn get_subscription(&self, id: i64) -> BoxFuture<'static, ApiResult<Subscription>>;

  fn dashboard_stats(&self, currency: &str) -> BoxFuture<'static, ApiResult<DashboardStats>>;
  fn spending_by_category(
    &self,
    currency: &str,
  ) -> BoxFuture<'static, ApiResult<Vec<CategorySpending>>>;
  fn monthly_spending(&self, currency: &str)
    -> BoxFuture<'static, ApiResult<Vec<MonthlySpending>>>;
  fn upcoming_bills(&self, days: u32) -> BoxFuture<'static, ApiResult<Vec<UpcomingBill>>>;
  fn recent_activity(&self, limit: u32) -> BoxFuture<'static, ApiResult<Vec<ActivityItem>>>;
}

/// Exchange-rate provider, seamed separately so the currency cache can be
/// tested without the full API surface.
pub trait RateSource: Send + Sync {
  fn fetch_rates(&self, base: &str) -> BoxFuture<'static, ApiResult<RatesResponse>>;
}
