//! Wire types for the billing-subscription API.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A partial field-set, as sent in update payloads and held in the
/// optimistic overlay.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Billing period of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingCycle {
  Weekly,
  Monthly,
  Yearly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
  Active,
  Cancelled,
}

/// A tracked subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
  pub id: i64,
  pub name: String,
  pub cost: f64,
  pub currency: String,
  pub billing_cycle: BillingCycle,
  pub next_billing_date: NaiveDate,
  pub category_id: Option<i64>,
  pub status: SubscriptionStatus,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// Payload for creating a subscription (server assigns the id)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubscription {
  pub name: String,
  pub cost: f64,
  pub currency: String,
  pub billing_cycle: BillingCycle,
  pub next_billing_date: NaiveDate,
  pub category_id: Option<i64>,
}

/// A spending category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
  pub id: i64,
  pub name: String,
}

/// Dashboard headline numbers, converted to the requested currency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardStats {
  pub currency: String,
  pub monthly_total: f64,
  pub yearly_total: f64,
  pub active_count: u32,
  pub cancelled_count: u32,
}

/// Spending aggregated per category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorySpending {
  pub category_id: Option<i64>,
  pub category_name: String,
  pub currency: String,
  pub monthly_total: f64,
}

/// Spending for one calendar month, `month` as "YYYY-MM"
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlySpending {
  pub month: String,
  pub currency: String,
  pub total: f64,
}

/// An upcoming renewal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpcomingBill {
  pub subscription_id: i64,
  pub name: String,
  pub due_date: NaiveDate,
  pub cost: f64,
  pub currency: String,
}

/// A recent change on the account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityItem {
  pub subscription_id: i64,
  pub description: String,
  pub occurred_at: DateTime<Utc>,
}

/// Exchange-rate response from the rate provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatesResponse {
  pub base: String,
  pub rates: HashMap<String, f64>,
}

impl crate::sync::overlay::Identified for Subscription {
  fn entity_id(&self) -> i64 {
    self.id
  }
}
