use chrono::{Duration, Utc};
use serde::Serialize;

use crate::config::PricingConfig;
use crate::db::models::Plan;
use crate::db::operations::DbOperations;
use crate::error::AppError;
use crate::Result;

pub const DEFAULT_ACTIVE_WINDOW_DAYS: i64 = 7;
pub const MAX_ACTIVE_WINDOW_DAYS: i64 = 36_500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanCounts {
    pub free: i64,
    pub premium: i64,
    pub enterprise: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminStats {
    pub total_users: i64,
    pub plans: PlanCounts,
    pub total_messages: i64,
    pub active_users: i64,
    pub active_window_days: i64,
    pub estimated_revenue: i64,
    pub api_calls: i64,
}

/// Read-only aggregations for the admin dashboard.
pub struct Reporting {
    db: DbOperations,
    pricing: PricingConfig,
}

impl Reporting {
    pub fn new(db: DbOperations, pricing: PricingConfig) -> Self {
        Self { db, pricing }
    }

    pub async fn count_by_plan(&self) -> Result<PlanCounts> {
        let mut counts = PlanCounts::default();
        for (plan, count) in self.db.count_users_by_plan().await? {
            match plan {
                Plan::Free => counts.free = count,
                Plan::Premium => counts.premium = count,
                Plan::Enterprise => counts.enterprise = count,
            }
        }
        Ok(counts)
    }

    pub async fn total_messages(&self) -> Result<i64> {
        self.db.count_messages().await
    }

    /// Accounts created within the last `window_days` days.
    pub async fn active_users(&self, window_days: i64) -> Result<i64> {
        if !(0..=MAX_ACTIVE_WINDOW_DAYS).contains(&window_days) {
            return Err(AppError::ValidationError(format!(
                "window_days must be between 0 and {}",
                MAX_ACTIVE_WINDOW_DAYS
            )));
        }
        let since = Utc::now() - Duration::days(window_days);
        self.db.count_users_created_since(since).await
    }

    pub fn estimated_revenue(&self, counts: &PlanCounts) -> i64 {
        counts.premium * self.pricing.premium_price + counts.enterprise * self.pricing.enterprise_price
    }

    pub async fn api_calls(&self) -> Result<i64> {
        self.db.count_usage_logs().await
    }

    pub async fn stats(&self, window_days: i64) -> Result<AdminStats> {
        let active_users = self.active_users(window_days).await?;
        let plans = self.count_by_plan().await?;
        Ok(AdminStats {
            total_users: plans.free + plans.premium + plans.enterprise,
            plans,
            total_messages: self.total_messages().await?,
            active_users,
            active_window_days: window_days,
            estimated_revenue: self.estimated_revenue(&plans),
            api_calls: self.api_calls().await?,
        })
    }
}
