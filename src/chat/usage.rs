use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Local, NaiveDate};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::{GuestReset, QuotaConfig};
use crate::db::models::{Owner, Plan};
use crate::db::operations::DbOperations;
use crate::error::AppError;
use crate::Result;

/// Message allowance of one guest device.
#[derive(Debug, Clone, PartialEq)]
pub struct GuestCounter {
    pub used: u32,
    pub limit: u32,
    pub day: NaiveDate,
    reset: GuestReset,
}

impl GuestCounter {
    pub fn new(limit: u32, reset: GuestReset, today: NaiveDate) -> Self {
        Self { used: 0, limit, day: today, reset }
    }

    /// Starts a new allowance when the calendar day changed in daily mode.
    fn roll_over(&mut self, today: NaiveDate) {
        if self.is_stale(today) {
            self.reset(today);
        }
    }

    pub fn can_send(&mut self, today: NaiveDate) -> bool {
        self.roll_over(today);
        self.used < self.limit
    }

    /// Uses one message. Returns false, without mutating, when exhausted.
    pub fn consume(&mut self, today: NaiveDate) -> bool {
        if !self.can_send(today) {
            return false;
        }
        self.used += 1;
        true
    }

    /// A daily allowance from an earlier day. It is equivalent to a fresh counter.
    fn is_stale(&self, today: NaiveDate) -> bool {
        self.reset == GuestReset::Daily && self.day != today
    }

    pub fn reset(&mut self, today: NaiveDate) {
        self.used = 0;
        self.day = today;
    }

    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.used)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Usage {
    pub guest: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    pub used: i64,
    /// `None` means unlimited.
    pub limit: Option<i64>,
    pub remaining: Option<i64>,
}

/// Quota gate for both account holders and guest devices.
pub struct UsageMeter {
    db: DbOperations,
    quota: QuotaConfig,
    guests: Arc<RwLock<HashMap<String, GuestCounter>>>,
}

impl UsageMeter {
    pub fn new(db: DbOperations, quota: QuotaConfig) -> Self {
        Self {
            db,
            quota,
            guests: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn today() -> NaiveDate {
        Local::now().date_naive()
    }

    fn new_counter(&self) -> GuestCounter {
        GuestCounter::new(self.quota.guest_limit, self.quota.guest_reset, Self::today())
    }

    /// Consumes one message for `owner`; false means the allowance is used up.
    pub async fn try_consume(&self, owner: &Owner) -> Result<bool> {
        match owner {
            Owner::User(id) => {
                let allowed = self.db.try_increment_message_count(*id).await?;
                if !allowed {
                    info!("Message quota exhausted for user {}", id);
                }
                Ok(allowed)
            }
            Owner::Guest(id) => {
                let mut guests = self.guests.write().await;
                let counter = guests.entry(id.clone()).or_insert_with(|| self.new_counter());
                let allowed = counter.consume(Self::today());
                debug!("Guest {} used {}/{}", id, counter.used, counter.limit);
                if !allowed {
                    info!("Guest allowance exhausted for {}", id);
                }
                Ok(allowed)
            }
        }
    }

    pub async fn usage(&self, owner: &Owner) -> Result<Usage> {
        match owner {
            Owner::User(id) => {
                let user = self.db.get_user_by_id(*id).await?
                    .ok_or_else(|| AppError::NotFound("user".into()))?;
                let (limit, remaining) = if user.is_unlimited() {
                    (None, None)
                } else {
                    let remaining = (user.messages_limit - user.messages_used).max(0);
                    (Some(user.messages_limit), Some(remaining))
                };
                Ok(Usage {
                    guest: false,
                    plan: Some(user.plan),
                    used: user.messages_used,
                    limit,
                    remaining,
                })
            }
            Owner::Guest(id) => {
                // Reading never starts tracking a guest
                let mut counter = match self.guests.read().await.get(id) {
                    Some(counter) => counter.clone(),
                    None => self.new_counter(),
                };
                counter.roll_over(Self::today());
                Ok(Usage {
                    guest: true,
                    plan: None,
                    used: i64::from(counter.used),
                    limit: Some(i64::from(counter.limit)),
                    remaining: Some(i64::from(counter.remaining())),
                })
            }
        }
    }

    /// Drops daily counters left over from earlier days. Returns how many
    /// were removed.
    pub async fn cleanup(&self) -> usize {
        let today = Self::today();
        let mut guests = self.guests.write().await;
        let before = guests.len();
        guests.retain(|_, counter| !counter.is_stale(today));
        before - guests.len()
    }

    pub async fn tracked_guests(&self) -> usize {
        self.guests.read().await.len()
    }
}
