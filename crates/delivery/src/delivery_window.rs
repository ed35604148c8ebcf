//! Delivery windows — constrains sending to the hours a campaign is allowed
//! to reach inboxes. Supports windows that wrap past midnight.

use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Time-of-day window (UTC) during which a campaign may dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl DeliveryWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Whether `now` falls inside the window. A window whose start is after
    /// its end wraps past midnight (e.g. 22:00-06:00).
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        let current = NaiveTime::from_hms_opt(now.hour(), now.minute(), now.second())
            .unwrap_or_default();
        if self.start <= self.end {
            current >= self.start && current < self.end
        } else {
            current >= self.start || current < self.end
        }
    }

    /// Earliest instant at or after `now` when the window is open. Returns
    /// `now` unchanged if the window is already open.
    pub fn next_open_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        if self.is_open(now) {
            return now;
        }
        let today_start = now
            .date_naive()
            .and_time(self.start)
            .and_utc();
        if today_start > now {
            today_start
        } else {
            today_start + Duration::days(1)
        }
    }
}

/// Per-campaign delivery-window registry shared by the dispatcher (defers
/// due batches while the window is closed) and the sequence engine (applies
/// link-level window overrides to target campaigns).
pub struct DeliveryWindows {
    windows: dashmap::DashMap<Uuid, DeliveryWindow>,
}

impl DeliveryWindows {
    pub fn new() -> Self {
        Self {
            windows: dashmap::DashMap::new(),
        }
    }

    pub fn set(&self, campaign_id: Uuid, window: DeliveryWindow) {
        self.windows.insert(campaign_id, window);
    }

    pub fn get(&self, campaign_id: Uuid) -> Option<DeliveryWindow> {
        self.windows.get(&campaign_id).map(|r| *r.value())
    }

    pub fn clear(&self, campaign_id: Uuid) {
        self.windows.remove(&campaign_id);
    }

    /// Campaigns without a configured window are always open.
    pub fn is_open(&self, campaign_id: Uuid, now: DateTime<Utc>) -> bool {
        self.get(campaign_id)
            .map(|w| w.is_open(now))
            .unwrap_or(true)
    }

    /// When the window is closed, the instant dispatch may resume.
    pub fn defer_until(&self, campaign_id: Uuid, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.get(campaign_id).and_then(|w| {
            if w.is_open(now) {
                None
            } else {
                Some(w.next_open_after(now))
            }
        })
    }
}

impl Default for DeliveryWindows {
    fn default() -> Self {
        Self::new()
    }
}
