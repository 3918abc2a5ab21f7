//! Viewer identity and the overrides it carries.
//!
//! Staff and active subscribers skip the VIP schedule entirely; everyone
//! else is judged by the engine, then by their coin unlocks.

use chrono::{DateTime, Utc};

/// The person reading, as far as access control is concerned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Viewer {
    /// Account id; `None` for anonymous readers
    pub user_id: Option<String>,
    pub is_staff: bool,
    pub subscription_active_until: Option<DateTime<Utc>>,
    /// Reader session, used to count each view once
    pub session_id: Option<String>,
}

impl Viewer {
    pub fn anonymous(session_id: Option<String>) -> Self {
        Self {
            session_id,
            ..Self::default()
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }

    pub fn has_active_subscription(&self, now: DateTime<Utc>) -> bool {
        self.subscription_active_until.is_some_and(|until| until > now)
    }

    /// Staff and subscribers read every chapter.
    pub fn bypasses_paywall(&self, now: DateTime<Utc>) -> bool {
        self.is_staff || self.has_active_subscription(now)
    }

    /// Key used to deduplicate views: the session, else the account.
    pub fn view_key(&self) -> Option<&str> {
        self.session_id.as_deref().or(self.user_id.as_deref())
    }
}
