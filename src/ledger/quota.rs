use std::collections::BTreeSet;

use chrono::NaiveDate;

use crate::model::{QuotaStatus, Requester, Role};

use super::Ledger;

/// How many bookings a group may hold per calendar date, and which roles
/// are not counted against that ceiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaPolicy {
    pub ceiling: u32,
    pub exempt_roles: BTreeSet<Role>,
}

impl Default for QuotaPolicy {
    /// Two bookings per group per day; administrators and parish leaders are exempt.
    fn default() -> Self {
        Self {
            ceiling: 2,
            exempt_roles: [Role(0), Role(1)].into_iter().collect(),
        }
    }
}

impl QuotaPolicy {
    pub fn is_exempt(&self, role: Role) -> bool {
        self.exempt_roles.contains(&role)
    }

    /// Whether one more booking fits on top of `count` existing ones.
    pub fn admits(&self, role: Role, count: u32) -> bool {
        self.is_exempt(role) || count < self.ceiling
    }
}

impl Ledger {
    /// Bookings currently held by `group_id` on `date`, counted from the ledger.
    pub fn current_count(&self, group_id: &str, date: NaiveDate) -> u32 {
        self.store.group_day_count(group_id, date)
    }

    pub fn is_exempt(&self, role: Role) -> bool {
        self.policy.is_exempt(role)
    }

    /// Advisory only: the answer can be stale by the time a create runs.
    /// `create_booking` re-checks under the admission lock.
    pub fn can_admit(&self, requester: &Requester, date: NaiveDate) -> bool {
        self.policy
            .admits(requester.role, self.current_count(&requester.group.id, date))
    }

    pub fn quota_status(&self, requester: &Requester, date: NaiveDate) -> QuotaStatus {
        QuotaStatus {
            date,
            count: self.current_count(&requester.group.id, date),
            ceiling: self.policy.ceiling,
            exempt: self.is_exempt(requester.role),
        }
    }
}
