//! Topic names shared by qwallet services.
//!
//! Topic naming: `qwallet.{domain}.{event}`, with notification topics nested
//! one level deeper (`qwallet.notification.{domain}.{event}`).

use std::fmt;

/// Business domain a topic belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Account,
    User,
    Notification,
}

/// A named stream of messages on the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Topic {
    pub name: &'static str,
    pub domain: Domain,
}

impl Topic {
    pub const ACCOUNT_CREATED: Topic = Topic::new("qwallet.account.created", Domain::Account);
    pub const ACCOUNT_UPDATED: Topic = Topic::new("qwallet.account.updated", Domain::Account);
    pub const ACCOUNT_DELETED: Topic = Topic::new("qwallet.account.deleted", Domain::Account);

    pub const USER_CREATED: Topic = Topic::new("qwallet.user.created", Domain::User);
    pub const USER_UPDATED: Topic = Topic::new("qwallet.user.updated", Domain::User);
    pub const USER_DELETED: Topic = Topic::new("qwallet.user.deleted", Domain::User);

    pub const NOTIFICATION_USER_CREATED: Topic =
        Topic::new("qwallet.notification.user.created", Domain::Notification);
    pub const NOTIFICATION_ACCOUNT_CREATED: Topic =
        Topic::new("qwallet.notification.account.created", Domain::Notification);

    /// Every topic defined by the platform.
    pub const ALL: [Topic; 8] = [
        Topic::ACCOUNT_CREATED,
        Topic::ACCOUNT_UPDATED,
        Topic::ACCOUNT_DELETED,
        Topic::USER_CREATED,
        Topic::USER_UPDATED,
        Topic::USER_DELETED,
        Topic::NOTIFICATION_USER_CREATED,
        Topic::NOTIFICATION_ACCOUNT_CREATED,
    ];

    const fn new(name: &'static str, domain: Domain) -> Self {
        Self { name, domain }
    }

    /// Look up a platform topic by its broker name.
    pub fn from_name(name: &str) -> Option<Topic> {
        Topic::ALL.iter().copied().find(|t| t.name == name)
    }

    /// Platform topics in a domain.
    pub fn in_domain(domain: Domain) -> impl Iterator<Item = Topic> {
        Topic::ALL.into_iter().filter(move |t| t.domain == domain)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        self.name
    }
}
