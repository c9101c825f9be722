use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// What `create_mailbox` does when the device already has a live mailbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailboxPolicy {
    /// Fail with `AlreadyExists`
    Reject,
    /// Close the current mailbox, wherever it lives, then take over
    #[default]
    Evict,
}

impl FromStr for MailboxPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reject" => Ok(MailboxPolicy::Reject),
            "evict" => Ok(MailboxPolicy::Evict),
            other => Err(format!("unknown mailbox policy '{}'", other)),
        }
    }
}

impl fmt::Display for MailboxPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MailboxPolicy::Reject => f.write_str("reject"),
            MailboxPolicy::Evict => f.write_str("evict"),
        }
    }
}

/// Lease timing for routing table entries
#[derive(Debug, Clone, Copy)]
pub struct LeaseConfig {
    pub ttl: Duration,
    pub renewal_interval: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            renewal_interval: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parse() {
        assert_eq!("reject".parse::<MailboxPolicy>(), Ok(MailboxPolicy::Reject));
        assert_eq!("EVICT".parse::<MailboxPolicy>(), Ok(MailboxPolicy::Evict));
        assert!("replace".parse::<MailboxPolicy>().is_err());
        assert_eq!(MailboxPolicy::default(), MailboxPolicy::Evict);
    }

    #[test]
    fn test_policy_deserializes_lowercase() {
        let policy: MailboxPolicy = serde_json::from_str("\"reject\"").unwrap();
        assert_eq!(policy, MailboxPolicy::Reject);
    }
}
