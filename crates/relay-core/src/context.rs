use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Runtime context attached to every inbound request by the server middleware
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Originating client address after proxy-hop resolution
    pub client_ip: Option<IpAddr>,
    /// Caller classification from the auth middleware
    pub authentication: Authentication,
}

impl RequestContext {
    /// Create a minimal context for embedded (non-HTTP) use
    ///
    /// No client address and an anonymous caller
    pub fn empty() -> Self {
        Self::default()
    }

    /// Context for an anonymous caller at the given address
    pub fn anonymous(client_ip: IpAddr) -> Self {
        Self {
            client_ip: Some(client_ip),
            authentication: Authentication::default(),
        }
    }
}

/// Caller classification extracted from incoming requests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Authentication {
    /// Whether the caller presented a known token or an allow-listed referrer
    pub authenticated: bool,
    /// Access tier granted to the caller
    pub tier: Tier,
}

impl Authentication {
    /// An authenticated caller with the given tier
    pub const fn with_tier(tier: Tier) -> Self {
        Self {
            authenticated: true,
            tier,
        }
    }
}

/// Access tier, ordered from least to most privileged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// No credentials
    #[default]
    Anonymous,
    /// Registered or allow-listed callers
    Seed,
    /// Paid callers
    Flower,
    /// Highest tier
    Nectar,
}

impl Tier {
    /// Whether a caller at this tier may use a model that requires `required`
    pub fn permits(self, required: Self) -> bool {
        self >= required
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Anonymous => "anonymous",
            Self::Seed => "seed",
            Self::Flower => "flower",
            Self::Nectar => "nectar",
        };
        f.write_str(name)
    }
}
