//! Tier classification for providers: an ordered quality/cost bucket.
//!
//! Numerically lower tiers are cheaper (or local); the router walks upward
//! when failover is enabled: requested tier, then the next tier, then
//! [`Tier::Premium`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Quality/cost bucket for a provider, ordered cheapest-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Local inference (Ollama, Jan); free.
    LocalFree,
    /// Cheap cloud inference (Fireworks and friends).
    CloudCheap,
    /// Vision-capable local models.
    Vision,
    /// Premium cloud models (Anthropic, OpenAI).
    Premium,
    /// Batch backends; highest tier, tried last.
    Batch,
}

/// Raw tier value outside the 0..=4 range.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("tier must be 0-4, got {0}")]
pub struct InvalidTier(pub u8);

impl Tier {
    /// All tiers in ascending order.
    pub const ALL: [Tier; 5] = [
        Tier::LocalFree,
        Tier::CloudCheap,
        Tier::Vision,
        Tier::Premium,
        Tier::Batch,
    ];

    /// Numeric rank (0 = cheapest).
    pub fn as_u8(self) -> u8 {
        match self {
            Tier::LocalFree => 0,
            Tier::CloudCheap => 1,
            Tier::Vision => 2,
            Tier::Premium => 3,
            Tier::Batch => 4,
        }
    }

    /// The next tier up, if any.
    pub fn next(self) -> Option<Tier> {
        Tier::try_from(self.as_u8() + 1).ok()
    }

    /// Tiers to attempt for a request on `self`.
    ///
    /// Without failover the chain is just the requested tier. With failover
    /// it is requested, requested + 1, then [`Tier::Premium`], deduplicated.
    pub fn failover_chain(self, enable_failover: bool) -> Vec<Tier> {
        let mut chain = vec![self];
        if enable_failover {
            if self < Tier::Premium {
                if let Some(next) = self.next() {
                    chain.push(next);
                }
            }
            if !chain.contains(&Tier::Premium) {
                chain.push(Tier::Premium);
            }
        }
        chain
    }

    /// Lowercase wire name, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::LocalFree => "local_free",
            Tier::CloudCheap => "cloud_cheap",
            Tier::Vision => "vision",
            Tier::Premium => "premium",
            Tier::Batch => "batch",
        }
    }
}

impl TryFrom<u8> for Tier {
    type Error = InvalidTier;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Tier::LocalFree),
            1 => Ok(Tier::CloudCheap),
            2 => Ok(Tier::Vision),
            3 => Ok(Tier::Premium),
            4 => Ok(Tier::Batch),
            other => Err(InvalidTier(other)),
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_follows_rank() {
        assert!(Tier::LocalFree < Tier::CloudCheap);
        assert!(Tier::Premium < Tier::Batch);
        for (i, tier) in Tier::ALL.iter().enumerate() {
            assert_eq!(tier.as_u8() as usize, i);
        }
    }

    #[test]
    fn failover_chain_appends_premium_once() {
        assert_eq!(
            Tier::LocalFree.failover_chain(true),
            vec![Tier::LocalFree, Tier::CloudCheap, Tier::Premium]
        );
        // Vision + 1 is already Premium; no duplicate.
        assert_eq!(
            Tier::Vision.failover_chain(true),
            vec![Tier::Vision, Tier::Premium]
        );
        assert_eq!(Tier::Premium.failover_chain(true), vec![Tier::Premium]);
        assert_eq!(Tier::Batch.failover_chain(true), vec![Tier::Batch, Tier::Premium]);
    }

    #[test]
    fn failover_chain_disabled_is_single() {
        assert_eq!(Tier::CloudCheap.failover_chain(false), vec![Tier::CloudCheap]);
    }

    #[test]
    fn try_from_rejects_out_of_range() {
        assert_eq!(Tier::try_from(3), Ok(Tier::Premium));
        assert_eq!(Tier::try_from(5), Err(InvalidTier(5)));
    }
}
