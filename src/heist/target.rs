//! Heist targets: the tiers a heist escalates through as contributions pile
//! up.
//!
//! Targets are plain data records held in an ordered [`TargetCatalog`] and
//! referred to by their position in it. The catalog is validated once on
//! construction so the selection helpers never have to handle a malformed
//! sequence.

use std::time::Duration;

use thiserror::Error;

/// `discord.js` "BLUE".
pub const COLOR_BLUE: u32 = 0x3498db;
/// `discord.js` "GREEN".
pub const COLOR_GREEN: u32 = 0x2ecc71;

/// One tier of a heist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    /// Stable identifier written to the persisted record.
    pub id: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    /// Embed colour.
    pub color: u32,
    /// How long to wait until the heist starts.
    pub setup_duration: Duration,
    /// How long the heist runs for once started.
    pub run_duration: Duration,
    /// Minimum total a member needs to have put in to take part.
    pub minimum_buyin: u64,
    /// Pooled total needed to upgrade to this target.
    pub upgrade_cost: u64,
}

pub const HOUSE_ROBBERY: Target = Target {
    id: "house-robbery",
    title: "House Robbery",
    description: "Break into a mansion and steal priceless arts",
    color: COLOR_BLUE,
    setup_duration: Duration::from_secs(60),
    run_duration: Duration::from_secs(5 * 60),
    minimum_buyin: 1_000,
    upgrade_cost: 0,
};

pub const BANK_HEIST: Target = Target {
    id: "bank-heist",
    title: "Bank Heist",
    description: "Rob a bank to make bank",
    color: COLOR_GREEN,
    setup_duration: Duration::from_secs(60),
    run_duration: Duration::from_secs(10 * 60),
    minimum_buyin: 5_000,
    upgrade_cost: 5_000,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("a target catalog needs at least one target")]
    Empty,

    #[error("the first target `{0}` must have an upgrade cost of 0")]
    FirstNotFree(&'static str),

    #[error("target `{0}` is cheaper than the target before it")]
    OutOfOrder(&'static str),

    #[error("target id `{0}` appears more than once")]
    DuplicateId(&'static str),
}

/// Ordered, immutable sequence of heist tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetCatalog {
    targets: Vec<Target>,
}

impl TargetCatalog {
    /// Build a catalog, checking that it is non-empty, starts free, and is
    /// non-decreasing in both upgrade cost and minimum buy-in.
    pub fn new(targets: Vec<Target>) -> Result<Self, CatalogError> {
        let first = targets.first().ok_or(CatalogError::Empty)?;
        if first.upgrade_cost != 0 {
            return Err(CatalogError::FirstNotFree(first.id));
        }

        for (i, pair) in targets.windows(2).enumerate() {
            let (prev, next) = (&pair[0], &pair[1]);
            if next.upgrade_cost < prev.upgrade_cost || next.minimum_buyin < prev.minimum_buyin {
                return Err(CatalogError::OutOfOrder(next.id));
            }
            if targets[..=i].iter().any(|t| t.id == next.id) {
                return Err(CatalogError::DuplicateId(next.id));
            }
        }

        Ok(Self { targets })
    }

    /// The tier sequence, cheapest first.
    pub fn ordered(&self) -> &[Target] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// The entry tier. Always affordable.
    pub fn first(&self) -> &Target {
        &self.targets[0]
    }

    pub fn get(&self, index: usize) -> Option<&Target> {
        self.targets.get(index)
    }

    /// Index of the highest tier whose upgrade cost is covered by `total`.
    ///
    /// Scans upward from the cheapest tier and stops at the first one that
    /// costs more than `total`; equal costs resolve to the later tier.
    pub fn first_affordable(&self, total: u64) -> usize {
        let mut chosen = 0;
        for (i, target) in self.targets.iter().enumerate() {
            if target.upgrade_cost > total {
                break;
            }
            chosen = i;
        }
        chosen
    }

    /// Index of the tier directly after `current`, if there is one.
    pub fn next(&self, current: usize) -> Option<usize> {
        let next = current + 1;
        (next < self.targets.len()).then_some(next)
    }
}

impl Default for TargetCatalog {
    fn default() -> Self {
        Self {
            targets: vec![HOUSE_ROBBERY, BANK_HEIST],
        }
    }
}
