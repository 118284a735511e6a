//! Per-heist record of who put in how much.
//!
//! Entries keep first-join order so the members list renders in the order
//! people joined. On disk the ledger is a JSON object keyed by participant
//! id, with amounts written as decimal strings.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::types::Snowflake;

/// Discord user id of a heist participant.
pub type ParticipantId = Snowflake;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contribution {
    pub user_id: ParticipantId,
    #[serde(with = "amount_string")]
    pub total_contributed: u64,
}

/// Result of a successful [`ContributionLedger::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Added {
    /// The participant's running total after this contribution.
    pub participant_total: u64,
    /// Whether this was the participant's first contribution.
    pub first: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("contributions must be positive")]
    ZeroAmount,

    #[error("contribution would overflow the participant's total")]
    Overflow,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContributionLedger {
    entries: Vec<Contribution>,
}

impl ContributionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `amount` to the participant's total, creating the entry at zero
    /// first if needed.
    pub fn add(&mut self, participant: &str, amount: u64) -> Result<Added, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        // Check the pooled total too so `total()` can never wrap.
        self.total()
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;

        let existing = self.entries.iter().position(|c| c.user_id == participant);
        let index = existing.unwrap_or_else(|| {
            self.entries.push(Contribution {
                user_id: participant.to_string(),
                total_contributed: 0,
            });
            self.entries.len() - 1
        });

        let entry = &mut self.entries[index];
        entry.total_contributed += amount;

        Ok(Added {
            participant_total: entry.total_contributed,
            first: existing.is_none(),
        })
    }

    /// Sum of every participant's total.
    pub fn total(&self) -> u64 {
        self.entries.iter().map(|c| c.total_contributed).sum()
    }

    /// What `participant` has put in so far (zero if they haven't joined).
    pub fn contributed(&self, participant: &str) -> u64 {
        self.entries
            .iter()
            .find(|c| c.user_id == participant)
            .map_or(0, |c| c.total_contributed)
    }

    pub fn contains(&self, participant: &str) -> bool {
        self.entries.iter().any(|c| c.user_id == participant)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in first-join order.
    pub fn iter(&self) -> impl Iterator<Item = &Contribution> {
        self.entries.iter()
    }
}

impl Serialize for ContributionLedger {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            map.serialize_entry(&entry.user_id, entry)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ContributionLedger {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LedgerVisitor;

        impl<'de> Visitor<'de> for LedgerVisitor {
            type Value = ContributionLedger;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of participant id to contribution")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries: Vec<Contribution> = Vec::new();
                while let Some((key, value)) = access.next_entry::<String, Contribution>()? {
                    if entries.iter().any(|c| c.user_id == key) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate participant `{key}`"
                        )));
                    }
                    // The map key is authoritative for identity.
                    entries.push(Contribution {
                        user_id: key,
                        total_contributed: value.total_contributed,
                    });
                }
                Ok(ContributionLedger { entries })
            }
        }

        deserializer.deserialize_map(LedgerVisitor)
    }
}

/// `u64` written as a decimal string, read back from a string or a number.
pub mod amount_string {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum AmountInput {
            String(String),
            Number(u64),
        }

        match AmountInput::deserialize(deserializer)? {
            AmountInput::String(raw) => raw.parse::<u64>().map_err(D::Error::custom),
            AmountInput::Number(value) => Ok(value),
        }
    }
}
