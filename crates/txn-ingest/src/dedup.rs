//! Business-key deduplication policy
//!
//! Both the in-file collapse and the `ON CONFLICT` clause come from here, so
//! switching policy never touches the validation rules.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::TransactionRecord;

/// How rows sharing a `transaction_id` are resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupPolicy {
    /// The earliest row wins, in the file and against the destination.
    /// A later record for an existing key is discarded even if it is newer.
    #[default]
    FirstWriteWins,
    /// The row with the greatest `updated_at` wins; existing rows are
    /// replaced only by strictly newer ones.
    LatestUpdateWins,
}

impl DedupPolicy {
    /// Collapse duplicate keys within one batch, keeping first-seen order.
    ///
    /// Returns the surviving records and how many were dropped.
    pub fn collapse(self, records: Vec<TransactionRecord>) -> (Vec<TransactionRecord>, usize) {
        let total = records.len();
        let mut kept: Vec<TransactionRecord> = Vec::with_capacity(total);
        let mut index: HashMap<String, usize> = HashMap::with_capacity(total);

        for record in records {
            match index.get(&record.transaction_id) {
                Some(&slot) => {
                    if self == DedupPolicy::LatestUpdateWins
                        && record.updated_at > kept[slot].updated_at
                    {
                        kept[slot] = record;
                    }
                },
                None => {
                    index.insert(record.transaction_id.clone(), kept.len());
                    kept.push(record);
                },
            }
        }

        let dropped = total - kept.len();
        (kept, dropped)
    }

    /// Conflict handling appended to the destination `INSERT`
    pub fn conflict_clause(self) -> &'static str {
        match self {
            DedupPolicy::FirstWriteWins => " ON CONFLICT (transaction_id) DO NOTHING",
            DedupPolicy::LatestUpdateWins => {
                " ON CONFLICT (transaction_id) DO UPDATE SET \
                 agent_name = EXCLUDED.agent_name, \
                 amount = EXCLUDED.amount, \
                 status = EXCLUDED.status, \
                 created_at = EXCLUDED.created_at, \
                 updated_at = EXCLUDED.updated_at, \
                 lat = EXCLUDED.lat, \
                 lon = EXCLUDED.lon, \
                 email = EXCLUDED.email, \
                 phone_number = EXCLUDED.phone_number \
                 WHERE transactions.updated_at < EXCLUDED.updated_at"
            },
        }
    }
}

impl std::str::FromStr for DedupPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "first-write-wins" | "first" => Ok(DedupPolicy::FirstWriteWins),
            "latest-update-wins" | "latest" => Ok(DedupPolicy::LatestUpdateWins),
            other => Err(format!(
                "unknown dedup policy '{}', expected first-write-wins or latest-update-wins",
                other
            )),
        }
    }
}

impl std::fmt::Display for DedupPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DedupPolicy::FirstWriteWins => write!(f, "first-write-wins"),
            DedupPolicy::LatestUpdateWins => write!(f, "latest-update-wins"),
        }
    }
}
