//! Synthetic identifiers for records that carry no `uid`.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::config::UidStrategy;
use crate::io::sha256_hex;

const DEFAULT_PREFIX: &str = "default_";

/// Hands out uids for one transformation run. Never shared between runs, so
/// two transformations of the same input produce the same ids.
#[derive(Debug, Clone)]
pub struct UidGenerator {
    strategy: UidStrategy,
    next: usize,
    issued: BTreeSet<String>,
}

impl UidGenerator {
    pub fn new(strategy: UidStrategy) -> Self {
        Self {
            strategy,
            next: 0,
            issued: BTreeSet::new(),
        }
    }

    /// Number of uids generated so far.
    pub fn generated(&self) -> usize {
        self.issued.len()
    }

    /// A fresh uid for `record` of `table`.
    pub fn generate(&mut self, table: &str, record: &Value) -> String {
        let uid = match self.strategy {
            UidStrategy::Sequential => {
                let uid = format!("{DEFAULT_PREFIX}{}", self.next);
                self.next += 1;
                uid
            }
            UidStrategy::ContentDigest => {
                let seed = format!("{table}\u{0}{record}");
                let digest = sha256_hex(seed.as_bytes());
                let base = format!("{DEFAULT_PREFIX}{}", &digest[..16]);
                let mut uid = base.clone();
                let mut suffix = 1;
                while self.issued.contains(&uid) {
                    uid = format!("{base}_{suffix}");
                    suffix += 1;
                }
                uid
            }
        };
        self.issued.insert(uid.clone());
        uid
    }
}
