//! Lock ledger — which logical ordinals may start their application.
//!
//! The stored document is a flat JSON object mapping stringified ordinal to
//! a boolean, e.g. `{"0": true, "1": true, "2": false}`. An ordinal that is
//! absent or `false` is not permitted. The admission gate reads this mapping
//! at every pod start; the scale coordinator is its only writer.

use std::collections::BTreeMap;

use crate::error::{StateError, StateResult};
use crate::types::LedgerDocument;

/// Decoded view of a [`LedgerDocument`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LockLedger {
    entries: BTreeMap<u32, bool>,
}

impl LockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the flat string-keyed mapping.
    pub fn decode(data: &BTreeMap<String, bool>) -> StateResult<Self> {
        let mut entries = BTreeMap::new();
        for (key, permitted) in data {
            let ordinal = key
                .trim()
                .parse::<u32>()
                .map_err(|_| StateError::Codec(format!("non-numeric ordinal key {key:?}")))?;
            entries.insert(ordinal, *permitted);
        }
        Ok(Self { entries })
    }

    /// Decode the mapping held by a stored document.
    pub fn from_document(doc: &LedgerDocument) -> StateResult<Self> {
        Self::decode(&doc.data)
    }

    /// Parse a raw JSON object such as a mounted ledger file.
    pub fn from_json(bytes: &[u8]) -> StateResult<Self> {
        let data: BTreeMap<String, bool> =
            serde_json::from_slice(bytes).map_err(|e| StateError::Codec(e.to_string()))?;
        Self::decode(&data)
    }

    /// Encode into the flat string-keyed mapping.
    ///
    /// Revoked entries are dropped: absence and `false` mean the same thing.
    pub fn encode(&self) -> BTreeMap<String, bool> {
        self.entries
            .iter()
            .filter(|(_, permitted)| **permitted)
            .map(|(ordinal, _)| (ordinal.to_string(), true))
            .collect()
    }

    /// Permit `ordinal`. Returns false if it already was.
    pub fn grant(&mut self, ordinal: u32) -> bool {
        self.entries.insert(ordinal, true) != Some(true)
    }

    /// Withdraw permission for `ordinal`. Returns false if it was not permitted.
    pub fn revoke(&mut self, ordinal: u32) -> bool {
        self.entries.remove(&ordinal) == Some(true)
    }

    pub fn is_permitted(&self, ordinal: u32) -> bool {
        self.entries.get(&ordinal).copied().unwrap_or(false)
    }

    /// Current ordinal → permitted mapping.
    pub fn snapshot(&self) -> BTreeMap<u32, bool> {
        self.entries.clone()
    }

    /// Ordinals currently permitted, ascending.
    pub fn permitted(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries
            .iter()
            .filter(|(_, permitted)| **permitted)
            .map(|(ordinal, _)| *ordinal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(pairs: &[(&str, bool)]) -> BTreeMap<String, bool> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn absent_and_false_are_not_permitted() {
        let ledger = LockLedger::decode(&data(&[("0", true), ("1", false)])).unwrap();
        assert!(ledger.is_permitted(0));
        assert!(!ledger.is_permitted(1));
        assert!(!ledger.is_permitted(2));
    }

    #[test]
    fn rejects_non_numeric_keys() {
        let err = LockLedger::decode(&data(&[("zero", true)])).unwrap_err();
        assert!(matches!(err, StateError::Codec(_)));
    }

    #[test]
    fn grant_and_revoke_report_changes() {
        let mut ledger = LockLedger::new();
        assert!(ledger.grant(3));
        assert!(!ledger.grant(3));
        assert!(ledger.revoke(3));
        assert!(!ledger.revoke(3));
        assert!(!ledger.is_permitted(3));
    }

    #[test]
    fn encode_drops_revoked_entries() {
        let ledger = LockLedger::decode(&data(&[("0", true), ("1", false), ("2", true)])).unwrap();
        let encoded = ledger.encode();
        assert_eq!(encoded, data(&[("0", true), ("2", true)]));
    }

    #[test]
    fn parses_mounted_json() {
        let ledger = LockLedger::from_json(br#"{"0": true, "7": true}"#).unwrap();
        assert_eq!(ledger.permitted().collect::<Vec<_>>(), vec![0, 7]);
        assert!(LockLedger::from_json(b"[1, 2]").is_err());
    }
}
