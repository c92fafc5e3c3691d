//! gratefulset-gate — startup admission check for GratefulSet pods.
//!
//! Every pod of a pool runs the gate before its application. The gate
//! derives the pod's logical ordinal from its stable name and the pool's
//! ordinal base, reads the lock ledger, and either admits the pod or exits
//! with a distinguishable code so the application never starts.
//!
//! ```text
//!   hostname "ingester-g2-1"  ──►  local ordinal 1
//!   GRATEFULSET_ORDINAL_BASE=3 ──►  logical ordinal 4
//!   ledger {"3": true, "4": true}  ──►  admit (exit 0)
//!   ledger {"3": true}             ──►  deny  (exit 75)
//! ```
//!
//! The ledger is read either from a JSON file holding the flat
//! `{"ordinal": bool}` mapping, or from a directory where each file is
//! named after an ordinal and contains `true` or `false` (the layout a
//! mounted config map produces).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use gratefulset_state::{LockLedger, StateError};
use thiserror::Error;
use tracing::debug;

/// The application may start.
pub const EXIT_ADMIT: i32 = 0;
/// Malformed pod name or arguments (`EX_USAGE`).
pub const EXIT_USAGE: i32 = 64;
/// Ordinal not permitted; the substrate retries the start (`EX_TEMPFAIL`).
pub const EXIT_DENIED: i32 = 75;
/// Ledger missing or unreadable (`EX_CONFIG`).
pub const EXIT_CONFIG: i32 = 78;

/// Errors that prevent the gate from reaching a decision.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("pod name {0:?} has no ordinal suffix")]
    InvalidPodName(String),

    #[error("ordinal {local} + base {base} overflows")]
    OrdinalOverflow { local: u32, base: u32 },

    #[error("ledger {path} unreadable: {source}")]
    LedgerUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("ledger {path} is malformed: {source}")]
    LedgerMalformed {
        path: PathBuf,
        #[source]
        source: StateError,
    },
}

impl GateError {
    /// Process exit code reported for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            GateError::InvalidPodName(_) | GateError::OrdinalOverflow { .. } => EXIT_USAGE,
            GateError::LedgerUnavailable { .. } | GateError::LedgerMalformed { .. } => {
                EXIT_CONFIG
            }
        }
    }
}

/// Outcome of the admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admit,
    Deny,
}

impl Decision {
    pub fn exit_code(self) -> i32 {
        match self {
            Decision::Admit => EXIT_ADMIT,
            Decision::Deny => EXIT_DENIED,
        }
    }
}

/// Parse the local ordinal: the suffix after the last `-` of the pod name.
pub fn local_ordinal(pod_name: &str) -> Result<u32, GateError> {
    pod_name
        .rsplit_once('-')
        .and_then(|(_, suffix)| suffix.parse::<u32>().ok())
        .ok_or_else(|| GateError::InvalidPodName(pod_name.to_string()))
}

/// Logical ordinal of a pod within its workload.
pub fn logical_ordinal(pod_name: &str, ordinal_base: u32) -> Result<u32, GateError> {
    let local = local_ordinal(pod_name)?;
    local
        .checked_add(ordinal_base)
        .ok_or(GateError::OrdinalOverflow {
            local,
            base: ordinal_base,
        })
}

/// Admit iff the ledger permits the ordinal.
pub fn decide(ledger: &LockLedger, ordinal: u32) -> Decision {
    if ledger.is_permitted(ordinal) {
        Decision::Admit
    } else {
        Decision::Deny
    }
}

/// Load the ledger from a JSON file or a one-file-per-ordinal directory.
pub fn load_ledger(path: &Path) -> Result<LockLedger, GateError> {
    let unavailable = |source| GateError::LedgerUnavailable {
        path: path.to_path_buf(),
        source,
    };
    let malformed = |source| GateError::LedgerMalformed {
        path: path.to_path_buf(),
        source,
    };

    let meta = fs::metadata(path).map_err(unavailable)?;
    if !meta.is_dir() {
        let bytes = fs::read(path).map_err(unavailable)?;
        return LockLedger::from_json(&bytes).map_err(malformed);
    }

    let mut data = std::collections::BTreeMap::new();
    for entry in fs::read_dir(path).map_err(unavailable)? {
        let entry = entry.map_err(unavailable)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        // Mounted config maps carry `..data` style bookkeeping links.
        if name.starts_with('.') || entry.path().is_dir() {
            continue;
        }
        let content = fs::read_to_string(entry.path()).map_err(unavailable)?;
        data.insert(name, content.trim() == "true");
    }
    LockLedger::decode(&data).map_err(malformed)
}

/// Run the full check for one pod start.
pub fn check(pod_name: &str, ordinal_base: u32, ledger_path: &Path) -> Result<Decision, GateError> {
    let ordinal = logical_ordinal(pod_name, ordinal_base)?;
    let ledger = load_ledger(ledger_path)?;
    let decision = decide(&ledger, ordinal);
    debug!(pod = %pod_name, ordinal, ?decision, "admission decided");
    Ok(decision)
}
