// Parcel reconciler: joins attribute records to geometry rings
//
// Each record is probed with its raw parcel number first, then with the
// normalized key. Records with no hit are skipped, never persisted.

use crate::geometry::{GeometrySet, Ring};
use crate::normalize::{MatchPolicy, ZeroPaddedSplit};
use crate::parcel::{CanonicalParcel, RawAttributeRecord};
use serde::{Deserialize, Serialize};
use tracing::debug;

// ============================================================================
// MATCH RESULT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchKind {
    /// Raw parcel number found verbatim in the geometry set
    Exact,
    /// Found only under the normalized key
    Normalized,
}

// ============================================================================
// RECONCILIATION REPORT
// ============================================================================

/// Outcome of joining one file pair.
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    pub parcels: Vec<CanonicalParcel>,
    pub skipped: usize,
    pub exact_matches: usize,
    pub normalized_matches: usize,
    /// Raw parcel numbers of the skipped records
    pub unmatched: Vec<String>,
}

impl Reconciliation {
    pub fn matched(&self) -> usize {
        self.parcels.len()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} matched ({} exact, {} normalized), {} skipped",
            self.matched(),
            self.exact_matches,
            self.normalized_matches,
            self.skipped
        )
    }
}

// ============================================================================
// RECONCILER
// ============================================================================

/// Pure in-memory join; no I/O.
pub struct ParcelReconciler<P: MatchPolicy = ZeroPaddedSplit> {
    policy: P,
}

impl ParcelReconciler<ZeroPaddedSplit> {
    pub fn new() -> Self {
        ParcelReconciler {
            policy: ZeroPaddedSplit,
        }
    }
}

impl Default for ParcelReconciler<ZeroPaddedSplit> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: MatchPolicy> ParcelReconciler<P> {
    pub fn with_policy(policy: P) -> Self {
        ParcelReconciler { policy }
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Find the ring for a raw parcel number; raw-exact beats normalized.
    pub fn lookup<'g>(
        &self,
        parcel_no: &str,
        geometries: &'g GeometrySet,
    ) -> Option<(&'g Ring, MatchKind)> {
        if parcel_no.is_empty() {
            return None;
        }

        if let Some(ring) = geometries.get(parcel_no) {
            return Some((ring, MatchKind::Exact));
        }

        let key = self.policy.normalize(parcel_no);
        geometries
            .get(&key)
            .map(|ring| (ring, MatchKind::Normalized))
    }

    pub fn reconcile(
        &self,
        records: Vec<RawAttributeRecord>,
        geometries: &GeometrySet,
    ) -> Reconciliation {
        let mut result = Reconciliation::default();

        for record in records {
            match self.lookup(&record.parcel_no, geometries) {
                Some((ring, kind)) => {
                    match kind {
                        MatchKind::Exact => result.exact_matches += 1,
                        MatchKind::Normalized => result.normalized_matches += 1,
                    }
                    result
                        .parcels
                        .push(CanonicalParcel::new(record, ring.clone()));
                }
                None => {
                    debug!(
                        parcel_no = %record.parcel_no,
                        normalized = %self.policy.normalize(&record.parcel_no),
                        "No geometry found for parcel"
                    );
                    result.skipped += 1;
                    result.unmatched.push(record.parcel_no);
                }
            }
        }

        result
    }
}

// ============================================================================
// TESTS
// ============================================================================
