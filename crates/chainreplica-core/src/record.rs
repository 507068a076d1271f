//! Tagged record extraction.
//!
//! Applications smuggle records onto the chain inside a transaction's
//! arbitrary data. A tagged record is laid out as
//!
//! ```text
//! Specifier (16 bytes) ‖ Namespace (4 bytes) ‖ Payload (rest of the blob)
//! ```
//!
//! There is no length prefix: the payload is whatever follows the namespace.

use crate::namespace::{Namespace, NAMESPACE_BYTES};
use crate::types::Transaction;

/// Byte length of a specifier.
pub const SPECIFIER_LEN: usize = 16;

/// Reserved tag prefix of a tagged record. Not interpreted.
pub type Specifier = [u8; SPECIFIER_LEN];

/// A record parsed out of an arbitrary-data blob, borrowing the blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaggedRecord<'a> {
    pub specifier: Specifier,
    pub namespace: Namespace,
    pub payload: &'a [u8],
}

/// Split a blob into specifier, namespace and payload.
///
/// Returns `None` for blobs too short to hold a specifier and a namespace.
pub fn extract(blob: &[u8]) -> Option<TaggedRecord<'_>> {
    if blob.len() < SPECIFIER_LEN + NAMESPACE_BYTES {
        return None;
    }
    let (specifier, rest) = blob.split_at(SPECIFIER_LEN);
    let (namespace, payload) = rest.split_at(NAMESPACE_BYTES);
    Some(TaggedRecord {
        specifier: specifier.try_into().ok()?,
        namespace: Namespace(namespace.try_into().ok()?),
        payload,
    })
}

/// All payloads in `tx` addressed to `namespace`, in blob order.
///
/// Correctly addressed blobs with an empty payload are noise and skipped.
pub fn matching_records<'a>(tx: &'a Transaction, namespace: &Namespace) -> Vec<&'a [u8]> {
    tx.arbitrary_data
        .iter()
        .filter_map(|blob| extract(blob))
        .filter(|rec| rec.namespace == *namespace && !rec.payload.is_empty())
        .map(|rec| rec.payload)
        .collect()
}

/// Build a tagged record blob.
pub fn encode_record(specifier: &Specifier, namespace: &Namespace, payload: &[u8]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(SPECIFIER_LEN + NAMESPACE_BYTES + payload.len());
    blob.extend_from_slice(specifier);
    blob.extend_from_slice(namespace.as_bytes());
    blob.extend_from_slice(payload);
    blob
}
