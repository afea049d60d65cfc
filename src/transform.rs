//! The transform-chain seam.

use crate::error::BoxError;
use crate::record::ConnectRecord;

/// A per-runner transform chain.
///
/// Implementations live outside the core; the pipeline only dispatches
/// records into the chain and routes the three possible outcomes:
///
/// - `Ok(Some(out))`: forward `out` to the push stage.
/// - `Ok(None)`: the chain filtered the record; it is committed as
///   definitively handled and not forwarded.
/// - `Err(e)`: the record goes to the error handler, uncommitted.
///
/// Calls run on the blocking pool and may be CPU-heavy; the core applies
/// no per-record timeout, so a hung chain stalls its batch.
pub trait TransformEngine: Send + Sync {
    /// Run the chain against one record.
    fn transform(&self, record: &ConnectRecord) -> Result<Option<ConnectRecord>, BoxError>;

    /// Number of transforms in the chain. Used as the fan-out multiplier
    /// when scaling the transform stage's window, since one inbound record
    /// may yield that many downstream records.
    fn transform_size(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    struct Uppercase;

    impl TransformEngine for Uppercase {
        fn transform(&self, record: &ConnectRecord) -> Result<Option<ConnectRecord>, BoxError> {
            let upper = record.payload().to_ascii_uppercase();
            Ok(Some(record.clone().with_payload(Bytes::from(upper))))
        }
    }

    #[test]
    fn test_default_transform_size_is_one() {
        assert_eq!(Uppercase.transform_size(), 1);
    }

    #[test]
    fn test_engine_rewrites_payload() {
        let record = ConnectRecord::new("r1", "a", Bytes::from_static(b"hi"));
        let out = Uppercase.transform(&record).expect("ok").expect("some");
        assert_eq!(out.payload().as_ref(), b"HI");
        assert_eq!(out.id(), "a");
    }
}
