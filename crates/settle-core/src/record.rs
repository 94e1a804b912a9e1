//! Records and their total order.

use settle_types::key::Watermark;

/// A shaped source value with a comparison key.
///
/// Keys must be unique within a source (ties broken by a secondary unique
/// field) so that the maximum of a batch is well defined.
pub trait Record {
    /// The record's position in the source order.
    fn key(&self) -> Watermark;
}

/// Largest key in `records`, regardless of their order in the slice.
pub fn batch_max<R: Record>(records: &[R]) -> Option<Watermark> {
    records.iter().map(Record::key).max()
}
