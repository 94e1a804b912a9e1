//! Join-and-gap filter.
//!
//! Records that reference other entities (a user, a restaurant, an order)
//! are only admissible once those entities exist downstream. When a
//! reference cannot be resolved, the batch is cut just before that record:
//! admitting later records would move the watermark past it and it would
//! never be read again.

use settle_state::Session;
use settle_types::key::Watermark;

use crate::errors::PipelineError;
use crate::record::Record;

/// Result of resolving a record's required references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved,
    /// Name of the first reference that resolved to nothing.
    Missing(String),
}

impl Resolution {
    pub fn missing(reference: impl Into<String>) -> Self {
        Self::Missing(reference.into())
    }
}

/// Resolves (and fills in) a record's references against the destination.
pub trait ReferenceResolver<R> {
    /// Look up the record's references, storing resolved surrogate keys on
    /// the record.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::State`] if a lookup fails. An unresolved
    /// reference is not an error; it is reported as
    /// [`Resolution::Missing`].
    fn resolve(&mut self, session: &mut dyn Session, record: &mut R) -> Result<Resolution, PipelineError>;
}

impl<R, F> ReferenceResolver<R> for F
where
    F: FnMut(&mut dyn Session, &mut R) -> Result<Resolution, PipelineError>,
{
    fn resolve(&mut self, session: &mut dyn Session, record: &mut R) -> Result<Resolution, PipelineError> {
        self(session, record)
    }
}

/// Where a batch was cut.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gap {
    /// Position of the first inadmissible record in the batch.
    pub index: usize,
    /// That record's key.
    pub key: Watermark,
    /// The reference that failed to resolve.
    pub reference: String,
}

/// Output of [`truncate_at_gap`].
#[derive(Debug)]
pub struct GapOutcome<R> {
    /// The admissible prefix, in original order.
    pub admitted: Vec<R>,
    pub gap: Option<Gap>,
    /// Records dropped from the end of the batch.
    pub held_back: usize,
}

impl<R> GapOutcome<R> {
    /// Outcome for pipelines without references: everything is admitted.
    #[must_use]
    pub fn complete(batch: Vec<R>) -> Self {
        Self {
            admitted: batch,
            gap: None,
            held_back: 0,
        }
    }
}

/// Keep the longest prefix of `batch` whose references all resolve.
///
/// `resolve` is called in order and stops at the first
/// [`Resolution::Missing`]; records after it are never inspected.
///
/// # Errors
///
/// Propagates the first error returned by `resolve`.
pub fn truncate_at_gap<R, E, F>(mut batch: Vec<R>, mut resolve: F) -> Result<GapOutcome<R>, E>
where
    R: Record,
    F: FnMut(&mut R) -> Result<Resolution, E>,
{
    let mut gap = None;
    for (index, record) in batch.iter_mut().enumerate() {
        if let Resolution::Missing(reference) = resolve(record)? {
            gap = Some(Gap {
                index,
                key: record.key(),
                reference,
            });
            break;
        }
    }
    let total = batch.len();
    let cut = gap.as_ref().map_or(total, |g| g.index);
    batch.truncate(cut);
    Ok(GapOutcome {
        admitted: batch,
        gap,
        held_back: total - cut,
    })
}
