//! Reader for records nested inside parent rows (menu items of a
//! restaurant, product payments of a bonus event).
//!
//! Children are keyed by the parent key followed by a child field, so the
//! parent query pages by the key prefix with an inclusive bound: a parent
//! whose children were only partly admitted last time is read again, and
//! its already-loaded children are filtered out client-side.

use settle_core::{BatchReader, PipelineError, ReadRequest, Record};
use settle_state::Session;

use crate::reader::SqlBatchReader;

/// Flattens parents into child records.
pub type Expander<P, R> = Box<dyn Fn(P) -> Result<Vec<R>, PipelineError>>;

/// Accumulates children of whole parent pages until the batch is full.
pub struct NestedReader<P, R> {
    parents: SqlBatchReader<P>,
    expand: Expander<P, R>,
    parent_page_size: usize,
}

impl<P, R> NestedReader<P, R> {
    /// `parents` must use an inclusive bound over the key prefix its
    /// records share with their children.
    pub fn new(
        parents: SqlBatchReader<P>,
        parent_page_size: usize,
        expand: impl Fn(P) -> Result<Vec<R>, PipelineError> + 'static,
    ) -> Self {
        Self {
            parents,
            expand: Box::new(expand),
            parent_page_size: parent_page_size.max(1),
        }
    }
}

impl<P, R: Record> BatchReader<R> for NestedReader<P, R> {
    fn read(&mut self, warehouse: &mut dyn Session, request: &ReadRequest<'_>) -> Result<Vec<R>, PipelineError> {
        let after = &request.checkpoint.watermark;
        let skip = usize::try_from(request.offset).unwrap_or(usize::MAX);
        let wanted = skip.saturating_add(request.limit);

        let mut children = Vec::new();
        let mut parent_offset = 0u64;
        while children.len() < wanted {
            let page = self.parents.read(
                warehouse,
                &ReadRequest {
                    checkpoint: request.checkpoint,
                    offset: parent_offset,
                    limit: self.parent_page_size,
                },
            )?;
            if page.is_empty() {
                break;
            }
            parent_offset += page.len() as u64;
            for parent in page {
                children.extend((self.expand)(parent)?.into_iter().filter(|c| c.key() > *after));
            }
        }

        children.sort_by_cached_key(Record::key);
        Ok(children.into_iter().skip(skip).take(request.limit).collect())
    }

    fn release(&mut self) {
        self.parents.release();
    }
}
