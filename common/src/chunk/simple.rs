// Simple step handler: buffers read items in the attribute bag and writes
// them as a chunk on a later call

use super::{AttributeAccessor, ItemProcessor, ItemReader, ItemWriter, RepeatStatus, StepHandler};
use crate::errors::ChunkError;
use crate::models::StepContribution;
use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, instrument};

const BUFFER_ATTRIBUTE: &str = "batch.simpleStepHandler.buffer";
/// Set once the reader returned `None`; the reader is not called again
const EXHAUSTED_ATTRIBUTE: &str = "batch.simpleStepHandler.exhausted";

/// Processor that hands every item through unchanged
pub struct PassThroughItemProcessor<T> {
    _marker: PhantomData<fn(T) -> T>,
}

impl<T> Default for PassThroughItemProcessor<T> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Send + 'static> ItemProcessor<T, T> for PassThroughItemProcessor<T> {
    async fn process(&self, item: T) -> Result<Option<T>, ChunkError> {
        Ok(Some(item))
    }
}

/// Step handler over a reader, processor and writer.
///
/// Each call does exactly one of:
/// - flush: the buffer holds `chunk_size` items, or the reader is exhausted
///   and the buffer is not empty; the buffered items are processed and
///   written (`write_count`, `filter_count`), `Continuable`
/// - read: one item is read into the buffer (`read_count`), `Continuable`
/// - finish: reader exhausted and buffer empty, `Finished`, no counts
///
/// Once the reader returned `None` it is never read again: the call that
/// observed the end flushes any remaining items, and every later call
/// returns `Finished` from the exhausted marker in the attribute bag.
///
/// On a processing or write failure the buffer is put back before the error
/// is returned, so the caller may retry the chunk.
pub struct SimpleStepHandler<I, O> {
    reader: Arc<dyn ItemReader<I>>,
    processor: Arc<dyn ItemProcessor<I, O>>,
    writer: Arc<dyn ItemWriter<O>>,
    chunk_size: usize,
}

impl<I: Clone + Send + Sync + 'static> SimpleStepHandler<I, I> {
    pub fn new(reader: Arc<dyn ItemReader<I>>, writer: Arc<dyn ItemWriter<I>>) -> Self {
        Self::with_processor(reader, Arc::new(PassThroughItemProcessor::default()), writer)
    }
}

impl<I, O> SimpleStepHandler<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    pub fn with_processor(
        reader: Arc<dyn ItemReader<I>>,
        processor: Arc<dyn ItemProcessor<I, O>>,
        writer: Arc<dyn ItemWriter<O>>,
    ) -> Self {
        Self {
            reader,
            processor,
            writer,
            chunk_size: 1,
        }
    }

    /// Number of items buffered before they are written; at least 1
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    fn buffered(attributes: &AttributeAccessor) -> usize {
        attributes
            .get_attribute::<Vec<I>>(BUFFER_ATTRIBUTE)
            .map_or(0, Vec::len)
    }

    async fn process_all(&self, items: &[I]) -> Result<(Vec<O>, u64), ChunkError> {
        let mut processed = Vec::with_capacity(items.len());
        let mut filtered = 0u64;
        for item in items {
            match self.processor.process(item.clone()).await? {
                Some(output) => processed.push(output),
                None => filtered += 1,
            }
        }
        Ok((processed, filtered))
    }

    async fn flush(
        &self,
        contribution: &mut StepContribution,
        attributes: &mut AttributeAccessor,
    ) -> Result<RepeatStatus, ChunkError> {
        let buffer: Vec<I> = attributes
            .remove_attribute(BUFFER_ATTRIBUTE)
            .unwrap_or_default();

        let (processed, filtered) = match self.process_all(&buffer).await {
            Ok(result) => result,
            Err(e) => {
                attributes.set_attribute(BUFFER_ATTRIBUTE, buffer);
                return Err(e);
            }
        };

        if !processed.is_empty() {
            if let Err(e) = self.writer.write(&processed).await {
                attributes.set_attribute(BUFFER_ATTRIBUTE, buffer);
                return Err(e);
            }
        }

        debug!(
            written = processed.len(),
            filtered = filtered,
            "Chunk written"
        );
        contribution.increment_write_count(processed.len() as u64);
        contribution.increment_filter_count(filtered);
        Ok(RepeatStatus::Continuable)
    }
}

#[async_trait]
impl<I, O> StepHandler for SimpleStepHandler<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    #[instrument(skip_all, fields(chunk_size = self.chunk_size))]
    async fn handle(
        &self,
        contribution: &mut StepContribution,
        attributes: &mut AttributeAccessor,
    ) -> Result<RepeatStatus, ChunkError> {
        let buffered = Self::buffered(attributes);
        let exhausted = attributes.has_attribute(EXHAUSTED_ATTRIBUTE);
        if buffered >= self.chunk_size || (exhausted && buffered > 0) {
            return self.flush(contribution, attributes).await;
        }
        if exhausted {
            return Ok(RepeatStatus::Finished);
        }

        match self.reader.read().await? {
            Some(item) => {
                match attributes.get_attribute_mut::<Vec<I>>(BUFFER_ATTRIBUTE) {
                    Some(buffer) => buffer.push(item),
                    None => attributes.set_attribute(BUFFER_ATTRIBUTE, vec![item]),
                }
                contribution.increment_read_count();
                Ok(RepeatStatus::Continuable)
            }
            None => {
                debug!(buffered = buffered, "Reader exhausted");
                attributes.set_attribute(EXHAUSTED_ATTRIBUTE, true);
                if buffered > 0 {
                    self.flush(contribution, attributes).await
                } else {
                    Ok(RepeatStatus::Finished)
                }
            }
        }
    }
}
