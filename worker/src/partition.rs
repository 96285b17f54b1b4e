// Partition processing: the chunk-oriented step run by each nested job

use async_trait::async_trait;
use common::chunk::{
    AttributeAccessor, ItemProcessor, ItemReader, ItemWriter, SimpleStepHandler, StepHandler,
};
use common::errors::{ChunkError, ExtractionError, StepError};
use common::job::Job;
use common::models::{JobParameters, JobParametersBuilder, StepExecution};
use common::step::Step;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, instrument, warn};

pub const PARTITION_KEY: &str = "partition";
pub const ITEMS_KEY: &str = "items";

/// Context key holding the sum written by a partition
const PARTITION_TOTAL_KEY: &str = "partition.total";

/// Parameters for one partition's nested job: the parent's parameters plus
/// the partition index and its item count
pub fn partition_extractor(
    partition: i64,
    items: i64,
) -> impl Fn(&dyn Job, &StepExecution) -> Result<JobParameters, ExtractionError> + Send + Sync {
    move |_job: &dyn Job, step_execution: &StepExecution| {
        Ok(JobParametersBuilder::from_parameters(&step_execution.job_parameters)
            .add_long(PARTITION_KEY, partition)
            .add_long(ITEMS_KEY, items)
            .build())
    }
}

/// Reads `0..count` for a partition
struct RangeReader {
    next: Mutex<std::ops::Range<u64>>,
}

#[async_trait]
impl ItemReader<u64> for RangeReader {
    async fn read(&self) -> Result<Option<u64>, ChunkError> {
        let mut next = self
            .next
            .lock()
            .map_err(|e| ChunkError::Read(e.to_string()))?;
        Ok(next.next())
    }
}

/// Squares items, filtering multiples of seven
struct SquareProcessor;

#[async_trait]
impl ItemProcessor<u64, u64> for SquareProcessor {
    async fn process(&self, item: u64) -> Result<Option<u64>, ChunkError> {
        if item % 7 == 0 {
            return Ok(None);
        }
        Ok(Some(item * item))
    }
}

/// Sums what it is given; optionally refuses its first write
struct SumWriter {
    total: AtomicU64,
    fail_next: AtomicBool,
}

#[async_trait]
impl ItemWriter<u64> for SumWriter {
    async fn write(&self, items: &[u64]) -> Result<(), ChunkError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ChunkError::Write("simulated sink outage".to_string()));
        }
        self.total
            .fetch_add(items.iter().sum::<u64>(), Ordering::SeqCst);
        Ok(())
    }
}

/// Step of the nested job: drives a SimpleStepHandler until the partition
/// is exhausted, committing each contribution to the step execution
pub struct PartitionStep {
    chunk_size: usize,
    /// Partition whose first attempt fails; cleared once it fired
    fail_partition: Mutex<Option<i64>>,
}

impl PartitionStep {
    pub fn new(chunk_size: usize, fail_partition: Option<i64>) -> Self {
        Self {
            chunk_size,
            fail_partition: Mutex::new(fail_partition),
        }
    }

    fn take_failure(&self, partition: i64) -> bool {
        match self.fail_partition.lock() {
            Ok(mut guard) if *guard == Some(partition) => {
                *guard = None;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl Step for PartitionStep {
    fn name(&self) -> &str {
        "processPartition"
    }

    #[instrument(skip_all, fields(step_execution_id = %step_execution.id))]
    async fn execute(&self, step_execution: &mut StepExecution) -> Result<(), StepError> {
        let parameters = &step_execution.job_parameters;
        let (Some(partition), Some(items)) = (
            parameters.get_long(PARTITION_KEY),
            parameters.get_long(ITEMS_KEY),
        ) else {
            return Err(StepError::Failed(format!(
                "missing '{}' or '{}' job parameter",
                PARTITION_KEY, ITEMS_KEY
            )));
        };

        let fail = self.take_failure(partition);
        if fail {
            warn!(partition = partition, "Injecting a write failure into this attempt");
        }

        let writer = Arc::new(SumWriter {
            total: AtomicU64::new(0),
            fail_next: AtomicBool::new(fail),
        });
        let reader = Arc::new(RangeReader {
            next: Mutex::new(0..items.max(0) as u64),
        });
        let handler = SimpleStepHandler::<u64, u64>::with_processor(
            reader,
            Arc::new(SquareProcessor),
            writer.clone(),
        )
        .with_chunk_size(self.chunk_size);

        let mut attributes = AttributeAccessor::new();
        loop {
            let mut contribution = step_execution.create_contribution();
            let status = handler.handle(&mut contribution, &mut attributes).await?;
            step_execution.apply_contribution(&contribution);
            if !status.is_continuable() {
                break;
            }
        }

        let total = writer.total.load(Ordering::SeqCst);
        step_execution
            .execution_context
            .put(PARTITION_TOTAL_KEY, &total)?;

        info!(
            partition = partition,
            read = step_execution.read_count,
            written = step_execution.write_count,
            filtered = step_execution.filter_count,
            total = total,
            "Partition processed"
        );
        Ok(())
    }
}
