// Chunk module: per-call unit-of-work contract for an external step loop

pub mod simple;

pub use simple::{PassThroughItemProcessor, SimpleStepHandler};

use crate::errors::ChunkError;
use crate::models::StepContribution;
use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;

/// Tells the caller's loop whether to keep calling the handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatStatus {
    /// One unit of work was processed; there may be more
    Continuable,
    /// The source is exhausted
    Finished,
}

impl RepeatStatus {
    pub fn is_continuable(&self) -> bool {
        matches!(self, RepeatStatus::Continuable)
    }
}

/// Attributes shared between the handler calls of one step execution
/// attempt. Not synchronized: calls for one bag must be sequential.
#[derive(Default)]
pub struct AttributeAccessor {
    attributes: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl AttributeAccessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_attribute<T: Any + Send + Sync>(&mut self, name: impl Into<String>, value: T) {
        self.attributes.insert(name.into(), Box::new(value));
    }

    /// Get an attribute; None if absent or of a different type
    pub fn get_attribute<T: Any>(&self, name: &str) -> Option<&T> {
        self.attributes.get(name).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_attribute_mut<T: Any>(&mut self, name: &str) -> Option<&mut T> {
        self.attributes
            .get_mut(name)
            .and_then(|v| v.downcast_mut::<T>())
    }

    /// Remove and return an attribute. An attribute of a different type is
    /// left in place.
    pub fn remove_attribute<T: Any>(&mut self, name: &str) -> Option<T> {
        if !self.attributes.get(name).is_some_and(|v| v.is::<T>()) {
            return None;
        }
        self.attributes
            .remove(name)
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

impl std::fmt::Debug for AttributeAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.attributes.keys()).finish()
    }
}

/// Strategy for processing one unit of work inside a chunk.
///
/// Implementations obtain an item from their reader and return
/// `Finished` if there is none. Otherwise they process it, record counts in
/// `contribution` and return `Continuable`. Errors are never swallowed;
/// the caller owns commit, rollback, retry and skip decisions.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn handle(
        &self,
        contribution: &mut StepContribution,
        attributes: &mut AttributeAccessor,
    ) -> Result<RepeatStatus, ChunkError>;
}

/// Source of items; `None` means exhausted
#[async_trait]
pub trait ItemReader<T>: Send + Sync {
    async fn read(&self) -> Result<Option<T>, ChunkError>;
}

/// Transforms an item; `None` filters it out
#[async_trait]
pub trait ItemProcessor<I, O>: Send + Sync {
    async fn process(&self, item: I) -> Result<Option<O>, ChunkError>;
}

/// Sink for processed items
#[async_trait]
pub trait ItemWriter<T>: Send + Sync {
    async fn write(&self, items: &[T]) -> Result<(), ChunkError>;
}
