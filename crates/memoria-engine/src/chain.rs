//! Handler chains: ordered, abortable pipeline composition.

use std::sync::Arc;

use crate::context::{ReadContext, ReadHandler, WriteContext, WriteHandler};
use crate::error::Result;

/// An ordered chain of write-pipeline handlers.
#[derive(Default)]
pub struct WriteChain {
    handlers: Vec<Arc<dyn WriteHandler>>,
}

impl WriteChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler to the chain.
    pub fn with(mut self, handler: Arc<dyn WriteHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Run the chain to completion on the context.
    ///
    /// Returns the sticky error if a handler failed the run; outputs
    /// accumulated before the failure stay on the context.
    pub async fn run(&self, ctx: &mut WriteContext) -> Result<()> {
        ctx.install(self.handlers.clone());
        ctx.next().await;
        match ctx.take_error() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// An ordered chain of read-pipeline handlers.
#[derive(Default)]
pub struct ReadChain {
    handlers: Vec<Arc<dyn ReadHandler>>,
}

impl ReadChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: Arc<dyn ReadHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub async fn run(&self, ctx: &mut ReadContext) -> Result<()> {
        ctx.install(self.handlers.clone());
        ctx.next().await;
        match ctx.take_error() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
