//! Short-term window handlers: append on write, snapshot on read.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use memoria_store::ShortTermStore;

use crate::context::{ReadContext, ReadHandler, WriteContext, WriteHandler};

/// Appends the request's messages to the session window.
pub struct ShortTermAppend {
    store: Arc<ShortTermStore>,
}

impl ShortTermAppend {
    pub fn new(store: Arc<ShortTermStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl WriteHandler for ShortTermAppend {
    fn name(&self) -> &'static str {
        "short_term"
    }

    async fn handle(&self, ctx: &mut WriteContext) {
        if ctx.messages.is_empty() {
            ctx.next().await;
            return;
        }

        let window = self.store.append_messages(
            &ctx.agent_id,
            &ctx.user_id,
            &ctx.session_id,
            &ctx.messages,
        );
        info!(
            session_id = %ctx.session_id,
            window_size = window.messages.len(),
            "short term window updated"
        );

        ctx.next().await;
    }
}

/// Snapshots the session window into the read context.
pub struct ShortTermRecall {
    store: Arc<ShortTermStore>,
}

impl ShortTermRecall {
    pub fn new(store: Arc<ShortTermStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ReadHandler for ShortTermRecall {
    fn name(&self) -> &'static str {
        "short_term_recall"
    }

    async fn handle(&self, ctx: &mut ReadContext) {
        if let Some(window) = self
            .store
            .get_window(&ctx.agent_id, &ctx.user_id, &ctx.session_id)
        {
            if !window.messages.is_empty() {
                ctx.short_term = window.messages.clone();
                info!(
                    session_id = %ctx.session_id,
                    messages = ctx.short_term.len(),
                    "short term recall"
                );
            }
        }

        ctx.next().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoria_types::{Message, Messages, Role};
    use tokio_util::sync::CancellationToken;

    use crate::chain::{ReadChain, WriteChain};

    #[tokio::test]
    async fn test_append_then_recall() {
        let store = Arc::new(ShortTermStore::new(3));

        let mut write_ctx = WriteContext::new(CancellationToken::new(), "a", "u", "s1");
        write_ctx.messages = Messages(vec![
            Message::new(Role::User, "axin", "1"),
            Message::new(Role::Assistant, "jarvis", "2"),
            Message::new(Role::User, "axin", "3"),
            Message::new(Role::Assistant, "jarvis", "4"),
        ]);
        WriteChain::new()
            .with(Arc::new(ShortTermAppend::new(Arc::clone(&store))))
            .run(&mut write_ctx)
            .await
            .unwrap();

        let mut read_ctx = ReadContext::new(CancellationToken::new(), "a", "u", "s1", "q");
        ReadChain::new()
            .with(Arc::new(ShortTermRecall::new(store)))
            .run(&mut read_ctx)
            .await
            .unwrap();

        // Window capacity is 3: the oldest message fell off.
        assert_eq!(read_ctx.short_term.len(), 3);
        assert_eq!(read_ctx.short_term.0[0].content, "2");
    }

    #[tokio::test]
    async fn test_recall_missing_session_is_empty() {
        let store = Arc::new(ShortTermStore::default());
        let mut ctx = ReadContext::new(CancellationToken::new(), "a", "u", "none", "q");
        ReadChain::new()
            .with(Arc::new(ShortTermRecall::new(store)))
            .run(&mut ctx)
            .await
            .unwrap();
        assert!(ctx.short_term.is_empty());
    }
}
