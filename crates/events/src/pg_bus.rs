//! Cross-process progress bus over PostgreSQL `LISTEN/NOTIFY`.
//!
//! Publishing is a `pg_notify` on the shared pool. Every subscriber owns a
//! dedicated [`PgListener`] connection, released when the subscriber is
//! dropped.

use async_trait::async_trait;
use sqlx::postgres::PgListener;
use sqlx::PgPool;

use crate::bus::{BusError, BusMessage, BusSubscriber, ProgressBus};

#[derive(Clone)]
pub struct PgBus {
    pool: PgPool,
}

impl PgBus {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProgressBus for PgBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BusError> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(channel)
            .bind(payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn subscriber(&self) -> Result<Box<dyn BusSubscriber>, BusError> {
        let listener = PgListener::connect_with(&self.pool).await?;
        Ok(Box::new(PgSubscriber { listener }))
    }
}

struct PgSubscriber {
    listener: PgListener,
}

#[async_trait]
impl BusSubscriber for PgSubscriber {
    async fn subscribe(&mut self, channel: &str) -> Result<(), BusError> {
        self.listener.listen(channel).await?;
        Ok(())
    }

    async fn unsubscribe(&mut self, channel: &str) -> Result<(), BusError> {
        self.listener.unlisten(channel).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<BusMessage>, BusError> {
        // `recv` reconnects transparently; notifications sent while the
        // connection was down are lost, matching at-most-once delivery.
        let notification = self.listener.recv().await?;
        Ok(Some(BusMessage {
            channel: notification.channel().to_string(),
            payload: notification.payload().to_string(),
        }))
    }
}
