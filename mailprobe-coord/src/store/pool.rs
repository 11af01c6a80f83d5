use deadpool::managed;
use redis::aio::{ConnectionLike, MultiplexedConnection};

use super::RedisConnectionManager;
use crate::error::StoreError;

impl managed::Manager for RedisConnectionManager {
    type Type = MultiplexedConnection;
    type Error = StoreError;

    async fn create(&self) -> Result<MultiplexedConnection, StoreError> {
        match tokio::time::timeout(
            self.timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        {
            Ok(conn) => conn.map_err(StoreError::from),
            Err(_) => Err(StoreError::ConnectTimeout),
        }
    }

    async fn recycle(
        &self,
        conn: &mut MultiplexedConnection,
        _: &managed::Metrics,
    ) -> managed::RecycleResult<StoreError> {
        conn.req_packed_command(&redis::cmd("PING"))
            .await
            .map(|_| ())
            .map_err(|err| managed::RecycleError::Backend(err.into()))
    }
}
