//! The bounded connection pool. Acquisition prefers idle channels, creates
//! below the cap, and otherwise backs off exponentially (2ms doubling) until
//! the connect timeout runs out. Releasing pushes to the front; when idle
//! channels exceed half of the live count, a quarter of them (oldest first)
//! are torn down to reclaim memory. With keep-alive disabled the pool only
//! enforces the cap: every call gets a fresh channel and release destroys it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::debug;

use super::{ChannelFactory, HttpChannel};
use crate::{Result, TableStoreError};

pub(crate) struct PoolConfig {
    pub max_connections: usize,
    pub connect_timeout: Duration,
    pub enable_keep_alive: bool,
}

pub(crate) struct ConnectionPool {
    factory: Arc<dyn ChannelFactory>,
    config: PoolConfig,
    state: Mutex<PoolState>,
}

#[derive(Default)]
struct PoolState {
    idle: VecDeque<Box<dyn HttpChannel>>,
    live: usize,
}

enum Acquire {
    Idle(Box<dyn HttpChannel>),
    Create,
    Wait,
}

impl ConnectionPool {
    pub fn new(factory: Arc<dyn ChannelFactory>, config: PoolConfig) -> Self {
        ConnectionPool {
            factory,
            config,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Takes one channel, waiting with exponential backoff while the pool is
    /// saturated. The caller must hand the channel back via [`release`]
    /// (`release`) on every exit path.
    pub async fn acquire(&self) -> Result<Box<dyn HttpChannel>> {
        let mut backoff = Duration::from_millis(2);
        let mut waited = Duration::ZERO;
        for _ in 0..30 {
            let plan = {
                let mut state = self.state.lock().expect("pool lock");
                if self.config.enable_keep_alive {
                    if let Some(mut channel) = state.idle.pop_front() {
                        channel.reset();
                        Acquire::Idle(channel)
                    } else if state.live < self.config.max_connections {
                        state.live += 1;
                        Acquire::Create
                    } else {
                        Acquire::Wait
                    }
                } else if state.live < self.config.max_connections {
                    state.live += 1;
                    Acquire::Create
                } else {
                    Acquire::Wait
                }
            };

            match plan {
                Acquire::Idle(channel) => return Ok(channel),
                Acquire::Create => match self.factory.connect().await {
                    Ok(channel) => return Ok(channel),
                    Err(error) => {
                        self.state.lock().expect("pool lock").live -= 1;
                        return Err(error);
                    }
                },
                Acquire::Wait => {
                    if waited + backoff >= self.config.connect_timeout {
                        break;
                    }
                    debug!("connection pool saturated, backing off {backoff:?}");
                    tokio::time::sleep(backoff).await;
                    waited += backoff;
                    backoff *= 2;
                }
            }
        }
        Err(TableStoreError::NoAvailableConnection)
    }

    pub fn release(&self, channel: Box<dyn HttpChannel>) {
        let mut state = self.state.lock().expect("pool lock");
        if !self.config.enable_keep_alive {
            state.live -= 1;
            return;
        }
        state.idle.push_front(channel);
        if state.idle.len() > state.live / 2 {
            let to_free = (state.live / 2) / 2;
            for _ in 0..to_free {
                if state.idle.pop_back().is_some() {
                    state.live -= 1;
                }
            }
        }
    }

    #[cfg(test)]
    fn counts(&self) -> (usize, usize) {
        let state = self.state.lock().expect("pool lock");
        (state.idle.len(), state.live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpRequest, HttpResponse};

    #[derive(Debug)]
    struct NullChannel;

    #[async_trait::async_trait]
    impl HttpChannel for NullChannel {
        async fn execute(&mut self, _request: &HttpRequest) -> Result<HttpResponse> {
            Ok(HttpResponse::default())
        }
    }

    struct NullFactory;

    #[async_trait::async_trait]
    impl ChannelFactory for NullFactory {
        async fn connect(&self) -> Result<Box<dyn HttpChannel>> {
            Ok(Box::new(NullChannel))
        }
    }

    fn pool(max_connections: usize, enable_keep_alive: bool) -> ConnectionPool {
        ConnectionPool::new(
            Arc::new(NullFactory),
            PoolConfig {
                max_connections,
                connect_timeout: Duration::from_millis(20),
                enable_keep_alive,
            },
        )
    }

    #[tokio::test]
    async fn acquire_reuses_released_channels() {
        let pool = pool(4, true);
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_eq!(pool.counts(), (0, 2));
        pool.release(a);
        pool.release(b);
        let _c = pool.acquire().await.unwrap();
        assert_eq!(pool.counts().1, 2, "no new channel should be created");
    }

    #[tokio::test]
    async fn saturated_pool_times_out() {
        let pool = pool(1, true);
        let held = pool.acquire().await.unwrap();
        let error = pool.acquire().await.unwrap_err();
        assert!(matches!(error, TableStoreError::NoAvailableConnection));
        pool.release(held);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn keep_alive_disabled_destroys_on_release() {
        let pool = pool(2, false);
        let a = pool.acquire().await.unwrap();
        pool.release(a);
        assert_eq!(pool.counts(), (0, 0));
    }

    #[tokio::test]
    async fn idle_overflow_trims_a_quarter() {
        let pool = pool(16, true);
        let mut held = Vec::new();
        for _ in 0..8 {
            held.push(pool.acquire().await.unwrap());
        }
        assert_eq!(pool.counts(), (0, 8));
        // Releasing five of eight crosses the half-idle mark: live/2 = 4
        // idle allowed, so the fifth release frees a quarter (two).
        for channel in held.drain(..5) {
            pool.release(channel);
        }
        assert_eq!(pool.counts(), (3, 6));
    }
}
