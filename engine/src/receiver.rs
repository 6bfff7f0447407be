//! UDP packet receiver (component C, spec §4.C). Grounded in
//! `Geo-Fencing.c`'s `geo_fence_initial`/`udp_initial` setup and the
//! envelope shape documented alongside `process_geo_fence_routine`.
//!
//! One dedicated loop: receive, allocate a slot from the memory pool,
//! submit to the worker pool. Backpressure is the bounded-channel
//! `submit().await` inside `WorkerPool` (spec §9, "Backpressure by
//! polling" — we take the Design Note's suggested alternative over the
//! original's busy-sleep).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::mem_pool::Pool;
use crate::worker_pool::WorkerPool;

/// A received datagram, allocated out of memory pool B. Default-initialized
/// (empty payload) so the slab pool can reset it on reuse.
#[derive(Default, Clone)]
pub struct PacketContent {
    pub sender: Option<SocketAddr>,
    pub payload: String,
}

pub struct Receiver {
    socket: UdpSocket,
    pool: Arc<Pool<PacketContent>>,
    workers: Arc<WorkerPool>,
    running: Arc<AtomicBool>,
}

impl Receiver {
    pub async fn bind(
        addr: SocketAddr,
        pool: Arc<Pool<PacketContent>>,
        workers: Arc<WorkerPool>,
        running: Arc<AtomicBool>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| crate::error::EngineError::WifiInit(e.to_string()))?;
        info!(%addr, "udp receiver bound");
        Ok(Self {
            socket,
            pool,
            workers,
            running,
        })
    }

    /// Runs until `running` is cleared. On each datagram, allocates a slot
    /// from pool B, copies sender + payload verbatim, and hands the job to
    /// the worker pool — never dropping a message, never growing the pool.
    pub async fn run<F, Fut>(&self, dispatch: F)
    where
        F: Fn(PacketContent) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let dispatch = Arc::new(dispatch);
        let mut buf = [0u8; 65535];
        while self.running.load(Ordering::SeqCst) {
            let (len, sender) = match self.socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "udp recv_from failed");
                    continue;
                }
            };

            let raw = match std::str::from_utf8(&buf[..len]) {
                Ok(s) => s.to_string(),
                Err(_) => {
                    debug!(%sender, "dropped non-utf8 datagram");
                    continue;
                }
            };

            let mut slot = match self.pool.alloc() {
                Ok(slot) => slot,
                Err(_) => {
                    error!("memory pool B exhausted, dropping datagram");
                    continue;
                }
            };
            slot.sender = Some(sender);
            slot.payload = raw;
            let packet = (*slot).clone();
            drop(slot);

            let dispatch = dispatch.clone();
            self.workers.submit((*dispatch)(packet)).await;
        }
        info!("udp receiver stopped");
    }
}
