use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

/// Admission refusal, reported to the log before the socket is dropped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LimitError {
    #[error("maximum total connections reached")]
    TotalLimitReached,
    #[error("maximum connections per IP reached")]
    IpLimitReached,
}

/// Caps concurrent sockets in total and per source IP. Checked by the
/// acceptor before a worker is spawned; released when the worker exits.
#[derive(Clone)]
pub struct ConnectionLimiter {
    inner: Arc<Mutex<LimiterInner>>,
    max_total: usize,
    max_per_ip: usize,
}

#[derive(Default)]
struct LimiterInner {
    per_ip: HashMap<IpAddr, usize>,
    total: usize,
}

impl ConnectionLimiter {
    pub fn new(max_total: usize, max_per_ip: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LimiterInner::default())),
            max_total,
            max_per_ip,
        }
    }

    /// Claim a connection slot for `ip`, or refuse.
    pub async fn try_admit(&self, ip: IpAddr) -> Result<(), LimitError> {
        let mut inner = self.inner.lock().await;

        if inner.total >= self.max_total {
            warn!("total connection limit reached ({})", self.max_total);
            return Err(LimitError::TotalLimitReached);
        }
        let ip_count = inner.per_ip.get(&ip).copied().unwrap_or(0);
        if ip_count >= self.max_per_ip {
            warn!("ip {} exceeded connection limit ({})", ip, self.max_per_ip);
            return Err(LimitError::IpLimitReached);
        }

        inner.total += 1;
        *inner.per_ip.entry(ip).or_insert(0) += 1;
        Ok(())
    }

    /// Release the slot claimed by `try_admit`.
    pub async fn release(&self, ip: IpAddr) {
        let mut inner = self.inner.lock().await;

        inner.total = inner.total.saturating_sub(1);
        if let Some(count) = inner.per_ip.get_mut(&ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                inner.per_ip.remove(&ip);
            }
        }
    }
}
