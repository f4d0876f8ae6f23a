//! Rolling 1-second request-start limiter (spec.md §4.4 scheduling model).
//!
//! No rate-limiter crate appears anywhere in the teacher pack, so this is a
//! minimal first-party gate: a `VecDeque<Instant>` of recent start times
//! behind a `tokio::sync::Mutex`, pruned on every `acquire`.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const WINDOW: Duration = Duration::from_secs(1);

pub struct RateLimiter {
    limit: u32,
    starts: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// `limit == 0` disables rate limiting entirely.
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            starts: Mutex::new(VecDeque::new()),
        }
    }

    /// Blocks until a new request start is allowed under the rolling
    /// window, then records it.
    pub async fn acquire(&self) {
        if self.limit == 0 {
            return;
        }

        loop {
            let wait = {
                let mut starts = self.starts.lock().await;
                let now = Instant::now();
                while let Some(&oldest) = starts.front() {
                    if now.duration_since(oldest) >= WINDOW {
                        starts.pop_front();
                    } else {
                        break;
                    }
                }

                if starts.len() < self.limit as usize {
                    starts.push_back(now);
                    None
                } else {
                    let oldest = *starts.front().expect("len >= limit > 0");
                    Some(WINDOW - now.duration_since(oldest))
                }
            };

            match wait {
                None => return,
                Some(duration) => tokio::time::sleep(duration).await,
            }
        }
    }
}
