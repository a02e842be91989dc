//! Sliding-window request limiter

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(60);

/// Caps requests per minute for one provider handle, shared by all in-flight cases
#[derive(Debug)]
pub struct RateLimiter {
    requests_per_minute: u32,
    last_requests: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            requests_per_minute: requests_per_minute.max(1),
            last_requests: Mutex::new(VecDeque::new()),
        }
    }

    pub fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute
    }

    /// Wait until a request fits in the window, then record it
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut last = self.last_requests.lock().await;
                let now = Instant::now();
                prune(&mut last, now);

                if last.len() < self.requests_per_minute as usize {
                    last.push_back(now);
                    return;
                }

                match last.front() {
                    Some(&oldest) => WINDOW.saturating_sub(now.duration_since(oldest)) + Duration::from_millis(10),
                    None => Duration::ZERO,
                }
            };

            tracing::debug!(wait_ms = wait.as_millis() as u64, "Request window full");
            tokio::time::sleep(wait).await;
        }
    }

    /// Requests recorded in the current window
    pub async fn in_window(&self) -> usize {
        let mut last = self.last_requests.lock().await;
        prune(&mut last, Instant::now());
        last.len()
    }
}

fn prune(last: &mut VecDeque<Instant>, now: Instant) {
    while let Some(&front) = last.front() {
        if now.duration_since(front) >= WINDOW {
            last.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limiter_basic() {
        let limiter = RateLimiter::new(5);

        // Should be able to make 5 requests immediately
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert_eq!(limiter.in_window().await, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocks_until_window_slides() {
        let limiter = RateLimiter::new(2);
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        assert!(start.elapsed() >= WINDOW);
        assert_eq!(limiter.in_window().await, 1);
    }
}
