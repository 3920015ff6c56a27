//! A bounded retry loop for eventually-consistent operations.
//!
//! Remote destinations are provisioned asynchronously: a created log group or stream is not
//! visible to reads immediately, a created Kinesis stream spends time in CREATING, and a
//! throttled write succeeds if repeated a moment later.  Every such wait in this crate goes
//! through `RetryManager` so there is exactly one place that decides how long to sleep and when
//! to give up.
//!
//! The manager invokes a thunk that returns `Ok(Some(value))` when the condition holds,
//! `Ok(None)` when it does not hold yet, or `Err` when the attempt failed outright.  A `None`
//! sleeps and retries with the sleep doubling (exponential) or held constant (linear), capped at
//! an optional maximum.  An `Err` is handed to the caller's handler, which either swallows it to
//! keep retrying or rethrows it to abort the loop.  When the deadline passes, the manager
//! returns `Ok(None)` and the caller decides what an unsatisfied condition means.
//!
//! ```ignore
//! let retry = RetryManager::exponential(
//!     Duration::from_millis(100),
//!     Duration::from_secs(2),
//!     deadline,
//! );
//! let arn = retry
//!     .invoke(|| async {
//!         match facade.find_log_group().await? {
//!             Some(arn) => Ok(Some(arn)),
//!             None => Ok(None),
//!         }
//!     })
//!     .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

///////////////////////////////////////////// RetryManager /////////////////////////////////////////

#[derive(Clone, Debug)]
pub struct RetryManager {
    initial_sleep: Duration,
    maximum_sleep: Option<Duration>,
    deadline: Instant,
    exponential: bool,
}

impl RetryManager {
    /// Retry with the sleep doubling after each attempt, capped at `maximum_sleep`.
    pub fn exponential(initial_sleep: Duration, maximum_sleep: Duration, deadline: Instant) -> Self {
        RetryManager {
            initial_sleep,
            maximum_sleep: Some(maximum_sleep),
            deadline,
            exponential: true,
        }
    }

    /// Retry with a constant sleep between attempts.
    pub fn linear(sleep: Duration, deadline: Instant) -> Self {
        RetryManager {
            initial_sleep: sleep,
            maximum_sleep: None,
            deadline,
            exponential: false,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Invoke the thunk until it yields a value or the deadline passes.  Errors abort the loop.
    pub async fn invoke<T, E, F, Fut>(&self, thunk: F) -> Result<Option<T>, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        self.invoke_with_handler(thunk, Err).await
    }

    /// Invoke the thunk until it yields a value or the deadline passes.  Errors go to `handler`;
    /// `Ok(())` swallows the error and keeps retrying, `Err` aborts the loop.
    pub async fn invoke_with_handler<T, E, F, Fut, H>(
        &self,
        mut thunk: F,
        mut handler: H,
    ) -> Result<Option<T>, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        H: FnMut(E) -> Result<(), E>,
    {
        let mut sleep = self.initial_sleep;
        loop {
            match thunk().await {
                Ok(Some(value)) => return Ok(Some(value)),
                Ok(None) => {}
                Err(err) => handler(err)?,
            }
            let now = Instant::now();
            if now >= self.deadline {
                return Ok(None);
            }
            tokio::time::sleep(sleep.min(self.deadline - now)).await;
            if Instant::now() >= self.deadline {
                return Ok(None);
            }
            if self.exponential {
                sleep = sleep.saturating_mul(2);
                if let Some(maximum) = self.maximum_sleep {
                    sleep = sleep.min(maximum);
                }
            }
        }
    }
}

/////////////////////////////////////////////// tests //////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn returns_the_first_non_null_value() {
        let attempts = AtomicU64::new(0);
        let retry = RetryManager::exponential(
            Duration::from_millis(10),
            Duration::from_secs(1),
            Instant::now() + Duration::from_secs(60),
        );
        let value = retry
            .invoke(|| {
                let attempts = &attempts;
                async move {
                    if attempts.fetch_add(1, Ordering::Relaxed) < 3 {
                        Ok::<_, Infallible>(None)
                    } else {
                        Ok(Some(42))
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(Some(42), value);
        assert_eq!(4, attempts.load(Ordering::Relaxed));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expiry_yields_none() {
        let attempts = AtomicU64::new(0);
        let retry = RetryManager::exponential(
            Duration::from_millis(100),
            Duration::from_secs(1),
            Instant::now() + Duration::from_millis(350),
        );
        let value = retry
            .invoke(|| {
                let attempts = &attempts;
                async move {
                    attempts.fetch_add(1, Ordering::Relaxed);
                    Ok::<Option<u64>, Infallible>(None)
                }
            })
            .await
            .unwrap();
        assert_eq!(None, value);
        // 100ms, then 200ms, then the deadline cuts the third sleep short.
        assert_eq!(3, attempts.load(Ordering::Relaxed));
    }

    #[tokio::test(start_paused = true)]
    async fn linear_sleep_does_not_grow() {
        let attempts = AtomicU64::new(0);
        let retry = RetryManager::linear(
            Duration::from_millis(100),
            Instant::now() + Duration::from_millis(1_050),
        );
        let value = retry
            .invoke(|| {
                let attempts = &attempts;
                async move {
                    attempts.fetch_add(1, Ordering::Relaxed);
                    Ok::<Option<u64>, Infallible>(None)
                }
            })
            .await
            .unwrap();
        assert_eq!(None, value);
        assert_eq!(11, attempts.load(Ordering::Relaxed));
    }

    #[tokio::test(start_paused = true)]
    async fn handler_swallows_errors_and_the_loop_continues() {
        let attempts = AtomicU64::new(0);
        let retry = RetryManager::exponential(
            Duration::from_millis(10),
            Duration::from_secs(1),
            Instant::now() + Duration::from_secs(60),
        );
        let value = retry
            .invoke_with_handler(
                || {
                    let attempts = &attempts;
                    async move {
                        if attempts.fetch_add(1, Ordering::Relaxed) < 2 {
                            Err("transient")
                        } else {
                            Ok(Some("done"))
                        }
                    }
                },
                |_| Ok(()),
            )
            .await
            .unwrap();
        assert_eq!(Some("done"), value);
    }

    #[tokio::test(start_paused = true)]
    async fn handler_rethrow_aborts_the_loop() {
        let retry = RetryManager::exponential(
            Duration::from_millis(10),
            Duration::from_secs(1),
            Instant::now() + Duration::from_secs(60),
        );
        let result: Result<Option<()>, &str> = retry
            .invoke_with_handler(|| async { Err("fatal") }, Err)
            .await;
        assert_eq!(Err("fatal"), result);
    }
}
