//! Per-call cancellation and deadline handling shared by the orchestrator,
//! the invalidation coordinator and the embedding cache.

use crate::error::{CacheError, CacheResult, Phase};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Cancellation signal and whole-call deadline for one engine call
#[derive(Debug, Clone)]
pub(crate) struct CallContext {
    cancellation: Option<CancellationToken>,
    deadline_at: Option<Instant>,
    started: Instant,
}

impl CallContext {
    pub(crate) fn new(cancellation: Option<CancellationToken>, deadline: Option<Duration>) -> Self {
        let started = Instant::now();
        Self {
            cancellation,
            deadline_at: deadline.map(|d| started + d),
            started,
        }
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Fails fast if the call was cancelled before the phase starts
    pub(crate) fn check(&self, phase: Phase) -> CacheResult<()> {
        match &self.cancellation {
            Some(token) if token.is_cancelled() => Err(CacheError::Cancelled { phase }),
            _ => Ok(()),
        }
    }

    /// Run one phase under its own limit, the remaining call deadline and
    /// the cancellation signal, whichever fires first.
    pub(crate) async fn bounded<T, Fut>(
        &self,
        phase: Phase,
        limit: Option<Duration>,
        work: Fut,
    ) -> CacheResult<T>
    where
        Fut: Future<Output = CacheResult<T>>,
    {
        self.check(phase)?;

        let phase_started = Instant::now();
        let limit = match self.deadline_at {
            Some(at) => {
                let remaining = at.saturating_duration_since(phase_started);
                Some(limit.map_or(remaining, |l| l.min(remaining)))
            }
            None => limit,
        };

        let timed = async {
            match limit {
                Some(limit) => match tokio::time::timeout(limit, work).await {
                    Ok(result) => result,
                    Err(_) => Err(CacheError::Timeout {
                        phase,
                        elapsed_ms: phase_started.elapsed().as_millis() as u64,
                    }),
                },
                None => work.await,
            }
        };

        match &self.cancellation {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(CacheError::Cancelled { phase }),
                result = timed => result,
            },
            None => timed.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_phase_limit_times_out() {
        let ctx = CallContext::new(None, None);
        let result: CacheResult<()> = ctx
            .bounded(Phase::Fetch, Some(Duration::from_millis(10)), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(CacheError::Timeout { phase: Phase::Fetch, .. })));
    }

    #[tokio::test]
    async fn test_deadline_caps_phase_limit() {
        let ctx = CallContext::new(None, Some(Duration::from_millis(10)));
        let result: CacheResult<()> = ctx
            .bounded(Phase::Generate, Some(Duration::from_secs(30)), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(CacheError::Timeout { phase: Phase::Generate, .. })));
    }

    #[tokio::test]
    async fn test_cancellation_wins() {
        let token = CancellationToken::new();
        let ctx = CallContext::new(Some(token.clone()), None);

        let cancel = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        };
        let work = ctx.bounded(Phase::Fetch, None, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, CacheError>(())
        });

        let (_, result) = tokio::join!(cancel, work);
        assert!(matches!(result, Err(CacheError::Cancelled { phase: Phase::Fetch })));
    }

    #[tokio::test]
    async fn test_already_cancelled_skips_work() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = CallContext::new(Some(token), None);
        assert!(matches!(
            ctx.check(Phase::Lookup),
            Err(CacheError::Cancelled { phase: Phase::Lookup })
        ));
    }
}
