//! 熔断器
//!
//! CLOSED -> OPEN（滚动时间窗内调用量达到 volume_threshold 且失败率 >= error_threshold_percentage）
//! -> HALF_OPEN（reset_timeout 之后只放行一次试探调用）-> CLOSED（试探成功）或 OPEN（试探失败）。
//! 每次受保护调用自带超时，超时计为失败。

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

/// 单个熔断器的配置
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerConfig {
    /// 单次调用超时
    pub timeout: Duration,
    /// 失败率阈值（百分比）
    pub error_threshold_percentage: f64,
    /// OPEN 之后多久允许试探
    pub reset_timeout: Duration,
    /// 窗口内至少多少次调用才评估失败率
    pub volume_threshold: usize,
    /// 滚动统计窗口
    pub rolling_window: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            error_threshold_percentage: 50.0,
            reset_timeout: Duration::from_secs(30),
            volume_threshold: 5,
            rolling_window: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BreakerState::Closed => "CLOSED",
            BreakerState::Open => "OPEN",
            BreakerState::HalfOpen => "HALF_OPEN",
        };
        f.write_str(s)
    }
}

/// 受保护调用的错误：熔断拒绝、超时或被调用方自身错误
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error("circuit '{0}' is open")]
    Open(String),
    #[error("circuit '{name}' call timed out after {after:?}")]
    Timeout { name: String, after: Duration },
    #[error(transparent)]
    Inner(E),
}

/// 时间点快照（监控用）
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub name: String,
    pub state: BreakerState,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub rejects: u64,
    pub fallbacks: u64,
    /// 当前窗口内的调用量与失败数
    pub window_calls: usize,
    pub window_failures: usize,
}

struct Inner {
    state: BreakerState,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    /// (时间, 是否失败)
    window: VecDeque<(Instant, bool)>,
    successes: u64,
    failures: u64,
    timeouts: u64,
    rejects: u64,
    fallbacks: u64,
}

/// 放行许可：记录这次调用是否为 HALF_OPEN 试探
#[derive(Debug, Clone, Copy)]
struct Admission {
    trial: bool,
}

/// 持有放行许可直到调用结束；调用 future 被丢弃时，未完成的试探按失败处理
struct AdmissionGuard<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl AdmissionGuard<'_> {
    fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.admission);
    }

    fn failure(mut self, timed_out: bool) {
        self.settled = true;
        self.breaker.on_failure(self.admission, timed_out);
    }
}

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        if self.settled || !self.admission.trial {
            return;
        }
        let mut inner = self.breaker.lock();
        inner.state = BreakerState::Open;
        inner.opened_at = Some(Instant::now());
        inner.trial_in_flight = false;
        tracing::warn!(
            breaker = %self.breaker.name,
            "trial call abandoned, circuit re-opened"
        );
    }
}

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                opened_at: None,
                trial_in_flight: false,
                window: VecDeque::new(),
                successes: 0,
                failures: 0,
                timeouts: 0,
                rejects: 0,
                fallbacks: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 当前状态；OPEN 且已过 reset_timeout 时报告 HALF_OPEN（下一次调用即为试探）
    pub fn state(&self) -> BreakerState {
        let inner = self.lock();
        match (inner.state, inner.opened_at) {
            (BreakerState::Open, Some(at)) if at.elapsed() >= self.config.reset_timeout => {
                BreakerState::HalfOpen
            }
            (state, _) => state,
        }
    }

    pub fn stats(&self) -> BreakerStats {
        let state = self.state();
        let mut inner = self.lock();
        self.prune(&mut inner);
        BreakerStats {
            name: self.name.clone(),
            state,
            successes: inner.successes,
            failures: inner.failures,
            timeouts: inner.timeouts,
            rejects: inner.rejects,
            fallbacks: inner.fallbacks,
            window_calls: inner.window.len(),
            window_failures: inner.window.iter().filter(|(_, failed)| *failed).count(),
        }
    }

    /// 执行受保护调用；OPEN 时立即返回 BreakerError::Open
    pub async fn call<T, E, Fut>(&self, fut: Fut) -> Result<T, BreakerError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(admission) = self.admit() else {
            return Err(BreakerError::Open(self.name.clone()));
        };
        let guard = AdmissionGuard {
            breaker: self,
            admission,
            settled: false,
        };
        match tokio::time::timeout(self.config.timeout, fut).await {
            Ok(Ok(value)) => {
                guard.success();
                Ok(value)
            }
            Ok(Err(e)) => {
                guard.failure(false);
                Err(BreakerError::Inner(e))
            }
            Err(_) => {
                guard.failure(true);
                Err(BreakerError::Timeout {
                    name: self.name.clone(),
                    after: self.config.timeout,
                })
            }
        }
    }

    /// 与 call 相同，但熔断拒绝时改为执行调用方提供的 fallback
    pub async fn call_with_fallback<T, E, Fut, F>(
        &self,
        fut: Fut,
        fallback: F,
    ) -> Result<T, BreakerError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
        F: FnOnce() -> T,
    {
        match self.call(fut).await {
            Err(BreakerError::Open(_)) => {
                self.lock().fallbacks += 1;
                tracing::debug!(breaker = %self.name, "circuit open, using fallback");
                Ok(fallback())
            }
            other => other,
        }
    }

    fn admit(&self) -> Option<Admission> {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => Some(Admission { trial: false }),
            BreakerState::Open => {
                let ready = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.reset_timeout)
                    .unwrap_or(true);
                if ready {
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_in_flight = true;
                    tracing::info!(breaker = %self.name, "circuit half-open, allowing trial call");
                    Some(Admission { trial: true })
                } else {
                    inner.rejects += 1;
                    None
                }
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    inner.rejects += 1;
                    None
                } else {
                    inner.trial_in_flight = true;
                    Some(Admission { trial: true })
                }
            }
        }
    }

    fn on_success(&self, admission: Admission) {
        let mut inner = self.lock();
        inner.successes += 1;
        if admission.trial {
            inner.state = BreakerState::Closed;
            inner.opened_at = None;
            inner.trial_in_flight = false;
            inner.window.clear();
            tracing::info!(breaker = %self.name, "trial call succeeded, circuit closed");
            return;
        }
        inner.window.push_back((Instant::now(), false));
        self.prune(&mut inner);
    }

    fn on_failure(&self, admission: Admission, timed_out: bool) {
        let mut inner = self.lock();
        inner.failures += 1;
        if timed_out {
            inner.timeouts += 1;
        }
        if admission.trial {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
            inner.trial_in_flight = false;
            tracing::warn!(breaker = %self.name, "trial call failed, circuit re-opened");
            return;
        }
        // 试探期间返回的迟到失败不再改变状态
        if inner.state != BreakerState::Closed {
            return;
        }
        inner.window.push_back((Instant::now(), true));
        self.prune(&mut inner);
        let calls = inner.window.len();
        let failed = inner.window.iter().filter(|(_, f)| *f).count();
        if calls >= self.config.volume_threshold {
            let rate = failed as f64 * 100.0 / calls as f64;
            if rate >= self.config.error_threshold_percentage {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                tracing::warn!(
                    breaker = %self.name,
                    calls,
                    failed,
                    rate,
                    "failure threshold reached, circuit opened"
                );
            }
        }
    }

    fn prune(&self, inner: &mut Inner) {
        let window = self.config.rolling_window;
        while let Some((at, _)) = inner.window.front() {
            if at.elapsed() > window {
                inner.window.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            timeout: Duration::from_millis(50),
            error_threshold_percentage: 50.0,
            reset_timeout: Duration::from_millis(80),
            volume_threshold: 4,
            rolling_window: Duration::from_secs(10),
        }
    }

    async fn fail(b: &CircuitBreaker) {
        let _ = b.call(async { Err::<(), _>("boom") }).await;
    }

    async fn succeed(b: &CircuitBreaker) -> Result<u32, BreakerError<&'static str>> {
        b.call(async { Ok::<_, &'static str>(7) }).await
    }

    #[tokio::test]
    async fn test_opens_after_volume_threshold() {
        let b = CircuitBreaker::new("t", fast_config());
        for _ in 0..3 {
            fail(&b).await;
        }
        // 只有 3 次调用，未到 volume_threshold
        assert_eq!(b.state(), BreakerState::Closed);
        fail(&b).await;
        assert_eq!(b.state(), BreakerState::Open);
        let err = succeed(&b).await.unwrap_err();
        assert!(matches!(err, BreakerError::Open(_)));
        assert_eq!(b.stats().rejects, 1);
    }

    #[tokio::test]
    async fn test_failure_rate_below_threshold_stays_closed() {
        let b = CircuitBreaker::new("t", fast_config());
        for _ in 0..3 {
            succeed(&b).await.unwrap();
        }
        fail(&b).await;
        fail(&b).await;
        // 2/5 = 40% < 50%
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let b = CircuitBreaker::new("t", fast_config());
        let err = b
            .call(async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, &'static str>(1)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BreakerError::Timeout { .. }));
        let stats = b.stats();
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.failures, 1);
    }

    #[tokio::test]
    async fn test_half_open_single_trial_then_closes() {
        let b = CircuitBreaker::new("t", fast_config());
        for _ in 0..4 {
            fail(&b).await;
        }
        assert_eq!(b.state(), BreakerState::Open);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(b.state(), BreakerState::HalfOpen);

        // 试探调用进行中，其它调用被拒绝
        let slow_trial = b.call(async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, &'static str>(1)
        });
        let concurrent = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            succeed(&b).await
        };
        let (trial, other) = tokio::join!(slow_trial, concurrent);
        assert!(trial.is_ok());
        assert!(matches!(other, Err(BreakerError::Open(_))));
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(succeed(&b).await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_trial_reopens() {
        let b = CircuitBreaker::new("t", fast_config());
        for _ in 0..4 {
            fail(&b).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        fail(&b).await;
        assert_eq!(b.state(), BreakerState::Open);
        assert!(matches!(succeed(&b).await, Err(BreakerError::Open(_))));
    }

    #[tokio::test]
    async fn test_abandoned_trial_reopens_and_recovers() {
        let b = CircuitBreaker::new("t", fast_config());
        for _ in 0..4 {
            fail(&b).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        // 调用方在试探完成前放弃
        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            b.call(async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, &'static str>(1)
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(b.state(), BreakerState::Open);
        assert!(matches!(succeed(&b).await, Err(BreakerError::Open(_))));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(succeed(&b).await.unwrap(), 7);
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_fallback_when_open() {
        let b = CircuitBreaker::new("t", fast_config());
        for _ in 0..4 {
            fail(&b).await;
        }
        let v = b
            .call_with_fallback(async { Ok::<_, &'static str>(1) }, || 42)
            .await
            .unwrap();
        assert_eq!(v, 42);
        assert_eq!(b.stats().fallbacks, 1);
    }
}
