//! 并发调度器 - 编排层
//!
//! ## 职责
//!
//! 对每个 `Job` 调用一次转换服务，保证：
//!
//! 1. **并发上限**：所有任务同时启动，由 Semaphore 控制同一时刻的调用数
//! 2. **顺序还原**：返回结果与提交顺序一致，与完成顺序无关
//! 3. **退避重试**：频率限制时对同一任务指数退避重试，其他错误不重试
//! 4. **快速失败**：任一任务最终失败时取消其余任务并返回该任务的错误
//!
//! 等待退避期间不占用并发名额。`close` 之后不再发出新的调用，
//! 已经在执行的调用照常返回。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult, TransformError};
use crate::models::{Job, JobResult};
use crate::services::Transform;

/// 退避重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最多尝试次数（含第一次）
    pub max_attempts: u32,
    /// 第一次退避时长，之后每次翻倍
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.retry_attempts, config.retry_base_delay())
    }

    /// 第 `attempt` 次（从 0 开始）失败后的等待时长
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }

    /// 完整的退避序列，例如 10s/20s/40s/80s/160s
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_attempts).map(|a| self.delay_for(a)).collect()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(10))
    }
}

/// 并发调度器
pub struct Dispatcher<T: Transform> {
    transform: Arc<T>,
    gate: Arc<Semaphore>,
    retry: RetryPolicy,
}

impl<T: Transform> Clone for Dispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            transform: self.transform.clone(),
            gate: self.gate.clone(),
            retry: self.retry,
        }
    }
}

impl<T: Transform> Dispatcher<T> {
    pub fn new(transform: Arc<T>, max_concurrency: usize, retry: RetryPolicy) -> Self {
        Self {
            transform,
            gate: Arc::new(Semaphore::new(max_concurrency.max(1))),
            retry,
        }
    }

    pub fn from_config(transform: Arc<T>, config: &Config) -> Self {
        Self::new(
            transform,
            config.max_concurrency,
            RetryPolicy::from_config(config),
        )
    }

    /// 停止接收新调用：排队中和退避中的任务返回 `TransformError::Cancelled`
    pub fn close(&self) {
        self.gate.close();
    }

    pub fn is_closed(&self) -> bool {
        self.gate.is_closed()
    }

    /// 执行单个任务（占用一个并发名额，频率限制时退避重试）
    pub async fn run_job(&self, job: &Job) -> Result<String, TransformError> {
        let max_attempts = self.retry.max_attempts;
        let mut attempt = 0u32;

        loop {
            let result = {
                let _permit = self
                    .gate
                    .acquire()
                    .await
                    .map_err(|_| TransformError::Cancelled)?;
                self.transform.transform(&job.prompt, &job.input).await
            };

            match result {
                Ok(output) => return Ok(output),
                Err(e) if e.is_retryable() && attempt + 1 < max_attempts => {
                    let wait = self.retry.delay_for(attempt);
                    warn!(
                        "[{}] ⏳ 请求频率限制，{}s 后重试 (第 {}/{} 次尝试)",
                        job.label,
                        wait.as_secs_f64(),
                        attempt + 1,
                        max_attempts
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        error!("[{}] ❌ 已尝试 {} 次仍被限流", job.label, max_attempts);
                    }
                    return Err(e);
                }
            }
        }
    }

    /// 并发执行全部任务，按提交顺序返回结果
    pub async fn dispatch(&self, jobs: Vec<Job>) -> AppResult<Vec<JobResult>> {
        let total = jobs.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let completed = Arc::new(AtomicUsize::new(0));
        let mut tasks = JoinSet::new();

        for (slot, job) in jobs.into_iter().enumerate() {
            let dispatcher = self.clone();
            let completed = completed.clone();
            tasks.spawn(async move {
                let result = dispatcher.run_job(&job).await;
                if result.is_ok() {
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    info!("  [{}/{}] ✓ {} 完成", done, total, job.label);
                }
                (slot, job, result)
            });
        }

        let mut slots: Vec<Option<JobResult>> = vec![None; total];
        while let Some(joined) = tasks.join_next().await {
            let (slot, job, result) = joined?;
            match result {
                Ok(output) => {
                    slots[slot] = Some(JobResult {
                        index: job.index,
                        output,
                    });
                }
                Err(source) => {
                    error!("[{}] ❌ 任务失败: {}", job.label, source);
                    tasks.abort_all();
                    return Err(AppError::Job {
                        label: job.label,
                        source,
                    });
                }
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// 用闭包实现的转换服务
    struct FnTransform<F>(F);

    impl<F, Fut> Transform for FnTransform<F>
    where
        F: Fn(String, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, TransformError>> + Send + 'static,
    {
        fn transform(
            &self,
            prompt: &str,
            input: &str,
        ) -> impl Future<Output = Result<String, TransformError>> + Send {
            (self.0)(prompt.to_string(), input.to_string())
        }
    }

    fn jobs(n: usize) -> Vec<Job> {
        (0..n)
            .map(|i| Job::new(i, format!("job-{i}"), "p", i.to_string()))
            .collect()
    }

    fn rate_limited() -> TransformError {
        TransformError::RateLimited {
            message: "429".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_follow_submission_order() {
        let finished = Arc::new(Mutex::new(Vec::new()));
        let log = finished.clone();
        let transform = FnTransform(move |_prompt: String, input: String| {
            let log = log.clone();
            async move {
                let i: u64 = input.parse().unwrap();
                // 后提交的任务先完成
                tokio::time::sleep(Duration::from_millis(100 - i * 10)).await;
                log.lock().unwrap().push(i);
                Ok(format!("out-{i}"))
            }
        });

        let dispatcher = Dispatcher::new(Arc::new(transform), 10, RetryPolicy::default());
        let results = dispatcher.dispatch(jobs(8)).await.unwrap();

        let outputs: Vec<String> = results.iter().map(|r| r.output.clone()).collect();
        let expected: Vec<String> = (0..8).map(|i| format!("out-{i}")).collect();
        assert_eq!(outputs, expected);
        assert_eq!(results.iter().map(|r| r.index).collect::<Vec<_>>(), (0..8).collect::<Vec<_>>());

        let order = finished.lock().unwrap().clone();
        assert_eq!(order, vec![7, 6, 5, 4, 3, 2, 1, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_never_exceeds_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (flight, top) = (in_flight.clone(), peak.clone());
        let transform = FnTransform(move |_p: String, input: String| {
            let (flight, top) = (flight.clone(), top.clone());
            async move {
                let now = flight.fetch_add(1, Ordering::SeqCst) + 1;
                top.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                flight.fetch_sub(1, Ordering::SeqCst);
                Ok(input)
            }
        });

        let dispatcher = Dispatcher::new(Arc::new(transform), 3, RetryPolicy::default());
        let results = dispatcher.dispatch(jobs(12)).await.unwrap();

        assert_eq!(results.len(), 12);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_retries_five_times_with_doubling_delays() {
        let calls = Arc::new(Mutex::new(Vec::<Instant>::new()));
        let log = calls.clone();
        let transform = FnTransform(move |_p: String, _i: String| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(Instant::now());
                Err::<String, _>(rate_limited())
            }
        });

        let policy = RetryPolicy::new(5, Duration::from_secs(10));
        let dispatcher = Dispatcher::new(Arc::new(transform), 1, policy);
        let err = dispatcher.dispatch(jobs(1)).await.unwrap_err();

        assert!(matches!(
            err,
            AppError::Job { ref label, source: TransformError::RateLimited { .. } } if label == "job-0"
        ));

        let calls = calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 5);
        let gaps: Vec<u64> = calls.windows(2).map(|w| (w[1] - w[0]).as_secs()).collect();
        assert_eq!(gaps, vec![10, 20, 40, 80]);

        let schedule: Vec<u64> = policy.schedule().iter().map(Duration::as_secs).collect();
        assert_eq!(schedule, vec![10, 20, 40, 80, 160]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_rate_limits() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let transform = FnTransform(move |_p: String, _i: String| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(rate_limited())
                } else {
                    Ok("done".to_string())
                }
            }
        });

        let dispatcher = Dispatcher::new(Arc::new(transform), 2, RetryPolicy::default());
        let job = Job::new(0, "single", "p", "x");
        assert_eq!(dispatcher.run_job(&job).await.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let transform = FnTransform(move |_p: String, input: String| {
            let counter = counter.clone();
            async move {
                if input == "2" {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(TransformError::failed("bad request"))
                } else {
                    Ok(input)
                }
            }
        });

        let dispatcher = Dispatcher::new(Arc::new(transform), 4, RetryPolicy::default());
        let err = dispatcher.dispatch(jobs(4)).await.unwrap_err();

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(err.to_string().contains("job-2"));
        assert!(err.to_string().contains("bad request"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_lets_running_call_finish_and_cancels_queued() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let transform = FnTransform(move |_p: String, input: String| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(input)
            }
        });

        let dispatcher = Dispatcher::new(Arc::new(transform), 1, RetryPolicy::default());
        let running = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.run_job(&Job::new(0, "running", "p", "a")).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let queued = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.run_job(&Job::new(1, "queued", "p", "b")).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        dispatcher.close();
        assert!(dispatcher.is_closed());

        assert_eq!(running.await.unwrap().unwrap(), "a");
        assert_eq!(queued.await.unwrap().unwrap_err(), TransformError::Cancelled);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_job_list_is_a_no_op() {
        let transform = FnTransform(|_p: String, _i: String| async {
            Err::<String, _>(TransformError::failed("should not be called"))
        });
        let dispatcher = Dispatcher::new(Arc::new(transform), 1, RetryPolicy::default());
        assert!(dispatcher.dispatch(Vec::new()).await.unwrap().is_empty());
    }
}
