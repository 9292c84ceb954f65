//! 层级合并 - 编排层
//!
//! 把一组文本单元归约为一份输出：
//!
//! ```text
//! units ──分组──▶ batches ──consolidate──▶ outputs ──merge──▶ final
//!                                             │
//!                          超过合并阈值时再分组 merge，逐层收缩
//! ```
//!
//! - 总量不超过 `single_pass_threshold` 时只有一组，转换结果直接作为最终输出
//! - 只有一组时不发起 merge 调用
//! - 递归层数受 `max_merge_depth` 限制，超过即报错

use std::fmt::{self, Display};

use tracing::{info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::{Batch, Job, MergeSection, Unit};
use crate::orchestrator::dispatcher::Dispatcher;
use crate::services::{BalancedBatcher, PromptParams, PromptTemplate, TokenEstimator, Transform};
use crate::utils::logging::format_thousands;

/// 归约策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// 没有任何单元
    Empty,
    /// 一次调用完成
    SinglePass,
    /// 分组整理后合并
    Chunked { batches: usize },
}

impl Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Empty => write!(f, "无内容"),
            Strategy::SinglePass => write!(f, "单次处理"),
            Strategy::Chunked { batches } => write!(f, "分组处理 ({batches} 组)"),
        }
    }
}

/// 归约计划
#[derive(Debug, Clone)]
pub struct ReducePlan {
    pub strategy: Strategy,
    pub total_tokens: usize,
    pub unit_count: usize,
    pub batches: Vec<Batch>,
}

impl ReducePlan {
    /// 不考虑递归合并时需要的调用次数
    pub fn planned_calls(&self) -> usize {
        match self.strategy {
            Strategy::Empty => 0,
            Strategy::SinglePass => 1,
            Strategy::Chunked { batches } => batches + 1,
        }
    }

    /// dry-run 输出
    pub fn describe(&self) -> Vec<String> {
        let mut lines = vec![format!("策略: {}", self.strategy)];
        if let Strategy::Chunked { .. } = self.strategy {
            for batch in &self.batches {
                lines.push(format!(
                    "  分组 {}: {} 条, ~{} tokens",
                    batch.index + 1,
                    batch.len(),
                    format_thousands(batch.tokens())
                ));
            }
        }
        lines.push(format!("预计调用 {} 次", self.planned_calls()));
        lines
    }
}

/// 归约结果
#[derive(Debug, Clone)]
pub struct ReduceReport {
    pub output: String,
    pub strategy: Strategy,
    pub unit_count: usize,
    pub input_tokens: usize,
    pub output_tokens: usize,
    /// 实际发起的转换调用次数
    pub calls: usize,
    /// 递归合并层数（0 表示没有递归）
    pub merge_depth: usize,
}

impl ReduceReport {
    /// 输出占输入的百分比
    pub fn ratio_percent(&self) -> f64 {
        if self.input_tokens == 0 {
            return 0.0;
        }
        self.output_tokens as f64 / self.input_tokens as f64 * 100.0
    }
}

/// 层级合并器
pub struct HierarchicalReducer<T: Transform> {
    dispatcher: Dispatcher<T>,
    estimator: TokenEstimator,
    batcher: BalancedBatcher,
    single_pass_threshold: usize,
    merge_threshold: usize,
    max_merge_depth: usize,
    consolidate: PromptTemplate,
    merge: PromptTemplate,
}

impl<T: Transform> HierarchicalReducer<T> {
    pub fn new(dispatcher: Dispatcher<T>, config: &Config) -> AppResult<Self> {
        Ok(Self {
            dispatcher,
            estimator: TokenEstimator::from_config(config),
            batcher: BalancedBatcher::new(config.chunk_tokens),
            single_pass_threshold: config.single_pass_threshold,
            merge_threshold: config.merge_threshold(),
            max_merge_depth: config.max_merge_depth,
            consolidate: PromptTemplate::consolidate()?,
            merge: PromptTemplate::merge()?,
        })
    }

    /// 选择策略并分组（不发起调用）
    pub fn plan(&self, units: Vec<Unit>) -> ReducePlan {
        let unit_count = units.len();
        let total_tokens: usize = units.iter().map(Unit::tokens).sum();

        if units.is_empty() {
            return ReducePlan {
                strategy: Strategy::Empty,
                total_tokens,
                unit_count,
                batches: Vec::new(),
            };
        }

        let batches = if total_tokens <= self.single_pass_threshold {
            vec![Batch::new(0, units)]
        } else {
            self.batcher.batch(units)
        };

        let strategy = match batches.len() {
            1 => Strategy::SinglePass,
            n => Strategy::Chunked { batches: n },
        };

        ReducePlan {
            strategy,
            total_tokens,
            unit_count,
            batches,
        }
    }

    /// 归约；没有单元时返回 `None`
    pub async fn reduce(&self, label: &str, units: Vec<Unit>) -> AppResult<Option<ReduceReport>> {
        let plan = self.plan(units);
        self.execute(label, plan).await
    }

    /// 按已有计划执行
    pub async fn execute(&self, label: &str, plan: ReducePlan) -> AppResult<Option<ReduceReport>> {
        if plan.strategy == Strategy::Empty {
            info!("[{}] 没有可处理的内容，跳过", label);
            return Ok(None);
        }

        let batch_count = plan.batches.len();
        info!(
            "[{}] {} 条, ~{} tokens, 策略: {}",
            label,
            plan.unit_count,
            format_thousands(plan.total_tokens),
            plan.strategy
        );

        let prompt = self
            .consolidate
            .render(&PromptParams::new().set("category", label))?;
        let jobs = plan
            .batches
            .iter()
            .map(|batch| {
                Job::new(
                    batch.index,
                    format!("分组 {}/{}", batch.index + 1, batch_count),
                    prompt.clone(),
                    batch.joined_text(),
                )
            })
            .collect();

        let outputs: Vec<String> = self
            .dispatcher
            .dispatch(jobs)
            .await?
            .into_iter()
            .map(|r| r.output)
            .collect();
        let mut calls = batch_count;

        let (output, merge_depth) = if batch_count == 1 {
            (outputs.into_iter().next().unwrap_or_default(), 0)
        } else {
            self.merge_outputs(label, outputs, &mut calls).await?
        };

        let output_tokens = self.estimator.estimate(&output);
        Ok(Some(ReduceReport {
            output,
            strategy: plan.strategy,
            unit_count: plan.unit_count,
            input_tokens: plan.total_tokens,
            output_tokens,
            calls,
            merge_depth,
        }))
    }

    /// 合并各组输出，超过阈值时逐层递归
    async fn merge_outputs(
        &self,
        label: &str,
        mut outputs: Vec<String>,
        calls: &mut usize,
    ) -> AppResult<(String, usize)> {
        let mut depth = 0usize;

        loop {
            let sections = MergeSection::from_outputs(outputs);
            let combined = MergeSection::render_all(&sections);
            let tokens = self.estimator.estimate(&combined);

            if tokens <= self.merge_threshold || sections.len() == 1 {
                info!(
                    "[{}] 最终合并: {} 段, ~{} tokens",
                    label,
                    sections.len(),
                    format_thousands(tokens)
                );
                let output = self
                    .run_merge(label, "最终合并", sections.len(), combined)
                    .await?;
                *calls += 1;
                return Ok((output, depth));
            }

            depth += 1;
            if depth > self.max_merge_depth {
                return Err(AppError::MergeDepthExceeded {
                    max_depth: self.max_merge_depth,
                    tokens,
                });
            }
            warn!(
                "[{}] 合并输入 ~{} tokens 超过阈值 {}，进行第 {} 层递归合并",
                label,
                format_thousands(tokens),
                format_thousands(self.merge_threshold),
                depth
            );

            let units = sections
                .into_iter()
                .map(|s| self.estimator.unit(s.text))
                .collect();
            let groups = self.batcher.batch(units);
            let group_count = groups.len();

            let mut jobs = Vec::with_capacity(group_count);
            for group in &groups {
                let sub_sections =
                    MergeSection::from_outputs(group.units.iter().map(|u| u.text().to_string()));
                let prompt = self.merge.render(
                    &PromptParams::new()
                        .set("n", sub_sections.len())
                        .set("category", label),
                )?;
                jobs.push(Job::new(
                    group.index,
                    format!("第 {} 层合并 {}/{}", depth, group.index + 1, group_count),
                    prompt,
                    MergeSection::render_all(&sub_sections),
                ));
            }

            outputs = self
                .dispatcher
                .dispatch(jobs)
                .await?
                .into_iter()
                .map(|r| r.output)
                .collect();
            *calls += group_count;
        }
    }

    async fn run_merge(
        &self,
        label: &str,
        job_label: &str,
        sections: usize,
        input: String,
    ) -> AppResult<String> {
        let prompt = self.merge.render(
            &PromptParams::new()
                .set("n", sections)
                .set("category", label),
        )?;
        let job = Job::new(0, format!("[{label}] {job_label}"), prompt, input);
        self.dispatcher
            .run_job(&job)
            .await
            .map_err(|source| AppError::Job {
                label: job.label,
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransformError;
    use crate::orchestrator::dispatcher::RetryPolicy;
    use std::future::Future;
    use std::sync::{Arc, Mutex};

    /// 记录每次调用的提示词，按提示词类型输出固定长度的文本
    struct Recorder {
        prompts: Mutex<Vec<String>>,
        consolidate_chars: usize,
        merge_chars: usize,
    }

    impl Recorder {
        fn new(consolidate_chars: usize, merge_chars: usize) -> Arc<Self> {
            Arc::new(Self {
                prompts: Mutex::new(Vec::new()),
                consolidate_chars,
                merge_chars,
            })
        }

        fn kinds(&self) -> Vec<&'static str> {
            self.prompts
                .lock()
                .unwrap()
                .iter()
                .map(|p| kind_of(p))
                .collect()
        }
    }

    fn kind_of(prompt: &str) -> &'static str {
        if prompt.starts_with("You are given summaries") {
            "consolidate"
        } else {
            "merge"
        }
    }

    impl Transform for Recorder {
        fn transform(
            &self,
            prompt: &str,
            _input: &str,
        ) -> impl Future<Output = Result<String, TransformError>> + Send {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let chars = match kind_of(prompt) {
                "consolidate" => self.consolidate_chars,
                _ => self.merge_chars,
            };
            let output = "x".repeat(chars);
            async move { Ok(output) }
        }
    }

    fn config() -> Config {
        Config {
            chunk_tokens: 100,
            single_pass_threshold: 150,
            merge_threshold_factor: 2,
            chars_per_token: 1,
            max_merge_depth: 2,
            ..Config::default()
        }
    }

    fn reducer(recorder: Arc<Recorder>, config: &Config) -> HierarchicalReducer<Recorder> {
        let dispatcher = Dispatcher::new(recorder, 4, RetryPolicy::default());
        HierarchicalReducer::new(dispatcher, config).unwrap()
    }

    fn units(count: usize, size: usize) -> Vec<Unit> {
        (0..count).map(|_| Unit::new("u".repeat(size), size)).collect()
    }

    #[tokio::test]
    async fn test_single_unit_needs_no_merge_call() {
        let recorder = Recorder::new(10, 10);
        let reducer = reducer(recorder.clone(), &config());

        let report = reducer
            .reduce("Salary", vec![Unit::new("only", 4)])
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.strategy, Strategy::SinglePass);
        assert_eq!(report.calls, 1);
        assert_eq!(report.output, "x".repeat(10));
        assert_eq!(recorder.kinds(), vec!["consolidate"]);
    }

    #[tokio::test]
    async fn test_empty_input_is_a_no_op() {
        let recorder = Recorder::new(10, 10);
        let reducer = reducer(recorder.clone(), &config());
        assert!(reducer.reduce("Empty", Vec::new()).await.unwrap().is_none());
        assert!(recorder.kinds().is_empty());
    }

    #[tokio::test]
    async fn test_chunked_outputs_are_merged_once() {
        let recorder = Recorder::new(20, 20);
        let reducer = reducer(recorder.clone(), &config());

        // 8 × 50 = 400 tokens → 4 组，合并输入约 157 tokens，低于阈值 300
        let report = reducer.reduce("Interviews", units(8, 50)).await.unwrap().unwrap();

        assert_eq!(report.strategy, Strategy::Chunked { batches: 4 });
        assert_eq!(report.calls, 5);
        assert_eq!(report.merge_depth, 0);
        let kinds = recorder.kinds();
        assert_eq!(kinds.iter().filter(|k| **k == "consolidate").count(), 4);
        assert_eq!(kinds.last(), Some(&"merge"));
        let prompts = recorder.prompts.lock().unwrap();
        assert!(prompts
            .last()
            .unwrap()
            .starts_with("You are given 4 separately consolidated"));
    }

    #[tokio::test]
    async fn test_large_outputs_trigger_recursive_merge() {
        // 8 组各输出 40 字符，合并输入约 481 tokens > 300，两两再合并一层
        let recorder = Recorder::new(40, 30);
        let reducer = reducer(recorder.clone(), &config());

        let report = reducer.reduce("Resumes", units(16, 50)).await.unwrap().unwrap();

        assert_eq!(report.strategy, Strategy::Chunked { batches: 8 });
        assert_eq!(report.merge_depth, 1);
        assert_eq!(report.calls, 8 + 4 + 1);
        let kinds = recorder.kinds();
        assert_eq!(kinds.iter().filter(|k| **k == "merge").count(), 5);
        let prompts = recorder.prompts.lock().unwrap();
        assert!(prompts
            .iter()
            .any(|p| p.starts_with("You are given 2 separately consolidated")));
    }

    #[tokio::test]
    async fn test_expanding_transform_hits_depth_cap() {
        // 输出比阈值还大，合并永远收不住
        let recorder = Recorder::new(400, 400);
        let reducer = reducer(recorder, &config());

        let err = reducer.reduce("Loop", units(8, 50)).await.unwrap_err();
        assert!(matches!(err, AppError::MergeDepthExceeded { max_depth: 2, .. }));
    }

    #[test]
    fn test_plan_describes_batches_and_calls() {
        let reducer = reducer(Recorder::new(1, 1), &config());
        let plan = reducer.plan(units(8, 50));
        assert_eq!(plan.planned_calls(), 5);
        let lines = plan.describe();
        assert_eq!(lines.first().unwrap(), "策略: 分组处理 (4 组)");
        assert_eq!(lines.len(), 6);

        let small = reducer.plan(units(3, 40));
        assert_eq!(small.strategy, Strategy::SinglePass);
        assert_eq!(small.batches[0].len(), 3);
    }
}
