//! 均衡分组
//!
//! 不做"装满一组再开下一组"的贪心装箱（那样最后一组往往很小），而是先算出理想组数，
//! 再按平均目标大小切分：
//!
//! 1. `total = Σ tokens`
//! 2. `ideal_count = max(1, ceil(total / budget))`
//! 3. `target = total / ideal_count`
//! 4. 顺序累加，当前组非空且加入下一个单元会严格超过 `target` 时换组
//! 5. 最后一组小于 `0.3 × target` 且前面已有分组时，并入前一组
//!
//! 单元永不拆分：单个超大单元独占一组，即使超过预算。

use crate::models::{Batch, Unit};

/// 末尾小组并入前一组的比例阈值
pub const RUNT_FOLD_RATIO: f64 = 0.3;

/// 均衡分组器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalancedBatcher {
    budget: usize,
}

/// 分组计划（用于 dry-run 和日志）
#[derive(Debug, Clone, PartialEq)]
pub struct BatchPlan {
    pub total_tokens: usize,
    pub ideal_count: usize,
    pub target: f64,
}

impl BalancedBatcher {
    pub fn new(budget: usize) -> Self {
        Self {
            budget: budget.max(1),
        }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// 计算理想组数与目标大小
    pub fn plan(&self, units: &[Unit]) -> BatchPlan {
        let total_tokens: usize = units.iter().map(Unit::tokens).sum();
        let ideal_count = total_tokens.div_ceil(self.budget).max(1);
        BatchPlan {
            total_tokens,
            ideal_count,
            target: total_tokens as f64 / ideal_count as f64,
        }
    }

    /// 分组
    ///
    /// 每个单元恰好出现在一个分组中，分组顺序与单元顺序一致。空输入返回空列表。
    pub fn batch(&self, units: Vec<Unit>) -> Vec<Batch> {
        if units.is_empty() {
            return Vec::new();
        }

        let plan = self.plan(&units);
        let mut groups: Vec<Vec<Unit>> = Vec::with_capacity(plan.ideal_count + 1);
        let mut current: Vec<Unit> = Vec::new();
        let mut current_tokens = 0usize;

        for unit in units {
            let unit_tokens = unit.tokens();
            if !current.is_empty() && (current_tokens + unit_tokens) as f64 > plan.target {
                groups.push(std::mem::take(&mut current));
                current_tokens = 0;
            }
            current_tokens += unit_tokens;
            current.push(unit);
        }

        if !current.is_empty() {
            match groups.last_mut() {
                Some(previous) if (current_tokens as f64) < plan.target * RUNT_FOLD_RATIO => {
                    previous.extend(current);
                }
                _ => groups.push(current),
            }
        }

        groups
            .into_iter()
            .enumerate()
            .map(|(index, units)| Batch::new(index, units))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(sizes: &[usize]) -> Vec<Unit> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, &tokens)| Unit::new(format!("unit-{i}"), tokens))
            .collect()
    }

    fn flatten(batches: &[Batch]) -> Vec<String> {
        batches
            .iter()
            .flat_map(|b| b.units.iter().map(|u| u.text().to_string()))
            .collect()
    }

    #[test]
    fn test_forty_seven_units_make_three_balanced_batches() {
        let input = units(&[1000; 47]);
        let batches = BalancedBatcher::new(20_000).batch(input.clone());

        assert_eq!(batches.len(), 3);
        for batch in &batches {
            assert!((15..=17).contains(&batch.len()), "batch size {}", batch.len());
        }
        let expected: Vec<String> = input.iter().map(|u| u.text().to_string()).collect();
        assert_eq!(flatten(&batches), expected);
    }

    #[test]
    fn test_single_unit_is_single_batch() {
        let batches = BalancedBatcher::new(20_000).batch(units(&[500]));
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].index, 0);
    }

    #[test]
    fn test_empty_input_yields_no_batches() {
        assert!(BalancedBatcher::new(100).batch(Vec::new()).is_empty());
    }

    #[test]
    fn test_oversized_unit_stays_whole_in_own_batch() {
        let batches = BalancedBatcher::new(100).batch(units(&[40, 500, 40, 40]));
        assert!(batches.iter().any(|b| b.len() == 1 && b.tokens() == 500));
        assert_eq!(batches.iter().map(Batch::len).sum::<usize>(), 4);
    }

    #[test]
    fn test_small_remainder_is_folded_into_previous() {
        // total 215, budget 100 → 3 组, target ≈ 71.7；末尾 10 < 21.5 并入前一组
        let batches = BalancedBatcher::new(100).batch(units(&[70, 70, 65, 10]));
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2].tokens(), 75);
        assert_eq!(flatten(&batches).len(), 4);
    }

    #[test]
    fn test_batches_never_exceed_budget_before_fold() {
        let sizes: Vec<usize> = (0..200).map(|i| 50 + (i * 37) % 400).collect();
        let budget = 2_000;
        let batcher = BalancedBatcher::new(budget);
        let plan = batcher.plan(&units(&sizes));
        let batches = batcher.batch(units(&sizes));

        let count = batches.len();
        assert!(count >= plan.ideal_count);
        // 折叠只影响最后一组
        for batch in &batches[..count - 1] {
            assert!(batch.tokens() <= budget || batch.len() == 1);
        }
        assert_eq!(flatten(&batches), flatten(&[Batch::new(0, units(&sizes))]));
    }
}
