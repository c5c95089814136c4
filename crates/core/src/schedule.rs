use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{error, info, warn};

use scriptflow_domain::Task;
use scriptflow_engine::{JobDefinition, JobTask};
use scriptflow_errors::{ScriptFlowError, ScriptFlowResult};

use crate::context::ScriptFlow;

/// 返回给定时长的 -10% 与 +10%
///
/// 同周期的任务据此在 [0.9d, 1.1d] 内随机取间隔，避免同时触发。
pub fn duration_min_max(duration: Duration) -> (Duration, Duration) {
    let spread = duration / 10;
    (duration - spread, duration + spread)
}

/// 各 cron 字段的合法取值范围
const CRON_FIELD_RANGES: [(u32, u32); 5] = [
    (0, 59), // 分
    (0, 23), // 时
    (1, 31), // 日
    (1, 12), // 月
    (0, 6),  // 周
];

const CRON_FIELD_NAMES: [&str; 5] = ["minute", "hour", "day of month", "month", "day of week"];

static HASH_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^H(?:\((\d+)-(\d+)\))?$").unwrap());

/// FNV-1a 32位哈希
fn fnv1a_32(data: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for &byte in data {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

/// 把 Jenkins 风格的 H 记号解析为由种子决定的确定值
///
/// `H` 取整个字段范围，`H(min-max)` 取指定范围。相同种子与表达式
/// 的输出逐位一致；范围非法（min > max 或越界）时返回错误。
/// 非五段式输入原样返回。
pub fn resolve_hashed_schedule(schedule: &str, seed: &str) -> ScriptFlowResult<String> {
    let fields: Vec<&str> = schedule.split_whitespace().collect();
    if fields.len() != 5 {
        return Ok(schedule.to_string());
    }

    let mut hash_value = fnv1a_32(seed.as_bytes());
    let mut resolved = Vec::with_capacity(5);

    for (i, field) in fields.iter().enumerate() {
        let captures = match HASH_PATTERN.captures(field) {
            Some(captures) => captures,
            None => {
                resolved.push(field.to_string());
                continue;
            }
        };

        let (mut min_val, mut max_val) = CRON_FIELD_RANGES[i];
        if let (Some(min_match), Some(max_match)) = (captures.get(1), captures.get(2)) {
            let parsed_min: u32 = min_match.as_str().parse().map_err(|_| {
                ScriptFlowError::invalid_schedule(
                    schedule,
                    format!("invalid min value in {} field", CRON_FIELD_NAMES[i]),
                )
            })?;
            let parsed_max: u32 = max_match.as_str().parse().map_err(|_| {
                ScriptFlowError::invalid_schedule(
                    schedule,
                    format!("invalid max value in {} field", CRON_FIELD_NAMES[i]),
                )
            })?;

            if parsed_min > parsed_max {
                return Err(ScriptFlowError::invalid_schedule(
                    schedule,
                    format!(
                        "invalid range in {} field: min ({parsed_min}) > max ({parsed_max})",
                        CRON_FIELD_NAMES[i]
                    ),
                ));
            }
            if parsed_min < CRON_FIELD_RANGES[i].0 || parsed_max > CRON_FIELD_RANGES[i].1 {
                return Err(ScriptFlowError::invalid_schedule(
                    schedule,
                    format!(
                        "range out of bounds in {} field: H({parsed_min}-{parsed_max}), valid range is {}-{}",
                        CRON_FIELD_NAMES[i], CRON_FIELD_RANGES[i].0, CRON_FIELD_RANGES[i].1
                    ),
                ));
            }
            min_val = parsed_min;
            max_val = parsed_max;
        }

        let range_size = max_val - min_val + 1;
        let value = min_val + hash_value % range_size;
        resolved.push(value.to_string());

        // 每个字段混入不同的哈希位
        hash_value = hash_value.wrapping_mul(31).wrapping_add(i as u32);
    }

    Ok(resolved.join(" "))
}

impl ScriptFlow {
    /// 调度单个任务
    ///
    /// 不活跃的任务移除现有触发器；活跃任务按调度表达式建触发器，
    /// 已存在时原地更新（作业 id 不变）。整个过程持调度锁串行。
    pub async fn schedule_task(self: &Arc<Self>, task: &Task) {
        let _guard = self.schedule_task_lock.lock().await;

        let existing = self.get_active_job(&task.id);

        if !task.active {
            if let Some(job) = existing {
                match self.engine.remove_job(job.id) {
                    Ok(()) => {
                        self.remove_active_job(&task.id);
                        info!(task_id = %task.id, "已移除不活跃任务的触发器");
                    }
                    Err(e) => {
                        error!(task_id = %task.id, "移除不活跃任务失败: {e}");
                    }
                }
            }
            return;
        }

        info!(task_id = %task.id, name = %task.name, schedule = %task.schedule, "调度任务");

        let definition = match self.job_definition_for(task) {
            Ok(definition) => definition,
            Err(e) => {
                warn!(task_id = %task.id, schedule = %task.schedule, "任务无法调度: {e}");
                return;
            }
        };

        let job_task = self.job_task_for(&task.id);
        let tags = vec![task.id.clone()];

        match existing {
            Some(job) => match self.engine.update_job(job.id, definition, job_task, tags) {
                Ok(updated) => {
                    self.set_active_job(&task.id, updated);
                    info!(task_id = %task.id, "已更新现有任务触发器");
                }
                Err(e) => {
                    error!(task_id = %task.id, "更新任务触发器失败: {e}");
                }
            },
            None => {
                let job = self.engine.new_job(definition, job_task, tags);
                self.set_active_job(&task.id, job);
                info!(task_id = %task.id, "已调度新任务");
            }
        }
    }

    /// 由调度表达式生成触发器定义
    ///
    /// `@every <duration>` 走随机间隔；其余按五段 cron 处理，
    /// H 记号先用任务 id 做种子确定化。
    fn job_definition_for(&self, task: &Task) -> ScriptFlowResult<JobDefinition> {
        let schedule = task.schedule.trim();

        if let Some(spec) = schedule.strip_prefix("@every ") {
            let duration = humantime::parse_duration(spec.trim()).map_err(|e| {
                ScriptFlowError::invalid_schedule(schedule, format!("无法解析时长: {e}"))
            })?;
            let (min, max) = duration_min_max(duration);
            return JobDefinition::random_duration(min, max)
                .map_err(|e| ScriptFlowError::invalid_schedule(schedule, e.to_string()));
        }

        let resolved = resolve_hashed_schedule(schedule, &task.id)?;
        JobDefinition::cron(&resolved)
            .map_err(|e| ScriptFlowError::invalid_schedule(schedule, e.to_string()))
    }

    fn job_task_for(self: &Arc<Self>, task_id: &str) -> JobTask {
        let sf = Arc::clone(self);
        let task_id = task_id.to_string();
        Arc::new(move || {
            let sf = Arc::clone(&sf);
            let task_id = task_id.clone();
            Box::pin(async move {
                sf.run_task(&task_id).await;
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_min_max_exact_tenth() {
        let cases = [
            (Duration::from_secs(10), Duration::from_secs(9), Duration::from_secs(11)),
            (Duration::from_secs(300), Duration::from_secs(270), Duration::from_secs(330)),
            (Duration::from_secs(1), Duration::from_millis(900), Duration::from_millis(1100)),
        ];
        for (duration, min, max) in cases {
            assert_eq!(duration_min_max(duration), (min, max));
        }
    }

    #[test]
    fn test_resolve_plain_schedule_unchanged() {
        let resolved = resolve_hashed_schedule("5 4 * * *", "t1").unwrap();
        assert_eq!(resolved, "5 4 * * *");
    }

    #[test]
    fn test_resolve_non_five_field_unchanged() {
        assert_eq!(
            resolve_hashed_schedule("@every 1m", "t1").unwrap(),
            "@every 1m"
        );
        assert_eq!(resolve_hashed_schedule("H H", "t1").unwrap(), "H H");
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let first = resolve_hashed_schedule("H H * * *", "task-seed").unwrap();
        for _ in 0..10 {
            assert_eq!(
                resolve_hashed_schedule("H H * * *", "task-seed").unwrap(),
                first
            );
        }
    }

    #[test]
    fn test_resolve_values_within_field_ranges() {
        for seed in ["a", "b", "task-1", "task-2", "very-long-task-identifier"] {
            let resolved = resolve_hashed_schedule("H H H H H", seed).unwrap();
            let values: Vec<u32> = resolved
                .split_whitespace()
                .map(|f| f.parse().unwrap())
                .collect();
            assert_eq!(values.len(), 5);
            for (value, (min, max)) in values.iter().zip(CRON_FIELD_RANGES) {
                assert!(*value >= min && *value <= max, "{resolved} 超出范围");
            }
        }
    }

    #[test]
    fn test_resolve_different_seeds_spread() {
        let mut minutes = std::collections::HashSet::new();
        for i in 0..50 {
            let resolved = resolve_hashed_schedule("H * * * *", &format!("task-{i}")).unwrap();
            minutes.insert(resolved.split_whitespace().next().unwrap().to_string());
        }
        // 50 个种子的分钟值应当散开
        assert!(minutes.len() > 10, "只得到 {} 个不同的分钟值", minutes.len());
    }

    #[test]
    fn test_resolve_ranged_hash() {
        let resolved = resolve_hashed_schedule("H(10-30) * * * *", "t1").unwrap();
        let minute: u32 = resolved.split_whitespace().next().unwrap().parse().unwrap();
        assert!((10..=30).contains(&minute));
    }

    #[test]
    fn test_resolve_degenerate_range() {
        let resolved = resolve_hashed_schedule("H(0-0) * * * *", "whatever").unwrap();
        assert!(resolved.starts_with("0 "));
    }

    #[test]
    fn test_resolve_min_greater_than_max() {
        let err = resolve_hashed_schedule("H(30-10) * * * *", "t1").unwrap_err();
        assert!(err.to_string().contains("min (30) > max (10)"));
    }

    #[test]
    fn test_resolve_range_out_of_bounds() {
        assert!(resolve_hashed_schedule("H(0-75) * * * *", "t1").is_err());
        assert!(resolve_hashed_schedule("* H(5-25) * * *", "t1").is_err());
        // 日字段从 1 开始
        assert!(resolve_hashed_schedule("* * H(0-10) * *", "t1").is_err());
    }

    #[test]
    fn test_fnv1a_reference_values() {
        // FNV-1a 已知参考值
        assert_eq!(fnv1a_32(b""), 2166136261);
        assert_eq!(fnv1a_32(b"a"), 0xe40c292c);
    }
}
