use chrono::{DateTime, Utc};
use cron::Schedule;
use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

use scheduler_errors::{SchedulerError, SchedulerResult};

/// CRON表达式解析和调度工具
///
/// 同时接受5字段（分 时 日 月 周）与6字段（秒 分 时 日 月 周）的表达式，
/// 5字段表达式按第0秒补齐。星期字段使用标准编号：0和7为周日，1到6为周一到周六。
#[derive(Debug, Clone)]
pub struct CronScheduler {
    expression: String,
    schedule: Schedule,
}

impl CronScheduler {
    /// 创建新的CRON调度器
    pub fn new(cron_expr: &str) -> SchedulerResult<Self> {
        let normalized = Self::normalize(cron_expr)?;
        let schedule = Schedule::from_str(&normalized).map_err(|e| SchedulerError::InvalidCron {
            expr: cron_expr.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            expression: cron_expr.trim().to_string(),
            schedule,
        })
    }

    fn normalize(cron_expr: &str) -> SchedulerResult<String> {
        let mut fields: Vec<String> = cron_expr.split_whitespace().map(String::from).collect();
        match fields.len() {
            5 => fields.insert(0, "0".to_string()),
            6 => {}
            n => {
                return Err(SchedulerError::InvalidCron {
                    expr: cron_expr.to_string(),
                    message: format!("需要5个或6个字段，实际为{n}个"),
                })
            }
        }

        let day_of_week = fields.len() - 1;
        fields[day_of_week] = Self::day_of_week(&fields[day_of_week], cron_expr)?;
        Ok(fields.join(" "))
    }

    /// 把标准的星期编号（0和7为周日，1为周一）转换为 `cron` 库的编号（1为周日）
    ///
    /// 数字的范围与步长展开为列表，星期名称等其他写法保持不变。
    fn day_of_week(field: &str, cron_expr: &str) -> SchedulerResult<String> {
        let invalid = |message: String| SchedulerError::InvalidCron {
            expr: cron_expr.to_string(),
            message,
        };

        let mut days = BTreeSet::new();
        let mut others = Vec::new();

        for item in field.split(',') {
            let (range, step) = match item.split_once('/') {
                Some((range, step)) => {
                    let step: u32 = step
                        .parse()
                        .map_err(|_| invalid(format!("星期字段的步长无效: {item}")))?;
                    if step == 0 {
                        return Err(invalid(format!("星期字段的步长必须大于0: {item}")));
                    }
                    (range, Some(step))
                }
                None => (item, None),
            };

            let bounds = match (range, step) {
                ("*", None) => {
                    others.push(item.to_string());
                    continue;
                }
                ("*", Some(_)) => Some((0, 6)),
                _ => match range.split_once('-') {
                    Some((start, end)) => start.parse::<u32>().ok().zip(end.parse::<u32>().ok()),
                    None => range.parse::<u32>().ok().map(|start| match step {
                        Some(_) => (start, 6),
                        None => (start, start),
                    }),
                },
            };

            let Some((start, end)) = bounds else {
                others.push(item.to_string());
                continue;
            };
            if start > 7 || end > 7 {
                return Err(invalid(format!("星期字段必须在0到7之间: {item}")));
            }
            if start > end {
                return Err(invalid(format!("星期字段的范围无效: {item}")));
            }

            let step = step.unwrap_or(1) as usize;
            days.extend((start..=end).step_by(step).map(|day| day % 7 + 1));
        }

        let mut items: Vec<String> = days.iter().map(u32::to_string).collect();
        items.extend(others);
        Ok(items.join(","))
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// 获取严格晚于 `from` 的下一次执行时间
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    /// 获取从指定时间开始的多个执行时间
    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&from).take(count).collect()
    }

    /// 验证CRON表达式是否有效
    pub fn validate_cron_expression(cron_expr: &str) -> SchedulerResult<()> {
        Self::new(cron_expr).map(|_| ())
    }

    /// 计算下次执行时间距离现在的时长，不再有执行时间时返回零
    pub fn delay_until_next(&self, now: DateTime<Utc>) -> Duration {
        self.next_execution_time(now)
            .and_then(|next| (next - now).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }

    /// 获取任务的执行频率描述
    pub fn frequency_description(&self) -> String {
        let upcoming = self.upcoming_times(Utc::now(), 2);
        if upcoming.len() >= 2 {
            let seconds = (upcoming[1] - upcoming[0]).num_seconds();

            match seconds {
                s if s < 60 => format!("每{s}秒"),
                s if s < 3600 => format!("每{}分钟", s / 60),
                s if s < 86400 => format!("每{}小时", s / 3600),
                s if s < 604800 => format!("每{}天", s / 86400),
                s => format!("每{}周", s / 604800),
            }
        } else {
            "无法确定频率".to_string()
        }
    }
}
