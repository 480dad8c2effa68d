use std::sync::Arc;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// 执行周期描述，注册调度任务时转换为 cron 表达式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ScheduleRule {
    /// 每天 HH:MM
    Daily { time: String },
    /// 每周某天 HH:MM，day_of_week: 0-6 对应周一到周日
    Weekly { time: String, day_of_week: u32 },
    /// 每月某日 HH:MM，day_of_month: 1-31
    Monthly { time: String, day_of_month: u32 },
}

/// cron 的星期字段用缩写，避免不同实现对数字起点的歧义
const CRON_WEEKDAYS: [&str; 7] = ["MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

impl ScheduleRule {
    /// 默认调度：每天 14:50
    pub fn default_daily() -> Self {
        ScheduleRule::Daily {
            time: "14:50".to_string(),
        }
    }

    fn time_str(&self) -> &str {
        match self {
            ScheduleRule::Daily { time } => time,
            ScheduleRule::Weekly { time, .. } => time,
            ScheduleRule::Monthly { time, .. } => time,
        }
    }

    /// 解析 HH:MM
    fn parse_time(&self) -> anyhow::Result<(u32, u32)> {
        let time = self.time_str();
        let mut parts = time.splitn(2, ':');
        let hour: u32 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| anyhow!("执行时间格式非法: {}", time))?;
        let minute: u32 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| anyhow!("执行时间格式非法: {}", time))?;
        if hour > 23 || minute > 59 {
            return Err(anyhow!("执行时间超出范围: {}", time));
        }
        Ok((hour, minute))
    }

    /// 转换为六段式 cron 表达式（秒 分 时 日 月 星期）
    ///
    /// 配置的时间是东八区，调度器按 UTC 求值，这里做时区换算。
    /// 东八区 08:00 之前的时间换算后会落到前一天，星期/日期字段无法
    /// 同步平移，周度与月度周期拒绝这类配置（交易相关时间都在白天）。
    pub fn to_cron(&self) -> anyhow::Result<String> {
        let (hour, minute) = self.parse_time()?;
        let utc_hour = (hour + 24 - 8) % 24;
        let crosses_day = hour < 8;
        match self {
            ScheduleRule::Daily { .. } => Ok(format!("0 {} {} * * *", minute, utc_hour)),
            ScheduleRule::Weekly { day_of_week, .. } => {
                if crosses_day {
                    return Err(anyhow!("每周任务的执行时间需在 08:00 之后: {}", self.time_str()));
                }
                let dow = CRON_WEEKDAYS
                    .get(*day_of_week as usize)
                    .ok_or_else(|| anyhow!("day_of_week 超出范围: {}", day_of_week))?;
                Ok(format!("0 {} {} * * {}", minute, utc_hour, dow))
            }
            ScheduleRule::Monthly { day_of_month, .. } => {
                if crosses_day {
                    return Err(anyhow!("每月任务的执行时间需在 08:00 之后: {}", self.time_str()));
                }
                if *day_of_month < 1 || *day_of_month > 31 {
                    return Err(anyhow!("day_of_month 超出范围: {}", day_of_month));
                }
                Ok(format!("0 {} {} {} * *", minute, utc_hour, day_of_month))
            }
        }
    }
}

/// 当前生效的策略配置，同一时刻至多一个
///
/// 由上层在选择/清除策略时整体替换，各服务通过共享句柄读取快照。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub strategy_id: i64,
    pub strategy_name: String,
    /// 选债接口使用的策略运行（回测记录）ID
    pub run_id: i64,
    /// 止盈比例，当日涨幅达到即触发
    pub stop_profit_ratio: f64,
    /// 止损比例，当日跌幅达到即触发
    pub stop_loss_ratio: f64,
    pub execution_schedule: ScheduleRule,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// 各服务共享的策略句柄，None 表示未选择策略
pub type StrategyHandle = Arc<RwLock<Option<StrategyConfig>>>;

pub fn new_strategy_handle(initial: Option<StrategyConfig>) -> StrategyHandle {
    Arc::new(RwLock::new(initial))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daily_cron_shifted_to_utc() {
        // 东八区 14:50 -> UTC 06:50
        let rule = ScheduleRule::Daily {
            time: "14:50".to_string(),
        };
        assert_eq!(rule.to_cron().unwrap(), "0 50 6 * * *");

        // 东八区凌晨时间跨日，每日任务仍然成立
        let rule = ScheduleRule::Daily {
            time: "01:00".to_string(),
        };
        assert_eq!(rule.to_cron().unwrap(), "0 0 17 * * *");
    }

    #[test]
    fn test_weekly_cron_uses_named_day() {
        let rule = ScheduleRule::Weekly {
            time: "09:35".to_string(),
            day_of_week: 0,
        };
        assert_eq!(rule.to_cron().unwrap(), "0 35 1 * * MON");

        let rule = ScheduleRule::Weekly {
            time: "09:35".to_string(),
            day_of_week: 6,
        };
        assert_eq!(rule.to_cron().unwrap(), "0 35 1 * * SUN");
    }

    #[test]
    fn test_weekly_cron_rejects_cross_day_time() {
        let rule = ScheduleRule::Weekly {
            time: "07:00".to_string(),
            day_of_week: 0,
        };
        assert!(rule.to_cron().is_err());
    }

    #[test]
    fn test_monthly_cron() {
        let rule = ScheduleRule::Monthly {
            time: "10:00".to_string(),
            day_of_month: 1,
        };
        assert_eq!(rule.to_cron().unwrap(), "0 0 2 1 * *");
    }

    #[test]
    fn test_invalid_time_rejected() {
        let rule = ScheduleRule::Daily {
            time: "25:00".to_string(),
        };
        assert!(rule.to_cron().is_err());

        let rule = ScheduleRule::Weekly {
            time: "10:00".to_string(),
            day_of_week: 7,
        };
        assert!(rule.to_cron().is_err());
    }

    #[test]
    fn test_schedule_rule_json_tagging() {
        let rule: ScheduleRule =
            serde_json::from_str(r#"{"type":"weekly","time":"14:50","day_of_week":4}"#).unwrap();
        assert_eq!(
            rule,
            ScheduleRule::Weekly {
                time: "14:50".to_string(),
                day_of_week: 4
            }
        );
    }
}
