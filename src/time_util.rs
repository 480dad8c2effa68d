use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Utc};
use once_cell::sync::Lazy;
use std::sync::Mutex;

/// 交易所时间统一按东八区处理
static SHANGHAI: Lazy<FixedOffset> = Lazy::new(|| FixedOffset::east_opt(8 * 3600).unwrap());

/// 当日补仓截止时间，超过后止盈止损卖出不再排队当日补仓
pub const REFILL_CUTOFF: &str = "14:50";

/// 交易日结果缓存：(yyyymmdd, 是否交易日)，一天内只查一次交易日历
static TRADING_DAY_CACHE: Lazy<Mutex<Option<(String, bool)>>> = Lazy::new(|| Mutex::new(None));

/// 当前上海时间
pub fn now_shanghai() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&SHANGHAI)
}

/// 当前上海日期，格式 YYYY-MM-DD（补仓队列的分区键）
pub fn today_str() -> String {
    now_shanghai().format("%Y-%m-%d").to_string()
}

/// 当前上海日期，格式 YYYYMMDD（交易日历查询用）
pub fn today_compact() -> String {
    now_shanghai().format("%Y%m%d").to_string()
}

/// 当前上海时间，格式 YYYY-MM-DD HH:MM:SS
pub fn now_str() -> String {
    now_shanghai().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn naive(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

/// 是否在交易时段内（上午 9:30-11:30，下午 13:00-15:00）
pub fn in_trading_window(t: NaiveTime) -> bool {
    (t >= naive(9, 30) && t <= naive(11, 30)) || (t >= naive(13, 0) && t <= naive(15, 0))
}

/// 是否已过当日补仓截止时间（严格晚于 14:50）
pub fn is_past_refill_cutoff(t: NaiveTime) -> bool {
    t > naive(14, 50)
}

/// 周末兜底判断：交易日历不可用时仅排除周六周日
pub fn is_weekday(now: &DateTime<FixedOffset>) -> bool {
    now.weekday().num_days_from_monday() < 5
}

/// 读取当日交易日缓存，跨天自动失效
pub fn cached_trading_day(today: &str) -> Option<bool> {
    let guard = TRADING_DAY_CACHE.lock().ok()?;
    match guard.as_ref() {
        Some((date, value)) if date == today => Some(*value),
        _ => None,
    }
}

/// 写入当日交易日缓存
pub fn store_trading_day(today: &str, value: bool) {
    if let Ok(mut guard) = TRADING_DAY_CACHE.lock() {
        *guard = Some((today.to_string(), value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trading_window_boundaries() {
        assert!(in_trading_window(naive(9, 30)));
        assert!(in_trading_window(naive(11, 30)));
        assert!(!in_trading_window(naive(11, 31)));
        assert!(!in_trading_window(naive(12, 59)));
        assert!(in_trading_window(naive(13, 0)));
        assert!(in_trading_window(naive(15, 0)));
        assert!(!in_trading_window(naive(15, 1)));
        assert!(!in_trading_window(naive(9, 29)));
    }

    #[test]
    fn test_refill_cutoff() {
        assert!(!is_past_refill_cutoff(naive(14, 50)));
        assert!(is_past_refill_cutoff(naive(14, 51)));
        assert!(!is_past_refill_cutoff(naive(9, 31)));
    }

    #[test]
    fn test_trading_day_cache_scoped_by_date() {
        store_trading_day("2025-01-02", true);
        assert_eq!(cached_trading_day("2025-01-02"), Some(true));
        assert_eq!(cached_trading_day("2025-01-03"), None);
    }
}
