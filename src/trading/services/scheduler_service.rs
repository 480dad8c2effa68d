//! 调度器服务模块
//!
//! 统一的任务注册/移除入口，包含重试机制与错误容忍；五类定时任务
//! 在这里拼装触发器并挂接业务回调，回调内部自行消化业务失败，
//! 调度表不会因为某次执行失败而被改写。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use tokio::sync::Mutex;
use tokio_cron_scheduler::Job;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app_config::env::env_or_default;
use crate::job::health_check_job::HealthCheckJob;
use crate::time_util::{self, in_trading_window, now_shanghai, today_compact};
use crate::trading::services::rebalance_service::RebalanceService;
use crate::trading::services::refill_service::RefillService;
use crate::trading::services::risk_service::RiskService;
use crate::trading::strategy::ScheduleRule;
use crate::trading::TradeContext;

/// 调度器服务错误类型
#[derive(thiserror::Error, Debug)]
pub enum SchedulerServiceError {
    #[error("调度器未初始化")]
    NotInitialized,

    #[error("任务创建失败: {reason}")]
    JobCreationFailed { reason: String },

    #[error("任务注册失败: {reason}")]
    JobRegistrationFailed { reason: String },

    #[error("任务移除失败: {reason}")]
    JobRemovalFailed { reason: String },
}

/// 任务标识
pub const JOB_REBALANCE: &str = "rebalance";
pub const JOB_STOP_CHECK: &str = "stop_profit_loss";
pub const JOB_REFILL: &str = "refill";
pub const JOB_HEALTH_CHECK: &str = "qmt_health_check";
pub const JOB_TOKEN_REFRESH: &str = "token_refresh";

const MAX_RETRY_ATTEMPTS: u32 = 3;
const RETRY_DELAY_MS: u64 = 100;
const OPERATION_TIMEOUT_SECS: u64 = 5;

/// 健康检测任务的存活日志至少间隔 5 分钟输出一次
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(300);
static LAST_HEALTH_LOG: Lazy<std::sync::Mutex<Option<Instant>>> =
    Lazy::new(|| std::sync::Mutex::new(None));

/// 已注册任务登记表：任务名 -> 调度器内部 ID，同名任务注册前先移除旧任务
static JOB_REGISTRY: Lazy<Mutex<HashMap<&'static str, Uuid>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// 注册命名任务（带重试机制），同名旧任务先行移除
async fn register_named_job(name: &'static str, job: Job) -> Result<Uuid, SchedulerServiceError> {
    let old = JOB_REGISTRY.lock().await.remove(name);
    if let Some(old_id) = old {
        remove_job_safe(old_id).await;
    }

    let job_id = job.guid();
    for attempt in 1..=MAX_RETRY_ATTEMPTS {
        match try_register_job(job.clone()).await {
            Ok(_) => {
                info!("任务注册成功: {} ({})", name, job_id);
                JOB_REGISTRY.lock().await.insert(name, job_id);
                return Ok(job_id);
            }
            Err(e) if attempt < MAX_RETRY_ATTEMPTS => {
                warn!("任务注册失败，第{}次重试: {}", attempt, e);
                tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64)).await;
            }
            Err(e) => {
                error!("任务注册最终失败: {} {}", name, e);
                return Err(e);
            }
        }
    }

    Err(SchedulerServiceError::JobRegistrationFailed {
        reason: "达到最大重试次数".to_string(),
    })
}

async fn try_register_job(job: Job) -> Result<(), SchedulerServiceError> {
    let scheduler_guard = crate::SCHEDULER.lock().await;
    let scheduler = scheduler_guard
        .as_ref()
        .ok_or(SchedulerServiceError::NotInitialized)?;

    scheduler
        .add(job)
        .await
        .map_err(|e| SchedulerServiceError::JobRegistrationFailed {
            reason: format!("添加任务到调度器失败: {}", e),
        })?;

    Ok(())
}

/// 安全地移除任务（带超时和错误容忍），失败不影响系统继续运行
async fn remove_job_safe(job_id: Uuid) {
    let timeout_duration = Duration::from_secs(OPERATION_TIMEOUT_SECS);

    match tokio::time::timeout(timeout_duration, try_remove_job(job_id)).await {
        Ok(Ok(_)) => debug!("成功移除调度器任务: {}", job_id),
        Ok(Err(e)) => warn!("移除调度器任务失败，但不影响系统运行: {}", e),
        Err(_) => warn!(
            "移除调度器任务超时 ({}s)，任务可能仍在运行: {}",
            OPERATION_TIMEOUT_SECS, job_id
        ),
    }
}

async fn try_remove_job(job_id: Uuid) -> Result<(), SchedulerServiceError> {
    let scheduler_guard = crate::SCHEDULER.lock().await;
    let scheduler = scheduler_guard
        .as_ref()
        .ok_or(SchedulerServiceError::NotInitialized)?;

    scheduler
        .remove(&job_id)
        .await
        .map_err(|e| SchedulerServiceError::JobRemovalFailed {
            reason: format!("从调度器移除任务失败: {}", e),
        })?;

    Ok(())
}

/// 移除全部命名任务
pub async fn remove_all_jobs() {
    let ids: Vec<Uuid> = JOB_REGISTRY
        .lock()
        .await
        .drain()
        .map(|(_, id)| id)
        .collect();
    for id in ids {
        remove_job_safe(id).await;
    }
    info!("已移除全部定时任务");
}

/// 交易日判定：优先查终端交易日历，结果当日缓存；失败退回周末判断
pub async fn is_trading_day(ctx: &TradeContext) -> bool {
    let today = today_compact();
    if let Some(cached) = time_util::cached_trading_day(&today) {
        return cached;
    }

    match ctx.guardian.trading_dates("SH", &today, &today).await {
        Ok(dates) => {
            let result = !dates.is_empty();
            time_util::store_trading_day(&today, result);
            result
        }
        Err(e) => {
            warn!("获取交易日历失败，使用周末判断: {}", e);
            time_util::is_weekday(&now_shanghai())
        }
    }
}

/// 注册选债调仓任务，周期来自策略配置（默认每天 14:50）
pub async fn add_rebalance_job(ctx: Arc<TradeContext>) -> Result<(), SchedulerServiceError> {
    let rule = match ctx.active_strategy().await {
        Some(strategy) => strategy.execution_schedule,
        None => ScheduleRule::default_daily(),
    };
    let cron = rule
        .to_cron()
        .map_err(|e| SchedulerServiceError::JobCreationFailed {
            reason: format!("解析执行周期失败: {}", e),
        })?;
    info!("添加选债调仓任务: cron={}", cron);

    let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
        let ctx = Arc::clone(&ctx);
        Box::pin(async move {
            info!("[调度器触发] 选债调仓任务开始执行");
            if !is_trading_day(&ctx).await {
                info!("[选债] 非交易日，跳过选债调仓");
                return;
            }
            RebalanceService::new(ctx).execute_rebalance().await;
        })
    })
    .map_err(|e| SchedulerServiceError::JobCreationFailed {
        reason: format!("创建选债调仓任务失败: {}", e),
    })?;

    register_named_job(JOB_REBALANCE, job).await?;
    Ok(())
}

/// 注册止盈止损检查任务（固定间隔；交易时段外触发时跳过执行，任务保留）
pub async fn add_stop_check_job(
    ctx: Arc<TradeContext>,
    interval_minutes: u64,
) -> Result<(), SchedulerServiceError> {
    info!("添加止盈止损检查任务: 每 {} 分钟执行一次", interval_minutes);

    let job = Job::new_repeated_async(
        Duration::from_secs(interval_minutes * 60),
        move |_uuid, _lock| {
            let ctx = Arc::clone(&ctx);
            Box::pin(async move {
                debug!("[调度器触发] 止盈止损检查任务开始执行");
                if !is_trading_day(&ctx).await || !in_trading_window(now_shanghai().time()) {
                    debug!("[止盈止损] 非交易时间，跳过检查");
                    return;
                }
                RiskService::new(ctx).execute_stop_check().await;
            })
        },
    )
    .map_err(|e| SchedulerServiceError::JobCreationFailed {
        reason: format!("创建止盈止损任务失败: {}", e),
    })?;

    register_named_job(JOB_STOP_CHECK, job).await?;
    Ok(())
}

/// 注册定时补仓任务（每天补仓截止时间触发）
pub async fn add_refill_job(ctx: Arc<TradeContext>) -> Result<(), SchedulerServiceError> {
    let rule = ScheduleRule::default_daily();
    let cron = rule
        .to_cron()
        .map_err(|e| SchedulerServiceError::JobCreationFailed {
            reason: format!("解析补仓时间失败: {}", e),
        })?;
    info!("添加补仓任务: cron={}", cron);

    let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
        let ctx = Arc::clone(&ctx);
        Box::pin(async move {
            info!("[调度器触发] 补仓任务开始执行");
            if !is_trading_day(&ctx).await {
                info!("[补仓] 非交易日，跳过补仓");
                return;
            }
            RefillService::new(ctx).execute_scheduled_refill().await;
        })
    })
    .map_err(|e| SchedulerServiceError::JobCreationFailed {
        reason: format!("创建补仓任务失败: {}", e),
    })?;

    register_named_job(JOB_REFILL, job).await?;
    Ok(())
}

/// 注册连接健康检测任务（固定间隔，默认 30 秒）
pub async fn add_health_check_job(
    ctx: Arc<TradeContext>,
    interval_seconds: u64,
) -> Result<(), SchedulerServiceError> {
    info!("添加QMT健康检测任务: 每 {} 秒执行一次", interval_seconds);

    let job = Job::new_repeated_async(
        Duration::from_secs(interval_seconds),
        move |_uuid, _lock| {
            let ctx = Arc::clone(&ctx);
            Box::pin(async move {
                // 高频任务，存活日志限流输出
                if let Ok(mut last) = LAST_HEALTH_LOG.lock() {
                    let due = last.map_or(true, |t| t.elapsed() >= HEALTH_LOG_INTERVAL);
                    if due {
                        info!("[调度器触发] QMT健康检测任务运行中");
                        *last = Some(Instant::now());
                    }
                }
                HealthCheckJob::new(ctx).run().await;
            })
        },
    )
    .map_err(|e| SchedulerServiceError::JobCreationFailed {
        reason: format!("创建健康检测任务失败: {}", e),
    })?;

    register_named_job(JOB_HEALTH_CHECK, job).await?;
    Ok(())
}

/// 注册令牌刷新任务（固定间隔，默认 30 分钟）
pub async fn add_token_refresh_job(
    ctx: Arc<TradeContext>,
    interval_minutes: u64,
) -> Result<(), SchedulerServiceError> {
    info!("添加令牌刷新任务: 每 {} 分钟执行一次", interval_minutes);

    let job = Job::new_repeated_async(
        Duration::from_secs(interval_minutes * 60),
        move |_uuid, _lock| {
            let ctx = Arc::clone(&ctx);
            Box::pin(async move {
                debug!("[调度器触发] 令牌刷新任务开始执行");
                let username = env_or_default("FACTORCAT_USERNAME", "");
                let password = env_or_default("FACTORCAT_PASSWORD", "");
                if username.is_empty() || password.is_empty() {
                    debug!("[令牌刷新] 未配置平台账号，跳过");
                    return;
                }
                if let Err(e) = ctx.factorcat.refresh_token(&username, &password).await {
                    error!("令牌刷新失败: {}", e);
                }
            })
        },
    )
    .map_err(|e| SchedulerServiceError::JobCreationFailed {
        reason: format!("创建令牌刷新任务失败: {}", e),
    })?;

    register_named_job(JOB_TOKEN_REFRESH, job).await?;
    Ok(())
}
