//! # Bond Quant
//!
//! 可转债自动调仓程序：对接 QMT 交易终端，按外部选债平台给出的
//! 目标列表定时调仓，盘中监控止盈止损并在当日截止时间统一补仓。

use anyhow::Result;
use once_cell::sync::Lazy;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::JobScheduler;
use tracing::info;

pub mod app_config;
pub mod error;
pub mod job;
pub mod time_util;
pub mod trading;

/// 全局调度器
pub static SCHEDULER: Lazy<Arc<Mutex<Option<Arc<JobScheduler>>>>> =
    Lazy::new(|| Arc::new(Mutex::new(None)));

/// 初始化并启动调度器
pub async fn init_scheduler() -> Result<Arc<JobScheduler>> {
    let mut scheduler_opt = SCHEDULER.lock().await;

    if scheduler_opt.is_none() {
        let mut scheduler = JobScheduler::new().await?;
        scheduler.start().await?;
        let arc_scheduler = Arc::new(scheduler);
        *scheduler_opt = Some(Arc::clone(&arc_scheduler));
        return Ok(arc_scheduler);
    }

    Ok(Arc::clone(scheduler_opt.as_ref().expect("scheduler present")))
}

/// 关闭调度器
pub async fn shutdown_scheduler() {
    let mut scheduler_guard = SCHEDULER.lock().await;
    if scheduler_guard.take().is_some() {
        info!("调度器关闭完成");
    } else {
        info!("调度器未初始化，跳过关闭");
    }
}
