pub mod factorcat;
pub mod market;
pub mod model;
pub mod qmt;
pub mod services;
pub mod strategy;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::info;

use crate::app_config::settings::AppConfig;
use crate::trading::factorcat::FactorCatClient;
use crate::trading::market::QuoteService;
use crate::trading::qmt::guardian::ConnectionGuardian;
use crate::trading::services::notification_service::NotificationService;
use crate::trading::services::scheduler_service;
use crate::trading::strategy::StrategyHandle;

/// 交易上下文：定时任务与各服务共享的协作对象
pub struct TradeContext {
    pub config: AppConfig,
    pub strategy: StrategyHandle,
    pub guardian: Arc<ConnectionGuardian>,
    pub quotes: Arc<QuoteService>,
    pub factorcat: Arc<FactorCatClient>,
    pub notification: Arc<NotificationService>,
    /// 同一会话上的委托不允许并发（底层会话库非线程安全），
    /// 所有下单路径先取这把锁
    pub order_lock: Mutex<()>,
}

impl TradeContext {
    pub fn new(
        config: AppConfig,
        strategy: StrategyHandle,
        guardian: Arc<ConnectionGuardian>,
        quotes: Arc<QuoteService>,
        factorcat: Arc<FactorCatClient>,
        notification: Arc<NotificationService>,
    ) -> Arc<Self> {
        Arc::new(TradeContext {
            config,
            strategy,
            guardian,
            quotes,
            factorcat,
            notification,
            order_lock: Mutex::new(()),
        })
    }

    /// 当前生效策略的快照，未选择策略时为 None
    pub async fn active_strategy(&self) -> Option<strategy::StrategyConfig> {
        self.strategy.read().await.clone()
    }
}

/// 启动自动交易：注册全部定时任务
///
/// 任务集合：选债调仓（按策略周期）、止盈止损检查（每分钟）、
/// 定时补仓（14:50）、连接健康检测（每 30 秒）、令牌刷新（每 30 分钟）。
pub async fn start_trading(ctx: Arc<TradeContext>) -> Result<()> {
    crate::init_scheduler().await?;

    scheduler_service::add_rebalance_job(ctx.clone()).await?;
    scheduler_service::add_stop_check_job(ctx.clone(), 1).await?;
    scheduler_service::add_refill_job(ctx.clone()).await?;
    scheduler_service::add_health_check_job(ctx.clone(), 30).await?;
    scheduler_service::add_token_refresh_job(ctx.clone(), 30).await?;

    info!("自动交易已启动");
    ctx.notification.notify_success("自动交易已启动", "定时任务注册完成");
    Ok(())
}

/// 停止自动交易：移除任务并断开会话，守护状态整体复位
pub async fn stop_trading(ctx: &TradeContext) {
    scheduler_service::remove_all_jobs().await;
    ctx.guardian.disconnect().await;
    info!("自动交易已停止");
}
