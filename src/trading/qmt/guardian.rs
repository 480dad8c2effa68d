use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};
use tracing::{error, info, warn};

use crate::app_config::settings::AppConfig;
use crate::error::AppError;
use crate::time_util::now_shanghai;
use crate::trading::qmt::{Asset, BrokerPosition, OrderRequest, QmtApi};
use crate::trading::services::notification_service::NotificationService;

/// 连接状态快照
///
/// 计数器与时间戳挂在守护对象上而不是模块级全局，重连状态机可以脱离
/// 调度器单独测试。
#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    pub connected: bool,
    /// 连续重连失败次数
    pub reconnect_failures: u32,
    pub last_health_check: Option<DateTime<FixedOffset>>,
    pub last_reconnect: Option<DateTime<FixedOffset>>,
}

/// 交易会话守护
///
/// 持有会话句柄的生命周期，所有交易路径在触达会话前都要经过
/// `ensure_connected` 这道闸门；后台健康检测任务驱动 `reconnect`。
pub struct ConnectionGuardian {
    api: Arc<dyn QmtApi>,
    state: Mutex<ConnectionState>,
    /// 自动重连次数上限，达到后停止并要求人工介入
    max_reconnect_attempts: u32,
    /// 两次重连之间的最小间隔（秒）
    reconnect_cooldown_secs: i64,
    /// 终态通知只发一次
    terminal_notified: AtomicBool,
}

impl ConnectionGuardian {
    const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 3;
    const DEFAULT_RECONNECT_COOLDOWN_SECS: i64 = 60;
    /// 断开旧会话后等待片刻再重连
    const RECONNECT_SETTLE: Duration = Duration::from_secs(2);

    pub fn new(api: Arc<dyn QmtApi>) -> Self {
        Self::with_limits(
            api,
            Self::DEFAULT_MAX_RECONNECT_ATTEMPTS,
            Self::DEFAULT_RECONNECT_COOLDOWN_SECS,
        )
    }

    pub fn with_limits(api: Arc<dyn QmtApi>, max_attempts: u32, cooldown_secs: i64) -> Self {
        ConnectionGuardian {
            api,
            state: Mutex::new(ConnectionState::default()),
            max_reconnect_attempts: max_attempts,
            reconnect_cooldown_secs: cooldown_secs,
            terminal_notified: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> ConnectionState {
        self.state.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn set_connected(&self, connected: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.connected = connected;
        }
    }

    /// 建立会话；失败时保持断开状态并上抛
    pub async fn connect(&self, qmt_path: &str, account_id: &str) -> Result<()> {
        match self.api.connect(qmt_path, account_id).await {
            Ok(()) => {
                if let Ok(mut state) = self.state.lock() {
                    state.connected = true;
                    state.reconnect_failures = 0;
                }
                self.terminal_notified.store(false, Ordering::SeqCst);
                info!("QMT 连接成功，账号: {}", account_id);
                Ok(())
            }
            Err(e) => {
                self.set_connected(false);
                Err(e).context("连接 QMT 失败")
            }
        }
    }

    /// 断开会话：总是复位失败计数与时间戳，网关侧退订行情
    pub async fn disconnect(&self) {
        if let Err(e) = self.api.disconnect().await {
            warn!("断开连接时出错: {}", e);
        }
        if let Ok(mut state) = self.state.lock() {
            *state = ConnectionState::default();
        }
        self.terminal_notified.store(false, Ordering::SeqCst);
        info!("QMT 已断开连接");
    }

    /// 轻量健康检查：只看内存中的连接标记，用于高频闸口
    pub fn is_connected(&self) -> bool {
        self.state.lock().map(|s| s.connected).unwrap_or(false)
    }

    /// 重量健康检查：发起一次真实的资产查询验证会话可用
    pub async fn health_check(&self) -> bool {
        if !self.is_connected() {
            return false;
        }
        if let Ok(mut state) = self.state.lock() {
            state.last_health_check = Some(now_shanghai());
        }
        match self.api.query_asset().await {
            Ok(_) => true,
            Err(e) => {
                warn!("QMT 健康检查失败: {}", e);
                false
            }
        }
    }

    /// 确保连接健康：最多探测 max_retries 次，探测间隔 retry_interval
    ///
    /// 所有触达交易会话的操作前的强制闸门；全部失败返回 false。
    pub async fn ensure_connected(&self, max_retries: u32, retry_interval: Duration) -> bool {
        for attempt in 0..max_retries {
            if self.health_check().await {
                return true;
            }
            if attempt + 1 < max_retries {
                tokio::time::sleep(retry_interval).await;
            }
        }
        false
    }

    /// 自动重连是否已达上限停摆（等待人工介入）
    pub fn terminal_exhausted(&self) -> bool {
        self.terminal_notified.load(Ordering::SeqCst)
    }

    /// 连接恢复后复位失败计数；返回是否发生了复位
    pub fn reset_if_recovered(&self) -> bool {
        if let Ok(mut state) = self.state.lock() {
            if state.reconnect_failures > 0 {
                state.reconnect_failures = 0;
                self.terminal_notified.store(false, Ordering::SeqCst);
                return true;
            }
        }
        false
    }

    /// 后台重连流程：计数上限、冷却间隔、断开重建、重量校验
    pub async fn reconnect(&self, config: &AppConfig, notification: &NotificationService) {
        let (failures, last_reconnect) = match self.state.lock() {
            Ok(state) => (state.reconnect_failures, state.last_reconnect),
            Err(_) => return,
        };

        // 达到上限后停止自动重连，终态通知只发一次
        if failures >= self.max_reconnect_attempts {
            if !self.terminal_notified.swap(true, Ordering::SeqCst) {
                let msg = format!(
                    "QMT 连接异常且重连失败 {} 次，已停止自动重连，请手动检查 QMT 程序状态",
                    self.max_reconnect_attempts
                );
                error!("{}", msg);
                notification.notify_error("QMT连接异常", &msg);
            }
            return;
        }

        // 两次重连之间保持最小冷却间隔
        if let Some(last) = last_reconnect {
            let elapsed = (now_shanghai() - last).num_seconds();
            if elapsed < self.reconnect_cooldown_secs {
                return;
            }
        }

        let attempt = failures + 1;
        if let Ok(mut state) = self.state.lock() {
            state.last_reconnect = Some(now_shanghai());
            state.reconnect_failures = attempt;
        }

        info!("尝试重连 QMT (第{}次)...", attempt);

        if config.qmt_path.is_empty() || config.account_id.is_empty() {
            error!("QMT 配置不完整，无法重连");
            return;
        }

        // 先断开可能残留的旧会话
        if let Err(e) = self.api.disconnect().await {
            warn!("断开旧连接时出错: {}", e);
        }
        self.set_connected(false);
        tokio::time::sleep(Self::RECONNECT_SETTLE).await;

        let reconnected = match self.api.connect(&config.qmt_path, &config.account_id).await {
            Ok(()) => {
                self.set_connected(true);
                // 重连后用重量检查确认会话真实可用
                self.health_check().await
            }
            Err(e) => {
                error!("QMT 重连失败: {}", e);
                false
            }
        };

        if reconnected {
            if let Ok(mut state) = self.state.lock() {
                state.reconnect_failures = 0;
            }
            self.terminal_notified.store(false, Ordering::SeqCst);
            info!("QMT 重连成功");
            notification.notify_success(
                "QMT重连成功",
                &format!("QMT 连接已恢复，重连次数: {}", attempt),
            );
        } else {
            self.set_connected(false);
            error!("QMT 重连后健康检查未通过 (第{}次)", attempt);
            if attempt >= self.max_reconnect_attempts
                && !self.terminal_notified.swap(true, Ordering::SeqCst)
            {
                notification.notify_error(
                    "QMT重连失败",
                    &format!(
                        "QMT 重连失败 {} 次，请手动检查 QMT 程序状态",
                        self.max_reconnect_attempts
                    ),
                );
            }
        }
    }

    // ===== 会话操作：统一经守护转发，未连接时直接拒绝 =====

    fn require_connected(&self) -> Result<()> {
        if !self.is_connected() {
            return Err(AppError::ConnectionError("QMT 未连接".to_string()).into());
        }
        Ok(())
    }

    pub async fn query_asset(&self) -> Result<Asset> {
        self.require_connected()?;
        self.api.query_asset().await
    }

    pub async fn query_positions(&self) -> Result<Vec<BrokerPosition>> {
        self.require_connected()?;
        self.api.query_positions().await
    }

    pub async fn place_order(&self, req: &OrderRequest) -> Result<i64> {
        self.require_connected()?;
        self.api.place_order(req).await
    }

    pub async fn trading_dates(&self, market: &str, start: &str, end: &str) -> Result<Vec<String>> {
        self.require_connected()?;
        self.api.trading_dates(market, start, end).await
    }
}
