// 连接健康检测任务

use std::sync::Arc;

use tracing::{info, warn};

use crate::trading::TradeContext;

/// QMT 连接健康检测任务
///
/// 每轮先看轻量标记，在线时再用一次真实往返确认会话可用；
/// 任一环节失败就把控制权交给守护对象的重连流程，由它执行
/// 计数上限、冷却间隔与终态通知；探测恢复则复位失败计数。
pub struct HealthCheckJob {
    ctx: Arc<TradeContext>,
}

impl HealthCheckJob {
    pub fn new(ctx: Arc<TradeContext>) -> Self {
        HealthCheckJob { ctx }
    }

    pub async fn run(&self) {
        let guardian = &self.ctx.guardian;

        let healthy = guardian.is_connected() && guardian.health_check().await;
        if healthy {
            if guardian.reset_if_recovered() {
                info!("QMT 连接已恢复正常");
            }
            return;
        }

        warn!("QMT 连接异常，尝试重连...");
        guardian
            .reconnect(&self.ctx.config, &self.ctx.notification)
            .await;
    }
}
