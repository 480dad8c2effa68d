use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info, warn};

use crate::trading::model::position_record::{PositionRecord, PositionRecordModel};
use crate::trading::qmt::{BrokerPosition, OrderRequest, OrderSide};
use crate::trading::services::rebalance_service::order_price;
use crate::trading::services::refill_service::{RefillService, SoldRecord, StopReason};
use crate::trading::TradeContext;

/// 按当日涨跌幅判定止盈止损
///
/// 两个比例均为正数时条件天然互斥；止盈分支先于止损求值，
/// 比例同时为 0 的极端情况落在止盈分支，这一求值顺序是约定而非巧合。
/// 边界相等即触发。
pub fn evaluate_stop(pct_change: f64, profit_ratio: f64, loss_ratio: f64) -> Option<StopReason> {
    if pct_change >= profit_ratio {
        Some(StopReason::StopProfit)
    } else if pct_change <= -loss_ratio {
        Some(StopReason::StopLoss)
    } else {
        None
    }
}

/// 止盈止损监控
pub struct RiskService {
    ctx: Arc<TradeContext>,
}

impl RiskService {
    pub fn new(ctx: Arc<TradeContext>) -> Self {
        RiskService { ctx }
    }

    /// 执行一轮止盈止损检查
    ///
    /// 高频触发，无策略/无连接/无账本记录时静默返回避免刷日志；
    /// 单标的失败只跳过该标的；一轮内全部成交的卖出作为一个批次
    /// 整体交给补仓队列，不在循环中途逐条入队。
    pub async fn execute_stop_check(&self) {
        let Some(strategy) = self.ctx.active_strategy().await else {
            return;
        };
        if !self.ctx.guardian.is_connected() {
            return;
        }

        let ledger = PositionRecordModel::new();
        let records = match ledger.list_all().await {
            Ok(records) if !records.is_empty() => records,
            Ok(_) => return,
            Err(e) => {
                error!("止盈止损检查读取持仓记录失败: {}", e);
                return;
            }
        };

        let positions = match self.ctx.guardian.query_positions().await {
            Ok(positions) => positions,
            Err(e) => {
                error!("止盈止损检查获取持仓失败: {}", e);
                return;
            }
        };
        let position_map: HashMap<&str, &BrokerPosition> = positions
            .iter()
            .map(|p| (p.stock_code.as_str(), p))
            .collect();

        let profit_ratio = strategy.stop_profit_ratio;
        let loss_ratio = strategy.stop_loss_ratio;

        // 收集本轮成功卖出的标的
        let mut sold_items: Vec<SoldRecord> = Vec::new();

        for record in &records {
            let Some(pos) = position_map.get(record.stock_code.as_str()) else {
                continue;
            };
            match self
                .check_single_position(pos, record, profit_ratio, loss_ratio)
                .await
            {
                Ok(Some(sold)) => sold_items.push(sold),
                Ok(None) => {}
                Err(e) => {
                    error!("检查 {} 止盈止损失败: {}", record.stock_code, e);
                }
            }
        }

        // 批量入队，避免半写批次
        if !sold_items.is_empty() {
            RefillService::new(self.ctx.clone())
                .enqueue_sold(&sold_items)
                .await;
        }
    }

    /// 检查单个持仓，触发时执行保护性卖出
    async fn check_single_position(
        &self,
        pos: &BrokerPosition,
        record: &PositionRecord,
        profit_ratio: f64,
        loss_ratio: f64,
    ) -> Result<Option<SoldRecord>> {
        // 获取行情前先做轻量连接确认
        if !self
            .ctx
            .guardian
            .ensure_connected(1, Duration::from_millis(500))
            .await
        {
            warn!("{} 获取价格前连接检查失败，跳过止盈止损检查", pos.stock_code);
            return Ok(None);
        }

        let quote = match self.ctx.quotes.get_quote(&pos.stock_code).await {
            Ok(quote) => quote,
            Err(e) => {
                warn!("止盈止损检查时获取 {} 价格失败: {}", pos.stock_code, e);
                return Ok(None);
            }
        };

        if quote.is_suspended() {
            warn!("{} 停牌中，请手动处理", pos.stock_code);
            self.ctx
                .notification
                .notify_suspended(&pos.stock_code, &record.stock_name);
            return Ok(None);
        }

        if quote.prev_close <= 0.0 {
            warn!("{} 前收盘价无效，无法计算当日涨跌幅", pos.stock_code);
            return Ok(None);
        }

        let pct_change = (quote.last_price - quote.prev_close) / quote.prev_close;

        match evaluate_stop(pct_change, profit_ratio, loss_ratio) {
            Some(reason) => {
                info!(
                    "{} 触发{}: 当日涨跌幅 {:.2}%",
                    pos.stock_code,
                    reason,
                    pct_change * 100.0
                );
                self.execute_stop_order(pos, record, quote.last_price, reason)
                    .await
            }
            None => Ok(None),
        }
    }

    /// 执行止盈止损卖出，成功后扣减账本并返回卖出信息
    async fn execute_stop_order(
        &self,
        pos: &BrokerPosition,
        record: &PositionRecord,
        last_price: f64,
        reason: StopReason,
    ) -> Result<Option<SoldRecord>> {
        // 卖出数量 = min(账本数量, 账户可用数量)
        let sell_volume = record.volume.min(pos.can_use_volume);
        if sell_volume <= 0 {
            warn!("{} 无可用数量，跳过{}卖出", pos.stock_code, reason);
            return Ok(None);
        }

        let price = order_price(self.ctx.config.order_price_mode, OrderSide::Sell, last_price);
        let req = OrderRequest {
            stock_code: pos.stock_code.clone(),
            side: OrderSide::Sell,
            volume: sell_volume,
            price,
            price_mode: self.ctx.config.order_price_mode,
            strategy_name: "止盈止损".to_string(),
            remark: reason.to_string(),
        };

        let order_id = {
            let _guard = self.ctx.order_lock.lock().await;
            self.ctx.guardian.place_order(&req).await?
        };

        if order_id > 0 {
            info!(
                "{} {}卖出委托成功，数量: {}",
                pos.stock_code, reason, sell_volume
            );

            let ledger = PositionRecordModel::new();
            ledger.decrement_sell(&pos.stock_code, sell_volume).await?;

            self.ctx.notification.notify_success(
                &format!("{}卖出成功", reason),
                &format!(
                    "{} {}，数量: {}，价格: {}",
                    pos.stock_code, record.stock_name, sell_volume, price
                ),
            );

            Ok(Some(SoldRecord {
                stock_code: pos.stock_code.clone(),
                stock_name: record.stock_name.clone(),
                volume: sell_volume,
                sell_price: price,
                reason,
            }))
        } else {
            // 拒单不上抛：通知已发出，账本保持不变，本标的留待下一轮
            let msg = format!("{} {}卖出委托失败", pos.stock_code, reason);
            error!("{}", msg);
            self.ctx
                .notification
                .notify_error(&format!("{}卖出失败", reason), &msg);
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_profit_boundary_triggers() {
        // 涨幅恰好等于止盈比例即触发
        assert_eq!(
            evaluate_stop(0.10, 0.10, 0.05),
            Some(StopReason::StopProfit)
        );
        assert_eq!(evaluate_stop(0.099, 0.10, 0.05), None);
    }

    #[test]
    fn test_stop_loss_boundary_triggers() {
        assert_eq!(evaluate_stop(-0.05, 0.10, 0.05), Some(StopReason::StopLoss));
        assert_eq!(evaluate_stop(-0.049, 0.10, 0.05), None);
    }

    #[test]
    fn test_conditions_mutually_exclusive_for_positive_ratios() {
        // 两比例均为正时不可能同时满足
        for pct in [-0.2, -0.05, 0.0, 0.05, 0.2] {
            let profit = evaluate_stop(pct, 0.1, 0.05) == Some(StopReason::StopProfit);
            let loss = evaluate_stop(pct, 0.1, 0.05) == Some(StopReason::StopLoss);
            assert!(!(profit && loss));
        }
    }

    #[test]
    fn test_zero_ratios_prefer_stop_profit() {
        // 双零比例时按约定先落止盈分支
        assert_eq!(evaluate_stop(0.0, 0.0, 0.0), Some(StopReason::StopProfit));
    }
}
