use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::time_util::{is_past_refill_cutoff, now_shanghai, today_str, REFILL_CUTOFF};
use crate::trading::factorcat::TargetInstrument;
use crate::trading::model::refill_queue::{RefillItem, RefillQueueModel};
use crate::trading::services::rebalance_service::{buy_bond, calculate_buy_amount};
use crate::trading::strategy::StrategyConfig;
use crate::trading::TradeContext;

/// 止盈止损卖出原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    StopProfit,
    StopLoss,
}

impl Display for StopReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::StopProfit => write!(f, "止盈"),
            StopReason::StopLoss => write!(f, "止损"),
        }
    }
}

/// 风控卖出记录，作为一个批次交给补仓队列
#[derive(Debug, Clone)]
pub struct SoldRecord {
    pub stock_code: String,
    pub stock_name: String,
    pub volume: i64,
    pub sell_price: f64,
    pub reason: StopReason,
}

/// 补仓候选：选债列表中未持有的标的，保持列表原始排名顺序取前 N 只
///
/// 刚卖出的代码可能还短暂留在券商持仓里，先从持仓集合中剔除。
pub fn pick_refill_candidates<'a>(
    targets: &'a [TargetInstrument],
    held_codes: &BTreeSet<String>,
    sold_codes: &BTreeSet<String>,
    need: usize,
) -> Vec<&'a TargetInstrument> {
    targets
        .iter()
        .filter(|bond| !held_codes.contains(&bond.code) || sold_codes.contains(&bond.code))
        .take(need)
        .collect()
}

/// 补仓服务：队列入队 + 每日 14:50 的延迟买回
pub struct RefillService {
    ctx: Arc<TradeContext>,
}

impl RefillService {
    pub fn new(ctx: Arc<TradeContext>) -> Self {
        RefillService { ctx }
    }

    /// 将一个批次的风控卖出记录写入当日补仓队列
    ///
    /// 已过当日截止时间的批次整体丢弃（只告警），当天不再补仓。
    pub async fn enqueue_sold(&self, sold_items: &[SoldRecord]) {
        if sold_items.is_empty() {
            return;
        }

        let now = now_shanghai();
        if is_past_refill_cutoff(now.time()) {
            warn!(
                "当前时间 {} 已超过补仓截止时间 {}，今日不再补仓（共 {} 只）",
                now.format("%H:%M"),
                REFILL_CUTOFF,
                sold_items.len()
            );
            return;
        }

        info!(
            "将 {} 只止盈止损卖出的可转债加入待补仓队列",
            sold_items.len()
        );

        let date = today_str();
        let items: Vec<RefillItem> = sold_items
            .iter()
            .map(|s| RefillItem {
                id: None,
                date: date.clone(),
                stock_code: s.stock_code.clone(),
                stock_name: s.stock_name.clone(),
                volume: s.volume,
                sell_price: s.sell_price,
                reason: s.reason.to_string(),
                created_at: String::new(),
            })
            .collect();

        let queue = RefillQueueModel::new();
        if let Err(e) = queue.enqueue(&date, &items).await {
            error!("写入待补仓队列失败: {}", e);
            return;
        }

        let details: Vec<String> = sold_items
            .iter()
            .map(|s| format!("{}({}张-{})", s.stock_code, s.volume, s.reason))
            .collect();
        info!("待补仓队列: {}", details.join(", "));
    }

    /// 执行定时补仓（每日截止时间触发）
    pub async fn execute_scheduled_refill(&self) {
        let Some(strategy) = self.ctx.active_strategy().await else {
            info!("未选择运行策略，跳过补仓");
            return;
        };

        if !self.ctx.guardian.is_connected() {
            error!("QMT 未连接，无法执行补仓");
            return;
        }

        info!("开始执行定时补仓...");
        if let Err(e) = self.run_refill(&strategy).await {
            let msg = format!("补仓执行失败: {}", e);
            error!("{}", msg);
            self.ctx.notification.notify_error("补仓失败", &msg);
        }
    }

    async fn run_refill(&self, strategy: &StrategyConfig) -> Result<()> {
        let date = today_str();
        let queue = RefillQueueModel::new();

        // 1. 今日待补仓队列
        let queued = queue.list(&date).await.context("读取待补仓队列失败")?;
        if queued.is_empty() {
            info!("今日待补仓队列为空，无需补仓");
            return Ok(());
        }

        let details: Vec<String> = queued
            .iter()
            .map(|item| format!("{}({}张-{})", item.stock_code, item.volume, item.reason))
            .collect();
        info!("今日待补仓 {} 只：{}", queued.len(), details.join(", "));

        // 2. 补仓数量按卖出笔数一比一
        let refill_count = queued.len();

        // 3. 当前选债列表（保持接口返回顺序）
        let targets = self
            .ctx
            .factorcat
            .get_today_bonds(strategy.run_id)
            .await
            .context("获取选债列表失败")?;
        if targets.is_empty() {
            warn!("选债列表为空，无法补仓");
            return Ok(());
        }

        // 4. 当前持仓，剔除刚卖出的代码得到真实未持有集合
        let positions = self
            .ctx
            .guardian
            .query_positions()
            .await
            .context("获取当前持仓失败")?;
        let held_codes: BTreeSet<String> =
            positions.iter().map(|p| p.stock_code.clone()).collect();
        let sold_codes: BTreeSet<String> =
            queued.iter().map(|item| item.stock_code.clone()).collect();

        // 5. 候选与截取
        let to_buy = pick_refill_candidates(&targets, &held_codes, &sold_codes, refill_count);
        if to_buy.is_empty() {
            warn!("选债列表中无可补仓的可转债");
            return Ok(());
        }

        info!(
            "选债列表 {} 只，本次补仓 {} 只",
            targets.len(),
            to_buy.len()
        );

        // 6. 买入金额与调仓同一套算法
        let buy_amount = calculate_buy_amount(&self.ctx, to_buy.len()).await;
        if buy_amount <= 0.0 {
            warn!("计算买入金额为0，跳过补仓");
            return Ok(());
        }
        info!("补仓单只金额: {:.2} 元", buy_amount);

        // 7. 执行买入，单标的失败不阻塞其余标的，也不重新排队
        for bond in &to_buy {
            if let Err(e) = buy_bond(&self.ctx, &bond.code, &bond.name, buy_amount, "补仓买入").await
            {
                let msg = format!("补仓买入 {} 失败: {}", bond.code, e);
                error!("{}", msg);
                self.ctx.notification.notify_error("补仓买入异常", &msg);
            }
        }

        info!("补仓执行完成，共补仓 {} 只", to_buy.len());

        // 8. 无条件清空当日队列，失败的买入通过通知反馈而不是重试
        queue.clear(&date).await.context("清空待补仓队列失败")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bond(code: &str) -> TargetInstrument {
        TargetInstrument {
            code: code.to_string(),
            name: format!("{}名", code),
            price: None,
            trade_date: None,
        }
    }

    fn set(codes: &[&str]) -> BTreeSet<String> {
        codes.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_candidates_preserve_target_order() {
        let targets = vec![bond("C"), bond("A"), bond("B"), bond("D")];
        let held = set(&[]);
        let sold = set(&[]);

        let picked = pick_refill_candidates(&targets, &held, &sold, 3);
        let codes: Vec<&str> = picked.iter().map(|b| b.code.as_str()).collect();
        assert_eq!(codes, vec!["C", "A", "B"]);
    }

    #[test]
    fn test_candidates_exclude_held_but_not_just_sold() {
        let targets = vec![bond("A"), bond("B"), bond("C")];
        // B 已持有；A 虽在持仓集合但属于刚卖出的，算未持有
        let held = set(&["A", "B"]);
        let sold = set(&["A"]);

        let picked = pick_refill_candidates(&targets, &held, &sold, 10);
        let codes: Vec<&str> = picked.iter().map(|b| b.code.as_str()).collect();
        assert_eq!(codes, vec!["A", "C"]);
    }

    #[test]
    fn test_candidates_take_first_n_deterministically() {
        let targets = vec![bond("A"), bond("B"), bond("C")];
        let held = set(&[]);
        let sold = set(&[]);

        let first = pick_refill_candidates(&targets, &held, &sold, 2);
        let second = pick_refill_candidates(&targets, &held, &sold, 2);
        assert_eq!(
            first.iter().map(|b| &b.code).collect::<Vec<_>>(),
            second.iter().map(|b| &b.code).collect::<Vec<_>>()
        );
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn test_stop_reason_display() {
        assert_eq!(StopReason::StopProfit.to_string(), "止盈");
        assert_eq!(StopReason::StopLoss.to_string(), "止损");
    }
}
