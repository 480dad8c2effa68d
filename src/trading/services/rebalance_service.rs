use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::app_config::settings::{BuyAmountMode, OrderPriceMode};
use crate::error::AppError;
use crate::time_util::now_str;
use crate::trading::model::position_record::PositionRecordModel;
use crate::trading::qmt::{BrokerPosition, OrderRequest, OrderSide};
use crate::trading::strategy::StrategyConfig;
use crate::trading::TradeContext;

/// 可转债 10 张为 1 手，委托数量向下取整到整手
pub const LOT_SIZE: i64 = 10;

/// 金额模式不可用或资产查询失败时的兜底单只金额（元）
const FALLBACK_BUY_AMOUNT: f64 = 10000.0;

/// 调仓计划：先卖后买
///
/// to_sell = 账本 ∩ (券商持仓 − 目标)，只有本系统买入且不在新目标中的
/// 标的才会被卖出，账户里其他来源的持仓绝不触碰；
/// to_buy = 目标 − 券商持仓。
pub fn compute_rebalance_plan(
    target_codes: &BTreeSet<String>,
    held_codes: &BTreeSet<String>,
    ledger_codes: &BTreeSet<String>,
) -> (Vec<String>, Vec<String>) {
    let to_sell: Vec<String> = held_codes
        .iter()
        .filter(|code| !target_codes.contains(*code) && ledger_codes.contains(*code))
        .cloned()
        .collect();

    let to_buy: Vec<String> = target_codes
        .iter()
        .filter(|code| !held_codes.contains(*code))
        .cloned()
        .collect();

    (to_sell, to_buy)
}

/// 按金额和价格计算整手委托数量
pub fn calc_buy_volume(amount: f64, price: f64) -> i64 {
    if price <= 0.0 {
        return 0;
    }
    ((amount / price / LOT_SIZE as f64).floor() as i64) * LOT_SIZE
}

/// 计算单只买入金额：固定金额或按可用资金平均分配
///
/// average 模式用的是执行时点的可用资金，批量执行中途资金变化会影响
/// 后续标的的份额；资产查询失败时退回兜底金额。
pub(crate) async fn calculate_buy_amount(ctx: &TradeContext, bond_count: usize) -> f64 {
    if bond_count == 0 {
        return 0.0;
    }
    match ctx.config.buy_amount_mode {
        BuyAmountMode::Fixed => ctx.config.fixed_amount,
        BuyAmountMode::Average => match ctx.guardian.query_asset().await {
            Ok(asset) => asset.cash / bond_count as f64,
            Err(e) => {
                warn!("查询可用资金失败，使用默认买入金额: {}", e);
                FALLBACK_BUY_AMOUNT
            }
        },
    }
}

/// 委托价格：市价模式以限价单模拟，买入上浮 1%、卖出下浮 1%
pub(crate) fn order_price(mode: OrderPriceMode, side: OrderSide, last_price: f64) -> f64 {
    match (mode, side) {
        (OrderPriceMode::Limit, _) => last_price,
        (OrderPriceMode::Market, OrderSide::Buy) => last_price * 1.01,
        (OrderPriceMode::Market, OrderSide::Sell) => last_price * 0.99,
    }
}

/// 买入单只可转债并登记账本，调仓与补仓共用
pub(crate) async fn buy_bond(
    ctx: &TradeContext,
    stock_code: &str,
    stock_name: &str,
    amount: f64,
    strategy_name: &str,
) -> Result<()> {
    if !ctx
        .guardian
        .ensure_connected(1, Duration::from_millis(500))
        .await
    {
        return Err(AppError::ConnectionError(format!(
            "{} 获取价格前连接检查失败，跳过买入",
            stock_code
        ))
        .into());
    }

    let quote = ctx
        .quotes
        .get_quote(stock_code)
        .await
        .with_context(|| format!("{} 获取价格失败，跳过买入", stock_code))?;

    let volume = calc_buy_volume(amount, quote.last_price);
    if volume < LOT_SIZE {
        warn!("{} 计算数量不足1手，跳过买入", stock_code);
        return Ok(());
    }

    let price = order_price(ctx.config.order_price_mode, OrderSide::Buy, quote.last_price);
    let req = OrderRequest {
        stock_code: stock_code.to_string(),
        side: OrderSide::Buy,
        volume,
        price,
        price_mode: ctx.config.order_price_mode,
        strategy_name: strategy_name.to_string(),
        remark: String::new(),
    };

    let order_id = {
        let _guard = ctx.order_lock.lock().await;
        ctx.guardian.place_order(&req).await?
    };

    if order_id > 0 {
        info!(
            "买入 {} 委托成功，数量: {}，价格: {:.3}",
            stock_code, volume, price
        );
        let ledger = PositionRecordModel::new();
        if let Err(e) = ledger
            .upsert_buy(stock_code, stock_name, volume, price, &now_str(), strategy_name)
            .await
        {
            warn!("保存持仓记录失败: {}, {}", stock_code, e);
        }
        Ok(())
    } else {
        Err(AppError::OrderRejected(format!("买入 {} 委托失败", stock_code)).into())
    }
}

/// 选债调仓引擎
pub struct RebalanceService {
    ctx: Arc<TradeContext>,
}

impl RebalanceService {
    pub fn new(ctx: Arc<TradeContext>) -> Self {
        RebalanceService { ctx }
    }

    /// 执行持仓调整
    ///
    /// 卖出账本内不在新选债列表中的持仓，买入列表内未持有的标的。
    /// 单个标的失败只跳过该标的，周期级失败（无策略/无连接/空列表）
    /// 只放弃本周期。
    pub async fn execute_rebalance(&self) {
        let Some(strategy) = self.ctx.active_strategy().await else {
            error!("未选择运行策略，无法执行调仓");
            return;
        };

        if !self.ctx.guardian.is_connected() {
            error!("QMT 未连接，无法执行交易");
            return;
        }

        // 关键操作前做一次带重试的实时连接检查
        info!("检查 QMT 连接状态...");
        if !self
            .ctx
            .guardian
            .ensure_connected(2, Duration::from_secs(1))
            .await
        {
            error!("QMT 连接检查失败，无法执行调仓");
            return;
        }

        info!("开始执行选债调仓...");
        if let Err(e) = self.run_rebalance(&strategy).await {
            let msg = format!("选债调仓执行失败: {}", e);
            error!("{}", msg);
            self.ctx.notification.notify_error("选债调仓失败", &msg);
        }
    }

    async fn run_rebalance(&self, strategy: &StrategyConfig) -> Result<()> {
        // 1. 今日选债列表
        info!("正在获取今日选债列表...");
        let targets = self
            .ctx
            .factorcat
            .get_today_bonds(strategy.run_id)
            .await
            .context("获取今日选债列表失败")?;
        if targets.is_empty() {
            warn!("今日选债列表为空，跳过调仓");
            return Ok(());
        }

        // 2. 券商当前持仓（全量超集）
        info!("正在获取当前持仓...");
        let positions = self
            .ctx
            .guardian
            .query_positions()
            .await
            .context("获取当前持仓失败")?;
        info!("当前持仓 {} 只", positions.len());

        // 3. 项目账本（只卖本系统买入的）
        let ledger = PositionRecordModel::new();
        let records = ledger.list_all().await.context("读取项目持仓记录失败")?;
        info!("项目持仓记录 {} 只", records.len());

        let target_names: BTreeMap<String, String> = targets
            .iter()
            .map(|b| (b.code.clone(), b.name.clone()))
            .collect();
        let target_codes: BTreeSet<String> = targets.iter().map(|b| b.code.clone()).collect();
        let held_codes: BTreeSet<String> =
            positions.iter().map(|p| p.stock_code.clone()).collect();
        let ledger_codes: BTreeSet<String> =
            records.iter().map(|r| r.stock_code.clone()).collect();

        // 4. 计算买卖清单
        let (to_sell, to_buy) = compute_rebalance_plan(&target_codes, &held_codes, &ledger_codes);
        info!(
            "需要卖出: {} 只（仅项目买入的）, 需要买入: {} 只",
            to_sell.len(),
            to_buy.len()
        );

        // 5. 先卖出，单标的失败不阻塞其余标的
        for code in &to_sell {
            let record = records.iter().find(|r| &r.stock_code == code);
            if let Err(e) = self.sell_bond(code, &positions, record).await {
                let msg = format!("卖出 {} 失败: {}", code, e);
                error!("{}", msg);
                self.ctx.notification.notify_error("调仓卖出异常", &msg);
            }
        }

        // 6. 买入金额
        let buy_amount = calculate_buy_amount(&self.ctx, to_buy.len()).await;
        if !to_buy.is_empty() {
            info!("单只买入金额: {:.2} 元", buy_amount);
        }

        // 7. 执行买入
        for code in &to_buy {
            let name = target_names.get(code).map(String::as_str).unwrap_or("");
            if let Err(e) = buy_bond(&self.ctx, code, name, buy_amount, "调仓买入").await {
                let msg = format!("买入 {} 失败: {}", code, e);
                error!("{}", msg);
                self.ctx.notification.notify_error("调仓买入异常", &msg);
            }
        }

        info!("选债调仓执行完成");
        Ok(())
    }

    /// 卖出单只：数量取账本与可用数量的较小值，停牌转人工
    async fn sell_bond(
        &self,
        stock_code: &str,
        positions: &[BrokerPosition],
        record: Option<&crate::trading::model::position_record::PositionRecord>,
    ) -> Result<()> {
        let Some(pos) = positions.iter().find(|p| p.stock_code == stock_code) else {
            warn!("{} 无可用持仓，跳过卖出", stock_code);
            return Ok(());
        };
        if pos.can_use_volume <= 0 {
            warn!("{} 无可用持仓，跳过卖出", stock_code);
            return Ok(());
        }

        let Some(record) = record else {
            warn!("{} 不在项目持仓记录中，跳过卖出", stock_code);
            return Ok(());
        };

        let sell_volume = record.volume.min(pos.can_use_volume);
        if sell_volume <= 0 {
            warn!("{} 无可用数量，跳过卖出", stock_code);
            return Ok(());
        }

        if !self
            .ctx
            .guardian
            .ensure_connected(1, Duration::from_millis(500))
            .await
        {
            return Err(AppError::ConnectionError(format!(
                "{} 获取价格前连接检查失败，跳过卖出",
                stock_code
            ))
            .into());
        }

        let quote = self
            .ctx
            .quotes
            .get_quote(stock_code)
            .await
            .with_context(|| format!("{} 获取价格失败，跳过卖出", stock_code))?;

        if quote.is_suspended() {
            warn!("{} 停牌中，跳过卖出，请手动处理", stock_code);
            self.ctx
                .notification
                .notify_suspended(stock_code, &record.stock_name);
            return Ok(());
        }

        let price = order_price(
            self.ctx.config.order_price_mode,
            OrderSide::Sell,
            quote.last_price,
        );
        let req = OrderRequest {
            stock_code: stock_code.to_string(),
            side: OrderSide::Sell,
            volume: sell_volume,
            price,
            price_mode: self.ctx.config.order_price_mode,
            strategy_name: "调仓卖出".to_string(),
            remark: String::new(),
        };

        let order_id = {
            let _guard = self.ctx.order_lock.lock().await;
            self.ctx.guardian.place_order(&req).await?
        };

        if order_id > 0 {
            info!("卖出 {} 委托成功，数量: {}", stock_code, sell_volume);
            let ledger = PositionRecordModel::new();
            ledger.decrement_sell(stock_code, sell_volume).await?;
            Ok(())
        } else {
            Err(AppError::OrderRejected(format!("卖出 {} 委托失败", stock_code)).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(codes: &[&str]) -> BTreeSet<String> {
        codes.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_rebalance_plan_only_sells_ledger_owned() {
        // 目标 {A,B,C}，账本 {A,X}，券商持仓 {A,X,Y}
        let targets = set(&["A", "B", "C"]);
        let held = set(&["A", "X", "Y"]);
        let ledger = set(&["A", "X"]);

        let (to_sell, to_buy) = compute_rebalance_plan(&targets, &held, &ledger);

        // Y 非本系统买入，不卖；A 仍在目标中，保留
        assert_eq!(to_sell, vec!["X".to_string()]);
        assert_eq!(to_buy, vec!["B".to_string(), "C".to_string()]);
    }

    #[test]
    fn test_to_buy_excludes_already_held() {
        let targets = set(&["A", "B"]);
        let held = set(&["A"]);
        let ledger = set(&[]);

        let (to_sell, to_buy) = compute_rebalance_plan(&targets, &held, &ledger);
        assert!(to_sell.is_empty());
        assert_eq!(to_buy, vec!["B".to_string()]);
    }

    #[test]
    fn test_to_sell_is_subset_of_ledger() {
        let targets = set(&[]);
        let held = set(&["X", "Y", "Z"]);
        let ledger = set(&["Y"]);

        let (to_sell, _) = compute_rebalance_plan(&targets, &held, &ledger);
        assert_eq!(to_sell, vec!["Y".to_string()]);
    }

    #[test]
    fn test_calc_buy_volume_floors_to_lot() {
        // floor(10000 / 105.3 / 10) * 10 = 90
        assert_eq!(calc_buy_volume(10000.0, 105.3), 90);
        assert_eq!(calc_buy_volume(10000.0, 100.0), 100);
        // 不足一手
        assert_eq!(calc_buy_volume(500.0, 105.3), 0);
        // 非法价格
        assert_eq!(calc_buy_volume(10000.0, 0.0), 0);
        assert_eq!(calc_buy_volume(10000.0, -1.0), 0);
    }

    #[test]
    fn test_order_price_modes() {
        assert_eq!(order_price(OrderPriceMode::Limit, OrderSide::Buy, 100.0), 100.0);
        assert_eq!(order_price(OrderPriceMode::Limit, OrderSide::Sell, 100.0), 100.0);
        assert!((order_price(OrderPriceMode::Market, OrderSide::Buy, 100.0) - 101.0).abs() < 1e-9);
        assert!((order_price(OrderPriceMode::Market, OrderSide::Sell, 100.0) - 99.0).abs() < 1e-9);
    }
}
