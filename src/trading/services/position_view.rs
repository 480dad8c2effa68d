use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::trading::model::position_record::PositionRecordModel;
use crate::trading::TradeContext;

/// 持仓视图行：项目账本 × 券商持仓 × 实时行情的联合快照，供展示层使用
#[derive(Debug, Clone, Serialize)]
pub struct PositionView {
    pub stock_code: String,
    pub stock_name: String,
    pub volume: i64,
    pub can_use_volume: i64,
    pub avg_price: f64,
    pub current_price: f64,
    pub market_value: f64,
    pub profit_loss: f64,
    pub profit_loss_ratio: f64,
    /// 基于前收盘价折算的止盈触发价（与实际触发口径一致）
    pub stop_profit_price: f64,
    pub stop_loss_price: f64,
}

/// 是否可转债代码：上海 11 开头，深圳 12 开头
pub fn is_convertible_bond_code(stock_code: &str) -> bool {
    let code_part = stock_code.split('.').next().unwrap_or(stock_code);
    code_part.starts_with("11") || code_part.starts_with("12")
}

/// 获取带行情的持仓列表
///
/// 只返回项目账本中的持仓，过滤掉账户里无关的股票与 ETF；
/// 行情获取失败的行价格置 0，不阻塞其余行。
pub async fn positions_with_quote(ctx: &TradeContext) -> Vec<PositionView> {
    if !ctx.guardian.is_connected() {
        return vec![];
    }
    if !ctx
        .guardian
        .ensure_connected(1, Duration::from_millis(500))
        .await
    {
        warn!("获取持仓前连接检查失败");
        return vec![];
    }

    let ledger = PositionRecordModel::new();
    let records = match ledger.list_all().await {
        Ok(records) if !records.is_empty() => records,
        Ok(_) => return vec![],
        Err(e) => {
            warn!("读取项目持仓记录失败: {}", e);
            return vec![];
        }
    };

    let positions = match ctx.guardian.query_positions().await {
        Ok(positions) => positions,
        Err(e) => {
            warn!("获取持仓失败: {}", e);
            return vec![];
        }
    };
    let position_map: HashMap<&str, _> = positions
        .iter()
        .map(|p| (p.stock_code.as_str(), p))
        .collect();

    let strategy = ctx.active_strategy().await;

    let mut result = Vec::new();
    for record in &records {
        let Some(pos) = position_map.get(record.stock_code.as_str()) else {
            continue;
        };
        if pos.volume <= 0 || !is_convertible_bond_code(&record.stock_code) {
            continue;
        }

        let quote = match ctx.quotes.get_quote(&record.stock_code).await {
            Ok(quote) => quote,
            Err(e) => {
                warn!("获取持仓 {} 实时价格失败: {}", record.stock_code, e);
                Default::default()
            }
        };
        let current_price = quote.last_price;

        let profit_loss = if current_price > 0.0 {
            (current_price - pos.avg_price) * pos.volume as f64
        } else {
            0.0
        };
        let profit_loss_ratio = if pos.avg_price > 0.0 && current_price > 0.0 {
            (current_price - pos.avg_price) / pos.avg_price
        } else {
            0.0
        };

        let (stop_profit_price, stop_loss_price) = match (&strategy, quote.prev_close > 0.0) {
            (Some(s), true) => (
                quote.prev_close * (1.0 + s.stop_profit_ratio),
                quote.prev_close * (1.0 - s.stop_loss_ratio),
            ),
            _ => (0.0, 0.0),
        };

        result.push(PositionView {
            stock_code: record.stock_code.clone(),
            stock_name: record.stock_name.clone(),
            volume: pos.volume,
            can_use_volume: pos.can_use_volume,
            avg_price: pos.avg_price,
            current_price,
            market_value: if current_price > 0.0 {
                current_price * pos.volume as f64
            } else {
                pos.market_value
            },
            profit_loss,
            profit_loss_ratio,
            stop_profit_price,
            stop_loss_price,
        });
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convertible_bond_code_prefixes() {
        assert!(is_convertible_bond_code("110038.SH"));
        assert!(is_convertible_bond_code("123456.SZ"));
        assert!(is_convertible_bond_code("127001"));
        assert!(!is_convertible_bond_code("600000.SH"));
        assert!(!is_convertible_bond_code("510300.SH"));
    }
}
