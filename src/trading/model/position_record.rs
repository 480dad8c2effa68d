use rbatis::{crud, impl_select, RBatis};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::app_config::db;

/// 项目持仓记录：本系统买入持仓的唯一事实来源
///
/// 券商持仓是它的超集（账户里可能有其他来源的标的），任何卖出决策
/// 之前都必须先与这张账本取交集。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PositionRecord {
    pub id: Option<i64>,
    pub stock_code: String,
    pub stock_name: String,
    /// 持有数量，始终大于 0，减到 0 时整条记录删除
    pub volume: i64,
    /// 加权平均买入价
    pub buy_price: f64,
    pub buy_time: String,
    /// 来源策略名（调仓买入、补仓买入等）
    pub strategy_name: String,
}

crud!(PositionRecord {}, "position_records");
impl_select!(PositionRecord{select_by_code(stock_code:&str) -> Option =>
    "`where stock_code = #{stock_code} limit 1`"}, "position_records");
impl_select!(PositionRecord{get_all() => "`where volume > 0`"}, "position_records");

pub struct PositionRecordModel {
    db: &'static RBatis,
}

impl PositionRecordModel {
    pub fn new() -> Self {
        Self {
            db: db::get_db_client(),
        }
    }

    /// 买入成功后登记；同代码重复买入按数量加权平均更新成本
    pub async fn upsert_buy(
        &self,
        stock_code: &str,
        stock_name: &str,
        volume: i64,
        buy_price: f64,
        buy_time: &str,
        strategy_name: &str,
    ) -> anyhow::Result<()> {
        let existing = PositionRecord::select_by_code(self.db, stock_code).await?;

        match existing {
            Some(mut record) => {
                let total_volume = record.volume + volume;
                if total_volume > 0 {
                    record.buy_price = (record.volume as f64 * record.buy_price
                        + volume as f64 * buy_price)
                        / total_volume as f64;
                }
                record.volume = total_volume;
                record.buy_time = buy_time.to_string();
                PositionRecord::update_by_column(self.db, &record, "stock_code").await?;
                debug!("持仓记录已更新: {} 数量 {}", stock_code, total_volume);
            }
            None => {
                let record = PositionRecord {
                    id: None,
                    stock_code: stock_code.to_string(),
                    stock_name: stock_name.to_string(),
                    volume,
                    buy_price,
                    buy_time: buy_time.to_string(),
                    strategy_name: strategy_name.to_string(),
                };
                PositionRecord::insert(self.db, &record).await?;
                debug!("持仓记录已新增: {} 数量 {}", stock_code, volume);
            }
        }
        Ok(())
    }

    /// 卖出成功后扣减；扣到 0（含越界截断）时删除整条记录
    pub async fn decrement_sell(&self, stock_code: &str, sold_volume: i64) -> anyhow::Result<()> {
        let existing = PositionRecord::select_by_code(self.db, stock_code).await?;

        if let Some(mut record) = existing {
            let remain = (record.volume - sold_volume).max(0);
            if remain <= 0 {
                PositionRecord::delete_by_column(self.db, "stock_code", stock_code).await?;
                debug!("持仓记录已清零删除: {}", stock_code);
            } else {
                record.volume = remain;
                PositionRecord::update_by_column(self.db, &record, "stock_code").await?;
                debug!("持仓记录已扣减: {} 剩余 {}", stock_code, remain);
            }
        }
        Ok(())
    }

    pub async fn list_all(&self) -> anyhow::Result<Vec<PositionRecord>> {
        let data = PositionRecord::get_all(self.db).await?;
        Ok(data)
    }

    pub async fn get(&self, stock_code: &str) -> anyhow::Result<Option<PositionRecord>> {
        let data = PositionRecord::select_by_code(self.db, stock_code).await?;
        Ok(data)
    }
}
