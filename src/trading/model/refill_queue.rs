use rbatis::{crud, impl_select, RBatis};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::app_config::db;
use crate::time_util::now_str;

/// 待补仓记录：止盈止损卖出后欠下的一笔当日买回
///
/// 按日期分区，当天截止时间之后统一消费并清空，绝不跨日。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefillItem {
    pub id: Option<i64>,
    /// 分区键，格式 YYYY-MM-DD
    pub date: String,
    pub stock_code: String,
    pub stock_name: String,
    pub volume: i64,
    pub sell_price: f64,
    /// 卖出原因（止盈/止损）
    pub reason: String,
    pub created_at: String,
}

crud!(RefillItem {}, "refill_queue");
impl_select!(RefillItem{select_by_date(date:&str) =>
    "`where date = #{date} order by created_at`"}, "refill_queue");

pub struct RefillQueueModel {
    db: &'static RBatis,
}

impl RefillQueueModel {
    pub fn new() -> Self {
        Self {
            db: db::get_db_client(),
        }
    }

    /// 批量入队一天的卖出记录
    pub async fn enqueue(&self, date: &str, items: &[RefillItem]) -> anyhow::Result<()> {
        for item in items {
            let row = RefillItem {
                id: None,
                date: date.to_string(),
                created_at: now_str(),
                ..item.clone()
            };
            RefillItem::insert(self.db, &row).await?;
        }
        debug!("待补仓队列已写入 {} 条, 日期 {}", items.len(), date);
        Ok(())
    }

    /// 按入队顺序读取某天的待补仓记录
    pub async fn list(&self, date: &str) -> anyhow::Result<Vec<RefillItem>> {
        let data = RefillItem::select_by_date(self.db, date).await?;
        Ok(data)
    }

    pub async fn clear(&self, date: &str) -> anyhow::Result<()> {
        RefillItem::delete_by_column(self.db, "date", date).await?;
        debug!("待补仓队列已清空, 日期 {}", date);
        Ok(())
    }

    pub async fn is_empty(&self, date: &str) -> anyhow::Result<bool> {
        Ok(self.list(date).await?.is_empty())
    }
}
