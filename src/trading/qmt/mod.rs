pub mod guardian;
pub mod qmt_client;

use std::fmt::{Display, Formatter};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::app_config::settings::OrderPriceMode;
use crate::trading::market::Quote;

/// 账户资产
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Asset {
    /// 可用资金
    pub cash: f64,
    pub frozen_cash: f64,
    pub market_value: f64,
    pub total_asset: f64,
}

/// 券商持仓（全量，含非本系统买入的标的）
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BrokerPosition {
    pub stock_code: String,
    pub volume: i64,
    /// 当前可卖数量
    pub can_use_volume: i64,
    pub avg_price: f64,
    pub market_value: f64,
}

/// 委托方向
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl Display for OrderSide {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// 委托请求
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub stock_code: String,
    pub side: OrderSide,
    pub volume: i64,
    pub price: f64,
    pub price_mode: OrderPriceMode,
    /// 策略名，随委托透传给终端便于对账
    pub strategy_name: String,
    pub remark: String,
}

/// 交易会话操作集
///
/// 网关内部细节（委托路由、行情推送）不在本系统范围内，只消费这组操作。
#[async_trait]
pub trait QmtApi: Send + Sync {
    /// 建立会话并订阅账号
    async fn connect(&self, qmt_path: &str, account_id: &str) -> anyhow::Result<()>;
    /// 断开会话，网关侧同时退订行情
    async fn disconnect(&self) -> anyhow::Result<()>;
    async fn query_asset(&self) -> anyhow::Result<Asset>;
    async fn query_positions(&self) -> anyhow::Result<Vec<BrokerPosition>>;
    /// 下单，返回委托号，非正数表示券商拒单
    async fn place_order(&self, req: &OrderRequest) -> anyhow::Result<i64>;
    /// 查询交易日历，返回区间内的交易日
    async fn trading_dates(&self, market: &str, start: &str, end: &str)
        -> anyhow::Result<Vec<String>>;
    /// 终端全推行情快照，作为外部行情源的兜底
    async fn full_tick(&self, stock_code: &str) -> anyhow::Result<Quote>;
}
