use serde::{Deserialize, Serialize};

use crate::app_config::env::{env_f64_or_default, env_or_default};
use crate::error::AppError;

/// 买入金额模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuyAmountMode {
    /// 每只固定金额
    Fixed,
    /// 按可用资金平均分配
    Average,
}

/// 委托价格模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderPriceMode {
    /// 限价单，按最新价委托
    Limit,
    /// 市价单：以限价单模拟，买入上浮 1%、卖出下浮 1%
    Market,
}

/// 应用配置，每个交易周期读取一次的只读快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 本地 QMT 网关地址
    pub gateway_url: String,
    /// MiniQMT userdata 路径，连接会话时下发给网关
    pub qmt_path: String,
    /// 证券账号
    pub account_id: String,
    pub buy_amount_mode: BuyAmountMode,
    /// 固定金额模式下的单只买入金额（元）
    pub fixed_amount: f64,
    pub order_price_mode: OrderPriceMode,
    /// 通知邮箱，为空则不发送邮件
    pub notification_email: String,
}

impl BuyAmountMode {
    /// 未知取值回落为 average（原配置的默认行为）
    pub fn parse(s: &str) -> Self {
        match s {
            "fixed" => BuyAmountMode::Fixed,
            _ => BuyAmountMode::Average,
        }
    }
}

impl OrderPriceMode {
    pub fn parse(s: &str) -> Self {
        match s {
            "market" => OrderPriceMode::Market,
            _ => OrderPriceMode::Limit,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let qmt_path = env_or_default("QMT_PATH", "");
        let account_id = env_or_default("QMT_ACCOUNT_ID", "");
        if qmt_path.is_empty() {
            return Err(AppError::ConfigError("请先配置 MiniQMT 程序路径".to_string()).into());
        }
        if account_id.is_empty() {
            return Err(AppError::ConfigError("请先配置证券账号".to_string()).into());
        }

        let buy_amount_mode = BuyAmountMode::parse(&env_or_default("BUY_AMOUNT_MODE", "average"));
        let order_price_mode = OrderPriceMode::parse(&env_or_default("ORDER_PRICE_MODE", "limit"));

        Ok(Self {
            gateway_url: env_or_default("QMT_GATEWAY_URL", "http://127.0.0.1:58610"),
            qmt_path,
            account_id,
            buy_amount_mode,
            fixed_amount: env_f64_or_default("FIXED_BUY_AMOUNT", 10000.0),
            order_price_mode,
            notification_email: env_or_default("NOTIFICATION_EMAIL", ""),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse() {
        assert_eq!(BuyAmountMode::parse("fixed"), BuyAmountMode::Fixed);
        assert_eq!(BuyAmountMode::parse("average"), BuyAmountMode::Average);
        assert_eq!(BuyAmountMode::parse("unknown"), BuyAmountMode::Average);
        assert_eq!(OrderPriceMode::parse("market"), OrderPriceMode::Market);
        assert_eq!(OrderPriceMode::parse("limit"), OrderPriceMode::Limit);
    }
}
