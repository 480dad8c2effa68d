pub mod sina;
pub mod tencent;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AppError;
use crate::trading::qmt::QmtApi;

/// 停牌状态码：17 临时停牌，20 暂停交易至闭市
const STATUS_SUSPENDED_TEMP: i32 = 17;
const STATUS_SUSPENDED_TO_CLOSE: i32 = 20;

/// 实时行情快照
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Quote {
    pub last_price: f64,
    /// 昨收价，当日涨跌幅的基准
    pub prev_close: f64,
    pub open: f64,
    pub volume: f64,
    pub amount: f64,
    /// 证券状态码，0 为正常
    pub status: i32,
}

impl Quote {
    pub fn is_suspended(&self) -> bool {
        matches!(
            self.status,
            STATUS_SUSPENDED_TEMP | STATUS_SUSPENDED_TO_CLOSE
        )
    }

    /// 价格可用于交易决策
    pub fn is_usable(&self) -> bool {
        self.last_price > 0.0
    }
}

/// 行情源能力，多个上游按优先级依次回退
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn fetch(&self, stock_code: &str) -> Result<Quote>;
}

/// 行情服务：按顺序尝试各上游，取第一个返回可用价格的结果
pub struct QuoteService {
    providers: Vec<Box<dyn QuoteProvider>>,
}

impl QuoteService {
    pub fn new(providers: Vec<Box<dyn QuoteProvider>>) -> Self {
        QuoteService { providers }
    }

    /// 默认上游顺序：腾讯单股接口、新浪行情、QMT 终端全推兜底
    pub fn with_default_providers(session: Arc<dyn QmtApi>) -> Result<Self> {
        Ok(QuoteService::new(vec![
            Box::new(tencent::TencentQuoteProvider::new()?),
            Box::new(sina::SinaQuoteProvider::new()?),
            Box::new(GatewayTickProvider { session }),
        ]))
    }

    pub async fn get_quote(&self, stock_code: &str) -> Result<Quote> {
        for provider in &self.providers {
            match provider.fetch(stock_code).await {
                Ok(quote) if quote.is_usable() => {
                    debug!(
                        "使用 {} 获取行情: {} = {}",
                        provider.name(),
                        stock_code,
                        quote.last_price
                    );
                    return Ok(quote);
                }
                Ok(_) => {
                    debug!("{} 返回 {} 无有效价格，尝试下一行情源", provider.name(), stock_code);
                }
                Err(e) => {
                    debug!("使用 {} 获取 {} 行情失败: {}", provider.name(), stock_code, e);
                }
            }
        }
        Err(AppError::DataUnavailable(format!("所有行情源都无法获取 {} 的价格", stock_code)).into())
    }
}

/// QMT 终端全推行情，作为外部行情源之后的兜底
struct GatewayTickProvider {
    session: Arc<dyn QmtApi>,
}

#[async_trait]
impl QuoteProvider for GatewayTickProvider {
    fn name(&self) -> &'static str {
        "qmt_tick"
    }

    async fn fetch(&self, stock_code: &str) -> Result<Quote> {
        self.session.full_tick(stock_code).await
    }
}

/// 证券代码转行情接口格式："123456.SZ" -> "sz123456"；无后缀时原样返回
pub(crate) fn to_market_prefixed(stock_code: &str) -> String {
    match stock_code.split_once('.') {
        Some((code, market)) if market.eq_ignore_ascii_case("SZ") => format!("sz{}", code),
        Some((code, market)) if market.eq_ignore_ascii_case("SH") => format!("sh{}", code),
        _ => stock_code.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_prefix_conversion() {
        assert_eq!(to_market_prefixed("110038.SH"), "sh110038");
        assert_eq!(to_market_prefixed("123456.SZ"), "sz123456");
        assert_eq!(to_market_prefixed("110038"), "110038");
    }

    #[test]
    fn test_suspended_status_codes() {
        let mut quote = Quote::default();
        assert!(!quote.is_suspended());
        quote.status = 17;
        assert!(quote.is_suspended());
        quote.status = 20;
        assert!(quote.is_suspended());
        quote.status = 1;
        assert!(!quote.is_suspended());
    }
}
