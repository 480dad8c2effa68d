use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::trading::market::{to_market_prefixed, Quote, QuoteProvider};

/// 腾讯单股实时行情
///
/// 响应形如 v_sh110038="1~转债名称~110038~102.30~101.80~101.90~...";
/// 字段以 ~ 分隔：3 最新价，4 昨收，5 今开，7 成交量（手），8 成交额。
pub struct TencentQuoteProvider {
    client: Client,
}

impl TencentQuoteProvider {
    pub fn new() -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(5)).build()?;
        Ok(TencentQuoteProvider { client })
    }
}

fn field_f64(fields: &[&str], idx: usize) -> f64 {
    fields
        .get(idx)
        .and_then(|s| s.trim().parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// 解析腾讯行情响应体
pub(crate) fn parse_tencent_body(body: &str) -> Option<Quote> {
    let start = body.find('"')? + 1;
    let end = body.rfind('"')?;
    if end <= start {
        return None;
    }
    let fields: Vec<&str> = body[start..end].split('~').collect();
    // 字段 0 为状态位，空或 "0" 视为无效
    if fields.len() < 9 || fields[0].is_empty() || fields[0] == "0" {
        return None;
    }

    Some(Quote {
        last_price: field_f64(&fields, 3),
        prev_close: field_f64(&fields, 4),
        open: field_f64(&fields, 5),
        // 腾讯返回手数，换算为张数
        volume: field_f64(&fields, 7) * 100.0,
        amount: field_f64(&fields, 8),
        status: 0,
    })
}

#[async_trait]
impl QuoteProvider for TencentQuoteProvider {
    fn name(&self) -> &'static str {
        "tencent"
    }

    async fn fetch(&self, stock_code: &str) -> Result<Quote> {
        let code = to_market_prefixed(stock_code);
        let url = format!("http://qt.gtimg.cn/q={}", code);
        let response = self.client.get(&url).send().await?;
        let body = response.text().await?;
        debug!("tencent quote raw: {}", body.trim());
        parse_tencent_body(&body).ok_or_else(|| anyhow!("腾讯行情响应无法解析: {}", stock_code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tencent_body() {
        let body = r#"v_sh110038="1~济川转债~110038~102.30~101.80~101.90~56789~1234567~0";"#;
        let quote = parse_tencent_body(body).unwrap();
        assert_eq!(quote.last_price, 102.30);
        assert_eq!(quote.prev_close, 101.80);
        assert_eq!(quote.open, 101.90);
        assert_eq!(quote.volume, 5678900.0);
        assert!(!quote.is_suspended());
    }

    #[test]
    fn test_parse_rejects_invalid_payload() {
        assert!(parse_tencent_body(r#"v_sh110038="";"#).is_none());
        assert!(parse_tencent_body("garbage").is_none());
        assert!(parse_tencent_body(r#"v_sh110038="0~~~~";"#).is_none());
    }
}
