use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::trading::market::{to_market_prefixed, Quote, QuoteProvider};

/// 新浪行情（备用源）
///
/// 响应形如 var hq_str_sh110038="名称,101.90,101.80,102.30,...";
/// 逗号分隔：1 今开，2 昨收，3 最新价，8 成交量，9 成交额。
/// 新浪接口要求携带 Referer，否则返回 403。
pub struct SinaQuoteProvider {
    client: Client,
}

impl SinaQuoteProvider {
    pub fn new() -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(5)).build()?;
        Ok(SinaQuoteProvider { client })
    }
}

fn field_f64(fields: &[&str], idx: usize) -> f64 {
    fields
        .get(idx)
        .and_then(|s| s.trim().parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// 解析新浪行情响应体
pub(crate) fn parse_sina_body(body: &str) -> Option<Quote> {
    let start = body.find('"')? + 1;
    let end = body.rfind('"')?;
    if end <= start {
        return None;
    }
    let fields: Vec<&str> = body[start..end].split(',').collect();
    if fields.len() < 10 {
        return None;
    }

    Some(Quote {
        last_price: field_f64(&fields, 3),
        prev_close: field_f64(&fields, 2),
        open: field_f64(&fields, 1),
        volume: field_f64(&fields, 8),
        amount: field_f64(&fields, 9),
        status: 0,
    })
}

#[async_trait]
impl QuoteProvider for SinaQuoteProvider {
    fn name(&self) -> &'static str {
        "sina"
    }

    async fn fetch(&self, stock_code: &str) -> Result<Quote> {
        let code = to_market_prefixed(stock_code);
        let url = format!("https://hq.sinajs.cn/list={}", code);
        let response = self
            .client
            .get(&url)
            .header("Referer", "https://finance.sina.com.cn")
            .send()
            .await?;
        let body = response.text().await?;
        debug!("sina quote raw: {}", body.trim());
        parse_sina_body(&body).ok_or_else(|| anyhow!("新浪行情响应无法解析: {}", stock_code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sina_body() {
        let body = r#"var hq_str_sh110038="济川转债,101.90,101.80,102.30,102.50,101.60,102.29,102.31,5678900,580123456.00,...";"#;
        let quote = parse_sina_body(body).unwrap();
        assert_eq!(quote.open, 101.90);
        assert_eq!(quote.prev_close, 101.80);
        assert_eq!(quote.last_price, 102.30);
        assert_eq!(quote.volume, 5678900.0);
    }

    #[test]
    fn test_parse_rejects_short_payload() {
        assert!(parse_sina_body(r#"var hq_str_sh110038="";"#).is_none());
        assert!(parse_sina_body("nope").is_none());
    }
}
