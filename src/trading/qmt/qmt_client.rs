use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::app_config::env::env_or_default;
use crate::error::AppError;
use crate::trading::market::Quote;
use crate::trading::qmt::{Asset, BrokerPosition, OrderRequest, QmtApi};

/// 网关统一响应格式，code 为 0 表示成功
#[derive(Deserialize, Debug)]
struct GatewayResponse<T> {
    code: i32,
    msg: Option<String>,
    data: Option<T>,
}

/// 本地 QMT 网关客户端
///
/// MiniQMT 的 xtquant 会话由本机网关进程持有，这里通过 HTTP 消费
/// 连接、查询与委托操作。
pub struct QmtGatewayClient {
    client: Client,
    base_url: String,
}

impl QmtGatewayClient {
    pub fn new(base_url: String) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(5)).build()?;
        Ok(QmtGatewayClient { client, base_url })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(env_or_default("QMT_GATEWAY_URL", "http://127.0.0.1:58610"))
    }

    async fn send_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &str,
    ) -> Result<Option<T>> {
        let url = format!("{}{}", self.base_url, path);

        let request_builder = self
            .client
            .request(method, &url)
            .header("Content-Type", "application/json")
            .body(body.to_string());

        let response = request_builder.send().await.map_err(|e| {
            AppError::ConnectionError(format!("网关请求失败: {} {}", path, e))
        })?;

        let status_code = response.status();
        let response_body = response.text().await?;
        debug!("path:{},gateway_response: {}", path, response_body);

        if !status_code.is_success() {
            return Err(
                AppError::ConnectionError(format!("网关返回 HTTP {}: {}", status_code, path))
                    .into(),
            );
        }

        let result: GatewayResponse<T> = serde_json::from_str(&response_body)?;
        if result.code != 0 {
            return Err(anyhow!(
                "网关调用失败: {} {}",
                path,
                result.msg.unwrap_or_default()
            ));
        }
        Ok(result.data)
    }
}

#[async_trait]
impl QmtApi for QmtGatewayClient {
    async fn connect(&self, qmt_path: &str, account_id: &str) -> Result<()> {
        info!("正在连接 QMT, 路径: {}, 账号: {}", qmt_path, account_id);
        let body = json!({ "path": qmt_path, "account_id": account_id }).to_string();
        let _: Option<serde_json::Value> =
            self.send_request(Method::POST, "/connect", &body).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let _: Option<serde_json::Value> =
            self.send_request(Method::POST, "/disconnect", "").await?;
        Ok(())
    }

    async fn query_asset(&self) -> Result<Asset> {
        let data: Option<Asset> = self.send_request(Method::GET, "/asset", "").await?;
        data.ok_or_else(|| AppError::DataUnavailable("查询资产返回空".to_string()).into())
    }

    async fn query_positions(&self) -> Result<Vec<BrokerPosition>> {
        let data: Option<Vec<BrokerPosition>> =
            self.send_request(Method::GET, "/positions", "").await?;
        // 只保留有持仓的
        Ok(data
            .unwrap_or_default()
            .into_iter()
            .filter(|p| p.volume > 0)
            .collect())
    }

    async fn place_order(&self, req: &OrderRequest) -> Result<i64> {
        info!(
            "委托: {} {} 数量: {}, 价格: {}",
            req.side, req.stock_code, req.volume, req.price
        );
        let body = serde_json::to_string(req)?;
        let data: Option<i64> = self.send_request(Method::POST, "/order", &body).await?;
        data.ok_or_else(|| AppError::OrderRejected(format!("{} 委托未返回编号", req.stock_code)).into())
    }

    async fn trading_dates(&self, market: &str, start: &str, end: &str) -> Result<Vec<String>> {
        let path = format!(
            "/trading_dates?market={}&start={}&end={}",
            market, start, end
        );
        let data: Option<Vec<String>> = self.send_request(Method::GET, &path, "").await?;
        Ok(data.unwrap_or_default())
    }

    async fn full_tick(&self, stock_code: &str) -> Result<Quote> {
        let path = format!("/tick?code={}", stock_code);
        let data: Option<Quote> = self.send_request(Method::GET, &path, "").await?;
        data.ok_or_else(|| {
            AppError::DataUnavailable(format!("{} 全推行情为空", stock_code)).into()
        })
    }
}
