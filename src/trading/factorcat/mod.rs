use std::sync::RwLock;
use std::time::Duration;

use anyhow::{anyhow, Result};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::app_config::env::env_or_default;
use crate::error::AppError;

const DEFAULT_BASE_URL: &str = "https://factor-cat.mzs2025.asia:8003";

/// 目标标的：策略当日希望持有的可转债，一次调仓内没有代码之外的身份
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TargetInstrument {
    pub code: String,
    pub name: String,
    pub price: Option<f64>,
    pub trade_date: Option<String>,
}

/// 登录结果
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoginResult {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub username: String,
}

/// 因子猫选债平台客户端
///
/// 只消费"按策略运行拉取当日选债列表"这一组接口，令牌由定时任务刷新。
pub struct FactorCatClient {
    client: Client,
    base_url: String,
    access_token: RwLock<Option<String>>,
}

impl FactorCatClient {
    pub fn new(base_url: String) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(FactorCatClient {
            client,
            base_url,
            access_token: RwLock::new(None),
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(env_or_default("FACTORCAT_BASE_URL", DEFAULT_BASE_URL))
    }

    pub fn set_token(&self, token: &str) {
        if let Ok(mut guard) = self.access_token.write() {
            *guard = Some(token.to_string());
        }
    }

    pub fn clear_token(&self) {
        if let Ok(mut guard) = self.access_token.write() {
            *guard = None;
        }
    }

    async fn request(&self, method: Method, endpoint: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{}{}", self.base_url, endpoint);

        let mut builder = self
            .client
            .request(method, &url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json");

        let token = self
            .access_token
            .read()
            .ok()
            .and_then(|guard| guard.clone());
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body {
            builder = builder.body(body.to_string());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                warn!("API请求超时: {}", endpoint);
                anyhow!(AppError::DataUnavailable(format!("请求超时: {}", e)))
            } else {
                warn!("API连接失败: {}", endpoint);
                anyhow!(AppError::DataUnavailable(format!("网络连接失败: {}", e)))
            }
        })?;

        let status = response.status();
        let text = response.text().await?;

        if status.as_u16() >= 400 {
            // 优先透出接口返回的详细错误
            let detail = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| {
                    ["detail", "message", "error", "msg"]
                        .iter()
                        .find_map(|key| v.get(*key).and_then(|d| d.as_str()).map(String::from))
                })
                .unwrap_or_else(|| {
                    if text.trim().is_empty() {
                        format!("HTTP {}", status.as_u16())
                    } else {
                        text.clone()
                    }
                });
            return Err(anyhow!("{}", detail));
        }

        Ok(serde_json::from_str(&text)?)
    }

    /// 用户登录，成功后保存令牌
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResult> {
        info!("正在登录因子猫账号: {}", username);

        let body = json!({ "username": username, "password": password });
        let result = self.request(Method::POST, "/auth/login", Some(body)).await?;

        let login: LoginResult = serde_json::from_value(result)?;
        self.set_token(&login.access_token);
        info!("登录成功: {}", username);
        Ok(login)
    }

    /// 用账号密码重新登录以刷新令牌
    pub async fn refresh_token(&self, username: &str, password: &str) -> Result<LoginResult> {
        self.login(username, password).await
    }

    /// 基于策略运行记录获取今日选债列表，顺序即平台给出的排名
    pub async fn get_today_bonds(&self, run_id: i64) -> Result<Vec<TargetInstrument>> {
        info!("正在获取今日选债列表, run_id={}", run_id);

        let body = json!({ "strategy_history_id": run_id });
        let result = self
            .request(Method::POST, "/bond-selection/today-bond-selection", Some(body))
            .await?;

        let bonds = parse_today_bonds(&result);
        info!("获取选债列表成功，共 {} 只可转债", bonds.len());
        Ok(bonds)
    }
}

/// 解析选债接口响应：数组首元素的 selected_bonds 字段，保持返回顺序
fn parse_today_bonds(result: &Value) -> Vec<TargetInstrument> {
    let mut bonds = Vec::new();
    let selected = result
        .as_array()
        .and_then(|arr| arr.first())
        .and_then(|first| first.get("selected_bonds"))
        .and_then(|v| v.as_array());

    if let Some(items) = selected {
        for item in items {
            let code = item
                .get("kzz_code")
                .or_else(|| item.get("code"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            if code.is_empty() {
                continue;
            }
            bonds.push(TargetInstrument {
                code,
                name: item
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                price: item.get("price").and_then(|v| v.as_f64()),
                trade_date: item
                    .get("trade_date")
                    .and_then(|v| v.as_str())
                    .map(String::from),
            });
        }
    }
    bonds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_today_bonds_keeps_order() {
        let payload = json!([{
            "selected_bonds": [
                {"kzz_code": "110038.SH", "name": "甲转债", "price": 102.3},
                {"code": "123456.SZ", "name": "乙转债"},
                {"name": "缺代码，应跳过"},
                {"kzz_code": "127001.SZ", "name": "丙转债", "trade_date": "2025-01-02"}
            ]
        }]);

        let bonds = parse_today_bonds(&payload);
        assert_eq!(bonds.len(), 3);
        assert_eq!(bonds[0].code, "110038.SH");
        assert_eq!(bonds[0].price, Some(102.3));
        assert_eq!(bonds[1].code, "123456.SZ");
        assert_eq!(bonds[2].code, "127001.SZ");
        assert_eq!(bonds[2].trade_date.as_deref(), Some("2025-01-02"));
    }

    #[test]
    fn test_parse_today_bonds_empty_payload() {
        assert!(parse_today_bonds(&json!([])).is_empty());
        assert!(parse_today_bonds(&json!({"unexpected": true})).is_empty());
    }
}
