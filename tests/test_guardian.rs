use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use bond_quant::app_config::settings::{AppConfig, BuyAmountMode, OrderPriceMode};
use bond_quant::trading::market::Quote;
use bond_quant::trading::qmt::guardian::ConnectionGuardian;
use bond_quant::trading::qmt::{Asset, BrokerPosition, OrderRequest, QmtApi};
use bond_quant::trading::services::notification_service::NotificationService;

/// 可编程的会话桩：按开关决定连接与资产查询结果，并统计调用次数
struct MockSession {
    connect_ok: AtomicBool,
    asset_ok: AtomicBool,
    connect_calls: AtomicU32,
    asset_calls: AtomicU32,
}

impl MockSession {
    fn new(connect_ok: bool, asset_ok: bool) -> Arc<Self> {
        Arc::new(MockSession {
            connect_ok: AtomicBool::new(connect_ok),
            asset_ok: AtomicBool::new(asset_ok),
            connect_calls: AtomicU32::new(0),
            asset_calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl QmtApi for MockSession {
    async fn connect(&self, _qmt_path: &str, _account_id: &str) -> Result<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.connect_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(anyhow!("连接被拒绝"))
        }
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn query_asset(&self) -> Result<Asset> {
        self.asset_calls.fetch_add(1, Ordering::SeqCst);
        if self.asset_ok.load(Ordering::SeqCst) {
            Ok(Asset::default())
        } else {
            Err(anyhow!("查询资产失败"))
        }
    }

    async fn query_positions(&self) -> Result<Vec<BrokerPosition>> {
        Ok(vec![])
    }

    async fn place_order(&self, _req: &OrderRequest) -> Result<i64> {
        Ok(1)
    }

    async fn trading_dates(&self, _market: &str, _start: &str, _end: &str) -> Result<Vec<String>> {
        Ok(vec![])
    }

    async fn full_tick(&self, _stock_code: &str) -> Result<Quote> {
        Err(anyhow!("无行情"))
    }
}

fn test_config() -> AppConfig {
    AppConfig {
        gateway_url: "http://127.0.0.1:1".to_string(),
        qmt_path: "C:/qmt/userdata_mini".to_string(),
        account_id: "1000000".to_string(),
        buy_amount_mode: BuyAmountMode::Fixed,
        fixed_amount: 10000.0,
        order_price_mode: OrderPriceMode::Limit,
        notification_email: String::new(),
    }
}

#[tokio::test(start_paused = true)]
async fn ensure_connected_probes_exactly_max_retries_then_fails() {
    let session = MockSession::new(true, false);
    let guardian = ConnectionGuardian::new(session.clone());

    guardian.connect("path", "acct").await.unwrap();
    assert!(guardian.is_connected());

    let started = tokio::time::Instant::now();
    let ok = guardian
        .ensure_connected(2, Duration::from_secs(1))
        .await;
    let elapsed = started.elapsed();

    assert!(!ok);
    // 恰好探测 2 次，中间 1 次等待
    assert_eq!(session.asset_calls.load(Ordering::SeqCst), 2);
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(2));
}

#[tokio::test]
async fn ensure_connected_returns_immediately_when_healthy() {
    let session = MockSession::new(true, true);
    let guardian = ConnectionGuardian::new(session.clone());

    guardian.connect("path", "acct").await.unwrap();
    assert!(guardian.ensure_connected(2, Duration::from_secs(1)).await);
    assert_eq!(session.asset_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn ensure_connected_is_false_when_disconnected() {
    let session = MockSession::new(true, true);
    let guardian = ConnectionGuardian::new(session.clone());

    // 未连接时轻量检查直接拦下，不会发起真实调用
    assert!(!guardian.ensure_connected(1, Duration::from_millis(10)).await);
    assert_eq!(session.asset_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn reconnect_stops_after_max_attempts() {
    let session = MockSession::new(false, false);
    // 冷却时间设为 0 便于连续驱动
    let guardian = ConnectionGuardian::with_limits(session.clone(), 3, 0);
    let config = test_config();
    let notification = NotificationService::new("");

    // 连续驱动 5 轮重连，只有前 3 轮真正发起连接
    for _ in 0..5 {
        guardian.reconnect(&config, &notification).await;
    }

    assert_eq!(session.connect_calls.load(Ordering::SeqCst), 3);
    assert_eq!(guardian.status().reconnect_failures, 3);
    assert!(guardian.terminal_exhausted());
}

#[tokio::test(start_paused = true)]
async fn reconnect_success_resets_failure_counter() {
    let session = MockSession::new(false, false);
    let guardian = ConnectionGuardian::with_limits(session.clone(), 3, 0);
    let config = test_config();
    let notification = NotificationService::new("");

    // 第一轮失败
    guardian.reconnect(&config, &notification).await;
    assert_eq!(guardian.status().reconnect_failures, 1);

    // 会话恢复后重连成功，计数清零
    session.connect_ok.store(true, Ordering::SeqCst);
    session.asset_ok.store(true, Ordering::SeqCst);
    guardian.reconnect(&config, &notification).await;

    let status = guardian.status();
    assert!(status.connected);
    assert_eq!(status.reconnect_failures, 0);
    assert!(!guardian.terminal_exhausted());
}

#[tokio::test(start_paused = true)]
async fn reconnect_respects_cooldown() {
    let session = MockSession::new(false, false);
    // 冷却 60 秒：紧挨着的第二次驱动应当不发起连接
    let guardian = ConnectionGuardian::with_limits(session.clone(), 3, 60);
    let config = test_config();
    let notification = NotificationService::new("");

    guardian.reconnect(&config, &notification).await;
    guardian.reconnect(&config, &notification).await;

    assert_eq!(session.connect_calls.load(Ordering::SeqCst), 1);
    assert_eq!(guardian.status().reconnect_failures, 1);
}

#[tokio::test]
async fn disconnect_resets_state() {
    let session = MockSession::new(true, true);
    let guardian = ConnectionGuardian::with_limits(session.clone(), 3, 0);

    guardian.connect("path", "acct").await.unwrap();
    assert!(guardian.is_connected());

    guardian.disconnect().await;
    let status = guardian.status();
    assert!(!status.connected);
    assert_eq!(status.reconnect_failures, 0);
    assert!(status.last_reconnect.is_none());
    assert!(status.last_health_check.is_none());
}

#[tokio::test]
async fn connect_failure_leaves_disconnected() {
    let session = MockSession::new(false, true);
    let guardian = ConnectionGuardian::new(session);

    assert!(guardian.connect("path", "acct").await.is_err());
    assert!(!guardian.is_connected());
}
