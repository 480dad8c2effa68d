use std::sync::Arc;

use anyhow::Result;
use dotenv::dotenv;
use tracing::{error, info, warn};

use bond_quant::app_config::env::{env_f64_or_default, env_i64_or_default, env_or_default};
use bond_quant::app_config::settings::AppConfig;
use bond_quant::app_config::{db, log};
use bond_quant::trading::factorcat::FactorCatClient;
use bond_quant::trading::market::QuoteService;
use bond_quant::trading::qmt::guardian::ConnectionGuardian;
use bond_quant::trading::qmt::qmt_client::QmtGatewayClient;
use bond_quant::trading::services::notification_service::NotificationService;
use bond_quant::trading::strategy::{new_strategy_handle, ScheduleRule, StrategyConfig};
use bond_quant::trading::TradeContext;

/// 从环境变量装配当前策略；未配置运行 ID 时以"未选择策略"启动
fn load_strategy_from_env() -> Option<StrategyConfig> {
    let run_id = env_i64_or_default("STRATEGY_RUN_ID", 0);
    if run_id <= 0 {
        return None;
    }

    let schedule = match std::env::var("EXECUTION_SCHEDULE") {
        Ok(raw) => match serde_json::from_str::<ScheduleRule>(&raw) {
            Ok(rule) => rule,
            Err(e) => {
                warn!("EXECUTION_SCHEDULE 解析失败，使用默认周期: {}", e);
                ScheduleRule::default_daily()
            }
        },
        Err(_) => ScheduleRule::default_daily(),
    };

    Some(StrategyConfig {
        strategy_id: env_i64_or_default("STRATEGY_ID", 0),
        strategy_name: env_or_default("STRATEGY_NAME", ""),
        run_id,
        stop_profit_ratio: env_f64_or_default("STOP_PROFIT_RATIO", 0.1),
        stop_loss_ratio: env_f64_or_default("STOP_LOSS_RATIO", 0.05),
        execution_schedule: schedule,
        parameters: serde_json::Value::Null,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    // 设置日志
    log::setup_logging().await?;

    // 初始化本地账本
    db::init_db().await?;

    let config = AppConfig::from_env()?;

    let notification = Arc::new(NotificationService::new(&config.notification_email));
    let gateway = Arc::new(QmtGatewayClient::new(config.gateway_url.clone())?);
    let guardian = Arc::new(ConnectionGuardian::new(gateway.clone()));
    let quotes = Arc::new(QuoteService::with_default_providers(gateway)?);
    let factorcat = Arc::new(FactorCatClient::from_env()?);

    let strategy = load_strategy_from_env();
    match &strategy {
        Some(s) => info!("当前策略: {} (run_id={})", s.strategy_name, s.run_id),
        None => warn!("未配置运行策略，调仓与止盈止损将处于待命状态"),
    }

    // 选债平台登录（未配置账号时跳过，令牌刷新任务会定期重试）
    let username = env_or_default("FACTORCAT_USERNAME", "");
    let password = env_or_default("FACTORCAT_PASSWORD", "");
    if !username.is_empty() && !password.is_empty() {
        if let Err(e) = factorcat.login(&username, &password).await {
            error!("选债平台登录失败: {}", e);
        }
    }

    let ctx = TradeContext::new(
        config,
        new_strategy_handle(strategy),
        guardian,
        quotes,
        factorcat,
        notification,
    );

    // 连接交易终端，失败直接退出交由用户处理
    ctx.guardian
        .connect(&ctx.config.qmt_path, &ctx.config.account_id)
        .await?;

    // 注册全部定时任务
    bond_quant::trading::start_trading(ctx.clone()).await?;

    // 等待退出信号后平滑关闭
    tokio::signal::ctrl_c().await?;
    info!("接收到退出信号，开始关闭...");

    bond_quant::trading::stop_trading(&ctx).await;
    bond_quant::shutdown_scheduler().await;

    info!("应用已退出");
    Ok(())
}
