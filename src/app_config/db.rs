use std::path::Path;

use once_cell::sync::OnceCell;
use rbatis::RBatis;
use rbdc_sqlite::SqliteDriver;
use tracing::info;

use crate::app_config::env::env_or_default;

static DB_CLIENT: OnceCell<RBatis> = OnceCell::new();

/// 持仓记录表：本系统买入的持仓账本
const CREATE_POSITION_RECORDS: &str = r#"
CREATE TABLE IF NOT EXISTS position_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    stock_code TEXT NOT NULL,
    stock_name TEXT NOT NULL DEFAULT '',
    volume INTEGER NOT NULL,
    buy_price REAL NOT NULL,
    buy_time TEXT NOT NULL,
    strategy_name TEXT NOT NULL DEFAULT ''
)
"#;

/// 待补仓队列表：止盈止损卖出后等待当日定时补仓的记录，按日期分区
const CREATE_REFILL_QUEUE: &str = r#"
CREATE TABLE IF NOT EXISTS refill_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    date TEXT NOT NULL,
    stock_code TEXT NOT NULL,
    stock_name TEXT NOT NULL DEFAULT '',
    volume INTEGER NOT NULL,
    sell_price REAL NOT NULL,
    reason TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
)
"#;

/// 初始化本地 SQLite 账本，建表后挂到全局单例
pub async fn init_db() -> anyhow::Result<&'static RBatis> {
    let db_path = env_or_default("DB_PATH", "data/bond_quant.db");
    if let Some(parent) = Path::new(&db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let rb = RBatis::new();
    rb.link(SqliteDriver {}, &format!("sqlite://{}", db_path))
        .await?;

    rb.exec(CREATE_POSITION_RECORDS, vec![]).await?;
    rb.exec(CREATE_REFILL_QUEUE, vec![]).await?;

    info!("本地账本数据库初始化完成: {}", db_path);

    DB_CLIENT
        .set(rb)
        .map_err(|_| anyhow::anyhow!("DB_CLIENT 已初始化"))?;
    Ok(get_db_client())
}

pub fn get_db_client() -> &'static RBatis {
    DB_CLIENT.get().expect("DB_CLIENT is not initialized")
}
