use thiserror::Error;

/// 应用错误
///
/// 按处理策略分类：配置错误需要用户修正后重试；连接错误由守护任务有界重连；
/// 数据不可用只跳过当前标的；拒单与停牌分别走通知渠道。
#[derive(Error, Debug)]
pub enum AppError {
    /// 配置缺失或非法，立即反馈给用户，不做自动重试
    #[error("配置错误: {0}")]
    ConfigError(String),

    /// 交易会话不可达
    #[error("连接错误: {0}")]
    ConnectionError(String),

    /// 行情或选债数据获取失败，跳过受影响的处理单元
    #[error("数据不可用: {0}")]
    DataUnavailable(String),

    /// 券商拒单或返回非法委托号，账本保持不变
    #[error("委托失败: {0}")]
    OrderRejected(String),

    /// 标的停牌，转人工处理，不计入失败
    #[error("标的停牌: {0}")]
    Suspended(String),

    /// 数据库错误
    #[error("数据库错误: {0}")]
    DbError(String),
}

impl From<rbatis::rbdc::Error> for AppError {
    fn from(err: rbatis::rbdc::Error) -> Self {
        AppError::DbError(err.to_string())
    }
}

impl AppError {
    /// 是否应当触发人工介入通知
    pub fn needs_manual_intervention(&self) -> bool {
        matches!(self, AppError::Suspended(_))
    }
}
