use tracing::{debug, info, warn};

use crate::app_config::email;
use crate::time_util::now_str;

/// 邮件通知服务
///
/// 仅在配置了接收邮箱时生效；发送是"发出即忘"，失败只记日志，
/// 绝不影响交易主流程。
pub struct NotificationService {
    receiver: Option<String>,
}

impl NotificationService {
    pub fn new(receiver_email: &str) -> Self {
        let receiver = if receiver_email.is_empty() {
            None
        } else {
            info!("邮件通知已配置，接收邮箱: {}", receiver_email);
            Some(receiver_email.to_string())
        };
        NotificationService { receiver }
    }

    pub fn enabled(&self) -> bool {
        self.receiver.is_some()
    }

    /// 异步投递，lettre 的 SMTP 发送是阻塞调用，放到阻塞线程执行
    fn dispatch(&self, subject: String, body: String) {
        let Some(to) = self.receiver.clone() else {
            debug!("邮件通知未启用，跳过发送: {}", subject);
            return;
        };

        tokio::task::spawn_blocking(move || {
            if let Err(e) = email::send_email(&to, &subject, body) {
                warn!("邮件发送失败: {} {}", subject, e);
            } else {
                info!("邮件发送成功: {}", subject);
            }
        });
    }

    pub fn notify_success(&self, title: &str, details: &str) {
        let body = format!(
            "<h2>{}</h2>\
             <p><strong>时间:</strong> {}</p>\
             <p><strong>详情:</strong></p><p>{}</p>\
             <hr><p style=\"color: #888; font-size: 12px;\">此邮件由自动调仓程序发送</p>",
            title,
            now_str(),
            details
        );
        self.dispatch(format!("【QMT】{}", title), body);
    }

    pub fn notify_error(&self, title: &str, error_message: &str) {
        let body = format!(
            "<h2 style=\"color: #e74c3c;\">{}</h2>\
             <p><strong>时间:</strong> {}</p>\
             <p><strong>错误信息:</strong></p>\
             <p style=\"color: #e74c3c;\">{}</p>\
             <hr><p style=\"color: #888; font-size: 12px;\">此邮件由自动调仓程序发送，请及时处理</p>",
            title,
            now_str(),
            error_message
        );
        self.dispatch(format!("【QMT】{}", title), body);
    }

    /// 停牌通知：自动流程不强行处理，提醒人工介入
    pub fn notify_suspended(&self, stock_code: &str, stock_name: &str) {
        let name = if stock_name.is_empty() {
            String::new()
        } else {
            format!("({})", stock_name)
        };
        let body = format!(
            "<h2 style=\"color: #f39c12;\">可转债停牌通知</h2>\
             <p><strong>时间:</strong> {}</p>\
             <p><strong>证券代码:</strong> {} {}</p>\
             <p><strong>状态:</strong> 停牌中</p>\
             <p style=\"color: #f39c12;\"><strong>请您手动处理此持仓</strong></p>\
             <hr><p style=\"color: #888; font-size: 12px;\">此邮件由自动调仓程序发送</p>",
            now_str(),
            stock_code,
            name
        );
        self.dispatch(format!("【QMT】停牌通知 - {}", stock_code), body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_without_receiver() {
        let service = NotificationService::new("");
        assert!(!service.enabled());

        let service = NotificationService::new("ops@example.com");
        assert!(service.enabled());
    }
}
