use std::env;

use anyhow::Context;
use lettre::message::header;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

/// 发送 HTML 邮件（阻塞调用，调用方负责放入阻塞线程）
///
/// SMTP 服务器与发件凭证来自环境变量，收件人由通知服务按配置传入。
pub fn send_email(to: &str, title: &str, body: String) -> anyhow::Result<()> {
    // SMTP 服务器地址和端口
    let smtp_server = env::var("EMAIL_SMTP_SERVER").unwrap_or(String::from("smtp.qq.com"));
    let smtp_port: u16 = env::var("EMAIL_SMTP_PORT")
        .unwrap_or("587".to_string())
        .parse()
        .context("EMAIL_SMTP_PORT 非法")?;

    // 发件人及其凭证
    let from = env::var("EMAIL_FROM").unwrap_or_default();
    let username = env::var("EMAIL_SEND_USERNAME").unwrap_or_default();
    let password = env::var("EMAIL_SEND_PASSWORD").unwrap_or_default();

    if username.is_empty() || password.is_empty() {
        anyhow::bail!("SMTP 发件凭证未配置");
    }

    let email = Message::builder()
        .from(from.parse().context("EMAIL_FROM 非法")?)
        .to(to.parse().context("收件邮箱非法")?)
        .subject(title)
        .header(header::ContentType::TEXT_HTML)
        .body(body)?;

    let creds = Credentials::new(username, password);

    let mailer = SmtpTransport::starttls_relay(&smtp_server)?
        .port(smtp_port)
        .credentials(creds)
        .build();

    mailer.send(&email).context("邮件发送失败")?;
    Ok(())
}
