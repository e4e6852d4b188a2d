use async_trait::async_trait;
use chrono::NaiveDate;
use lettre::{
    message::{
        header::{ContentType, ContentTypeErr},
        Attachment as MailAttachment, Mailbox, MultiPart,
    },
    transport::smtp::{authentication::Credentials, PoolConfig},
    Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::SmtpConfig;
use tally_shared::{Currency, Customer, Invoice, ReminderType};

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("SMTP is not configured")]
    NotConfigured,
    #[error("invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("invalid content type: {0}")]
    ContentType(#[from] ContentTypeErr),
    #[error("failed to build message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub to_email: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
    pub attachment: Option<Attachment>,
}

/// Delivery seam; the reminder sweep and tests depend on this rather than SMTP.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError>;
}

#[derive(Clone)]
pub struct EmailService {
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from_email: String,
    from_name: String,
}

impl EmailService {
    /// Builds the SMTP pool; without credentials every send fails with `NotConfigured`.
    pub fn new(smtp_config: &SmtpConfig) -> Result<Self, MailError> {
        let transport = if smtp_config.is_configured() {
            let creds = Credentials::new(smtp_config.username.clone(), smtp_config.password.clone());
            let builder = if smtp_config.use_tls {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp_config.host)?
            } else {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp_config.host)
            };
            Some(
                builder
                    .port(smtp_config.port)
                    .credentials(creds)
                    .pool_config(PoolConfig::new().max_size(10))
                    .timeout(Some(Duration::from_secs(10)))
                    .build(),
            )
        } else {
            warn!("SMTP not configured; outgoing email is disabled");
            None
        };

        Ok(EmailService {
            transport,
            from_email: smtp_config.from_email.clone(),
            from_name: smtp_config.from_name.clone(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.transport.is_some()
    }

    fn build_message(&self, email: OutgoingEmail) -> Result<Message, MailError> {
        let from = Mailbox::new(Some(self.from_name.clone()), self.from_email.parse::<Address>()?);
        let to = Mailbox::new(email.to_name, email.to_email.parse::<Address>()?);

        let body = MultiPart::alternative_plain_html(email.text_body, email.html_body);
        let builder = Message::builder().from(from).to(to).subject(email.subject);

        let message = match email.attachment {
            Some(file) => {
                let content_type = ContentType::parse(&file.content_type)?;
                builder.multipart(
                    MultiPart::mixed()
                        .multipart(body)
                        .singlepart(MailAttachment::new(file.filename).body(file.data, content_type)),
                )?
            }
            None => builder.multipart(body)?,
        };
        Ok(message)
    }
}

#[async_trait]
impl Mailer for EmailService {
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError> {
        let transport = self.transport.as_ref().ok_or(MailError::NotConfigured)?;
        let to_email = email.to_email.clone();
        let message = self.build_message(email)?;

        match transport.send(message).await {
            Ok(_) => {
                info!("Email sent successfully to {}", to_email);
                Ok(())
            }
            Err(e) => {
                error!("Failed to send email to {}: {}", to_email, e);
                Err(e.into())
            }
        }
    }
}

// ============================================
// Templates
// ============================================

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn long_date(date: NaiveDate) -> String {
    date.format("%B %-d, %Y").to_string()
}

fn layout(title: &str, company: &str, content: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{title}</title></head>
<body style="margin:0;padding:20px;font-family:Arial,sans-serif;background-color:#f4f4f4;">
  <div style="max-width:600px;margin:0 auto;background:#ffffff;border-radius:8px;overflow:hidden;">
    <div style="background:#667eea;color:#ffffff;padding:30px;text-align:center;">
      <h1 style="margin:0;">{title}</h1>
      <p style="margin:8px 0 0 0;">{company}</p>
    </div>
    <div style="padding:30px;color:#333333;">{content}</div>
    <div style="background:#f8f9fa;padding:16px;text-align:center;color:#999999;font-size:12px;">
      This is an automated email. Please do not reply directly to this message.
    </div>
  </div>
</body>
</html>"#,
        title = escape_html(title),
        company = escape_html(company),
        content = content,
    )
}

pub fn invoice_email(
    company: &str,
    invoice: &Invoice,
    customer: &Customer,
    currency: Currency,
    pdf: Vec<u8>,
) -> OutgoingEmail {
    let amount = currency.format(invoice.total);
    let due = long_date(invoice.due_date);
    let notes = invoice
        .notes
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .map(|n| format!("<p><strong>Note:</strong> {}</p>", escape_html(n)))
        .unwrap_or_default();

    let content = format!(
        "<p>Hi {name},</p>\
         <p>Thank you for your business! Please find your invoice attached to this email.</p>\
         <p>Invoice Number: <strong>{number}</strong><br>Amount Due: <strong>{amount}</strong><br>Due Date: <strong>{due}</strong></p>\
         {notes}\
         <p>Best regards,<br><strong>{company}</strong></p>",
        name = escape_html(&customer.name),
        number = escape_html(&invoice.invoice_number),
        company = escape_html(company),
    );

    let text_body = format!(
        "Hi {},\n\nPlease find invoice {} attached.\nAmount due: {}\nDue date: {}\n\nBest regards,\n{}",
        customer.name, invoice.invoice_number, amount, due, company
    );

    OutgoingEmail {
        to_email: customer.email.clone(),
        to_name: Some(customer.name.clone()),
        subject: format!("Invoice {} from {}", invoice.invoice_number, company),
        html_body: layout("Invoice", company, &content),
        text_body,
        attachment: Some(Attachment {
            filename: format!("invoice-{}.pdf", invoice.invoice_number),
            content_type: "application/pdf".to_string(),
            data: pdf,
        }),
    }
}

pub fn reminder_email(
    company: &str,
    invoice: &Invoice,
    customer: &Customer,
    currency: Currency,
    kind: ReminderType,
) -> OutgoingEmail {
    let amount = currency.format(invoice.total);
    let due = long_date(invoice.due_date);
    let days = kind.offset_days();

    let lead = match days {
        d if d < 0 => format!("is due in {} days, on {}", -d, due),
        0 => "is due today".to_string(),
        1 => "is now 1 day overdue".to_string(),
        d => format!("is now {} days overdue", d),
    };

    let content = format!(
        "<p>Hi {name},</p>\
         <p>This is a friendly reminder that invoice <strong>{number}</strong> {lead}.</p>\
         <p>Amount Due: <strong>{amount}</strong><br>Due Date: <strong>{due}</strong></p>\
         <p>If you have already paid, please disregard this message.</p>\
         <p>Best regards,<br><strong>{company}</strong></p>",
        name = escape_html(&customer.name),
        number = escape_html(&invoice.invoice_number),
        company = escape_html(company),
    );

    let text_body = format!(
        "Hi {},\n\nInvoice {} {}.\nAmount due: {}\n\nBest regards,\n{}",
        customer.name, invoice.invoice_number, lead, amount, company
    );

    OutgoingEmail {
        to_email: customer.email.clone(),
        to_name: Some(customer.name.clone()),
        subject: format!("Payment Reminder: Invoice {}", invoice.invoice_number),
        html_body: layout("Payment Reminder", company, &content),
        text_body,
        attachment: None,
    }
}

pub fn password_reset_email(company: &str, to_email: &str, to_name: &str, link: &str) -> OutgoingEmail {
    let content = format!(
        "<p>Hi {name},</p>\
         <p>We received a request to reset your password. The link below is valid for one hour.</p>\
         <p><a href=\"{link}\" style=\"display:inline-block;background:#667eea;color:#ffffff;padding:12px 24px;text-decoration:none;border-radius:6px;\">Reset Password</a></p>\
         <p>If you did not request this, you can ignore this email.</p>",
        name = escape_html(to_name),
        link = escape_html(link),
    );

    OutgoingEmail {
        to_email: to_email.to_string(),
        to_name: Some(to_name.to_string()),
        subject: format!("Reset your {} password", company),
        html_body: layout("Password Reset", company, &content),
        text_body: format!(
            "Hi {},\n\nReset your password within one hour using this link:\n{}\n",
            to_name, link
        ),
        attachment: None,
    }
}
