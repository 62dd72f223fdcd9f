//! Notification dispatch
//!
//! Evaluates the per-event notification policy and sends to the chat
//! webhook, the generic webhook and email. Every channel is best-effort:
//! failures are reported through `tracing` and returned as
//! [`SendResult::Failed`], never raised.

use crate::config::{is_valid_email, Config};
use crate::error::DispatchError;
use crate::event::LogType;
use crate::hooks::Hooks;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Prefix of chat texts and mail subjects
pub const BRAND: &str = "[Faultline]";

/// Outcome of one channel
#[derive(Debug, Clone, PartialEq)]
pub enum SendResult {
    Sent,
    /// Channel not selected or not configured
    Skipped(String),
    Failed(String),
}

/// Notification channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Chat,
    Webhook,
    Email,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Chat => "chat",
            Channel::Webhook => "webhook",
            Channel::Email => "email",
        }
    }
}

/// Outbound JSON POST
pub trait WebhookTransport: Send + Sync {
    fn post_json(&self, url: &str, body: &Value, timeout: Duration) -> Result<(), DispatchError>;
}

/// Outbound mail
pub trait Mailer: Send + Sync {
    /// Deliver one message, giving up after `timeout`
    fn send(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        timeout: Duration,
    ) -> Result<(), DispatchError>;
}

/// Blocking reqwest transport
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpTransport;

impl WebhookTransport for HttpTransport {
    fn post_json(&self, url: &str, body: &Value, timeout: Duration) -> Result<(), DispatchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DispatchError::Client(e.to_string()))?;

        let response = client
            .post(url)
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Status(status.as_u16()));
        }
        Ok(())
    }
}

/// Pipes messages into `sendmail -t`
#[derive(Debug, Clone)]
pub struct SendmailMailer {
    program: PathBuf,
}

impl Default for SendmailMailer {
    fn default() -> Self {
        Self {
            program: PathBuf::from("sendmail"),
        }
    }
}

impl SendmailMailer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Mailer for SendmailMailer {
    fn send(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        timeout: Duration,
    ) -> Result<(), DispatchError> {
        let mut child = Command::new(&self.program)
            .arg("-t")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| DispatchError::Mail(format!("{}: {}", self.program.display(), e)))?;

        let message = format!(
            "To: {to}\nSubject: {subject}\nContent-Type: text/plain; charset=UTF-8\n\n{body}\n"
        );
        // A stuck MTA that stops reading must not block past the deadline
        let writer = child.stdin.take().map(|mut stdin| {
            std::thread::spawn(move || stdin.write_all(message.as_bytes()))
        });

        let waited = child.wait_timeout(timeout);
        let status = match waited {
            Ok(Some(status)) => status,
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(DispatchError::Mail(format!(
                    "{} timed out after {}ms",
                    self.program.display(),
                    timeout.as_millis()
                )));
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(DispatchError::Mail(e.to_string()));
            }
        };

        if let Some(writer) = writer {
            match writer.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(DispatchError::Mail(e.to_string())),
                Err(_) => return Err(DispatchError::Mail("stdin writer panicked".to_string())),
            }
        }
        if !status.success() {
            return Err(DispatchError::Mail(format!("sendmail exited with {status}")));
        }
        Ok(())
    }
}

/// Derived email
#[derive(Debug, Clone, PartialEq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
}

fn pretty(context: &Value) -> String {
    serde_json::to_string_pretty(context).unwrap_or_else(|_| context.to_string())
}

fn context_is_empty(context: &Value) -> bool {
    crate::sanitize::is_empty_context(context)
}

/// `[Faultline] ERROR: message`
pub fn headline(log_type: &LogType, message: &str) -> String {
    format!("{BRAND} {}: {}", log_type.as_str().to_uppercase(), message)
}

/// Chat message with the context attached as a code block
pub fn chat_message(log_type: &LogType, message: &str, context: &Value) -> Value {
    let mut text = headline(log_type, message);
    if !context_is_empty(context) {
        text.push_str("\n```");
        text.push_str(&pretty(context));
        text.push_str("```");
    }
    json!({ "text": text })
}

/// Generic webhook payload, before payload transforms
pub fn webhook_payload(
    log_type: &LogType,
    message: &str,
    context: &Value,
    site: &str,
    at: DateTime<Utc>,
) -> Value {
    json!({
        "type": log_type.as_str(),
        "message": message,
        "context": context,
        "site": site,
        "ts": at.to_rfc3339_opts(SecondsFormat::Secs, false),
    })
}

/// Email subject and body
pub fn email(config: &Config, log_type: &LogType, message: &str, context: &Value) -> Email {
    let body_context = if context_is_empty(context) {
        String::new()
    } else {
        pretty(context)
    };
    Email {
        to: config.notify.email.clone(),
        subject: format!("{BRAND} {} on {}", log_type.title(), config.notify.site_host()),
        body: format!("{}\n\n{}", headline(log_type, message), body_context),
    }
}

/// Policy evaluation and channel fan-out
pub struct Notifier {
    transport: Arc<dyn WebhookTransport>,
    mailer: Arc<dyn Mailer>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(Arc::new(HttpTransport), Arc::new(SendmailMailer::default()))
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier").finish_non_exhaustive()
    }
}

impl Notifier {
    pub fn new(transport: Arc<dyn WebhookTransport>, mailer: Arc<dyn Mailer>) -> Self {
        Self { transport, mailer }
    }

    /// Notify about a stored record.
    ///
    /// Chat is only used for `forced` events; webhook and email follow the
    /// configured type policy (after the decision hook).
    #[allow(clippy::too_many_arguments)]
    pub fn maybe_notify(
        &self,
        config: &Config,
        hooks: &Hooks,
        log_type: &LogType,
        message: &str,
        context: &Value,
        forced: bool,
        at: DateTime<Utc>,
    ) -> Vec<(Channel, SendResult)> {
        let should = config.notify.types.iter().any(|t| t == log_type.as_str());
        let should = hooks.decide_notify(should, log_type, message, context, config);
        if !should && !forced {
            return Vec::new();
        }

        let mut results = Vec::with_capacity(3);

        let chat = if !forced {
            SendResult::Skipped("not an alert".to_string())
        } else if config.notify.slack_webhook_url.is_empty() {
            SendResult::Skipped("chat webhook not configured".to_string())
        } else {
            self.send_chat(config, &chat_message(log_type, message, context))
        };
        results.push((Channel::Chat, chat));

        let webhook = if !should {
            SendResult::Skipped("type not selected".to_string())
        } else if config.notify.webhook_url.is_empty() {
            SendResult::Skipped("webhook not configured".to_string())
        } else {
            let payload = webhook_payload(log_type, message, context, &config.notify.site_url, at);
            let payload = hooks.transform_payload(payload, log_type, message, context);
            self.post(
                Channel::Webhook,
                &config.notify.webhook_url,
                &payload,
                config.notify.timeout(),
            )
        };
        results.push((Channel::Webhook, webhook));

        let mail = if !should {
            SendResult::Skipped("type not selected".to_string())
        } else if !is_valid_email(&config.notify.email) {
            SendResult::Skipped("email not configured".to_string())
        } else {
            let mail = email(config, log_type, message, context);
            let sent = self.mailer.send(
                &mail.to,
                &mail.subject,
                &mail.body,
                config.notify.timeout(),
            );
            match sent {
                Ok(()) => SendResult::Sent,
                Err(e) => {
                    warn!(channel = "email", error = %e, "notification failed");
                    SendResult::Failed(e.to_string())
                }
            }
        };
        results.push((Channel::Email, mail));

        results
    }

    /// Post a prepared chat payload to the configured chat webhook
    pub fn send_chat(&self, config: &Config, payload: &Value) -> SendResult {
        if config.notify.slack_webhook_url.is_empty() {
            return SendResult::Skipped("chat webhook not configured".to_string());
        }
        self.post(
            Channel::Chat,
            &config.notify.slack_webhook_url,
            payload,
            config.notify.timeout(),
        )
    }

    fn post(&self, channel: Channel, url: &str, payload: &Value, timeout: Duration) -> SendResult {
        match self.transport.post_json(url, payload, timeout) {
            Ok(()) => {
                debug!(channel = channel.as_str(), "notification sent");
                SendResult::Sent
            }
            Err(e) => {
                warn!(channel = channel.as_str(), error = %e, "notification failed");
                SendResult::Failed(e.to_string())
            }
        }
    }
}

/// Transport and mailer that record instead of sending
#[derive(Debug, Default)]
pub struct RecordingTransport {
    posts: Mutex<Vec<(String, Value)>>,
    mails: Mutex<Vec<Email>>,
    fail: bool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send fails with a transport error
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn posts(&self) -> Vec<(String, Value)> {
        self.posts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn mails(&self) -> Vec<Email> {
        self.mails.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

impl WebhookTransport for RecordingTransport {
    fn post_json(&self, url: &str, body: &Value, _timeout: Duration) -> Result<(), DispatchError> {
        if self.fail {
            return Err(DispatchError::Transport("connection refused".to_string()));
        }
        if let Ok(mut posts) = self.posts.lock() {
            posts.push((url.to_string(), body.clone()));
        }
        Ok(())
    }
}

impl Mailer for RecordingTransport {
    fn send(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        _timeout: Duration,
    ) -> Result<(), DispatchError> {
        if self.fail {
            return Err(DispatchError::Mail("sendmail not found".to_string()));
        }
        if let Ok(mut mails) = self.mails.lock() {
            mails.push(Email {
                to: to.to_string(),
                subject: subject.to_string(),
                body: body.to_string(),
            });
        }
        Ok(())
    }
}
