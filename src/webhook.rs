//! Webhook notifier for daily change summaries.
//!
//! Renders a batch as an HTML report grouped by schema and POSTs it as
//! JSON `{date, html, env, subject}` to the configured URL.
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx → retry with exponential backoff (1s, 2s, 4s, ...)
//! - Other 4xx → fail immediately
//! - Network errors → retry

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

use sourcewatch_core::notify::{ChangeSummary, NotificationBatch, Notifier};

use crate::config::Config;

/// Environment and project labels used in the report.
#[derive(Debug, Clone)]
pub struct SummaryContext {
    pub project: String,
    pub env: String,
    pub history_link: Option<String>,
}

impl SummaryContext {
    pub fn from_config(config: &Config) -> Self {
        Self {
            project: config.tracker.project.clone(),
            env: config.tracker.env.to_uppercase(),
            history_link: config.git.history_link(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SummaryPayload {
    pub date: String,
    pub html: String,
    pub env: String,
    pub subject: String,
}

pub fn subject(ctx: &SummaryContext, date: NaiveDate, count: usize) -> String {
    format!(
        "{} {} Database Changes - Daily Summary ({}) - {} changes detected",
        ctx.project,
        ctx.env,
        date.format("%Y-%m-%d"),
        count
    )
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn render_preview(preview: &str) -> String {
    preview
        .lines()
        .map(|line| {
            if line.starts_with('+') {
                format!("<span class=\"added\">{}</span>", escape(line))
            } else {
                escape(line)
            }
        })
        .collect::<Vec<_>>()
        .join("<br>")
}

fn render_row(entry: &ChangeSummary) -> String {
    let preview = if entry.preview.is_empty() {
        "<em>new object</em>".to_string()
    } else {
        format!("<code>{}</code>", render_preview(&entry.preview))
    };
    format!(
        "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
        escape(&entry.id.name),
        entry.id.kind,
        entry.changed_lines,
        entry.change_date.format("%Y-%m-%d"),
        preview
    )
}

/// HTML body of the summary, one table per schema.
pub fn render_html(batch: &NotificationBatch, ctx: &SummaryContext, date: NaiveDate) -> String {
    let mut html = String::new();
    html.push_str("<html><head><style>\n");
    html.push_str("table { border-collapse: collapse; margin-bottom: 16px; }\n");
    html.push_str("th, td { border: 1px solid #ccc; padding: 4px 8px; text-align: left; vertical-align: top; }\n");
    html.push_str(".added { background-color: #e6ffed; }\n");
    html.push_str("</style></head><body>\n");
    html.push_str(&format!(
        "<h2>{} {} database changes for {}</h2>\n",
        escape(&ctx.project),
        escape(&ctx.env),
        date.format("%Y-%m-%d")
    ));

    if batch.is_empty() {
        html.push_str("<p>No changes detected in the reporting window.</p>\n");
    } else {
        html.push_str(&format!("<p>{} changes detected.</p>\n", batch.len()));

        let mut by_schema: BTreeMap<&str, Vec<&ChangeSummary>> = BTreeMap::new();
        for entry in &batch.entries {
            by_schema.entry(entry.id.schema.as_str()).or_default().push(entry);
        }

        for (schema, entries) in by_schema {
            html.push_str(&format!("<h3>{}</h3>\n<table>\n", escape(schema)));
            html.push_str(
                "<tr><th>Object</th><th>Type</th><th>Lines changed</th><th>Date</th><th>Preview</th></tr>\n",
            );
            for entry in entries {
                html.push_str(&render_row(entry));
            }
            html.push_str("</table>\n");
        }
    }

    if let Some(link) = &ctx.history_link {
        html.push_str(&format!(
            "<p><a href=\"{}\">Full change history</a></p>\n",
            escape(link)
        ));
    }
    html.push_str("</body></html>\n");
    html
}

pub fn build_payload(batch: &NotificationBatch, ctx: &SummaryContext, date: NaiveDate) -> SummaryPayload {
    SummaryPayload {
        date: date.format("%Y-%m-%d").to_string(),
        html: render_html(batch, ctx, date),
        env: ctx.env.clone(),
        subject: subject(ctx, date, batch.len()),
    }
}

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    max_retries: u32,
    ctx: SummaryContext,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout_secs: u64, max_retries: u32, ctx: SummaryContext) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            max_retries,
            ctx,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.notify.webhook_url,
            config.notify.timeout_secs,
            config.notify.max_retries,
            SummaryContext::from_config(config),
        )
    }

    async fn post(&self, payload: &SummaryPayload) -> Result<()> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::warn!("Retrying webhook in {}s (attempt {})", delay.as_secs(), attempt + 1);
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.url)
                .header("Content-Type", "application/json")
                .json(payload)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(());
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow::anyhow!("Webhook error {}: {}", status, body_text));
                        continue;
                    }

                    bail!("Webhook error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Webhook delivery failed after retries")))
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, batch: &NotificationBatch) -> Result<bool> {
        let date = Local::now().date_naive();
        let payload = build_payload(batch, &self.ctx, date);
        self.post(&payload).await?;
        tracing::info!("Sent summary with {} changes", batch.len());
        Ok(true)
    }
}
