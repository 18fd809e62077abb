//! Email templates
//!
//! HTML bodies go through a registry that escapes interpolated values; the
//! plain-text registry leaves them untouched.

use super::{AlertPayload, DigestPayload, NotificationError};
use crate::reports::round2;
use chrono::{DateTime, Local, Utc};
use handlebars::Handlebars;
use model::AlertKind;
use serde::Serialize;

const ALERT_HTML: &str = "alert_html";
const ALERT_TEXT: &str = "alert_text";
const DIGEST_HTML: &str = "digest_html";
const DIGEST_TEXT: &str = "digest_text";

/// Rendered subject and bodies of one message
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMail {
    pub subject: String,
    pub text: String,
    pub html: String,
}

pub struct Renderer {
    html: Handlebars<'static>,
    text: Handlebars<'static>,
}

#[derive(Serialize)]
struct AlertView<'a> {
    patient_name: &'a str,
    glucose_level: String,
    alert_title: &'static str,
    alert_color: &'static str,
    threshold_text: String,
    timestamp: String,
    context: &'static str,
    high_threshold: String,
    low_threshold: String,
}

#[derive(Serialize)]
struct DigestView<'a> {
    patient_name: &'a str,
    week_start: String,
    week_end: String,
    total_alerts: usize,
    high_alerts: usize,
    low_alerts: usize,
    average_glucose: String,
    total_readings: usize,
    alert_rate: String,
    high_threshold: String,
    low_threshold: String,
    alert_count: usize,
    alerts: Vec<DigestAlertView<'a>>,
    generated_at: String,
}

#[derive(Serialize)]
struct DigestAlertView<'a> {
    message: &'a str,
    kind_label: String,
    kind_class: &'static str,
    glucose_level: String,
    context: &'static str,
    date: String,
    time: String,
    date_time: String,
}

impl Renderer {
    pub fn try_new() -> Result<Self, NotificationError> {
        let mut html = Handlebars::new();
        html.set_strict_mode(true);
        register(&mut html, ALERT_HTML, ALERT_HTML_TEMPLATE)?;
        register(&mut html, DIGEST_HTML, DIGEST_HTML_TEMPLATE)?;

        let mut text = Handlebars::new();
        text.set_strict_mode(true);
        text.register_escape_fn(handlebars::no_escape);
        register(&mut text, ALERT_TEXT, ALERT_TEXT_TEMPLATE)?;
        register(&mut text, DIGEST_TEXT, DIGEST_TEXT_TEMPLATE)?;

        Ok(Self { html, text })
    }

    pub fn render_alert(&self, payload: &AlertPayload) -> Result<RenderedMail, NotificationError> {
        let (alert_color, threshold_text) = match payload.kind {
            AlertKind::High => ("#dc2626", format!("above {} mg/dL", payload.high_threshold)),
            AlertKind::Low => ("#d97706", format!("below {} mg/dL", payload.low_threshold)),
        };

        let view = AlertView {
            patient_name: &payload.patient_name,
            glucose_level: payload.glucose_level.to_string(),
            alert_title: payload.kind.title(),
            alert_color,
            threshold_text,
            timestamp: local(payload.timestamp).format("%b %d, %Y %H:%M").to_string(),
            context: payload.context.label(),
            high_threshold: payload.high_threshold.to_string(),
            low_threshold: payload.low_threshold.to_string(),
        };

        Ok(RenderedMail {
            subject: format!(
                "🚨 {} Alert - {} mg/dL",
                payload.kind.title(),
                payload.glucose_level
            ),
            text: render(&self.text, ALERT_TEXT, &view)?,
            html: render(&self.html, ALERT_HTML, &view)?,
        })
    }

    pub fn render_digest(&self, digest: &DigestPayload) -> Result<RenderedMail, NotificationError> {
        let alerts = digest
            .alerts
            .iter()
            .map(|a| {
                let taken = local(a.reading_timestamp);
                DigestAlertView {
                    message: &a.alert.message,
                    kind_label: a.alert.kind.as_str().replacen('_', " ", 1),
                    kind_class: match a.alert.kind {
                        AlertKind::High => "alert-high",
                        AlertKind::Low => "alert-low",
                    },
                    glucose_level: a.glucose_level.to_string(),
                    context: a.context.label(),
                    date: taken.format("%b %d").to_string(),
                    time: taken.format("%H:%M").to_string(),
                    date_time: taken.format("%b %d, %Y %H:%M").to_string(),
                }
            })
            .collect::<Vec<_>>();

        let count = alerts.len();
        let view = DigestView {
            patient_name: &digest.patient_name,
            week_start: digest.week_start.format("%b %d, %Y").to_string(),
            week_end: digest.week_end.format("%b %d, %Y").to_string(),
            total_alerts: digest.stats.total_alerts,
            high_alerts: digest.stats.high_alerts,
            low_alerts: digest.stats.low_alerts,
            average_glucose: round2(digest.stats.average_glucose).to_string(),
            total_readings: digest.stats.total_readings,
            alert_rate: round2(digest.stats.alert_rate).to_string(),
            high_threshold: digest.high_threshold.to_string(),
            low_threshold: digest.low_threshold.to_string(),
            alert_count: count,
            alerts,
            generated_at: digest.generated_at.format("%b %d, %Y at %H:%M").to_string(),
        };

        Ok(RenderedMail {
            subject: format!(
                "📊 Weekly Glucose Alert Report - {} Unacknowledged Alert{}",
                count,
                if count == 1 { "" } else { "s" }
            ),
            text: render(&self.text, DIGEST_TEXT, &view)?,
            html: render(&self.html, DIGEST_HTML, &view)?,
        })
    }
}

fn local(at: DateTime<Utc>) -> DateTime<Local> {
    at.with_timezone(&Local)
}

fn register(
    registry: &mut Handlebars<'static>,
    name: &str,
    template: &str,
) -> Result<(), NotificationError> {
    registry
        .register_template_string(name, template)
        .map_err(|e| NotificationError::Render(format!("registering {} template: {}", name, e)))
}

fn render<T: Serialize>(
    registry: &Handlebars<'static>,
    name: &str,
    data: &T,
) -> Result<String, NotificationError> {
    registry
        .render(name, data)
        .map_err(|e| NotificationError::Render(format!("rendering {}: {}", name, e)))
}

const ALERT_HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Glucose Alert</title>
    <style>
        body { font-family: Arial, sans-serif; line-height: 1.6; color: #333; }
        .container { max-width: 600px; margin: 0 auto; padding: 20px; }
        .alert-box { color: white; padding: 20px; margin: 20px 0; border-radius: 8px; text-align: center; }
        .glucose-level { font-size: 2.5em; font-weight: bold; }
        .details { background: #f8f9fa; padding: 20px; border-radius: 8px; }
        .label { font-weight: bold; color: #495057; }
        .warning { background: #fff3cd; color: #856404; padding: 15px; border-radius: 8px; margin: 20px 0; }
        .footer { text-align: center; font-size: 0.9em; color: #6c757d; }
    </style>
</head>
<body>
    <div class="container">
        <h1>🩸 Blood Sugar Monitor</h1>
        <p>Glucose Level Alert Notification</p>

        <div class="alert-box" style="background: {{alert_color}};">
            <h2>⚠️ {{alert_title}} Alert</h2>
            <div class="glucose-level">{{glucose_level}} mg/dL</div>
            <p>Glucose level is {{threshold_text}}</p>
        </div>

        <div class="details">
            <h3>Reading Details</h3>
            <p><span class="label">Patient:</span> {{patient_name}}</p>
            <p><span class="label">Date &amp; Time:</span> {{timestamp}}</p>
            <p><span class="label">Context:</span> {{context}}</p>
            <p><span class="label">High Threshold:</span> {{high_threshold}} mg/dL</p>
            <p><span class="label">Low Threshold:</span> {{low_threshold}} mg/dL</p>
        </div>

        <div class="warning">
            <strong>⚠️ Important:</strong> This is an automated alert. If this is a medical emergency, please contact emergency services immediately or consult with your healthcare provider.
        </div>

        <div class="footer">
            <p>This email was sent automatically by the Blood Sugar Monitor system.</p>
            <p>Please do not reply to this email.</p>
        </div>
    </div>
</body>
</html>
"#;

const ALERT_TEXT_TEMPLATE: &str = r#"GLUCOSE ALERT NOTIFICATION

⚠️ {{alert_title}} Alert

Patient: {{patient_name}}
Glucose Level: {{glucose_level}} mg/dL
Status: Glucose level is {{threshold_text}}
Date & Time: {{timestamp}}
Context: {{context}}
High Threshold: {{high_threshold}} mg/dL
Low Threshold: {{low_threshold}} mg/dL

⚠️ IMPORTANT: This is an automated alert. If this is a medical emergency, please contact emergency services immediately or consult with your healthcare provider.

This email was sent automatically by the Blood Sugar Monitor system.
Please do not reply to this email.
"#;

const DIGEST_HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Weekly Glucose Alert Report</title>
    <style>
        body { font-family: Arial, sans-serif; line-height: 1.6; color: #333; background-color: #f5f5f5; }
        .container { max-width: 800px; margin: 0 auto; background: white; padding: 30px; }
        .card { display: inline-block; background: #f8f9fa; border: 1px solid #e9ecef; border-radius: 8px; padding: 20px; margin: 5px; text-align: center; }
        .card-value { font-size: 2em; font-weight: bold; }
        .alert-item { border: 1px solid #dee2e6; border-radius: 8px; padding: 20px; margin: 15px 0; }
        .alert-high { background: #f8d7da; color: #721c24; }
        .alert-low { background: #fff3cd; color: #856404; }
        .thresholds { background: #e3f2fd; border-radius: 8px; padding: 20px; margin: 20px 0; }
        .warning { background: #fff3cd; color: #856404; padding: 15px; border-radius: 8px; margin: 20px 0; }
        .footer { text-align: center; color: #6c757d; font-size: 0.9em; }
    </style>
</head>
<body>
    <div class="container">
        <h1>📊 Weekly Glucose Alert Report</h1>
        <p>{{patient_name}}</p>
        <p>{{week_start}} - {{week_end}}</p>

        <h2>📈 Weekly Summary</h2>
        <div class="card"><div class="card-value">{{total_alerts}}</div>Total Alerts</div>
        <div class="card"><div class="card-value">{{high_alerts}}</div>High Glucose</div>
        <div class="card"><div class="card-value">{{low_alerts}}</div>Low Glucose</div>
        <div class="card"><div class="card-value">{{average_glucose}}</div>Avg Glucose (mg/dL)</div>
        <div class="card"><div class="card-value">{{total_readings}}</div>Total Readings</div>
        <div class="card"><div class="card-value">{{alert_rate}}%</div>Alert Rate</div>

        <div class="thresholds">
            <h3>⚙️ Current Alert Thresholds</h3>
            <p>High Threshold: {{high_threshold}} mg/dL</p>
            <p>Low Threshold: {{low_threshold}} mg/dL</p>
        </div>

        <h2>🚨 Unacknowledged Alerts ({{alert_count}})</h2>
        {{#each alerts}}
        <div class="alert-item">
            <h3>{{message}} <span class="{{kind_class}}">{{kind_label}}</span></h3>
            <p>Glucose Level: {{glucose_level}} mg/dL</p>
            <p>Context: {{context}}</p>
            <p>Date: {{date}} Time: {{time}}</p>
        </div>
        {{/each}}

        <div class="warning">
            <strong>⚠️ Action Required:</strong> Please review and acknowledge these alerts in your Blood Sugar Monitor dashboard.
            If you're experiencing frequent alerts, consider consulting with your healthcare provider about adjusting your thresholds or treatment plan.
        </div>

        <div class="footer">
            <p>This weekly report was generated automatically by the Blood Sugar Monitor system.</p>
            <p>Report generated on {{generated_at}}</p>
            <p>Please do not reply to this email.</p>
        </div>
    </div>
</body>
</html>
"#;

const DIGEST_TEXT_TEMPLATE: &str = r#"WEEKLY GLUCOSE ALERT REPORT
{{patient_name}}
{{week_start}} - {{week_end}}

WEEKLY SUMMARY
==============
Total Alerts: {{total_alerts}}
High Glucose Alerts: {{high_alerts}}
Low Glucose Alerts: {{low_alerts}}
Average Glucose: {{average_glucose}} mg/dL
Total Readings: {{total_readings}}
Alert Rate: {{alert_rate}}%

CURRENT THRESHOLDS
==================
High Threshold: {{high_threshold}} mg/dL
Low Threshold: {{low_threshold}} mg/dL

UNACKNOWLEDGED ALERTS ({{alert_count}})
========================
{{#each alerts}}
- {{message}}
  Glucose: {{glucose_level}} mg/dL
  Context: {{context}}
  Date: {{date_time}}
  Type: {{kind_label}}
{{/each}}

⚠️ ACTION REQUIRED: Please review and acknowledge these alerts in your Blood Sugar Monitor dashboard.

This weekly report was generated automatically by the Blood Sugar Monitor system.
Report generated on {{generated_at}}
Please do not reply to this email.
"#;
