//! Score submission to the LMS outcome service.
//!
//! One attempt per call. Retrying belongs to whoever drives the run.

use std::time::Duration;

use async_trait::async_trait;
use labgrade_core::config::LtiConfig;
use labgrade_core::ConfigError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ReportError;

/// Consumer key/secret pair issued by the LMS.
#[derive(Clone)]
pub struct LtiCredentials {
    pub consumer_key: String,
    pub consumer_secret: String,
}

impl LtiCredentials {
    pub fn new(consumer_key: impl Into<String>, consumer_secret: impl Into<String>) -> Self {
        Self {
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
        }
    }

    pub fn from_config(config: &LtiConfig) -> Result<Self, ConfigError> {
        let key = config
            .consumer_key
            .clone()
            .ok_or(ConfigError::Missing("LTI_CONSUMER_KEY"))?;
        let secret = config
            .consumer_secret
            .clone()
            .ok_or(ConfigError::Missing("LTI_CONSUMER_SECRET"))?;
        Ok(Self::new(key, secret))
    }
}

impl std::fmt::Debug for LtiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LtiCredentials")
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &"<redacted>")
            .finish()
    }
}

#[async_trait]
pub trait ScoreReporter: Send + Sync {
    /// Record `score` for the gradebook cell `result_id` at `callback_url`.
    async fn report(&self, result_id: &str, callback_url: &str, score: f64) -> Result<(), ReportError>;
}

/// LTI 1.1 Basic Outcomes client (`replaceResultRequest`).
#[derive(Debug, Clone)]
pub struct LtiOutcomeReporter {
    credentials: LtiCredentials,
    /// Shared HTTP client (connection pooling).
    client: reqwest::Client,
}

impl LtiOutcomeReporter {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(credentials: LtiCredentials) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_client(credentials, client))
    }

    pub fn with_client(credentials: LtiCredentials, client: reqwest::Client) -> Self {
        Self { credentials, client }
    }
}

#[async_trait]
impl ScoreReporter for LtiOutcomeReporter {
    async fn report(&self, result_id: &str, callback_url: &str, score: f64) -> Result<(), ReportError> {
        let message_id = Uuid::new_v4();
        let body = replace_result_body(&message_id.to_string(), result_id, score);

        let response = self
            .client
            .post(callback_url)
            .header(reqwest::header::CONTENT_TYPE, "application/xml")
            .basic_auth(&self.credentials.consumer_key, Some(&self.credentials.consumer_secret))
            .body(body)
            .send()
            .await?;
        let status = response.status();
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());

        if !status.is_success() {
            warn!(url = %callback_url, %status, "outcome service returned non-2xx status");
            return Err(ReportError::Rejected {
                status: status.as_u16(),
                body: text,
            });
        }

        // A 2xx carrying an explicit non-success code is still a rejection.
        if let Some(code) = code_major(&text) {
            if code != "success" {
                warn!(url = %callback_url, code, "outcome service rejected score");
                return Err(ReportError::Rejected {
                    status: status.as_u16(),
                    body: text,
                });
            }
        }

        debug!(url = %callback_url, %message_id, score, "score reported");
        Ok(())
    }
}

fn replace_result_body(message_id: &str, result_id: &str, score: f64) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<imsx_POXEnvelopeRequest xmlns="http://www.imsglobal.org/services/ltiv1p1/xsd/imsoms_v1p0">
  <imsx_POXHeader>
    <imsx_POXRequestHeaderInfo>
      <imsx_version>V1.0</imsx_version>
      <imsx_messageIdentifier>{message_id}</imsx_messageIdentifier>
    </imsx_POXRequestHeaderInfo>
  </imsx_POXHeader>
  <imsx_POXBody>
    <replaceResultRequest>
      <resultRecord>
        <sourcedGUID>
          <sourcedId>{sourced_id}</sourcedId>
        </sourcedGUID>
        <result>
          <resultScore>
            <language>en</language>
            <textString>{score}</textString>
          </resultScore>
        </result>
      </resultRecord>
    </replaceResultRequest>
  </imsx_POXBody>
</imsx_POXEnvelopeRequest>"#,
        message_id = xml_escape(message_id),
        sourced_id = xml_escape(result_id),
        score = score,
    )
}

fn xml_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Value of `<imsx_codeMajor>` in a POX response, if present.
fn code_major(response: &str) -> Option<&str> {
    const OPEN: &str = "<imsx_codeMajor>";
    let start = response.find(OPEN)? + OPEN.len();
    let len = response[start..].find("</imsx_codeMajor>")?;
    Some(response[start..start + len].trim())
}
