//! Session authentication
//!
//! The login page is served as HTML; the form's action URL is scraped out and
//! credentials are posted against it with redirects disabled, so the 302
//! handoff can be completed manually on the same cookie jar. The orchestrator
//! never sees HTML, only the extracted `{action, payload}` pair.

use crate::config::Credentials;
use crate::error::{FlowError, Result};
use crate::executor::RequestExecutor;
use crate::metrics::MetricsRegistry;
use reqwest::Url;
use scraper::{Html, Selector};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Timeout for fetching the login page.
pub const LOGIN_PAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for submitting credentials.
pub const SUBMIT_TIMEOUT: Duration = Duration::from_secs(15);

/// Timeout for completing the post-login redirect.
pub const REDIRECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Login form body, wire field names per the service's login contract
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LoginPayload {
    #[serde(rename = "flowType")]
    pub flow_type: String,
    pub username: String,
    #[serde(rename = "formattedUsername")]
    pub formatted_username: String,
    pub password: String,
}

/// Extracted login action and payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginForm {
    pub action: String,
    pub payload: LoginPayload,
}

/// Extract the login form from raw page HTML
///
/// Returns `None` when the page carries no form or the form has no action.
pub fn extract_login_form(html: &str, base_url: &str, creds: &Credentials) -> Option<LoginForm> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("form").ok()?;

    let form = document.select(&selector).next()?;
    let action = form.value().attr("action")?;
    if action.is_empty() {
        return None;
    }

    let action = Url::parse(base_url).ok()?.join(action).ok()?.to_string();

    Some(LoginForm {
        action,
        payload: LoginPayload {
            flow_type: "byLogin".to_string(),
            username: creds.username.clone(),
            formatted_username: creds.username.clone(),
            password: creds.password.clone(),
        },
    })
}

/// Establish an authenticated session on the executor's cookie jar
///
/// GET login page, extract the form, POST credentials expecting a 302, then
/// complete the redirect. Retried up to `max_retries` times with a flat
/// delay; each failed round records an auth-failure metric.
pub async fn establish_session(
    executor: &RequestExecutor,
    base_url: &str,
    creds: &Credentials,
    metrics: &MetricsRegistry,
) -> Result<()> {
    let started = Instant::now();

    for attempt in 0..executor.max_retries() {
        match login_round(executor, base_url, creds).await {
            Ok(()) => {
                metrics.record_auth_duration(started.elapsed());
                metrics.record_auth_attempt(&creds.username, true);
                metrics.set_session_status(&creds.username, true);
                info!(username = %creds.username, "Authentication successful");
                return Ok(());
            },
            Err(e) => {
                metrics.record_auth_attempt(&creds.username, false);
                warn!(
                    username = %creds.username,
                    attempt = attempt + 1,
                    error = %e,
                    "Auth attempt failed"
                );
                tokio::time::sleep(executor.retry_delay()).await;
            },
        }
    }

    metrics.set_session_status(&creds.username, false);
    Err(FlowError::auth(format!(
        "all login attempts failed for {}",
        creds.username
    )))
}

async fn login_round(
    executor: &RequestExecutor,
    base_url: &str,
    creds: &Credentials,
) -> Result<()> {
    // 1) GET login page
    let login_url = format!("{}/", base_url.trim_end_matches('/'));
    let response = executor
        .execute("GET", "Get login page", |c| {
            c.get(&login_url).timeout(LOGIN_PAGE_TIMEOUT)
        })
        .await
        .ok_or_else(|| FlowError::Exhausted("Get login page".to_string()))?;
    if !response.status().is_success() {
        return Err(FlowError::auth(format!(
            "login page returned {}",
            response.status()
        )));
    }

    let html = response
        .text()
        .await
        .map_err(|e| FlowError::auth(format!("unreadable login page: {e}")))?;
    let form = extract_login_form(&html, base_url, creds)
        .ok_or_else(|| FlowError::auth("no login form on page"))?;

    // 2) POST credentials; the client has redirects disabled
    let response = executor
        .execute("POST", "Submit credentials", |c| {
            c.post(&form.action).timeout(SUBMIT_TIMEOUT).form(&form.payload)
        })
        .await
        .ok_or_else(|| FlowError::Exhausted("Submit credentials".to_string()))?;
    if response.status().as_u16() != 302 {
        return Err(FlowError::auth(format!(
            "credentials submit returned {}",
            response.status()
        )));
    }

    let location = response
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| FlowError::auth("redirect without Location header"))?;
    let redirect_url = Url::parse(&form.action)
        .and_then(|u| u.join(location))
        .map_err(|e| FlowError::auth(format!("bad redirect target: {e}")))?;

    // 3) Complete redirect
    let redirect = redirect_url.to_string();
    let response = executor
        .execute("GET", "Complete auth redirect", |c| {
            c.get(&redirect).timeout(REDIRECT_TIMEOUT)
        })
        .await
        .ok_or_else(|| FlowError::Exhausted("Complete auth redirect".to_string()))?;
    if !response.status().is_success() {
        return Err(FlowError::auth(format!(
            "auth redirect returned {}",
            response.status()
        )));
    }

    Ok(())
}
