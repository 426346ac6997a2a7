use anyhow::{anyhow, Result};
use std::collections::HashMap;

const API_BASE_URL_KEY: &str = "LAB_API_BASE_URL";
const LOCAL_DOMAIN_PREFIXES: [&str; 3] = ["localhost", "127.0.0.1", "[::1]"];

fn is_local_domain(value: &str) -> bool {
    let lower = value.to_lowercase();
    LOCAL_DOMAIN_PREFIXES
        .iter()
        .any(|prefix| lower.starts_with(prefix))
}

/// Accepts `host` or `host:port`; rejects anything carrying a scheme, path or query.
pub fn normalize_domain(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.contains("://")
        || trimmed.contains('/')
        || trimmed.contains('?')
        || trimmed.contains('#')
    {
        return None;
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '[' | ']'))
    {
        return None;
    }
    Some(trimmed.to_string())
}

fn normalize_url(value: &str) -> Option<String> {
    let trimmed = value.trim().trim_end_matches('/');
    let (scheme, rest) = trimmed.split_once("://")?;
    if !matches!(scheme, "http" | "https") || rest.is_empty() {
        return None;
    }
    Some(trimmed.to_string())
}

/// Base URL of the analysis API: a full URL is used as given, a bare domain gets
/// `http` when local and `https` otherwise. Unset or blank yields `None`.
pub fn resolve_api_base_url(settings: &HashMap<String, String>) -> Result<Option<String>> {
    let Some(raw) = settings.get(API_BASE_URL_KEY) else {
        return Ok(None);
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let resolved = if raw.contains("://") {
        normalize_url(raw)
    } else {
        normalize_domain(Some(raw)).map(|domain| {
            let scheme = if is_local_domain(&domain) {
                "http"
            } else {
                "https"
            };
            format!("{}://{}", scheme, domain)
        })
    };
    resolved.map(Some).ok_or_else(|| {
        anyhow!(
            "Setting {} must be an http(s) URL or a bare domain (value: {})",
            API_BASE_URL_KEY,
            raw
        )
    })
}
