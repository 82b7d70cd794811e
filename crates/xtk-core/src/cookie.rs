//! Cross-domain tracking cookie: a pipe-delimited mirror of the lead id and
//! the UTM context, readable by the external checkout on the root domain.
//! Derived state only; storage stays the source of truth.

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{params, TRACKING_COOKIE_NAME, UTM_SOURCE_PARAM};

const COOKIE_TTL_MONTHS: u32 = 12;

/// UTM keys mirrored into the cookie, in emission order. `utm_source` is
/// always forced to the lead id regardless of what the URL carries.
const COOKIE_KEYS: [&str; 6] = [
    "src",
    UTM_SOURCE_PARAM,
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Lax,
    Strict,
    None,
}

/// A cookie write request handed to the host. The host owns the actual
/// `Set-Cookie`/`document.cookie` formatting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    /// Leading-dot root domain, e.g. `.example.com`.
    pub domain: String,
    pub path: String,
    pub expires: DateTime<Utc>,
    pub same_site: SameSite,
}

/// Builds the tracking cookie from the current URL's query parameters.
/// Empty values are omitted; returns `None` when nothing remains to store
/// (no cookie write should happen at all in that case).
pub fn build_tracking_cookie(
    lead_id: &str,
    current_url: &Url,
    hostname_override: Option<&str>,
    now: DateTime<Utc>,
) -> Option<SetCookie> {
    let url_params = params::dedup_pairs(&params::query_pairs(current_url));
    let mut entries: Vec<String> = Vec::with_capacity(COOKIE_KEYS.len());
    for key in COOKIE_KEYS {
        let value = if key == UTM_SOURCE_PARAM {
            lead_id
        } else {
            params::lookup(&url_params, key).unwrap_or("")
        };
        if !value.is_empty() {
            entries.push(format!("{key}={value}"));
        }
    }
    if entries.is_empty() {
        return None;
    }

    let hostname = hostname_override.or_else(|| current_url.host_str())?;
    let expires = now
        .checked_add_months(Months::new(COOKIE_TTL_MONTHS))
        .unwrap_or(now);
    Some(SetCookie {
        name: TRACKING_COOKIE_NAME.to_string(),
        value: entries.join("|"),
        domain: format!(".{}", extract_root_domain(hostname)),
        path: "/".to_string(),
        expires,
        same_site: SameSite::Lax,
    })
}

/// Root domain for cookie scoping: apex plus one label, keeping one extra
/// label for Brazilian two-label suffixes (`.com.br` and friends). Hostnames
/// with fewer than three labels come back unchanged.
pub fn extract_root_domain(hostname: &str) -> String {
    let labels: Vec<&str> = hostname.split('.').collect();
    if labels.len() < 3 {
        return hostname.to_string();
    }
    let tld = labels[labels.len() - 1];
    let take = if tld == "br" { 3 } else { 2 };
    labels[labels.len() - take..].join(".")
}
