//! Interception of client-side navigation so in-flight destinations carry
//! the attribution parameters before they commit. The host delivers each
//! navigation intent before it completes and applies the returned decision;
//! effects go through the [`Navigator`] capability instead of wrapping any
//! global primitive.

use tracing::{debug, info};
use url::Url;

use xtk_core::{params, SCK_PARAM, UTM_SOURCE_PARAM};
use xtk_host::{HistoryMode, KeyValueStore, Navigator, NodeId, PageDom};

/// A navigation about to commit, as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigateIntent {
    /// Resolved destination URL string.
    pub destination: String,
    /// Whether the transition stays within the current document.
    pub same_document: bool,
    pub history: HistoryMode,
    /// Source form element when the intent is a form submission.
    pub form: Option<NodeId>,
}

/// What the host should do with the original navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigateDecision {
    /// Let the original navigation proceed untouched.
    Pass,
    /// The original navigation was consumed; the interceptor has already
    /// issued the replacement through its capabilities.
    Intercepted,
}

pub struct NavigationInterceptor {
    enabled: bool,
    last_url: Option<String>,
}

impl NavigationInterceptor {
    /// The interceptor only arms inside a nested browsing context, on hosts
    /// with a native navigation-interception primitive, and never on Safari
    /// (its polyfill breaks `location.href` redirects in checkout themes).
    pub fn new(page: &dyn PageDom) -> Self {
        let enabled = page.is_nested_frame()
            && page.supports_navigation_api()
            && !is_safari(&page.user_agent());
        if enabled {
            info!(event = "navigation_interception_enabled");
        } else {
            debug!(
                event = "navigation_interception_disabled",
                nested = page.is_nested_frame(),
                native = page.supports_navigation_api(),
            );
        }
        Self {
            enabled,
            last_url: None,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn on_navigate(
        &mut self,
        intent: &NavigateIntent,
        lead_id_key: &str,
        local: &dyn KeyValueStore,
        page: &mut dyn PageDom,
        navigator: &mut dyn Navigator,
    ) -> NavigateDecision {
        if !self.enabled {
            return NavigateDecision::Pass;
        }
        // Our own re-issued navigation comes back through the host; let it
        // commit instead of looping.
        if self.last_url.as_deref() == Some(intent.destination.as_str()) {
            debug!(event = "self_navigation", url = %intent.destination);
            return NavigateDecision::Pass;
        }
        let Some(resolved) = merge_attribution(&intent.destination, &page.document_url()) else {
            return NavigateDecision::Pass;
        };
        self.last_url = Some(resolved.clone());

        if let Some(form) = intent.form {
            self.resubmit_form(form, lead_id_key, local, page);
            return NavigateDecision::Intercepted;
        }

        if intent.same_document {
            navigator.push_state(&resolved);
        } else {
            navigator.navigate(&resolved, intent.history);
        }
        NavigateDecision::Intercepted
    }

    /// Form submissions bypass the merge path: the form's action is
    /// rewritten with the stored lead id and the form resubmitted. Without a
    /// stored lead id the intercepted submission is dropped.
    fn resubmit_form(
        &self,
        form: NodeId,
        lead_id_key: &str,
        local: &dyn KeyValueStore,
        page: &mut dyn PageDom,
    ) {
        let Some(lead_id) = local.get(lead_id_key).filter(|value| !value.is_empty()) else {
            debug!(event = "form_submit_without_lead");
            return;
        };
        let Some(action) = page.form_action(form) else {
            return;
        };
        let Some(mut action_url) = params::safe_parse(&action) else {
            return;
        };
        params::set_lead_params(&mut action_url, &lead_id);
        page.set_form_action(form, action_url.as_str());
        page.submit_form(form);
    }

    /// Rewrites the destination of a `window.open` call that targets the
    /// top-level context from inside a nested frame. `None` leaves the call
    /// untouched.
    pub fn on_window_open(&self, input: &str, target: &str, page: &dyn PageDom) -> Option<String> {
        if !page.is_nested_frame() || target != "_top" {
            return None;
        }
        params::safe_parse(input)?;
        merge_attribution(input, &page.document_url())
    }
}

/// Destination query merged with the attribution parameters of the current
/// page. The destination's own parameters win; parameters the current page
/// lacks are simply omitted. `None` when the destination is unparsable.
fn merge_attribution(destination: &str, current: &Url) -> Option<String> {
    let destination = params::safe_parse(destination)?;
    let current_pairs = params::dedup_pairs(&params::query_pairs(current));
    let base: Vec<(String, String)> = [UTM_SOURCE_PARAM, SCK_PARAM]
        .iter()
        .filter_map(|name| {
            params::lookup(&current_pairs, name)
                .map(|value| (name.to_string(), value.to_string()))
        })
        .collect();
    Some(params::merge_into_url(&destination, &base).into())
}

fn is_safari(user_agent: &str) -> bool {
    let ua = user_agent.to_ascii_lowercase();
    ua.contains("safari") && !ua.contains("chrome") && !ua.contains("android")
}
