//! Propagation of the lead identifier into the document URL, outbound
//! links, embedded frames, form actions and the cross-domain cookie. Every
//! rewrite is idempotent: re-running with the same lead id leaves the page
//! byte-identical.

use chrono::Utc;
use tracing::debug;
use url::Url;

use xtk_core::{cookie, params};
use xtk_host::PageDom;

/// Applies the full propagation pass. Returns the committed document URL.
pub fn propagate(lead_id: &str, page: &mut dyn PageDom) -> Url {
    let url = rewrite_document_url(lead_id, page);
    rewrite_outbound(lead_id, page);
    url
}

/// Every outbound carrier except the document URL itself: anchors, iframe
/// srcs, form actions and the cross-domain cookie.
pub fn rewrite_outbound(lead_id: &str, page: &mut dyn PageDom) {
    rewrite_links(lead_id, page);
    rewrite_frames(lead_id, page);
    rewrite_forms(lead_id, page);
    refresh_cookie(lead_id, page);
}

/// Sets the two lead parameters on the query string only, preserving all
/// other parameters and the fragment, and commits without a new history
/// entry.
pub fn rewrite_document_url(lead_id: &str, page: &mut dyn PageDom) -> Url {
    let mut url = page.document_url();
    params::set_lead_params(&mut url, lead_id);
    page.replace_document_url(&url);
    url
}

/// Rewrites every anchor with a resolvable absolute href. Fragment-only and
/// `javascript:` targets are out of scope; malformed hrefs are skipped and
/// left untouched.
pub fn rewrite_links(lead_id: &str, page: &mut dyn PageDom) {
    for (id, href) in page.anchors() {
        if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
            continue;
        }
        let Some(mut url) = params::safe_parse(&href) else {
            continue;
        };
        params::set_lead_params(&mut url, lead_id);
        page.set_anchor_href(id, url.as_str());
    }
}

/// Same two-parameter rewrite for every iframe with a non-empty src.
pub fn rewrite_frames(lead_id: &str, page: &mut dyn PageDom) {
    for (id, src) in page.frames() {
        if src.is_empty() {
            continue;
        }
        let Some(mut url) = params::safe_parse(&src) else {
            continue;
        };
        params::set_lead_params(&mut url, lead_id);
        page.set_frame_src(id, url.as_str());
    }
}

/// Same rewrite for form actions.
pub fn rewrite_forms(lead_id: &str, page: &mut dyn PageDom) {
    for (id, action) in page.forms() {
        if action.is_empty() {
            continue;
        }
        let Some(mut url) = params::safe_parse(&action) else {
            continue;
        };
        params::set_lead_params(&mut url, lead_id);
        page.set_form_action(id, url.as_str());
    }
}

/// Rebuilds the cross-domain cookie from the current URL. Skipped entirely
/// when there is nothing to store.
pub fn refresh_cookie(lead_id: &str, page: &mut dyn PageDom) {
    let url = page.document_url();
    let Some(cookie) = cookie::build_tracking_cookie(lead_id, &url, None, Utc::now()) else {
        debug!(event = "cookie_skipped", url = %url);
        return;
    };
    page.set_cookie(&cookie);
}
