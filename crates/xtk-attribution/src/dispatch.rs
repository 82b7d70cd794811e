//! View-event dispatch: duplicate suppression over a session-scoped
//! fingerprint set, then a single bounded POST. Never surfaces an error;
//! every failure degrades to "no attribution update this load".

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{debug, warn};

use xtk_core::PREVIOUS_VIEWS_KEY;
use xtk_host::{KeyValueStore, Transport};

pub const VIEW_TIMEOUT: Duration = Duration::from_secs(10);

/// Wire body of the first-touch view event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewPayload {
    pub step_id: String,
    pub href: String,
    pub product_id: String,
    pub finger_print_id: Option<String>,
    pub url_params: String,
}

#[derive(Debug, Deserialize)]
struct ViewResponse {
    #[serde(default)]
    success: bool,
    #[serde(rename = "leadId")]
    lead_id: Option<String>,
}

pub struct ViewDispatcher {
    endpoint: String,
}

impl ViewDispatcher {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    /// At-most-once delivery per session: the payload fingerprint is marked
    /// sent *before* the network attempt, so an unload mid-call or a failed
    /// send still counts as spent. Returns the remote-assigned lead id, or
    /// `None` on suppression or any failure.
    pub fn dispatch(
        &self,
        session: &mut dyn KeyValueStore,
        transport: &mut dyn Transport,
        payload: &ViewPayload,
    ) -> Option<String> {
        let body = match serde_json::to_string(payload) {
            Ok(body) => body,
            Err(error) => {
                warn!(event = "view_encode_failed", error = %error);
                return None;
            }
        };
        let fingerprint = sha256_hex(body.as_bytes());
        if !mark_sent(session, &fingerprint) {
            debug!(event = "view_suppressed", fingerprint = %fingerprint);
            return None;
        }

        debug!(event = "view_dispatch", endpoint = %self.endpoint);
        let raw = match transport.post(&self.endpoint, &body, VIEW_TIMEOUT) {
            Ok(raw) => raw,
            Err(error) => {
                warn!(event = "view_send_failed", error = %error);
                return None;
            }
        };
        let response: ViewResponse = match serde_json::from_str(&raw) {
            Ok(response) => response,
            Err(error) => {
                warn!(event = "view_response_invalid", error = %error);
                return None;
            }
        };
        if !response.success {
            return None;
        }
        response.lead_id.filter(|lead_id| !lead_id.is_empty())
    }
}

/// Records `fingerprint` in the session set; `false` means it was already
/// present and the dispatch must be suppressed.
fn mark_sent(session: &mut dyn KeyValueStore, fingerprint: &str) -> bool {
    let mut sent: Vec<String> = session
        .get(PREVIOUS_VIEWS_KEY)
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default();
    if sent.iter().any(|existing| existing == fingerprint) {
        return false;
    }
    sent.push(fingerprint.to_string());
    if let Ok(raw) = serde_json::to_string(&sent) {
        session.set(PREVIOUS_VIEWS_KEY, &raw);
    }
    true
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut output = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(output, "{byte:02x}");
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use xtk_host::memory::{MemoryStore, ScriptedTransport};

    fn payload() -> ViewPayload {
        ViewPayload {
            step_id: "initial".to_string(),
            href: "https://site.test/?ttclid=abc123".to_string(),
            product_id: "tok-1".to_string(),
            finger_print_id: Some("fp-1".to_string()),
            url_params: "ttclid=abc123".to_string(),
        }
    }

    #[test]
    fn returns_lead_id_on_success() {
        let mut session = MemoryStore::new();
        let mut transport = ScriptedTransport::new();
        transport.respond_with(r#"{"success":true,"leadId":"L-9"}"#);

        let dispatcher = ViewDispatcher::new("https://view.xtracky.dev/api/analytics/view");
        let lead = dispatcher.dispatch(&mut session, &mut transport, &payload());
        assert_eq!(lead.as_deref(), Some("L-9"));
        assert_eq!(transport.posts.len(), 1);
        assert_eq!(
            transport.posts[0].0,
            "https://view.xtracky.dev/api/analytics/view"
        );
    }

    #[test]
    fn second_identical_dispatch_is_suppressed_without_network() {
        let mut session = MemoryStore::new();
        let mut transport = ScriptedTransport::new();
        transport.respond_with(r#"{"success":true,"leadId":"L-9"}"#);
        transport.respond_with(r#"{"success":true,"leadId":"L-10"}"#);

        let dispatcher = ViewDispatcher::new("https://x.test/view");
        assert!(dispatcher
            .dispatch(&mut session, &mut transport, &payload())
            .is_some());
        assert!(dispatcher
            .dispatch(&mut session, &mut transport, &payload())
            .is_none());
        assert_eq!(transport.posts.len(), 1);
    }

    #[test]
    fn failed_send_still_marks_the_fingerprint() {
        let mut session = MemoryStore::new();
        let mut transport = ScriptedTransport::new();
        transport.fail_next();
        transport.respond_with(r#"{"success":true,"leadId":"L-9"}"#);

        let dispatcher = ViewDispatcher::new("https://x.test/view");
        assert!(dispatcher
            .dispatch(&mut session, &mut transport, &payload())
            .is_none());
        // Optimistic marking: no second attempt within the session.
        assert!(dispatcher
            .dispatch(&mut session, &mut transport, &payload())
            .is_none());
        assert_eq!(transport.posts.len(), 1);
    }

    #[test]
    fn distinct_payloads_dispatch_independently() {
        let mut session = MemoryStore::new();
        let mut transport = ScriptedTransport::new();
        transport.respond_with(r#"{"success":true,"leadId":"L-1"}"#);
        transport.respond_with(r#"{"success":true,"leadId":"L-2"}"#);

        let dispatcher = ViewDispatcher::new("https://x.test/view");
        let first = dispatcher.dispatch(&mut session, &mut transport, &payload());
        let second = dispatcher.dispatch(
            &mut session,
            &mut transport,
            &ViewPayload {
                step_id: "upsell".to_string(),
                ..payload()
            },
        );
        assert_eq!(first.as_deref(), Some("L-1"));
        assert_eq!(second.as_deref(), Some("L-2"));
    }

    #[test]
    fn malformed_and_unsuccessful_responses_yield_none() {
        let dispatcher = ViewDispatcher::new("https://x.test/view");
        for raw in ["not json", r#"{"success":false,"leadId":"L-9"}"#, r#"{}"#] {
            let mut session = MemoryStore::new();
            let mut transport = ScriptedTransport::new();
            transport.respond_with(raw);
            assert!(
                dispatcher
                    .dispatch(&mut session, &mut transport, &payload())
                    .is_none(),
                "response {raw:?} should not attribute"
            );
        }
    }
}
