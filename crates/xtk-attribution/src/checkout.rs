//! Checkout-initiation dispatch: one shot per page view, guarded by a
//! synchronous flag plus the persisted lead id. Delivery prefers the
//! fire-and-forget beacon channel so the event survives the navigation the
//! click usually triggers.

use serde::Serialize;
use tracing::{debug, warn};

use xtk_core::{TrackerConfig, CHECKOUT_LISTENER_FLAG};
use xtk_host::{KeyValueStore, PageDom, Transport};

use crate::dispatch::VIEW_TIMEOUT;

#[derive(Debug, Serialize)]
struct CheckoutPayload {
    product_id: String,
    utm_source: String,
    href: String,
}

pub struct CheckoutDispatcher {
    token: String,
    endpoint: String,
    lead_id_key: String,
    sent: bool,
}

impl CheckoutDispatcher {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            token: config.token.clone(),
            endpoint: config.checkout_endpoint(),
            lead_id_key: config.lead_id_storage_key(),
            sent: false,
        }
    }

    /// Handles one click on a checkout trigger. The flag flips before any
    /// other work so re-entrant clicks are blocked immediately; it is reset
    /// only when no lead id exists yet, allowing a later click to retry.
    pub fn dispatch(
        &mut self,
        local: &dyn KeyValueStore,
        page: &dyn PageDom,
        transport: &mut dyn Transport,
    ) {
        if self.sent {
            debug!(event = "checkout_already_sent");
            return;
        }
        self.sent = true;

        let Some(lead_id) = self.local_lead_id(local) else {
            warn!(event = "checkout_missing_lead_id");
            self.sent = false;
            return;
        };

        let payload = CheckoutPayload {
            product_id: self.token.clone(),
            utm_source: lead_id,
            href: page.document_url().to_string(),
        };
        let body = match serde_json::to_string(&payload) {
            Ok(body) => body,
            Err(error) => {
                warn!(event = "checkout_encode_failed", error = %error);
                return;
            }
        };

        if transport.send_beacon(&self.endpoint, &body) {
            debug!(event = "checkout_sent", channel = "beacon");
            return;
        }
        // Best-effort fallback; the result is deliberately ignored.
        if let Err(error) = transport.post(&self.endpoint, &body, VIEW_TIMEOUT) {
            warn!(event = "checkout_send_failed", error = %error);
        }
    }

    fn local_lead_id(&self, local: &dyn KeyValueStore) -> Option<String> {
        local
            .get(&self.lead_id_key)
            .filter(|lead_id| !lead_id.is_empty())
    }
}

/// Marks every checkout trigger element once and asks the host to route its
/// clicks to the runtime. Safe to call on every DOM mutation; already-marked
/// elements are never attached twice.
pub fn attach_listeners(page: &mut dyn PageDom) {
    for id in page.checkout_elements() {
        if page.element_flag(id, CHECKOUT_LISTENER_FLAG) {
            continue;
        }
        page.set_element_flag(id, CHECKOUT_LISTENER_FLAG);
        page.attach_click_listener(id);
    }
}
