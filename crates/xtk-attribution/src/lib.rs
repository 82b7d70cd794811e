//! Attribution resolution: detects a platform click id on the current URL,
//! negotiates the lead identifier with the backend exactly once, and keeps
//! URL, link, frame, form, storage and cookie copies of the identifier in
//! sync.
//! First-touch wins: an existing stored lead id is never replaced by a new
//! click.

use tracing::{debug, info, warn};

use xtk_core::{click, params, AttributionState, TrackerConfig, FACEBOOK_CLICK_PARAM, FBP_COOKIE, UTM_SOURCE_PARAM};
use xtk_host::{Fingerprinter, KeyValueStore, PageDom, Transport};

pub mod checkout;
pub mod dispatch;
pub mod propagate;

use dispatch::{ViewDispatcher, ViewPayload};

/// One-shot device-fingerprint resolution shared by every dependent. A
/// failed resolution is memoized too; the page load proceeds without a
/// fingerprint rather than retrying or blocking.
pub struct FingerprintResolver {
    provider: Box<dyn Fingerprinter>,
    resolved: Option<Option<String>>,
}

impl FingerprintResolver {
    pub fn new(provider: Box<dyn Fingerprinter>) -> Self {
        Self {
            provider,
            resolved: None,
        }
    }

    pub fn get(&mut self) -> Option<String> {
        if let Some(value) = &self.resolved {
            return value.clone();
        }
        let value = match self.provider.resolve() {
            Ok(id) => Some(id),
            Err(error) => {
                warn!(event = "fingerprint_failed", error = %error);
                None
            }
        };
        self.resolved = Some(value.clone());
        value
    }
}

/// Outcome of one resolution pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// New click dispatched; the backend assigned a fresh lead id.
    Attributed,
    /// Click present but a stored lead id already existed; first touch wins.
    Reused,
    /// URL already carries the stored lead id; links and cookie refreshed.
    Propagated,
    /// Stored lead id pushed back into a URL that had lost it.
    Restored,
    /// No click, no stored lead id, or the dispatch did not attribute.
    Unattributed,
}

pub struct AttributionEngine {
    config: TrackerConfig,
    dispatcher: ViewDispatcher,
}

impl AttributionEngine {
    pub fn new(config: TrackerConfig) -> Self {
        let dispatcher = ViewDispatcher::new(config.api_endpoint.clone());
        Self { config, dispatcher }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Runs the resolution state machine once. Triggered on DOM ready;
    /// idempotent, so a second run with unchanged inputs only re-sets
    /// identical values.
    pub fn resolve(
        &self,
        state: &mut AttributionState,
        local: &mut dyn KeyValueStore,
        session: &mut dyn KeyValueStore,
        page: &mut dyn PageDom,
        transport: &mut dyn Transport,
        fingerprint: &mut FingerprintResolver,
    ) -> Resolution {
        let url = page.document_url();
        state.current_url = url.clone();
        let url_params = self.url_parameters(page);
        let click_id = click::detect_click_id(&url_params, &self.config.click_id_params)
            .map(str::to_string);
        let storage_key = self.config.lead_id_storage_key();
        let stored = local
            .get(&storage_key)
            .filter(|lead_id| !lead_id.is_empty());

        match (click_id, stored) {
            (Some(_), Some(lead_id)) => {
                // First-touch wins; the fresh click id is never dispatched.
                info!(event = "click_ignored_existing_lead", lead_id = %lead_id);
                state.current_url = propagate::propagate(&lead_id, page);
                state.lead_id = Some(lead_id);
                Resolution::Reused
            }
            (Some(_), None) => {
                let finger_print_id = fingerprint.get();
                state.fingerprint_id = finger_print_id.clone();
                let payload = ViewPayload {
                    step_id: self.config.step_id.clone(),
                    href: url.to_string(),
                    product_id: self.config.token.clone(),
                    finger_print_id,
                    url_params: params::encode_query(&url_params),
                };
                match self.dispatcher.dispatch(session, transport, &payload) {
                    Some(lead_id) => {
                        info!(event = "lead_assigned", lead_id = %lead_id);
                        local.set(&storage_key, &lead_id);
                        state.current_url = propagate::propagate(&lead_id, page);
                        state.lead_id = Some(lead_id);
                        Resolution::Attributed
                    }
                    None => Resolution::Unattributed,
                }
            }
            (None, stored) => {
                let utm_in_url = params::lookup(&url_params, UTM_SOURCE_PARAM)
                    .filter(|value| !value.is_empty());
                match (stored, utm_in_url) {
                    (Some(lead_id), Some(utm)) if utm == lead_id => {
                        debug!(event = "lead_in_url", lead_id = %lead_id);
                        propagate::rewrite_outbound(&lead_id, page);
                        state.lead_id = Some(lead_id);
                        Resolution::Propagated
                    }
                    (Some(lead_id), None) => {
                        info!(event = "lead_restored", lead_id = %lead_id);
                        state.current_url = propagate::propagate(&lead_id, page);
                        state.lead_id = Some(lead_id);
                        Resolution::Restored
                    }
                    _ => {
                        debug!(event = "no_tracking_data");
                        Resolution::Unattributed
                    }
                }
            }
        }
    }

    /// Current query parameters, duplicates collapsed. A Facebook click
    /// additionally carries the `_fbp` cookie when the browser has one.
    fn url_parameters(&self, page: &dyn PageDom) -> Vec<(String, String)> {
        let url = page.document_url();
        let mut url_params = params::dedup_pairs(&params::query_pairs(&url));
        let has_fbclid = params::lookup(&url_params, FACEBOOK_CLICK_PARAM)
            .is_some_and(|value| !value.is_empty());
        if has_fbclid {
            if let Some(fbp) = page.cookie(FBP_COOKIE).filter(|value| !value.is_empty()) {
                params::upsert(&mut url_params, FBP_COOKIE, &fbp);
            }
        }
        url_params
    }
}
