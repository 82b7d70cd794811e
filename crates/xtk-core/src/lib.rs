use serde::{Deserialize, Serialize};
use url::Url;

pub mod click;
pub mod cookie;
pub mod params;

/// Query parameter names that carry the lead identifier on every outbound
/// URL. Both are always written together with the same value.
pub const UTM_SOURCE_PARAM: &str = "utm_source";
pub const SCK_PARAM: &str = "sck";

/// Local-store namespace for the persisted lead identifier; the full key is
/// `XTRACKY_LEAD_ID_<token>`.
pub const LEAD_ID_NAMESPACE: &str = "XTRACKY_LEAD_ID";

/// Session-store key holding the JSON array of already-dispatched view
/// fingerprints.
pub const PREVIOUS_VIEWS_KEY: &str = "PREVIOUS_PAGE_VIEW";

/// Cross-domain cookie read by the external checkout.
pub const TRACKING_COOKIE_NAME: &str = "_sirius_track";

/// Attribute marking checkout trigger elements, and the per-element flag set
/// once a click listener has been attached.
pub const CHECKOUT_ATTRIBUTE: &str = "data-xtracky-checkout";
pub const CHECKOUT_LISTENER_FLAG: &str = "xtrackyCheckoutListenerAdded";

pub const DEFAULT_API_ENDPOINT: &str = "https://view.xtracky.dev/api/analytics/view";
pub const DEFAULT_STEP_ID: &str = "initial";

/// Facebook click detection adds the `_fbp` cookie to the dispatched
/// parameter map when present.
pub const FACEBOOK_CLICK_PARAM: &str = "fbclid";
pub const FBP_COOKIE: &str = "_fbp";

/// Static configuration for one page load, read from the embedding script
/// tag at initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub token: String,
    pub step_id: String,
    pub click_id_params: Vec<String>,
    pub api_endpoint: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            step_id: DEFAULT_STEP_ID.to_string(),
            // Kwai, TikTok, Facebook, Google; first match wins.
            click_id_params: vec![
                "click_id".to_string(),
                "ttclid".to_string(),
                "fbclid".to_string(),
                "gclid".to_string(),
            ],
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
        }
    }
}

impl TrackerConfig {
    /// Builds the config from the `data-token` / `data-step-id` script-tag
    /// attributes; absent values fall back to the defaults.
    pub fn from_script_attrs(token: Option<&str>, step_id: Option<&str>) -> Self {
        Self {
            token: token.unwrap_or_default().to_string(),
            step_id: step_id
                .filter(|value| !value.is_empty())
                .unwrap_or(DEFAULT_STEP_ID)
                .to_string(),
            ..Self::default()
        }
    }

    pub fn lead_id_storage_key(&self) -> String {
        format!("{LEAD_ID_NAMESPACE}_{}", self.token)
    }

    /// Derives the checkout endpoint by replacing a trailing `/view` path
    /// segment. Only the suffix is touched so a `view.` host label survives.
    pub fn checkout_endpoint(&self) -> String {
        match self.api_endpoint.strip_suffix("/view") {
            Some(base) => format!("{base}/initiate-checkout"),
            None => self.api_endpoint.clone(),
        }
    }
}

/// Mutable per-page-load attribution state. One instance per page load,
/// threaded explicitly through the components; discarded at unload.
#[derive(Debug, Clone)]
pub struct AttributionState {
    pub token: String,
    pub lead_id: Option<String>,
    pub fingerprint_id: Option<String>,
    pub current_url: Url,
}

impl AttributionState {
    pub fn new(config: &TrackerConfig, current_url: Url) -> Self {
        Self {
            token: config.token.clone(),
            lead_id: None,
            fingerprint_id: None,
            current_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_attrs_default_when_absent() {
        let config = TrackerConfig::from_script_attrs(None, None);
        assert_eq!(config.token, "");
        assert_eq!(config.step_id, "initial");
        assert_eq!(config.api_endpoint, DEFAULT_API_ENDPOINT);
    }

    #[test]
    fn script_attrs_override_defaults() {
        let config = TrackerConfig::from_script_attrs(Some("tok-1"), Some("upsell"));
        assert_eq!(config.token, "tok-1");
        assert_eq!(config.step_id, "upsell");
        assert_eq!(config.lead_id_storage_key(), "XTRACKY_LEAD_ID_tok-1");
    }

    #[test]
    fn checkout_endpoint_replaces_only_trailing_view() {
        let config = TrackerConfig::default();
        assert_eq!(
            config.checkout_endpoint(),
            "https://view.xtracky.dev/api/analytics/initiate-checkout"
        );

        let other = TrackerConfig {
            api_endpoint: "https://view.xtracky.dev/api/analytics/page".to_string(),
            ..TrackerConfig::default()
        };
        assert_eq!(other.checkout_endpoint(), other.api_endpoint);
    }

    #[test]
    fn empty_step_id_falls_back_to_initial() {
        let config = TrackerConfig::from_script_attrs(Some("tok"), Some(""));
        assert_eq!(config.step_id, "initial");
    }
}
