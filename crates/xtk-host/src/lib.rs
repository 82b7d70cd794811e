//! Capability traits over the hosting environment. The attribution core is
//! sans-IO: real DOM, storage, fetch and beacon bindings live in the
//! embedder; tests and headless embedders use the [`memory`] doubles.
//!
//! The whole model is single-threaded and event-driven (host callbacks
//! arrive sequentially), so mutation goes through plain `&mut self`.

use std::time::Duration;

use thiserror::Error;
use url::Url;
use xtk_core::cookie::SetCookie;

pub mod memory;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("fingerprint resolution failed: {0}")]
    Fingerprint(String),
}

/// Opaque handle to a live DOM element, stable for the element's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u64);

/// String-valued key/value persistence (local or session scoped).
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str);
}

/// Read/write access to the hosting document.
///
/// `anchors`, `frames` and `forms` return resolved absolute target strings
/// in document order; setters address elements by handle. Element flags map
/// to `dataset` entries on the live DOM.
pub trait PageDom {
    fn document_url(&self) -> Url;
    /// Commits `url` without a new history entry and without a reload.
    fn replace_document_url(&mut self, url: &Url);

    fn cookie(&self, name: &str) -> Option<String>;
    fn set_cookie(&mut self, cookie: &SetCookie);

    fn anchors(&self) -> Vec<(NodeId, String)>;
    fn set_anchor_href(&mut self, id: NodeId, href: &str);
    fn frames(&self) -> Vec<(NodeId, String)>;
    fn set_frame_src(&mut self, id: NodeId, src: &str);
    fn forms(&self) -> Vec<(NodeId, String)>;
    fn form_action(&self, id: NodeId) -> Option<String>;
    fn set_form_action(&mut self, id: NodeId, action: &str);
    fn submit_form(&mut self, id: NodeId);

    /// Elements carrying the checkout trigger attribute.
    fn checkout_elements(&self) -> Vec<NodeId>;
    fn element_flag(&self, id: NodeId, name: &str) -> bool;
    fn set_element_flag(&mut self, id: NodeId, name: &str);
    /// Routes future clicks on `id` to the runtime's checkout handler.
    fn attach_click_listener(&mut self, id: NodeId);

    fn is_nested_frame(&self) -> bool;
    fn user_agent(&self) -> String;
    /// Whether the host exposes a native client-side navigation
    /// interception primitive.
    fn supports_navigation_api(&self) -> bool;
}

/// Outbound HTTP. `post` makes exactly one attempt bounded by `timeout`;
/// retries are the caller's non-concern by design. `send_beacon` is the
/// fire-and-forget, survives-unload channel; hosts without one keep the
/// default and callers fall back to `post`.
pub trait Transport {
    fn post(&mut self, url: &str, body: &str, timeout: Duration) -> Result<String, HostError>;

    fn send_beacon(&mut self, _url: &str, _body: &str) -> bool {
        false
    }
}

/// Asynchronously provisioned device fingerprint. Callers go through the
/// runtime's shared memo so resolution happens at most once per page load.
pub trait Fingerprinter {
    fn resolve(&mut self) -> Result<String, HostError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryMode {
    Push,
    Replace,
    Auto,
}

/// Client-side navigation effects issued by the interceptor.
pub trait Navigator {
    /// Real (possibly cross-document) navigation preserving `history`
    /// semantics.
    fn navigate(&mut self, url: &str, history: HistoryMode);
    /// Lightweight same-document history update.
    fn push_state(&mut self, url: &str);
}

/// The full capability set a page load runs against.
pub struct HostBindings {
    pub local: Box<dyn KeyValueStore>,
    pub session: Box<dyn KeyValueStore>,
    pub page: Box<dyn PageDom>,
    pub transport: Box<dyn Transport>,
    pub fingerprinter: Box<dyn Fingerprinter>,
    pub navigator: Box<dyn Navigator>,
}
