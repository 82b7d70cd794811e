//! Page-lifecycle orchestration. One [`Runtime`] exists per page load; the
//! host glue forwards lifecycle events (DOM ready, DOM mutation, storage
//! change, history change, navigation intents, checkout clicks) and applies
//! any returned decisions. All state lives here or in the injected
//! capabilities; nothing is global.

use tracing::debug;

use xtk_attribution::{checkout, checkout::CheckoutDispatcher, propagate};
use xtk_attribution::{AttributionEngine, FingerprintResolver, Resolution};
use xtk_core::{AttributionState, TrackerConfig};
use xtk_host::{HostBindings, KeyValueStore, PageDom};
use xtk_navigation::{NavigateDecision, NavigateIntent, NavigationInterceptor};

/// Embedder switches that are not part of the platform configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeOptions {
    /// Navigation interception ships disabled; embedders opt in per
    /// deployment.
    pub intercept_navigation: bool,
}

pub struct Runtime {
    config: TrackerConfig,
    state: AttributionState,
    engine: AttributionEngine,
    checkout: CheckoutDispatcher,
    interceptor: Option<NavigationInterceptor>,
    fingerprint: FingerprintResolver,
    local: Box<dyn KeyValueStore>,
    session: Box<dyn KeyValueStore>,
    page: Box<dyn PageDom>,
    transport: Box<dyn xtk_host::Transport>,
    navigator: Box<dyn xtk_host::Navigator>,
}

impl Runtime {
    pub fn new(config: TrackerConfig, options: RuntimeOptions, host: HostBindings) -> Self {
        let HostBindings {
            local,
            session,
            page,
            transport,
            fingerprinter,
            navigator,
        } = host;
        let state = AttributionState::new(&config, page.document_url());
        let interceptor = options
            .intercept_navigation
            .then(|| NavigationInterceptor::new(page.as_ref()));
        Self {
            checkout: CheckoutDispatcher::new(&config),
            engine: AttributionEngine::new(config.clone()),
            fingerprint: FingerprintResolver::new(fingerprinter),
            config,
            state,
            interceptor,
            local,
            session,
            page,
            transport,
            navigator,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn state(&self) -> &AttributionState {
        &self.state
    }

    pub fn lead_id(&self) -> Option<&str> {
        self.state.lead_id.as_deref()
    }

    /// DOM ready: run the resolution state machine once and wire up the
    /// checkout triggers present in the initial document.
    pub fn on_dom_ready(&mut self) -> Resolution {
        let resolution = self.engine.resolve(
            &mut self.state,
            self.local.as_mut(),
            self.session.as_mut(),
            self.page.as_mut(),
            self.transport.as_mut(),
            &mut self.fingerprint,
        );
        checkout::attach_listeners(self.page.as_mut());
        resolution
    }

    /// Structural DOM change: newly added anchors/iframes pick up the
    /// stored lead id, and new checkout triggers get their listener. Runs
    /// synchronously within the mutation batch.
    pub fn on_dom_mutated(&mut self) {
        if let Some(lead_id) = self.stored_lead_id() {
            propagate::rewrite_links(&lead_id, self.page.as_mut());
            propagate::rewrite_frames(&lead_id, self.page.as_mut());
        }
        checkout::attach_listeners(self.page.as_mut());
    }

    /// Cross-tab storage event: a lead id written elsewhere refreshes the
    /// cookie here.
    pub fn on_storage_changed(&mut self, key: &str, new_value: Option<&str>) {
        if key != self.config.lead_id_storage_key() {
            return;
        }
        if new_value.map_or(true, str::is_empty) {
            return;
        }
        debug!(event = "lead_storage_changed");
        self.refresh_cookie();
    }

    /// SPA history change (push/replace/popstate): the cookie mirrors the
    /// new URL's UTM context.
    pub fn on_history_changed(&mut self) {
        self.state.current_url = self.page.document_url();
        self.refresh_cookie();
    }

    /// Navigation intent delivered by the host before it commits.
    pub fn on_navigate(&mut self, intent: &NavigateIntent) -> NavigateDecision {
        let Some(interceptor) = self.interceptor.as_mut() else {
            return NavigateDecision::Pass;
        };
        let key = self.config.lead_id_storage_key();
        interceptor.on_navigate(
            intent,
            &key,
            self.local.as_ref(),
            self.page.as_mut(),
            self.navigator.as_mut(),
        )
    }

    /// `window.open` issued from inside a nested frame; `Some` replaces the
    /// call's URL.
    pub fn on_window_open(&mut self, url: &str, target: &str) -> Option<String> {
        self.interceptor
            .as_ref()?
            .on_window_open(url, target, self.page.as_ref())
    }

    /// Click on a checkout trigger element.
    pub fn on_checkout_click(&mut self) {
        self.checkout.dispatch(
            self.local.as_ref(),
            self.page.as_ref(),
            self.transport.as_mut(),
        );
    }

    fn stored_lead_id(&self) -> Option<String> {
        self.local
            .get(&self.config.lead_id_storage_key())
            .filter(|lead_id| !lead_id.is_empty())
    }

    fn refresh_cookie(&mut self) {
        if let Some(lead_id) = self.stored_lead_id() {
            propagate::refresh_cookie(&lead_id, self.page.as_mut());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use url::Url;
    use xtk_host::memory::{
        FixedFingerprinter, MemoryPage, MemoryStore, RecordingNavigator, ScriptedTransport,
    };

    struct World {
        local: Rc<RefCell<MemoryStore>>,
        session: Rc<RefCell<MemoryStore>>,
        page: Rc<RefCell<MemoryPage>>,
        transport: Rc<RefCell<ScriptedTransport>>,
        navigator: Rc<RefCell<RecordingNavigator>>,
    }

    fn world(url: &str) -> (World, HostBindings) {
        let world = World {
            local: Rc::new(RefCell::new(MemoryStore::new())),
            session: Rc::new(RefCell::new(MemoryStore::new())),
            page: Rc::new(RefCell::new(MemoryPage::new(Url::parse(url).unwrap()))),
            transport: Rc::new(RefCell::new(ScriptedTransport::new())),
            navigator: Rc::new(RefCell::new(RecordingNavigator::new())),
        };
        let host = HostBindings {
            local: Box::new(world.local.clone()),
            session: Box::new(world.session.clone()),
            page: Box::new(world.page.clone()),
            transport: Box::new(world.transport.clone()),
            fingerprinter: Box::new(FixedFingerprinter::succeeding("fp-1")),
            navigator: Box::new(world.navigator.clone()),
        };
        (world, host)
    }

    fn config() -> TrackerConfig {
        TrackerConfig::from_script_attrs(Some("tok-1"), None)
    }

    #[test]
    fn dom_ready_attributes_and_wires_checkout() {
        let (world, host) = world("https://site.test/?ttclid=abc123");
        let trigger = world.page.borrow_mut().add_checkout_element();
        world
            .transport
            .borrow_mut()
            .respond_with(r#"{"success":true,"leadId":"L-9"}"#);

        let mut runtime = Runtime::new(config(), RuntimeOptions::default(), host);
        assert_eq!(runtime.on_dom_ready(), Resolution::Attributed);
        assert_eq!(runtime.lead_id(), Some("L-9"));
        assert_eq!(
            world.page.borrow().document_url().as_str(),
            "https://site.test/?ttclid=abc123&utm_source=L-9&sck=L-9"
        );
        assert_eq!(world.page.borrow().click_listeners, vec![trigger]);

        // A later click on the wired trigger dispatches checkout once.
        runtime.on_checkout_click();
        runtime.on_checkout_click();
        assert_eq!(world.transport.borrow().posts.len(), 2); // view + checkout fallback
        let (endpoint, body) = world.transport.borrow().posts[1].clone();
        assert_eq!(
            endpoint,
            "https://view.xtracky.dev/api/analytics/initiate-checkout"
        );
        let body: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["utm_source"], "L-9");
    }

    #[test]
    fn dom_ready_rewrites_initial_frames_and_forms() {
        let (world, host) = world("https://site.test/");
        world
            .local
            .borrow_mut()
            .set("XTRACKY_LEAD_ID_tok-1", "L-9");
        let frame = world.page.borrow_mut().add_frame("https://embed.test/w");
        let form = world.page.borrow_mut().add_form("https://checkout.test/start");

        let mut runtime = Runtime::new(config(), RuntimeOptions::default(), host);
        assert_eq!(runtime.on_dom_ready(), Resolution::Restored);

        let page = world.page.borrow();
        assert_eq!(
            page.frame_src(frame),
            Some("https://embed.test/w?utm_source=L-9&sck=L-9")
        );
        assert_eq!(
            page.current_form_action(form),
            Some("https://checkout.test/start?utm_source=L-9&sck=L-9")
        );
    }

    #[test]
    fn mutation_propagates_to_new_elements() {
        let (world, host) = world("https://site.test/");
        world
            .local
            .borrow_mut()
            .set("XTRACKY_LEAD_ID_tok-1", "L-9");

        let mut runtime = Runtime::new(config(), RuntimeOptions::default(), host);
        runtime.on_dom_ready();

        let anchor = world.page.borrow_mut().add_anchor("https://site.test/late");
        let frame = world.page.borrow_mut().add_frame("https://embed.test/w");
        runtime.on_dom_mutated();

        let page = world.page.borrow();
        assert_eq!(
            page.anchor_href(anchor),
            Some("https://site.test/late?utm_source=L-9&sck=L-9")
        );
        assert_eq!(
            page.frame_src(frame),
            Some("https://embed.test/w?utm_source=L-9&sck=L-9")
        );
    }

    #[test]
    fn mutation_without_lead_changes_nothing() {
        let (world, host) = world("https://site.test/");
        let mut runtime = Runtime::new(config(), RuntimeOptions::default(), host);
        runtime.on_dom_ready();

        let anchor = world.page.borrow_mut().add_anchor("https://site.test/late");
        runtime.on_dom_mutated();
        assert_eq!(
            world.page.borrow().anchor_href(anchor),
            Some("https://site.test/late")
        );
    }

    #[test]
    fn storage_change_rebuilds_cookie_for_matching_key_only() {
        let (world, host) = world("https://shop.example.com/?utm_campaign=spring");
        world
            .local
            .borrow_mut()
            .set("XTRACKY_LEAD_ID_tok-1", "L-9");
        let mut runtime = Runtime::new(config(), RuntimeOptions::default(), host);

        runtime.on_storage_changed("SOMETHING_ELSE", Some("x"));
        assert!(world.page.borrow().set_cookies.is_empty());

        runtime.on_storage_changed("XTRACKY_LEAD_ID_tok-1", None);
        assert!(world.page.borrow().set_cookies.is_empty());

        runtime.on_storage_changed("XTRACKY_LEAD_ID_tok-1", Some("L-9"));
        let page = world.page.borrow();
        assert_eq!(page.set_cookies.len(), 1);
        assert_eq!(
            page.set_cookies[0].value,
            "utm_source=L-9|utm_campaign=spring"
        );
        assert_eq!(page.set_cookies[0].domain, ".example.com");
    }

    #[test]
    fn history_change_resyncs_cookie_from_new_url() {
        let (world, host) = world("https://site.test/?utm_medium=cpc");
        world
            .local
            .borrow_mut()
            .set("XTRACKY_LEAD_ID_tok-1", "L-9");
        let mut runtime = Runtime::new(config(), RuntimeOptions::default(), host);

        runtime.on_history_changed();
        assert_eq!(
            world.page.borrow().set_cookies[0].value,
            "utm_source=L-9|utm_medium=cpc"
        );
        assert_eq!(runtime.state().current_url.as_str(), "https://site.test/?utm_medium=cpc");
    }

    #[test]
    fn navigation_disabled_by_default() {
        let (_world, host) = world("https://site.test/?utm_source=L-9&sck=L-9");
        let mut runtime = Runtime::new(config(), RuntimeOptions::default(), host);
        let decision = runtime.on_navigate(&NavigateIntent {
            destination: "https://site.test/next".to_string(),
            same_document: false,
            history: xtk_host::HistoryMode::Push,
            form: None,
        });
        assert_eq!(decision, NavigateDecision::Pass);
        assert_eq!(runtime.on_window_open("https://x.test/", "_top"), None);
    }

    #[test]
    fn navigation_intercepts_when_opted_in() {
        let (world, host) = world("https://site.test/?utm_source=L-9&sck=L-9");
        world.page.borrow_mut().nested = true;
        let options = RuntimeOptions {
            intercept_navigation: true,
        };
        let mut runtime = Runtime::new(config(), options, host);

        let decision = runtime.on_navigate(&NavigateIntent {
            destination: "https://site.test/next".to_string(),
            same_document: false,
            history: xtk_host::HistoryMode::Push,
            form: None,
        });
        assert_eq!(decision, NavigateDecision::Intercepted);
        assert_eq!(
            world.navigator.borrow().navigations[0].0,
            "https://site.test/next?utm_source=L-9&sck=L-9"
        );
        assert_eq!(
            runtime.on_window_open("https://shop.test/item", "_top"),
            Some("https://shop.test/item?utm_source=L-9&sck=L-9".to_string())
        );
    }

    #[test]
    fn rerunning_resolution_is_idempotent() {
        let (world, host) = world("https://site.test/?page=2");
        world
            .local
            .borrow_mut()
            .set("XTRACKY_LEAD_ID_tok-1", "L-9");
        let mut runtime = Runtime::new(config(), RuntimeOptions::default(), host);

        assert_eq!(runtime.on_dom_ready(), Resolution::Restored);
        let url_after_first = world.page.borrow().document_url();
        let cookie_after_first = world.page.borrow().set_cookies.last().unwrap().value.clone();

        // Second pass now finds the lead id in the URL and only refreshes.
        assert_eq!(runtime.on_dom_ready(), Resolution::Propagated);
        assert_eq!(world.page.borrow().document_url(), url_after_first);
        assert_eq!(
            world.page.borrow().set_cookies.last().unwrap().value,
            cookie_after_first
        );
        assert!(world.transport.borrow().posts.is_empty());
    }
}
