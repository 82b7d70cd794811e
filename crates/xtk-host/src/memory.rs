//! In-memory capability doubles for tests and headless embedders. Every
//! mutation is recorded so assertions can replay what the host was asked to
//! do. `Rc<RefCell<_>>` wrappers implement the traits too, letting a test
//! keep a handle on a double after boxing it into [`HostBindings`].

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use url::Url;
use xtk_core::cookie::SetCookie;

use crate::{Fingerprinter, HistoryMode, HostError, KeyValueStore, Navigator, NodeId, PageDom, Transport};

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(key: &str, value: &str) -> Self {
        let mut store = Self::default();
        store.set(key, value);
        store
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }
}

/// Scriptable document double.
#[derive(Debug)]
pub struct MemoryPage {
    url: Url,
    pub replaced_urls: Vec<Url>,
    readable_cookies: BTreeMap<String, String>,
    pub set_cookies: Vec<SetCookie>,
    anchors: BTreeMap<NodeId, String>,
    frames: BTreeMap<NodeId, String>,
    forms: BTreeMap<NodeId, String>,
    checkout_nodes: Vec<NodeId>,
    flags: BTreeSet<(NodeId, String)>,
    pub click_listeners: Vec<NodeId>,
    pub submitted_forms: Vec<NodeId>,
    pub nested: bool,
    pub user_agent: String,
    pub navigation_api: bool,
    next_id: u64,
}

impl MemoryPage {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            replaced_urls: Vec::new(),
            readable_cookies: BTreeMap::new(),
            set_cookies: Vec::new(),
            anchors: BTreeMap::new(),
            frames: BTreeMap::new(),
            forms: BTreeMap::new(),
            checkout_nodes: Vec::new(),
            flags: BTreeSet::new(),
            click_listeners: Vec::new(),
            submitted_forms: Vec::new(),
            nested: false,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) Chrome/120.0".to_string(),
            navigation_api: true,
            next_id: 1,
        }
    }

    fn next_node(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn add_anchor(&mut self, href: &str) -> NodeId {
        let id = self.next_node();
        self.anchors.insert(id, href.to_string());
        id
    }

    pub fn add_frame(&mut self, src: &str) -> NodeId {
        let id = self.next_node();
        self.frames.insert(id, src.to_string());
        id
    }

    pub fn add_form(&mut self, action: &str) -> NodeId {
        let id = self.next_node();
        self.forms.insert(id, action.to_string());
        id
    }

    pub fn add_checkout_element(&mut self) -> NodeId {
        let id = self.next_node();
        self.checkout_nodes.push(id);
        id
    }

    pub fn set_readable_cookie(&mut self, name: &str, value: &str) {
        self.readable_cookies.insert(name.to_string(), value.to_string());
    }

    pub fn anchor_href(&self, id: NodeId) -> Option<&str> {
        self.anchors.get(&id).map(String::as_str)
    }

    pub fn frame_src(&self, id: NodeId) -> Option<&str> {
        self.frames.get(&id).map(String::as_str)
    }

    pub fn current_form_action(&self, id: NodeId) -> Option<&str> {
        self.forms.get(&id).map(String::as_str)
    }
}

impl PageDom for MemoryPage {
    fn document_url(&self) -> Url {
        self.url.clone()
    }

    fn replace_document_url(&mut self, url: &Url) {
        self.url = url.clone();
        self.replaced_urls.push(url.clone());
    }

    fn cookie(&self, name: &str) -> Option<String> {
        self.readable_cookies.get(name).cloned()
    }

    fn set_cookie(&mut self, cookie: &SetCookie) {
        self.set_cookies.push(cookie.clone());
    }

    fn anchors(&self) -> Vec<(NodeId, String)> {
        self.anchors
            .iter()
            .map(|(id, href)| (*id, href.clone()))
            .collect()
    }

    fn set_anchor_href(&mut self, id: NodeId, href: &str) {
        if let Some(slot) = self.anchors.get_mut(&id) {
            *slot = href.to_string();
        }
    }

    fn frames(&self) -> Vec<(NodeId, String)> {
        self.frames
            .iter()
            .map(|(id, src)| (*id, src.clone()))
            .collect()
    }

    fn set_frame_src(&mut self, id: NodeId, src: &str) {
        if let Some(slot) = self.frames.get_mut(&id) {
            *slot = src.to_string();
        }
    }

    fn forms(&self) -> Vec<(NodeId, String)> {
        self.forms
            .iter()
            .map(|(id, action)| (*id, action.clone()))
            .collect()
    }

    fn form_action(&self, id: NodeId) -> Option<String> {
        self.forms.get(&id).cloned()
    }

    fn set_form_action(&mut self, id: NodeId, action: &str) {
        if let Some(slot) = self.forms.get_mut(&id) {
            *slot = action.to_string();
        }
    }

    fn submit_form(&mut self, id: NodeId) {
        self.submitted_forms.push(id);
    }

    fn checkout_elements(&self) -> Vec<NodeId> {
        self.checkout_nodes.clone()
    }

    fn element_flag(&self, id: NodeId, name: &str) -> bool {
        self.flags.contains(&(id, name.to_string()))
    }

    fn set_element_flag(&mut self, id: NodeId, name: &str) {
        self.flags.insert((id, name.to_string()));
    }

    fn attach_click_listener(&mut self, id: NodeId) {
        self.click_listeners.push(id);
    }

    fn is_nested_frame(&self) -> bool {
        self.nested
    }

    fn user_agent(&self) -> String {
        self.user_agent.clone()
    }

    fn supports_navigation_api(&self) -> bool {
        self.navigation_api
    }
}

/// Transport double with a queue of scripted responses.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    responses: VecDeque<Result<String, HostError>>,
    pub posts: Vec<(String, String)>,
    pub beacons: Vec<(String, String)>,
    pub beacon_supported: bool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond_with(&mut self, raw: &str) {
        self.responses.push_back(Ok(raw.to_string()));
    }

    pub fn fail_next(&mut self) {
        self.responses
            .push_back(Err(HostError::Transport("scripted failure".to_string())));
    }
}

impl Transport for ScriptedTransport {
    fn post(&mut self, url: &str, body: &str, _timeout: Duration) -> Result<String, HostError> {
        self.posts.push((url.to_string(), body.to_string()));
        self.responses
            .pop_front()
            .unwrap_or_else(|| Err(HostError::Transport("no scripted response".to_string())))
    }

    fn send_beacon(&mut self, url: &str, body: &str) -> bool {
        if !self.beacon_supported {
            return false;
        }
        self.beacons.push((url.to_string(), body.to_string()));
        true
    }
}

#[derive(Debug, Default)]
pub struct FixedFingerprinter {
    value: Option<String>,
    pub calls: u32,
}

impl FixedFingerprinter {
    pub fn succeeding(id: &str) -> Self {
        Self {
            value: Some(id.to_string()),
            calls: 0,
        }
    }

    pub fn failing() -> Self {
        Self::default()
    }
}

impl Fingerprinter for FixedFingerprinter {
    fn resolve(&mut self) -> Result<String, HostError> {
        self.calls += 1;
        self.value
            .clone()
            .ok_or_else(|| HostError::Fingerprint("no device id available".to_string()))
    }
}

#[derive(Debug, Default)]
pub struct RecordingNavigator {
    pub navigations: Vec<(String, HistoryMode)>,
    pub pushes: Vec<String>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&mut self, url: &str, history: HistoryMode) {
        self.navigations.push((url.to_string(), history));
    }

    fn push_state(&mut self, url: &str) {
        self.pushes.push(url.to_string());
    }
}

impl<T: KeyValueStore> KeyValueStore for Rc<RefCell<T>> {
    fn get(&self, key: &str) -> Option<String> {
        self.borrow().get(key)
    }

    fn set(&mut self, key: &str, value: &str) {
        self.borrow_mut().set(key, value);
    }
}

impl<T: Transport> Transport for Rc<RefCell<T>> {
    fn post(&mut self, url: &str, body: &str, timeout: Duration) -> Result<String, HostError> {
        self.borrow_mut().post(url, body, timeout)
    }

    fn send_beacon(&mut self, url: &str, body: &str) -> bool {
        self.borrow_mut().send_beacon(url, body)
    }
}

impl<T: Fingerprinter> Fingerprinter for Rc<RefCell<T>> {
    fn resolve(&mut self) -> Result<String, HostError> {
        self.borrow_mut().resolve()
    }
}

impl<T: Navigator> Navigator for Rc<RefCell<T>> {
    fn navigate(&mut self, url: &str, history: HistoryMode) {
        self.borrow_mut().navigate(url, history);
    }

    fn push_state(&mut self, url: &str) {
        self.borrow_mut().push_state(url);
    }
}

impl<T: PageDom> PageDom for Rc<RefCell<T>> {
    fn document_url(&self) -> Url {
        self.borrow().document_url()
    }

    fn replace_document_url(&mut self, url: &Url) {
        self.borrow_mut().replace_document_url(url);
    }

    fn cookie(&self, name: &str) -> Option<String> {
        self.borrow().cookie(name)
    }

    fn set_cookie(&mut self, cookie: &SetCookie) {
        self.borrow_mut().set_cookie(cookie);
    }

    fn anchors(&self) -> Vec<(NodeId, String)> {
        self.borrow().anchors()
    }

    fn set_anchor_href(&mut self, id: NodeId, href: &str) {
        self.borrow_mut().set_anchor_href(id, href);
    }

    fn frames(&self) -> Vec<(NodeId, String)> {
        self.borrow().frames()
    }

    fn set_frame_src(&mut self, id: NodeId, src: &str) {
        self.borrow_mut().set_frame_src(id, src);
    }

    fn forms(&self) -> Vec<(NodeId, String)> {
        self.borrow().forms()
    }

    fn form_action(&self, id: NodeId) -> Option<String> {
        self.borrow().form_action(id)
    }

    fn set_form_action(&mut self, id: NodeId, action: &str) {
        self.borrow_mut().set_form_action(id, action);
    }

    fn submit_form(&mut self, id: NodeId) {
        self.borrow_mut().submit_form(id);
    }

    fn checkout_elements(&self) -> Vec<NodeId> {
        self.borrow().checkout_elements()
    }

    fn element_flag(&self, id: NodeId, name: &str) -> bool {
        self.borrow().element_flag(id, name)
    }

    fn set_element_flag(&mut self, id: NodeId, name: &str) {
        self.borrow_mut().set_element_flag(id, name);
    }

    fn attach_click_listener(&mut self, id: NodeId) {
        self.borrow_mut().attach_click_listener(id);
    }

    fn is_nested_frame(&self) -> bool {
        self.borrow().is_nested_frame()
    }

    fn user_agent(&self) -> String {
        self.borrow().user_agent()
    }

    fn supports_navigation_api(&self) -> bool {
        self.borrow().supports_navigation_api()
    }
}
