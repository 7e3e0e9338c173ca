use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::rc::Rc;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    HtmlParse(String),
    Runtime(String),
    SelectorNotFound(String),
    UnsupportedSelector(String),
    Pattern(String),
    TypeMismatch {
        selector: String,
        expected: String,
        actual: String,
    },
    AssertionFailed {
        selector: String,
        expected: String,
        actual: String,
        dom_snippet: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HtmlParse(msg) => write!(f, "html parse error: {msg}"),
            Self::Runtime(msg) => write!(f, "runtime error: {msg}"),
            Self::SelectorNotFound(selector) => write!(f, "selector not found: {selector}"),
            Self::UnsupportedSelector(selector) => write!(f, "unsupported selector: {selector}"),
            Self::Pattern(msg) => write!(f, "pattern error: {msg}"),
            Self::TypeMismatch {
                selector,
                expected,
                actual,
            } => write!(
                f,
                "type mismatch for {selector}: expected {expected}, actual {actual}"
            ),
            Self::AssertionFailed {
                selector,
                expected,
                actual,
                dom_snippet,
            } => write!(
                f,
                "assertion failed for {selector}: expected {expected}, actual {actual}, snippet {dom_snippet}"
            ),
        }
    }
}

impl StdError for Error {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
enum NodeType {
    Document,
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    node_type: NodeType,
}

#[derive(Debug, Clone)]
struct Element {
    tag_name: String,
    attrs: HashMap<String, String>,
    value: String,
    disabled: bool,
    readonly: bool,
}

#[derive(Debug, Clone)]
struct Dom {
    nodes: Vec<Node>,
    root: NodeId,
    id_index: HashMap<String, NodeId>,
}

impl Dom {
    fn new() -> Self {
        let root = Node {
            parent: None,
            children: Vec::new(),
            node_type: NodeType::Document,
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
            id_index: HashMap::new(),
        }
    }

    fn create_node(&mut self, parent: Option<NodeId>, node_type: NodeType) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent,
            children: Vec::new(),
            node_type,
        });
        if let Some(parent_id) = parent {
            self.nodes[parent_id.0].children.push(id);
        }
        id
    }

    fn create_element(
        &mut self,
        parent: NodeId,
        tag_name: String,
        attrs: HashMap<String, String>,
    ) -> NodeId {
        let value = attrs.get("value").cloned().unwrap_or_default();
        let disabled = attrs.contains_key("disabled");
        let readonly = attrs.contains_key("readonly");
        let element = Element {
            tag_name,
            attrs,
            value,
            disabled,
            readonly,
        };
        let id = self.create_node(Some(parent), NodeType::Element(element));
        if let Some(id_attr) = self
            .element(id)
            .and_then(|element| element.attrs.get("id").cloned())
        {
            if !id_attr.is_empty() {
                self.id_index.insert(id_attr, id);
            }
        }
        id
    }

    fn create_text(&mut self, parent: NodeId, text: String) -> NodeId {
        self.create_node(Some(parent), NodeType::Text(text))
    }

    fn element(&self, node_id: NodeId) -> Option<&Element> {
        match &self.nodes[node_id.0].node_type {
            NodeType::Element(element) => Some(element),
            _ => None,
        }
    }

    fn element_mut(&mut self, node_id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes[node_id.0].node_type {
            NodeType::Element(element) => Some(element),
            _ => None,
        }
    }

    fn tag_name(&self, node_id: NodeId) -> Option<&str> {
        self.element(node_id).map(|e| e.tag_name.as_str())
    }

    fn parent(&self, node_id: NodeId) -> Option<NodeId> {
        self.nodes[node_id.0].parent
    }

    fn by_id(&self, id: &str) -> Option<NodeId> {
        self.id_index.get(id).copied()
    }

    fn attr(&self, node_id: NodeId, name: &str) -> Option<String> {
        self.element(node_id)
            .and_then(|e| e.attrs.get(name).cloned())
    }

    fn disabled(&self, node_id: NodeId) -> bool {
        self.element(node_id).map(|e| e.disabled).unwrap_or(false)
    }

    fn readonly(&self, node_id: NodeId) -> bool {
        self.element(node_id).map(|e| e.readonly).unwrap_or(false)
    }

    fn find_first_by_tag(&self, tag: &str) -> Option<NodeId> {
        let mut stack = vec![self.root];
        while let Some(node) = stack.pop() {
            if self
                .tag_name(node)
                .map(|t| t.eq_ignore_ascii_case(tag))
                .unwrap_or(false)
            {
                return Some(node);
            }
            for child in self.nodes[node.0].children.iter().rev() {
                stack.push(*child);
            }
        }
        None
    }

    fn text_content(&self, node_id: NodeId) -> String {
        match &self.nodes[node_id.0].node_type {
            NodeType::Document | NodeType::Element(_) => {
                let mut out = String::new();
                for child in &self.nodes[node_id.0].children {
                    out.push_str(&self.text_content(*child));
                }
                out
            }
            NodeType::Text(text) => text.clone(),
        }
    }

    fn set_text_content(&mut self, node_id: NodeId, value: &str) -> Result<()> {
        if self.element(node_id).is_none() {
            return Err(Error::Runtime(
                "set_text target is not an element".into(),
            ));
        }
        self.nodes[node_id.0].children.clear();
        if !value.is_empty() {
            self.create_text(node_id, value.to_string());
        }
        Ok(())
    }

    fn value(&self, node_id: NodeId) -> Result<String> {
        let element = self
            .element(node_id)
            .ok_or_else(|| Error::Runtime("value target is not an element".into()))?;
        if !is_form_control_tag(&element.tag_name) {
            return Err(Error::Runtime("value target is not a form control".into()));
        }
        Ok(element.value.clone())
    }

    fn set_value(&mut self, node_id: NodeId, value: &str) -> Result<()> {
        let element = self
            .element_mut(node_id)
            .ok_or_else(|| Error::Runtime("value target is not an element".into()))?;
        if !is_form_control_tag(&element.tag_name) {
            return Err(Error::Runtime("value target is not a form control".into()));
        }
        element.value = value.to_string();
        Ok(())
    }

    fn style_get(&self, node_id: NodeId, key: &str) -> Result<String> {
        let element = self
            .element(node_id)
            .ok_or_else(|| Error::Runtime("style target is not an element".into()))?;
        let name = js_prop_to_css_name(key);
        let decls = parse_style_declarations(element.attrs.get("style").map(String::as_str));
        Ok(decls
            .iter()
            .find(|(prop, _)| prop == &name)
            .map(|(_, value)| value.clone())
            .unwrap_or_default())
    }

    fn style_set(&mut self, node_id: NodeId, key: &str, value: &str) -> Result<()> {
        let name = js_prop_to_css_name(key);
        let element = self
            .element_mut(node_id)
            .ok_or_else(|| Error::Runtime("style target is not an element".into()))?;

        let mut decls = parse_style_declarations(element.attrs.get("style").map(String::as_str));
        if let Some(pos) = decls.iter().position(|(prop, _)| prop == &name) {
            if value.is_empty() {
                decls.remove(pos);
            } else {
                decls[pos].1 = value.to_string();
            }
        } else if !value.is_empty() {
            decls.push((name, value.to_string()));
        }

        if decls.is_empty() {
            element.attrs.remove("style");
        } else {
            element
                .attrs
                .insert("style".to_string(), serialize_style_declarations(&decls));
        }

        Ok(())
    }

    // Synthesized the way browsers synthesize document.body: bare fragments
    // get wrapped so body-targeting handlers always have a target.
    fn ensure_body(&mut self) {
        if self.find_first_by_tag("body").is_some() {
            return;
        }
        let children = std::mem::take(&mut self.nodes[self.root.0].children);
        let body = self.create_element(self.root, "body".to_string(), HashMap::new());
        for child in &children {
            self.nodes[child.0].parent = Some(body);
        }
        self.nodes[body.0].children = children;
    }

    fn dump_node(&self, node_id: NodeId) -> String {
        match &self.nodes[node_id.0].node_type {
            NodeType::Document => {
                let mut out = String::new();
                for child in &self.nodes[node_id.0].children {
                    out.push_str(&self.dump_node(*child));
                }
                out
            }
            NodeType::Text(text) => text.clone(),
            NodeType::Element(element) => {
                let mut out = String::new();
                out.push('<');
                out.push_str(&element.tag_name);
                let mut keys = element.attrs.keys().collect::<Vec<_>>();
                keys.sort();
                for key in keys {
                    out.push(' ');
                    out.push_str(key);
                    out.push_str("=\"");
                    out.push_str(&element.attrs[key]);
                    out.push('"');
                }
                out.push('>');
                for child in &self.nodes[node_id.0].children {
                    out.push_str(&self.dump_node(*child));
                }
                out.push_str("</");
                out.push_str(&element.tag_name);
                out.push('>');
                out
            }
        }
    }
}

fn is_form_control_tag(tag: &str) -> bool {
    tag.eq_ignore_ascii_case("input")
        || tag.eq_ignore_ascii_case("textarea")
        || tag.eq_ignore_ascii_case("button")
}

#[derive(Debug, Clone)]
pub struct EventState {
    event_type: String,
    target: NodeId,
    current_target: NodeId,
    propagation_stopped: bool,
}

impl EventState {
    fn new(event_type: &str, target: NodeId) -> Self {
        Self {
            event_type: event_type.to_string(),
            target,
            current_target: target,
            propagation_stopped: false,
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn target(&self) -> NodeId {
        self.target
    }

    pub fn current_target(&self) -> NodeId {
        self.current_target
    }

    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }
}

type HandlerFn = dyn FnMut(&mut PageState, &mut EventState) -> Result<()>;

#[derive(Clone)]
struct Handler {
    callback: Rc<RefCell<HandlerFn>>,
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Handler(..)")
    }
}

#[derive(Clone)]
pub struct ListenerHandle {
    node: NodeId,
    event: String,
    callback: Rc<RefCell<HandlerFn>>,
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("node", &self.node)
            .field("event", &self.event)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct ListenerStore {
    map: HashMap<NodeId, HashMap<String, Vec<Handler>>>,
}

impl ListenerStore {
    fn add(&mut self, node_id: NodeId, event: String, handler: Handler) {
        self.map
            .entry(node_id)
            .or_default()
            .entry(event)
            .or_default()
            .push(handler);
    }

    fn remove(&mut self, node_id: NodeId, event: &str, callback: &Rc<RefCell<HandlerFn>>) -> bool {
        let Some(events) = self.map.get_mut(&node_id) else {
            return false;
        };
        let Some(listeners) = events.get_mut(event) else {
            return false;
        };

        if let Some(pos) = listeners
            .iter()
            .position(|listener| Rc::ptr_eq(&listener.callback, callback))
        {
            listeners.remove(pos);
            if listeners.is_empty() {
                events.remove(event);
            }
            if events.is_empty() {
                self.map.remove(&node_id);
            }
            return true;
        }

        false
    }

    fn get(&self, node_id: NodeId, event: &str) -> Vec<Handler> {
        self.map
            .get(&node_id)
            .and_then(|events| events.get(event))
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Debug)]
pub struct PageState {
    dom: Dom,
    now_ms: i64,
    trace: bool,
    trace_to_stderr: bool,
    trace_logs: Vec<String>,
    trace_log_limit: usize,
}

impl PageState {
    pub fn element_by_id(&self, id: &str) -> Result<NodeId> {
        self.dom
            .by_id(id)
            .ok_or_else(|| Error::SelectorNotFound(format!("#{id}")))
    }

    pub fn body(&self) -> Result<NodeId> {
        self.dom
            .find_first_by_tag("body")
            .ok_or_else(|| Error::Runtime("document has no body".into()))
    }

    pub fn text_content(&self, node: NodeId) -> String {
        self.dom.text_content(node)
    }

    pub fn set_text(&mut self, node: NodeId, value: &str) -> Result<()> {
        self.dom.set_text_content(node, value)
    }

    pub fn value(&self, node: NodeId) -> Result<String> {
        self.dom.value(node)
    }

    pub fn style(&self, node: NodeId, prop: &str) -> Result<String> {
        self.dom.style_get(node, prop)
    }

    pub fn set_style(&mut self, node: NodeId, prop: &str, value: &str) -> Result<()> {
        self.dom.style_set(node, prop, value)
    }

    pub fn now_ms(&self) -> i64 {
        self.now_ms
    }

    fn query(&self, selector: &str) -> Result<NodeId> {
        if let Some(id) = selector.strip_prefix('#') {
            if id.is_empty() || !id.chars().all(is_id_char) {
                return Err(Error::UnsupportedSelector(selector.to_string()));
            }
            return self
                .dom
                .by_id(id)
                .ok_or_else(|| Error::SelectorNotFound(selector.to_string()));
        }

        if !selector.is_empty() && selector.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            return self
                .dom
                .find_first_by_tag(&selector.to_ascii_lowercase())
                .ok_or_else(|| Error::SelectorNotFound(selector.to_string()));
        }

        Err(Error::UnsupportedSelector(selector.to_string()))
    }

    fn node_label(&self, node: NodeId) -> String {
        if let Some(id) = self.dom.attr(node, "id") {
            if !id.is_empty() {
                return format!("#{id}");
            }
        }
        self.dom
            .tag_name(node)
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| format!("node-{}", node.0))
    }

    fn trace_line(&mut self, line: String) {
        if !self.trace {
            return;
        }
        if self.trace_to_stderr {
            eprintln!("{line}");
        }
        self.trace_logs.push(line);
        while self.trace_logs.len() > self.trace_log_limit {
            self.trace_logs.remove(0);
        }
    }
}

fn is_id_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '-' || ch == '_'
}

#[derive(Debug)]
pub struct Page {
    state: PageState,
    listeners: ListenerStore,
}

impl Page {
    pub fn from_html(html: &str) -> Result<Self> {
        let mut dom = parse_html(html)?;
        dom.ensure_body();
        Ok(Self {
            state: PageState {
                dom,
                now_ms: 0,
                trace: false,
                trace_to_stderr: true,
                trace_logs: Vec::new(),
                trace_log_limit: 10_000,
            },
            listeners: ListenerStore::default(),
        })
    }

    pub fn enable_trace(&mut self, enabled: bool) {
        self.state.trace = enabled;
    }

    pub fn set_trace_stderr(&mut self, enabled: bool) {
        self.state.trace_to_stderr = enabled;
    }

    pub fn set_trace_log_limit(&mut self, max_entries: usize) -> Result<()> {
        if max_entries == 0 {
            return Err(Error::Runtime(
                "set_trace_log_limit requires at least 1 entry".into(),
            ));
        }
        self.state.trace_log_limit = max_entries;
        while self.state.trace_logs.len() > self.state.trace_log_limit {
            self.state.trace_logs.remove(0);
        }
        Ok(())
    }

    pub fn take_trace_logs(&mut self) -> Vec<String> {
        std::mem::take(&mut self.state.trace_logs)
    }

    pub fn now_ms(&self) -> i64 {
        self.state.now_ms
    }

    pub fn advance_time(&mut self, delta_ms: i64) -> Result<()> {
        if delta_ms < 0 {
            return Err(Error::Runtime(
                "advance_time requires non-negative milliseconds".into(),
            ));
        }
        self.state.now_ms = self.state.now_ms.saturating_add(delta_ms);
        Ok(())
    }

    pub fn set_clock_ms(&mut self, epoch_ms: i64) {
        self.state.now_ms = epoch_ms;
    }

    pub fn element_by_id(&self, id: &str) -> Result<NodeId> {
        self.state.element_by_id(id)
    }

    pub fn add_listener<F>(
        &mut self,
        selector: &str,
        event: &str,
        callback: F,
    ) -> Result<ListenerHandle>
    where
        F: FnMut(&mut PageState, &mut EventState) -> Result<()> + 'static,
    {
        let target = self.select_one(selector)?;
        Ok(self.listen(target, event, callback))
    }

    pub fn remove_listener(&mut self, handle: &ListenerHandle) -> bool {
        self.listeners
            .remove(handle.node, &handle.event, &handle.callback)
    }

    fn listen<F>(&mut self, node: NodeId, event: &str, callback: F) -> ListenerHandle
    where
        F: FnMut(&mut PageState, &mut EventState) -> Result<()> + 'static,
    {
        let callback: Rc<RefCell<HandlerFn>> = Rc::new(RefCell::new(callback));
        self.listeners.add(
            node,
            event.to_string(),
            Handler {
                callback: Rc::clone(&callback),
            },
        );
        ListenerHandle {
            node,
            event: event.to_string(),
            callback,
        }
    }

    pub fn click(&mut self, selector: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        if self.state.dom.disabled(target) {
            return Ok(());
        }
        self.dispatch_event(target, "click")?;
        Ok(())
    }

    pub fn type_text(&mut self, selector: &str, text: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        if self.state.dom.disabled(target) {
            return Ok(());
        }
        if self.state.dom.readonly(target) {
            return Ok(());
        }

        let tag = self
            .state
            .dom
            .tag_name(target)
            .ok_or_else(|| Error::TypeMismatch {
                selector: selector.to_string(),
                expected: "input or textarea".into(),
                actual: "non-element".into(),
            })?
            .to_ascii_lowercase();

        if tag != "input" && tag != "textarea" {
            return Err(Error::TypeMismatch {
                selector: selector.to_string(),
                expected: "input or textarea".into(),
                actual: tag,
            });
        }

        self.state.dom.set_value(target, text)?;
        self.dispatch_event(target, "input")?;
        Ok(())
    }

    pub fn dispatch(&mut self, selector: &str, event: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        self.dispatch_event(target, event)?;
        Ok(())
    }

    pub fn text(&self, selector: &str) -> Result<String> {
        let target = self.select_one(selector)?;
        Ok(self.state.dom.text_content(target))
    }

    pub fn value(&self, selector: &str) -> Result<String> {
        let target = self.select_one(selector)?;
        self.state.dom.value(target)
    }

    pub fn style(&self, selector: &str, prop: &str) -> Result<String> {
        let target = self.select_one(selector)?;
        self.state.dom.style_get(target, prop)
    }

    pub fn body_style(&self, prop: &str) -> Result<String> {
        let body = self.state.body()?;
        self.state.dom.style_get(body, prop)
    }

    pub fn assert_text(&self, selector: &str, expected: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        let actual = self.state.dom.text_content(target);
        if actual != expected {
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: expected.to_string(),
                actual,
                dom_snippet: self.node_snippet(target),
            });
        }
        Ok(())
    }

    pub fn assert_value(&self, selector: &str, expected: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        let actual = self.state.dom.value(target)?;
        if actual != expected {
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: expected.to_string(),
                actual,
                dom_snippet: self.node_snippet(target),
            });
        }
        Ok(())
    }

    pub fn assert_text_matches(&self, selector: &str, pattern: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        let actual = self.state.dom.text_content(target);
        let regex =
            fancy_regex::Regex::new(pattern).map_err(|err| Error::Pattern(err.to_string()))?;
        let matched = regex
            .is_match(&actual)
            .map_err(|err| Error::Pattern(err.to_string()))?;
        if !matched {
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: format!("text matching /{pattern}/"),
                actual,
                dom_snippet: self.node_snippet(target),
            });
        }
        Ok(())
    }

    pub fn assert_exists(&self, selector: &str) -> Result<()> {
        let _ = self.select_one(selector)?;
        Ok(())
    }

    pub fn dump_dom(&self, selector: &str) -> Result<String> {
        let target = self.select_one(selector)?;
        Ok(self.state.dom.dump_node(target))
    }

    fn select_one(&self, selector: &str) -> Result<NodeId> {
        self.state.query(selector)
    }

    fn node_snippet(&self, node_id: NodeId) -> String {
        truncate_chars(&self.state.dom.dump_node(node_id), 200)
    }

    fn dispatch_event(&mut self, target: NodeId, event_type: &str) -> Result<EventState> {
        let mut event = EventState::new(event_type, target);

        let mut path = Vec::new();
        let mut cursor = Some(target);
        while let Some(node) = cursor {
            path.push(node);
            cursor = self.state.dom.parent(node);
        }

        let mut invoked = 0usize;

        // Target phase, then bubble toward the document root.
        for node in &path {
            event.current_target = *node;
            let handlers = self.listeners.get(*node, event_type);
            for handler in handlers {
                invoked += 1;
                (&mut *handler.callback.borrow_mut())(&mut self.state, &mut event)?;
            }
            if event.propagation_stopped {
                self.trace_event_done(&event, invoked, "propagation_stopped");
                return Ok(event);
            }
        }

        self.trace_event_done(&event, invoked, "completed");
        Ok(event)
    }

    fn trace_event_done(&mut self, event: &EventState, invoked: usize, reason: &str) {
        if !self.state.trace {
            return;
        }
        let label = self.state.node_label(event.target);
        self.state.trace_line(format!(
            "[event] {} target={label} listeners={invoked} result={reason}",
            event.event_type
        ));
    }
}

pub const THEME_GRADIENT: &str = "linear-gradient(90deg, #264653, #2a9d8f)";

// Localized label, preserved verbatim.
pub const SUM_LABEL: &str = "결과: ";

// Wires the study-panel widgets to their controls. Bindings are attached in
// source order; the first missing element id aborts with SelectorNotFound and
// leaves the bindings made so far in place.
pub fn install_panel(page: &mut Page) -> Result<()> {
    // Counter: construction-scoped state shared by the two click handlers.
    // The display element is resolved once, up front.
    let count_el = page.element_by_id("count")?;
    let value = Rc::new(Cell::new(0i64));

    let incr_value = Rc::clone(&value);
    let incr = page.element_by_id("incr")?;
    page.listen(incr, "click", move |state, _event| {
        incr_value.set(incr_value.get() + 1);
        state.set_text(count_el, &incr_value.get().to_string())
    });

    let decr_value = Rc::clone(&value);
    let decr = page.element_by_id("decr")?;
    page.listen(decr, "click", move |state, _event| {
        decr_value.set(decr_value.get() - 1);
        state.set_text(count_el, &decr_value.get().to_string())
    });

    // Two-state toggle keyed on exact string equality with the gradient
    // literal. Any third value makes the next click apply the gradient.
    let theme_btn = page.element_by_id("themeBtn")?;
    page.listen(theme_btn, "click", move |state, _event| {
        let body = state.body()?;
        let next = if state.style(body, "background")? == THEME_GRADIENT {
            ""
        } else {
            THEME_GRADIENT
        };
        state.set_style(body, "background", next)
    });

    // The input is read verbatim at click time. No CSS validation, and no
    // coordination with the theme toggle over the shared background.
    let apply_color = page.element_by_id("applyColor")?;
    page.listen(apply_color, "click", move |state, _event| {
        let input = state.element_by_id("colorInput")?;
        let color = state.value(input)?;
        let body = state.body()?;
        state.set_style(body, "background", &color)
    });

    let show_date = page.element_by_id("showDate")?;
    page.listen(show_date, "click", move |state, _event| {
        let out = state.element_by_id("dateOutput")?;
        let stamp = locale_date_time_string(state.now_ms());
        state.set_text(out, &stamp)
    });

    let sum_btn = page.element_by_id("sumBtn")?;
    page.listen(sum_btn, "click", move |state, _event| {
        let a = coerce_number(&state.value(state.element_by_id("a")?)?);
        let b = coerce_number(&state.value(state.element_by_id("b")?)?);
        let out = state.element_by_id("sumOutput")?;
        state.set_text(out, &format!("{SUM_LABEL}{}", js_number_string(a + b)))
    });

    Ok(())
}

// Coercion-with-fallback: blank or unparseable input degrades to zero.
pub fn coerce_number(raw: &str) -> f64 {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    let parsed = trimmed.parse::<f64>().unwrap_or(0.0);
    if parsed.is_nan() { 0.0 } else { parsed }
}

pub fn js_number_string(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        let sign = if value > 0.0 { "Infinity" } else { "-Infinity" };
        return sign.to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }
    if value.fract() == 0.0 && value.abs() < 1e21 {
        return format!("{value:.0}");
    }
    format_float(value)
}

fn format_float(value: f64) -> String {
    let mut out = format!("{:.16}", value);
    while out.contains('.') && out.ends_with('0') {
        out.pop();
    }
    if out.ends_with('.') {
        out.pop();
    }
    out
}

// en-US toLocaleString shape, computed in UTC: M/D/YYYY, h:mm:ss AM.
pub fn locale_date_time_string(epoch_ms: i64) -> String {
    let (year, month, day, hour, minute, second, _millisecond) = date_components_utc(epoch_ms);
    let (hour12, meridiem) = match hour {
        0 => (12, "AM"),
        1..=11 => (hour, "AM"),
        12 => (12, "PM"),
        _ => (hour - 12, "PM"),
    };
    format!("{month}/{day}/{year}, {hour12}:{minute:02}:{second:02} {meridiem}")
}

fn date_components_utc(timestamp_ms: i64) -> (i64, u32, u32, u32, u32, u32, u32) {
    let days = timestamp_ms.div_euclid(86_400_000);
    let rem = timestamp_ms.rem_euclid(86_400_000);
    let hour = (rem / 3_600_000) as u32;
    let minute = ((rem % 3_600_000) / 60_000) as u32;
    let second = ((rem % 60_000) / 1_000) as u32;
    let millisecond = (rem % 1_000) as u32;
    let (year, month, day) = civil_from_days(days);
    (year, month, day, hour, minute, second, millisecond)
}

fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096).div_euclid(365);
    let mut year = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2).div_euclid(153);
    let day = (doy - (153 * mp + 2).div_euclid(5) + 1) as u32;
    let month = (mp + if mp < 10 { 3 } else { -9 }) as u32;
    if month <= 2 {
        year += 1;
    }
    (year, month, day)
}

fn js_prop_to_css_name(prop: &str) -> String {
    let mut out = String::new();
    for ch in prop.chars() {
        if ch.is_ascii_uppercase() {
            out.push('-');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

fn parse_style_declarations(style_attr: Option<&str>) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let Some(style_attr) = style_attr else {
        return out;
    };

    for decl in style_attr.split(';') {
        let decl = decl.trim();
        if decl.is_empty() {
            continue;
        }
        let Some((name, value)) = decl.split_once(':') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() {
            continue;
        }
        let value = value.trim().to_string();
        if let Some(pos) = out.iter().position(|(existing, _)| existing == &name) {
            out[pos].1 = value;
        } else {
            out.push((name, value));
        }
    }

    out
}

fn serialize_style_declarations(decls: &[(String, String)]) -> String {
    let mut out = String::new();
    for (idx, (name, value)) in decls.iter().enumerate() {
        if idx > 0 {
            out.push(' ');
        }
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push(';');
    }
    out
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    let mut it = value.chars();
    let mut out = String::new();
    for _ in 0..max_chars {
        let Some(ch) = it.next() else {
            return out;
        };
        out.push(ch);
    }
    if it.next().is_some() {
        out.push_str("...");
    }
    out
}

fn parse_html(html: &str) -> Result<Dom> {
    let mut dom = Dom::new();

    let mut stack = vec![dom.root];
    let bytes = html.as_bytes();
    let mut i = 0usize;

    while i < bytes.len() {
        if starts_with_at(bytes, i, b"<!--") {
            if let Some(end) = find_subslice(bytes, i + 4, b"-->") {
                i = end + 3;
            } else {
                return Err(Error::HtmlParse("unclosed HTML comment".into()));
            }
            continue;
        }

        if bytes[i] == b'<' {
            if starts_with_at(bytes, i, b"</") {
                let (tag, next) = parse_end_tag(html, i)?;
                i = next;

                while stack.len() > 1 {
                    let top = *stack
                        .last()
                        .ok_or_else(|| Error::HtmlParse("invalid stack state".into()))?;
                    let top_tag = dom.tag_name(top).unwrap_or("");
                    stack.pop();
                    if top_tag.eq_ignore_ascii_case(&tag) {
                        break;
                    }
                }
                continue;
            }

            let (tag, attrs, self_closing, next) = parse_start_tag(html, i)?;
            i = next;

            let parent = *stack
                .last()
                .ok_or_else(|| Error::HtmlParse("missing parent element".into()))?;
            let node = dom.create_element(parent, tag.clone(), attrs);

            // Script bodies are kept as opaque text; nothing executes them.
            if tag.eq_ignore_ascii_case("script") {
                let close = find_case_insensitive_end_tag(bytes, i, b"script")
                    .ok_or_else(|| Error::HtmlParse("unclosed <script>".into()))?;
                if let Some(script_body) = html.get(i..close) {
                    if !script_body.is_empty() {
                        dom.create_text(node, script_body.to_string());
                    }
                }
                i = close;
                let (_, after_end) = parse_end_tag(html, i)?;
                i = after_end;
                continue;
            }

            if !self_closing && !is_void_tag(&tag) {
                stack.push(node);
            }
            continue;
        }

        let text_start = i;
        while i < bytes.len() && bytes[i] != b'<' {
            i += 1;
        }

        if let Some(text) = html.get(text_start..i) {
            if !text.is_empty() {
                let parent = *stack
                    .last()
                    .ok_or_else(|| Error::HtmlParse("missing parent element".into()))?;
                dom.create_text(parent, unescape_entities(text));
            }
        }
    }

    Ok(dom)
}

fn parse_start_tag(
    html: &str,
    at: usize,
) -> Result<(String, HashMap<String, String>, bool, usize)> {
    let bytes = html.as_bytes();
    let mut i = at;
    if bytes.get(i) != Some(&b'<') {
        return Err(Error::HtmlParse("expected '<'".into()));
    }
    i += 1;

    skip_ws(bytes, &mut i);
    let tag_start = i;
    while i < bytes.len() && is_tag_char(bytes[i]) {
        i += 1;
    }

    let tag = html
        .get(tag_start..i)
        .ok_or_else(|| Error::HtmlParse("invalid tag name".into()))?
        .to_ascii_lowercase();

    if tag.is_empty() {
        return Err(Error::HtmlParse("empty tag name".into()));
    }

    let mut attrs = HashMap::new();
    let mut self_closing = false;

    loop {
        skip_ws(bytes, &mut i);
        if i >= bytes.len() {
            return Err(Error::HtmlParse("unclosed start tag".into()));
        }

        if bytes[i] == b'>' {
            i += 1;
            break;
        }

        if bytes[i] == b'/' && i + 1 < bytes.len() && bytes[i + 1] == b'>' {
            self_closing = true;
            i += 2;
            break;
        }

        let name_start = i;
        while i < bytes.len() && is_attr_name_char(bytes[i]) {
            i += 1;
        }

        let name = html
            .get(name_start..i)
            .ok_or_else(|| Error::HtmlParse("invalid attribute name".into()))?
            .to_ascii_lowercase();

        if name.is_empty() {
            return Err(Error::HtmlParse("invalid attribute name".into()));
        }

        skip_ws(bytes, &mut i);

        let value = if i < bytes.len() && bytes[i] == b'=' {
            i += 1;
            skip_ws(bytes, &mut i);
            parse_attr_value(html, bytes, &mut i)?
        } else {
            "true".to_string()
        };

        attrs.insert(name, value);
    }

    Ok((tag, attrs, self_closing, i))
}

fn parse_end_tag(html: &str, at: usize) -> Result<(String, usize)> {
    let bytes = html.as_bytes();
    let mut i = at;

    if !(bytes.get(i) == Some(&b'<') && bytes.get(i + 1) == Some(&b'/')) {
        return Err(Error::HtmlParse("expected end tag".into()));
    }
    i += 2;
    skip_ws(bytes, &mut i);

    let tag_start = i;
    while i < bytes.len() && is_tag_char(bytes[i]) {
        i += 1;
    }

    let tag = html
        .get(tag_start..i)
        .ok_or_else(|| Error::HtmlParse("invalid end tag".into()))?
        .to_ascii_lowercase();

    while i < bytes.len() && bytes[i] != b'>' {
        i += 1;
    }
    if i >= bytes.len() {
        return Err(Error::HtmlParse("unclosed end tag".into()));
    }

    Ok((tag, i + 1))
}

fn parse_attr_value(html: &str, bytes: &[u8], i: &mut usize) -> Result<String> {
    if *i >= bytes.len() {
        return Err(Error::HtmlParse("missing attribute value".into()));
    }

    if bytes[*i] == b'\'' || bytes[*i] == b'"' {
        let quote = bytes[*i];
        *i += 1;
        let start = *i;
        while *i < bytes.len() && bytes[*i] != quote {
            *i += 1;
        }
        if *i >= bytes.len() {
            return Err(Error::HtmlParse("unclosed attribute value".into()));
        }
        let value = html
            .get(start..*i)
            .ok_or_else(|| Error::HtmlParse("invalid attribute value".into()))?
            .to_string();
        *i += 1;
        return Ok(unescape_entities(&value));
    }

    let start = *i;
    while *i < bytes.len() && !bytes[*i].is_ascii_whitespace() && bytes[*i] != b'>' {
        *i += 1;
    }
    let value = html
        .get(start..*i)
        .ok_or_else(|| Error::HtmlParse("invalid attribute value".into()))?
        .to_string();
    Ok(unescape_entities(&value))
}

fn unescape_entities(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let mut rest = src;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        let replaced = [
            ("&amp;", "&"),
            ("&lt;", "<"),
            ("&gt;", ">"),
            ("&quot;", "\""),
            ("&#39;", "'"),
            ("&apos;", "'"),
        ]
        .iter()
        .copied()
        .find(|(entity, _)| rest.starts_with(entity));
        match replaced {
            Some((entity, literal)) => {
                out.push_str(literal);
                rest = &rest[entity.len()..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn starts_with_at(bytes: &[u8], at: usize, needle: &[u8]) -> bool {
    bytes.len() >= at + needle.len() && &bytes[at..at + needle.len()] == needle
}

fn find_subslice(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || bytes.len() < needle.len() {
        return None;
    }
    (from..=bytes.len() - needle.len()).find(|&i| &bytes[i..i + needle.len()] == needle)
}

fn find_case_insensitive_end_tag(bytes: &[u8], from: usize, tag: &[u8]) -> Option<usize> {
    let mut i = from;
    while i + 2 + tag.len() <= bytes.len() {
        if bytes[i] == b'<' && bytes[i + 1] == b'/' {
            let candidate = &bytes[i + 2..i + 2 + tag.len()];
            if candidate.eq_ignore_ascii_case(tag) {
                let after = bytes.get(i + 2 + tag.len()).copied();
                if matches!(after, Some(b'>') | None) || after.is_some_and(|b| b.is_ascii_whitespace()) {
                    return Some(i);
                }
            }
        }
        i += 1;
    }
    None
}

fn skip_ws(bytes: &[u8], i: &mut usize) {
    while *i < bytes.len() && bytes[*i].is_ascii_whitespace() {
        *i += 1;
    }
}

fn is_tag_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-'
}

fn is_attr_name_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b':'
}

fn is_void_tag(tag: &str) -> bool {
    matches!(
        tag,
        "area"
            | "base"
            | "br"
            | "col"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "link"
            | "meta"
            | "param"
            | "source"
            | "track"
            | "wbr"
    )
}
