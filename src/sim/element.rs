//! A simulated document node.
//!
//! Load outcomes are scripted: each call to `load_complete()` (or
//! `decode()`) pops the next queued outcome, or stays pending until the
//! test calls [`SimElement::resolve_pending`]. Detaching a node fails its
//! pending completions with [`LoadFailure::Detached`].

use crate::element::{ElementRef, LoadFailure, MediaElementHandle};
use crate::types::{ElementId, Rect};
use futures::channel::oneshot;
use futures::future::{self, FutureExt, LocalBoxFuture};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::rc::{Rc, Weak};

/// One mutation the engine made through the handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    SetAttr(String, String),
    RemoveAttr(String),
    AddClass(String),
    RemoveClass(String),
    Style(String, Option<String>),
}

#[derive(Debug, Default, Clone, Copy)]
struct Calls {
    load: u32,
    decode: u32,
    media_load: u32,
}

type Completion = oneshot::Sender<Result<(), LoadFailure>>;

pub struct SimElement {
    id: ElementId,
    tag: String,
    me: Weak<SimElement>,
    parent: RefCell<Weak<SimElement>>,
    children: RefCell<Vec<Rc<SimElement>>>,
    attrs: RefCell<BTreeMap<String, String>>,
    classes: RefCell<Vec<String>>,
    styles: RefCell<BTreeMap<String, String>>,
    rect: Cell<Option<Rect>>,
    connected: Cell<bool>,
    supports_decode: Cell<bool>,
    hold_animations: Cell<bool>,
    outcomes: RefCell<VecDeque<Result<(), LoadFailure>>>,
    pending: RefCell<Vec<Completion>>,
    animations: RefCell<Vec<(String, oneshot::Sender<()>)>>,
    calls: Cell<Calls>,
    history: RefCell<Vec<Mutation>>,
}

impl SimElement {
    /// A connected, parentless node with no geometry.
    pub fn new(id: u64, tag: &str) -> Rc<Self> {
        Rc::new_cyclic(|me| Self {
            id: ElementId(id),
            tag: tag.to_ascii_lowercase(),
            me: me.clone(),
            parent: RefCell::new(Weak::new()),
            children: RefCell::new(Vec::new()),
            attrs: RefCell::new(BTreeMap::new()),
            classes: RefCell::new(Vec::new()),
            styles: RefCell::new(BTreeMap::new()),
            rect: Cell::new(None),
            connected: Cell::new(true),
            supports_decode: Cell::new(false),
            hold_animations: Cell::new(false),
            outcomes: RefCell::new(VecDeque::new()),
            pending: RefCell::new(Vec::new()),
            animations: RefCell::new(Vec::new()),
            calls: Cell::new(Calls::default()),
            history: RefCell::new(Vec::new()),
        })
    }

    // =========================================================================
    // Builders
    // =========================================================================

    pub fn with_class(self: Rc<Self>, class: &str) -> Rc<Self> {
        for c in class.split_whitespace() {
            if !self.class_present(c) {
                self.classes.borrow_mut().push(c.to_string());
            }
        }
        self
    }

    pub fn with_attr(self: Rc<Self>, name: &str, value: &str) -> Rc<Self> {
        self.attrs
            .borrow_mut()
            .insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_rect(self: Rc<Self>, rect: Rect) -> Rc<Self> {
        self.rect.set(Some(rect));
        self
    }

    /// Queue the outcome of the next completion future.
    pub fn with_outcome(self: Rc<Self>, outcome: Result<(), LoadFailure>) -> Rc<Self> {
        self.outcomes.borrow_mut().push_back(outcome);
        self
    }

    /// Make `decode()` available, as for images on modern platforms.
    pub fn with_decode(self: Rc<Self>) -> Rc<Self> {
        self.supports_decode.set(true);
        self
    }

    /// Keep animations running until [`finish_animation`](Self::finish_animation).
    pub fn hold_animations(self: Rc<Self>) -> Rc<Self> {
        self.hold_animations.set(true);
        self
    }

    pub fn append(parent: &Rc<Self>, child: &Rc<Self>) {
        *child.parent.borrow_mut() = Rc::downgrade(parent);
        child.connected.set(parent.connected.get());
        parent.children.borrow_mut().push(Rc::clone(child));
    }

    // =========================================================================
    // Test controls
    // =========================================================================

    /// Complete every pending load with `outcome`. Returns how many were
    /// still being awaited.
    pub fn resolve_pending(&self, outcome: Result<(), LoadFailure>) -> usize {
        let pending: Vec<Completion> = self.pending.borrow_mut().drain(..).collect();
        pending
            .into_iter()
            .filter_map(|tx| tx.send(outcome.clone()).ok())
            .count()
    }

    /// Fire `animationend` for `name`.
    pub fn finish_animation(&self, name: &str) -> bool {
        let mut fired = false;
        let waiting: Vec<_> = self.animations.borrow_mut().drain(..).collect();
        for (animation, tx) in waiting {
            if animation == name {
                fired |= tx.send(()).is_ok();
            } else {
                self.animations.borrow_mut().push((animation, tx));
            }
        }
        fired
    }

    /// Remove the node (and its subtree) from the document.
    pub fn detach(&self) {
        if let Some(parent) = self.parent.borrow().upgrade() {
            parent.children.borrow_mut().retain(|c| c.id != self.id);
        }
        *self.parent.borrow_mut() = Weak::new();
        self.disconnect();
    }

    fn disconnect(&self) {
        self.connected.set(false);
        self.rect.set(None);
        for tx in self.pending.borrow_mut().drain(..) {
            let _ = tx.send(Err(LoadFailure::Detached));
        }
        for child in self.children.borrow().iter() {
            child.disconnect();
        }
    }

    pub fn set_rect(&self, rect: Option<Rect>) {
        self.rect.set(rect);
    }

    /// Scroll the document down by `dy`: client rects move up.
    pub fn scroll_by(&self, dy: f64) {
        if let Some(rect) = self.rect.get() {
            self.rect.set(Some(rect.translate_y(-dy)));
        }
        for child in self.children.borrow().iter() {
            child.scroll_by(dy);
        }
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn style(&self, property: &str) -> Option<String> {
        self.styles.borrow().get(property).cloned()
    }

    pub fn classes(&self) -> Vec<String> {
        self.classes.borrow().clone()
    }

    pub fn children(&self) -> Vec<Rc<SimElement>> {
        self.children.borrow().clone()
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.history.borrow().clone()
    }

    pub fn load_calls(&self) -> u32 {
        self.calls.get().load
    }

    pub fn decode_calls(&self) -> u32 {
        self.calls.get().decode
    }

    pub fn media_load_calls(&self) -> u32 {
        self.calls.get().media_load
    }

    /// This node and every descendant, in document order.
    pub fn descendants_and_self(self: &Rc<Self>) -> Vec<Rc<SimElement>> {
        let mut out = vec![Rc::clone(self)];
        for child in self.children.borrow().iter() {
            out.extend(child.descendants_and_self());
        }
        out
    }

    // =========================================================================
    // Selectors
    // =========================================================================

    /// Match a selector list of compound selectors: `tag`, `.class`,
    /// `[attr]`, `[attr=value]`, combined without spaces.
    pub fn matches(&self, selector: &str) -> bool {
        selector
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .any(|s| self.matches_compound(s))
    }

    fn matches_compound(&self, selector: &str) -> bool {
        let is_delim = |c: char| c == '.' || c == '[';
        let tag_end = selector.find(is_delim).unwrap_or(selector.len());
        let (tag, mut rest) = selector.split_at(tag_end);
        if !tag.is_empty() && tag != "*" && !tag.eq_ignore_ascii_case(&self.tag) {
            return false;
        }

        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix('.') {
                let end = after.find(is_delim).unwrap_or(after.len());
                if !self.class_present(&after[..end]) {
                    return false;
                }
                rest = &after[end..];
            } else if let Some(after) = rest.strip_prefix('[') {
                let Some(end) = after.find(']') else {
                    return false;
                };
                let attrs = self.attrs.borrow();
                let ok = match after[..end].split_once('=') {
                    Some((name, value)) => attrs
                        .get(name.trim())
                        .is_some_and(|v| v == value.trim().trim_matches('"')),
                    None => attrs.contains_key(after[..end].trim()),
                };
                if !ok {
                    return false;
                }
                rest = &after[end + 1..];
            } else {
                return false;
            }
        }
        true
    }

    fn class_present(&self, class: &str) -> bool {
        self.classes.borrow().iter().any(|c| c == class)
    }

    fn completion(&self) -> LocalBoxFuture<'static, Result<(), LoadFailure>> {
        if !self.connected.get() {
            return future::ready(Err(LoadFailure::Detached)).boxed_local();
        }
        if let Some(outcome) = self.outcomes.borrow_mut().pop_front() {
            return future::ready(outcome).boxed_local();
        }
        let (tx, rx) = oneshot::channel();
        self.pending.borrow_mut().push(tx);
        async move { rx.await.unwrap_or(Err(LoadFailure::Detached)) }.boxed_local()
    }

    fn record(&self, mutation: Mutation) {
        self.history.borrow_mut().push(mutation);
    }

    fn bump(&self, f: impl FnOnce(&mut Calls)) {
        let mut calls = self.calls.get();
        f(&mut calls);
        self.calls.set(calls);
    }

    fn handle(&self) -> Option<ElementRef> {
        self.me.upgrade().map(|rc| rc as ElementRef)
    }
}

impl MediaElementHandle for SimElement {
    fn id(&self) -> ElementId {
        self.id
    }

    fn tag_name(&self) -> String {
        self.tag.clone()
    }

    fn is_connected(&self) -> bool {
        self.connected.get()
    }

    fn bounding_rect(&self) -> Option<Rect> {
        self.rect.get()
    }

    fn attr(&self, name: &str) -> Option<String> {
        self.attrs.borrow().get(name).cloned()
    }

    fn set_attr(&self, name: &str, value: &str) {
        self.attrs
            .borrow_mut()
            .insert(name.to_string(), value.to_string());
        self.record(Mutation::SetAttr(name.to_string(), value.to_string()));
    }

    fn remove_attr(&self, name: &str) {
        if self.attrs.borrow_mut().remove(name).is_some() {
            self.record(Mutation::RemoveAttr(name.to_string()));
        }
    }

    fn has_class(&self, class: &str) -> bool {
        self.class_present(class)
    }

    fn add_class(&self, class: &str) {
        if !self.class_present(class) {
            self.classes.borrow_mut().push(class.to_string());
            self.record(Mutation::AddClass(class.to_string()));
        }
    }

    fn remove_class(&self, class: &str) {
        let before = self.classes.borrow().len();
        self.classes.borrow_mut().retain(|c| c != class);
        if self.classes.borrow().len() != before {
            self.record(Mutation::RemoveClass(class.to_string()));
        }
    }

    fn set_style(&self, property: &str, value: Option<&str>) {
        match value {
            Some(v) => {
                self.styles
                    .borrow_mut()
                    .insert(property.to_string(), v.to_string());
            }
            None => {
                self.styles.borrow_mut().remove(property);
            }
        }
        self.record(Mutation::Style(
            property.to_string(),
            value.map(str::to_string),
        ));
    }

    fn find_all(&self, selector: &str) -> Vec<ElementRef> {
        let mut found = Vec::new();
        for child in self.children.borrow().iter() {
            for node in child.descendants_and_self() {
                if node.matches(selector) {
                    found.push(node as ElementRef);
                }
            }
        }
        found
    }

    fn closest(&self, selector: &str) -> Option<ElementRef> {
        if self.matches(selector) {
            return self.handle();
        }
        let mut current = self.parent.borrow().upgrade();
        while let Some(node) = current {
            if node.matches(selector) {
                return Some(node as ElementRef);
            }
            current = node.parent.borrow().upgrade();
        }
        None
    }

    fn parent(&self) -> Option<ElementRef> {
        self.parent
            .borrow()
            .upgrade()
            .map(|p| p as ElementRef)
    }

    fn decode(&self) -> Option<LocalBoxFuture<'static, Result<(), LoadFailure>>> {
        if !self.supports_decode.get() {
            return None;
        }
        self.bump(|c| c.decode += 1);
        Some(self.completion())
    }

    fn load_complete(&self) -> LocalBoxFuture<'static, Result<(), LoadFailure>> {
        self.bump(|c| c.load += 1);
        self.completion()
    }

    fn media_load(&self) {
        self.bump(|c| c.media_load += 1);
    }

    fn animation_end(&self, name: &str) -> LocalBoxFuture<'static, ()> {
        if !self.hold_animations.get() {
            return future::ready(()).boxed_local();
        }
        let (tx, rx) = oneshot::channel();
        self.animations.borrow_mut().push((name.to_string(), tx));
        async move {
            let _ = rx.await;
        }
        .boxed_local()
    }
}
