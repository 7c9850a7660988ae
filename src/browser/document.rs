//! Document tree, element factory and mutation observation.

use super::{lock, read, write, AppendChildFn, CreateElementFn, Primitive, SrcGuard};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct Element {
    inner: Arc<ElementInner>,
}

struct ElementInner {
    tag: String,
    src: RwLock<Option<String>>,
    guard: RwLock<Option<SrcGuard>>,
    children: RwLock<Vec<Element>>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ElementInner {
                tag: tag.into(),
                src: RwLock::new(None),
                guard: RwLock::new(None),
                children: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn tag(&self) -> &str { &self.inner.tag }
    pub fn src(&self) -> Option<String> { read(&self.inner.src).clone() }

    /// Assigns the navigation target unless a guard takes it over.
    pub fn set_src(&self, url: &str) {
        let guard = read(&self.inner.guard).clone();
        if let Some(guard) = guard {
            if guard(url) {
                return;
            }
        }
        *write(&self.inner.src) = Some(url.to_string());
    }

    pub fn guard_src(&self, guard: SrcGuard) {
        *write(&self.inner.guard) = Some(guard);
    }

    pub fn is_guarded(&self) -> bool { read(&self.inner.guard).is_some() }

    /// Plain tree edit; does not notify document observers.
    pub fn append_child(&self, child: Element) {
        write(&self.inner.children).push(child);
    }

    pub fn children(&self) -> Vec<Element> { read(&self.inner.children).clone() }

    /// Every navigation target in this subtree, pre-order.
    pub fn sources(&self) -> Vec<String> {
        let mut found = Vec::new();
        self.collect_sources(&mut found);
        found
    }

    fn collect_sources(&self, found: &mut Vec<String>) {
        if let Some(src) = self.src() {
            found.push(src);
        }
        for child in self.children() {
            child.collect_sources(found);
        }
    }

    pub fn same_node(&self, other: &Element) -> bool { Arc::ptr_eq(&self.inner, &other.inner) }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("tag", &self.inner.tag)
            .field("src", &self.src())
            .field("children", &read(&self.inner.children).len())
            .finish()
    }
}

pub struct Document {
    pub element_factory: Primitive<CreateElementFn>,
    pub body_append: Primitive<AppendChildFn>,
    body: Element,
    observers: Mutex<HashMap<u64, mpsc::UnboundedSender<Element>>>,
    next_observer: AtomicU64,
}

impl Document {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Document>| {
            let page = weak.clone();
            let append: AppendChildFn = Arc::new(move |node: Element| {
                if let Some(document) = page.upgrade() {
                    document.insert_into(&document.body, node);
                }
            });
            let factory: CreateElementFn = Arc::new(|tag: &str| Element::new(tag));
            Self {
                element_factory: Primitive::new("document.createElement", factory),
                body_append: Primitive::new("document.body.appendChild", append),
                body: Element::new("body"),
                observers: Mutex::new(HashMap::new()),
                next_observer: AtomicU64::new(1),
            }
        })
    }

    pub fn body(&self) -> &Element { &self.body }

    pub fn create_element(&self, tag: &str) -> Element {
        (self.element_factory.get())(tag)
    }

    pub fn append_to_body(&self, node: Element) {
        (self.body_append.get())(node)
    }

    /// Inserts `node` under `parent` without going through any primitive.
    /// Observers still see the insertion.
    pub fn insert_into(&self, parent: &Element, node: Element) {
        parent.append_child(node.clone());
        lock(&self.observers).retain(|_, observer| observer.send(node.clone()).is_ok());
    }

    /// Starts observing subtree insertions. Inserted nodes arrive on the
    /// returned receiver until the observer is disconnected.
    pub fn observe(self: &Arc<Self>) -> (MutationObserver, mpsc::UnboundedReceiver<Element>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_observer.fetch_add(1, Ordering::Relaxed);
        lock(&self.observers).insert(id, tx);
        (MutationObserver { document: Arc::downgrade(self), id }, rx)
    }

    pub fn observer_count(&self) -> usize { lock(&self.observers).len() }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document").field("body", &self.body).field("observers", &self.observer_count()).finish()
    }
}

#[derive(Clone, Debug)]
pub struct MutationObserver {
    document: Weak<Document>,
    id: u64,
}

impl MutationObserver {
    /// Returns `false` if this observer was already disconnected.
    pub fn disconnect(&self) -> bool {
        self.document
            .upgrade()
            .map_or(false, |document| lock(&document.observers).remove(&self.id).is_some())
    }

    pub fn is_connected(&self) -> bool {
        self.document
            .upgrade()
            .map_or(false, |document| lock(&document.observers).contains_key(&self.id))
    }
}
