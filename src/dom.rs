//! Small helpers over kuchiki's mutable DOM.
//!
//! `NodeRef` is reference counted and not `Send`; every caller parses,
//! mutates and serializes inside one synchronous section and hands owned
//! strings across await points.

use kuchiki::traits::TendrilSink;
use kuchiki::{ElementData, NodeDataRef, NodeRef};
use tracing::debug;

pub fn parse(html: &str) -> NodeRef {
    kuchiki::parse_html().one(html)
}

/// All elements matching `selector`, collected up front so callers can
/// detach while iterating. An invalid selector matches nothing.
pub fn select_all(root: &NodeRef, selector: &str) -> Vec<NodeDataRef<ElementData>> {
    match root.select(selector) {
        Ok(matches) => matches.collect(),
        Err(()) => {
            debug!("Ignoring invalid selector: {}", selector);
            Vec::new()
        }
    }
}

pub fn select_first(root: &NodeRef, selector: &str) -> Option<NodeDataRef<ElementData>> {
    root.select_first(selector).ok()
}

pub fn attr(element: &NodeDataRef<ElementData>, name: &str) -> Option<String> {
    element.attributes.borrow().get(name).map(str::to_string)
}

/// Detach every match; returns how many were removed.
pub fn remove_all(root: &NodeRef, selector: &str) -> usize {
    let matches = select_all(root, selector);
    let count = matches.len();
    for element in matches {
        element.as_node().detach();
    }
    count
}

pub fn serialize(root: &NodeRef) -> String {
    root.to_string()
}

/// Serialized children of `<body>`, or the whole tree when there is none.
pub fn body_inner_html(root: &NodeRef) -> String {
    match select_first(root, "body") {
        Some(body) => body
            .as_node()
            .children()
            .map(|child| child.to_string())
            .collect(),
        None => root.to_string(),
    }
}
