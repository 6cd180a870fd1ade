//! Rendering of `JSX` boundary values
//!
//! When a tagged element or fragment crosses into the host, its parts are
//! converted first and then handed to the sandbox's [`Renderer`]. The default
//! [`NodeRenderer`] builds a plain [`RenderNode`] tree and expands component
//! functions by calling them with their props.

use indexmap::IndexMap;
use serde_json::{json, Value as Json};

use super::value::{HostFunction, HostValue};
use crate::error::BridgeError;

/// `type` of a rendered element
#[derive(Debug, Clone)]
pub enum ElementType {
    /// Tag name, e.g. `"div"`
    Intrinsic(String),
    /// Component function, called with its props
    Component(HostFunction),
}

/// Builds host values from `JSX` output
pub trait Renderer {
    /// Render `JSX.createElement(element_type, props, ...children)`
    fn element(
        &self,
        element_type: ElementType,
        props: IndexMap<String, HostValue>,
        children: Vec<HostValue>,
    ) -> Result<HostValue, BridgeError>;

    /// Render `JSX.Fragment({ children })`
    fn fragment(&self, children: Vec<HostValue>) -> Result<HostValue, BridgeError>;
}

/// Rendered `JSX` tree
#[derive(Debug, Clone, PartialEq)]
pub enum RenderNode {
    /// Intrinsic element
    Element {
        tag: String,
        props: IndexMap<String, HostValue>,
        children: Vec<HostValue>,
    },
    /// Fragment
    Fragment { children: Vec<HostValue> },
}

impl RenderNode {
    /// Tag name (`None` for fragments)
    pub fn tag(&self) -> Option<&str> {
        match self {
            RenderNode::Element { tag, .. } => Some(tag),
            RenderNode::Fragment { .. } => None,
        }
    }

    pub fn children(&self) -> &[HostValue] {
        match self {
            RenderNode::Element { children, .. } | RenderNode::Fragment { children } => children,
        }
    }

    /// Concatenated text of all string and number descendants
    pub fn text_content(&self) -> String {
        let mut text = String::new();
        collect_text(self.children(), &mut text);
        text
    }

    pub fn to_json(&self) -> Json {
        match self {
            RenderNode::Element { tag, props, children } => json!({
                "$node": tag,
                "props": HostValue::Object(props.clone()).to_json(),
                "children": children.iter().map(HostValue::to_json).collect::<Vec<_>>(),
            }),
            RenderNode::Fragment { children } => json!({
                "$fragment": children.iter().map(HostValue::to_json).collect::<Vec<_>>(),
            }),
        }
    }
}

fn collect_text(children: &[HostValue], out: &mut String) {
    for child in children {
        match child {
            HostValue::String(s) => out.push_str(s),
            HostValue::Number(n) => out.push_str(&n.to_string()),
            HostValue::Node(node) => collect_text(node.children(), out),
            HostValue::Array(items) => collect_text(items, out),
            _ => {}
        }
    }
}

/// Default renderer: plain [`RenderNode`] trees
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeRenderer;

impl Renderer for NodeRenderer {
    fn element(
        &self,
        element_type: ElementType,
        mut props: IndexMap<String, HostValue>,
        children: Vec<HostValue>,
    ) -> Result<HostValue, BridgeError> {
        match element_type {
            ElementType::Intrinsic(tag) => Ok(HostValue::Node(RenderNode::Element { tag, props, children })),
            ElementType::Component(component) => {
                props.insert("children".to_string(), HostValue::Array(children));
                component.call(&[HostValue::Object(props)])
            }
        }
    }

    fn fragment(&self, children: Vec<HostValue>) -> Result<HostValue, BridgeError> {
        Ok(HostValue::Node(RenderNode::Fragment { children }))
    }
}
