//! Host-side values
//!
//! [`HostValue`] is what the rest of the host sees of interpreter values:
//! plain data is copied, functions become callable [`HostFunction`]s, and the
//! two boundary kinds become render nodes and reactive computations.

use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use serde_json::{json, Map, Number, Value as Json};
use xcell_reactive::Calc;

use super::render::RenderNode;
use crate::element::Element;
use crate::error::{BridgeError, VmException};
use crate::sandbox::Handle;

/// A reactive computation that crossed the boundary (`calc(() => ...)`)
pub type HostCalc = Calc<Result<HostValue, BridgeError>>;

type CallFn = dyn Fn(&[HostValue]) -> Result<HostValue, BridgeError>;

/// A host value
#[derive(Clone)]
pub enum HostValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    BigInt(i64),
    String(String),
    /// Milliseconds since the Unix epoch
    Date(f64),
    Error(VmException),
    Array(Vec<HostValue>),
    /// Plain object; key order is preserved
    Object(IndexMap<String, HostValue>),
    Function(HostFunction),
    /// Live host element, exposed to the VM as a proxy
    Element(Element),
    /// Rendered `JSX` output
    Node(RenderNode),
    Computed(HostCalc),
}

impl HostValue {
    /// Build an object from `(key, value)` pairs
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, HostValue)>) -> Self {
        HostValue::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Kind name, as used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            HostValue::Undefined => "undefined",
            HostValue::Null => "null",
            HostValue::Bool(_) => "boolean",
            HostValue::Number(_) => "number",
            HostValue::BigInt(_) => "bigint",
            HostValue::String(_) => "string",
            HostValue::Date(_) => "date",
            HostValue::Error(_) => "error",
            HostValue::Array(_) => "array",
            HostValue::Object(_) => "object",
            HostValue::Function(_) => "function",
            HostValue::Element(_) => "element",
            HostValue::Node(_) => "node",
            HostValue::Computed(_) => "computed",
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            HostValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[HostValue]> {
        match self {
            HostValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, HostValue>> {
        match self {
            HostValue::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&HostFunction> {
        match self {
            HostValue::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Property of an object value
    pub fn get(&self, key: &str) -> Option<&HostValue> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// JSON rendering for display and diagnostics.
    ///
    /// Non-JSON kinds use `$`-prefixed wrapper objects; computed values are
    /// read (and their errors shown) at the time of the call.
    pub fn to_json(&self) -> Json {
        match self {
            HostValue::Undefined | HostValue::Null => Json::Null,
            HostValue::Bool(b) => Json::Bool(*b),
            HostValue::Number(n) => Number::from_f64(*n).map_or(Json::Null, Json::Number),
            HostValue::BigInt(i) => json!(i),
            HostValue::String(s) => Json::String(s.clone()),
            HostValue::Date(ms) => json!({ "$date": ms }),
            HostValue::Error(e) => json!({ "$error": { "name": e.name, "message": e.message } }),
            HostValue::Array(items) => Json::Array(items.iter().map(HostValue::to_json).collect()),
            HostValue::Object(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect::<Map<_, _>>(),
            ),
            HostValue::Function(f) => json!({ "$function": f.name() }),
            HostValue::Element(el) => json!({ "$element": el.tag() }),
            HostValue::Node(node) => node.to_json(),
            HostValue::Computed(calc) => match calc.get() {
                Ok(Ok(value)) => json!({ "$computed": value.to_json() }),
                Ok(Err(err)) => json!({ "$computed": { "$error": err.to_string() } }),
                Err(err) => json!({ "$computed": { "$error": err.to_string() } }),
            },
        }
    }
}

impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HostValue::Undefined, HostValue::Undefined) => true,
            (HostValue::Null, HostValue::Null) => true,
            (HostValue::Bool(a), HostValue::Bool(b)) => a == b,
            (HostValue::Number(a), HostValue::Number(b)) => a == b,
            (HostValue::BigInt(a), HostValue::BigInt(b)) => a == b,
            (HostValue::String(a), HostValue::String(b)) => a == b,
            (HostValue::Date(a), HostValue::Date(b)) => a == b,
            (HostValue::Error(a), HostValue::Error(b)) => a == b,
            (HostValue::Array(a), HostValue::Array(b)) => a == b,
            (HostValue::Object(a), HostValue::Object(b)) => a == b,
            (HostValue::Function(a), HostValue::Function(b)) => a.same_function(b),
            (HostValue::Element(a), HostValue::Element(b)) => a.ptr_eq(b),
            (HostValue::Node(a), HostValue::Node(b)) => a == b,
            (HostValue::Computed(a), HostValue::Computed(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Undefined => f.write_str("Undefined"),
            HostValue::Null => f.write_str("Null"),
            HostValue::Bool(b) => write!(f, "Bool({})", b),
            HostValue::Number(n) => write!(f, "Number({})", n),
            HostValue::BigInt(i) => write!(f, "BigInt({})", i),
            HostValue::String(s) => write!(f, "String({:?})", s),
            HostValue::Date(ms) => write!(f, "Date({})", ms),
            HostValue::Error(e) => write!(f, "Error({})", e),
            HostValue::Array(items) => f.debug_tuple("Array").field(items).finish(),
            HostValue::Object(map) => f.debug_tuple("Object").field(map).finish(),
            HostValue::Function(func) => write!(f, "Function({})", func.name()),
            HostValue::Element(el) => write!(f, "Element(<{}>)", el.tag()),
            HostValue::Node(node) => f.debug_tuple("Node").field(node).finish(),
            HostValue::Computed(calc) => write!(f, "Computed(#{})", calc.id()),
        }
    }
}

impl From<f64> for HostValue {
    fn from(value: f64) -> Self {
        HostValue::Number(value)
    }
}

impl From<i32> for HostValue {
    fn from(value: i32) -> Self {
        HostValue::Number(f64::from(value))
    }
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        HostValue::Bool(value)
    }
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        HostValue::String(value.to_string())
    }
}

impl From<String> for HostValue {
    fn from(value: String) -> Self {
        HostValue::String(value)
    }
}

impl From<Vec<HostValue>> for HostValue {
    fn from(items: Vec<HostValue>) -> Self {
        HostValue::Array(items)
    }
}

impl From<HostFunction> for HostValue {
    fn from(function: HostFunction) -> Self {
        HostValue::Function(function)
    }
}

impl From<Element> for HostValue {
    fn from(element: Element) -> Self {
        HostValue::Element(element)
    }
}

/// A callable host value.
///
/// Functions that came out of the VM remember the handle they wrap, so
/// sending them back yields the original VM function rather than a wrapper.
#[derive(Clone)]
pub struct HostFunction {
    name: String,
    call: Rc<CallFn>,
    origin: Option<Weak<Handle>>,
}

impl HostFunction {
    /// Wrap a host closure
    pub fn new(
        name: impl Into<String>,
        call: impl Fn(&[HostValue]) -> Result<HostValue, BridgeError> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            call: Rc::new(call),
            origin: None,
        }
    }

    pub(crate) fn from_vm(
        name: String,
        call: impl Fn(&[HostValue]) -> Result<HostValue, BridgeError> + 'static,
        origin: Weak<Handle>,
    ) -> Self {
        Self {
            name,
            call: Rc::new(call),
            origin: Some(origin),
        }
    }

    /// Invoke the function
    pub fn call(&self, args: &[HostValue]) -> Result<HostValue, BridgeError> {
        (self.call)(args)
    }

    /// Function name (empty for anonymous functions)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// VM function this wraps, while its tracker keeps it alive
    pub fn origin(&self) -> Option<Rc<Handle>> {
        self.origin.as_ref().and_then(Weak::upgrade)
    }

    /// Whether this came out of the VM
    pub fn is_vm_function(&self) -> bool {
        self.origin.is_some()
    }

    /// Whether both values wrap the same callable: the same VM function
    /// (`===`) when both came out of the VM and are still live, otherwise
    /// the same host closure
    pub fn same_function(&self, other: &HostFunction) -> bool {
        if Rc::ptr_eq(&self.call, &other.call) {
            return true;
        }
        match (self.origin(), other.origin()) {
            (Some(a), Some(b)) => a.same_value(&b).unwrap_or(false),
            _ => false,
        }
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction")
            .field("name", &self.name)
            .field("vm", &self.is_vm_function())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_json_plain_data() {
        let value = HostValue::object([
            ("n", HostValue::from(1.5)),
            ("s", HostValue::from("x")),
            ("list", HostValue::from(vec![HostValue::Null, HostValue::Bool(true)])),
        ]);
        assert_eq!(value.to_json(), json!({ "n": 1.5, "s": "x", "list": [null, true] }));
    }

    #[test]
    fn test_functions_compare_by_identity() {
        let f = HostFunction::new("f", |_| Ok(HostValue::Undefined));
        let g = HostFunction::new("f", |_| Ok(HostValue::Undefined));
        assert_eq!(HostValue::Function(f.clone()), HostValue::Function(f));
        assert_ne!(
            HostValue::Function(g),
            HostValue::Function(HostFunction::new("f", |_| Ok(HostValue::Undefined)))
        );
    }

    #[test]
    fn test_object_preserves_insertion_order() {
        let value = HostValue::object([("b", HostValue::from(1)), ("a", HostValue::from(2))]);
        let keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["b", "a"]);
    }
}
