//! Value bridge
//!
//! Recursive conversion between interpreter handles and [`HostValue`]s.
//!
//! Both directions take a [`GarbageDisposal`] sink. Anything a conversion
//! creates that must outlive the call (the VM function behind a
//! [`HostFunction`], the retained function of a computed value, element
//! proxies) is registered there; every other handle created along the way is
//! released before the conversion returns. Closures that end up stored inside
//! the VM hold the sink weakly, so a dropped sink does not stay alive through
//! the interpreter heap.

pub mod render;
mod value;

pub use render::{ElementType, NodeRenderer, RenderNode, Renderer};
pub use value::{HostCalc, HostFunction, HostValue};

use std::rc::Rc;

use indexmap::IndexMap;
use tracing::trace;
use xcell_reactive::Calc;

use crate::disposal::{GarbageDisposal, WeakDisposal};
use crate::element::Element;
use crate::error::{BridgeError, SandboxError, VmException};
use crate::sandbox::{BoundaryKind, Handle, HostCallback, Sandbox, SimpleProxyHandler, VmType};

/// Nesting limit for recursive conversion
pub const MAX_DEPTH: usize = 64;

/// Stack recorded on VM errors built from host errors without one
pub const HOST_STACK_UNKNOWN: &str = "<host stack unknown>";

/// Convert a VM value into a host value
pub fn vm_to_host(sandbox: &Sandbox, handle: &Handle, sink: &GarbageDisposal) -> Result<HostValue, BridgeError> {
    to_host(sandbox, handle, sink, 0)
}

/// Convert a host value into a new owned VM handle
pub fn host_to_vm(sandbox: &Sandbox, value: &HostValue, sink: &GarbageDisposal) -> Result<Handle, BridgeError> {
    to_vm(sandbox, value, sink, 0)
}

// ============================================================================
// VM -> host
// ============================================================================

fn to_host(sandbox: &Sandbox, handle: &Handle, sink: &GarbageDisposal, depth: usize) -> Result<HostValue, BridgeError> {
    if depth > MAX_DEPTH {
        return Err(BridgeError::TooDeep(MAX_DEPTH));
    }

    if let Some(kind) = sandbox.boundary_kind(handle)? {
        trace!(target: "xcell::bridge", ?kind, "vm -> host boundary value");
        return match kind {
            BoundaryKind::Element => render_element(sandbox, handle, sink, depth),
            BoundaryKind::Fragment => render_fragment(sandbox, handle, sink, depth),
            BoundaryKind::Calc => computed_to_host(sandbox, handle, sink),
        };
    }

    let vm_type = sandbox.type_of(handle)?;
    trace!(target: "xcell::bridge", kind = vm_type.name(), "vm -> host");
    Ok(match vm_type {
        VmType::BigInt => HostValue::BigInt(sandbox.as_bigint(handle)?),
        VmType::Number => HostValue::Number(sandbox.as_number(handle)?),
        VmType::String => HostValue::String(sandbox.as_string(handle)?),
        VmType::Symbol => {
            return Err(BridgeError::Unsupported {
                kind: "symbol".to_string(),
            })
        }
        VmType::Undefined => HostValue::Undefined,
        VmType::Boolean => HostValue::Bool(sandbox.as_bool(handle)?),
        VmType::Null => HostValue::Null,
        VmType::Function => HostValue::Function(function_to_host(sandbox, handle, sink)?),
        VmType::Object => {
            if sandbox.is_array(handle)? {
                HostValue::Array(array_to_host(sandbox, handle, sink, depth)?)
            } else if sandbox.is_date(handle)? {
                HostValue::Date(sandbox.date_value(handle)?)
            } else if sandbox.is_error(handle)? {
                HostValue::Error(sandbox.error_parts(handle)?)
            } else {
                HostValue::Object(object_to_host(sandbox, handle, sink, depth)?)
            }
        }
    })
}

fn array_to_host(
    sandbox: &Sandbox,
    handle: &Handle,
    sink: &GarbageDisposal,
    depth: usize,
) -> Result<Vec<HostValue>, BridgeError> {
    let len = sandbox.array_len(handle)?;
    let mut items = Vec::with_capacity(len);
    for index in 0..len {
        let item = sandbox.get_prop(handle, index)?;
        items.push(to_host(sandbox, &item, sink, depth + 1)?);
    }
    Ok(items)
}

fn object_to_host(
    sandbox: &Sandbox,
    handle: &Handle,
    sink: &GarbageDisposal,
    depth: usize,
) -> Result<IndexMap<String, HostValue>, BridgeError> {
    let mut map = IndexMap::new();
    for key in sandbox.own_keys(handle)? {
        let value = sandbox.get_prop(handle, key.as_str())?;
        let value = to_host(sandbox, &value, sink, depth + 1)?;
        map.insert(key, value);
    }
    Ok(map)
}

fn function_to_host(sandbox: &Sandbox, handle: &Handle, sink: &GarbageDisposal) -> Result<HostFunction, BridgeError> {
    let name = {
        let name = sandbox.get_prop(handle, "name")?;
        match sandbox.type_of(&name)? {
            VmType::String => sandbox.as_string(&name)?,
            _ => String::new(),
        }
    };

    let origin = Rc::new(handle.dup()?);
    sink.manage(Rc::clone(&origin));

    let weak_origin = Rc::downgrade(&origin);
    let weak_sandbox = sandbox.downgrade();
    let weak_sink = sink.downgrade();
    let call = move |args: &[HostValue]| -> Result<HostValue, BridgeError> {
        let sandbox = weak_sandbox.upgrade().ok_or(SandboxError::Disposed)?;
        let function = weak_origin.upgrade().ok_or(BridgeError::Released)?;
        let sink = weak_sink.upgrade_or_transient();

        let mut vm_args = Vec::with_capacity(args.len());
        for arg in args {
            vm_args.push(host_to_vm(&sandbox, arg, &sink)?);
        }
        let this = sandbox.undefined()?;
        let result = sandbox.call(&function, &this, &vm_args)?;
        drop(vm_args);
        vm_to_host(&sandbox, &result, &sink)
    };
    Ok(HostFunction::from_vm(name, call, Rc::downgrade(&origin)))
}

fn computed_to_host(sandbox: &Sandbox, handle: &Handle, sink: &GarbageDisposal) -> Result<HostValue, BridgeError> {
    let function = Rc::new(sandbox.get_prop(handle, "fn")?);
    sink.manage(Rc::clone(&function));

    let weak_function = Rc::downgrade(&function);
    let weak_sandbox = sandbox.downgrade();
    let weak_sink = sink.downgrade();
    let calc: HostCalc = Calc::new(move || -> Result<HostValue, BridgeError> {
        let sandbox = weak_sandbox.upgrade().ok_or(SandboxError::Disposed)?;
        let function = weak_function.upgrade().ok_or(BridgeError::Released)?;
        let sink = weak_sink.upgrade_or_transient();
        let this = sandbox.undefined()?;
        let result = sandbox.call(&function, &this, &[])?;
        vm_to_host(&sandbox, &result, &sink)
    });
    Ok(HostValue::Computed(calc))
}

fn render_element(sandbox: &Sandbox, handle: &Handle, sink: &GarbageDisposal, depth: usize) -> Result<HostValue, BridgeError> {
    let element_type = {
        let value = sandbox.get_prop(handle, "type")?;
        match to_host(sandbox, &value, sink, depth + 1)? {
            HostValue::String(tag) => ElementType::Intrinsic(tag),
            HostValue::Function(component) => ElementType::Component(component),
            other => {
                return Err(BridgeError::Unsupported {
                    kind: format!("element type {}", other.kind()),
                })
            }
        }
    };
    let props = {
        let value = sandbox.get_prop(handle, "props")?;
        match to_host(sandbox, &value, sink, depth + 1)? {
            HostValue::Object(map) => map,
            HostValue::Null | HostValue::Undefined => IndexMap::new(),
            other => {
                return Err(BridgeError::Unsupported {
                    kind: format!("element props {}", other.kind()),
                })
            }
        }
    };
    let children = render_children(sandbox, handle, sink, depth)?;
    sandbox.renderer().element(element_type, props, children)
}

fn render_fragment(sandbox: &Sandbox, handle: &Handle, sink: &GarbageDisposal, depth: usize) -> Result<HostValue, BridgeError> {
    let children = render_children(sandbox, handle, sink, depth)?;
    sandbox.renderer().fragment(children)
}

fn render_children(
    sandbox: &Sandbox,
    handle: &Handle,
    sink: &GarbageDisposal,
    depth: usize,
) -> Result<Vec<HostValue>, BridgeError> {
    let children = sandbox.get_prop(handle, "children")?;
    match to_host(sandbox, &children, sink, depth + 1)? {
        HostValue::Array(items) => Ok(items),
        HostValue::Null | HostValue::Undefined => Ok(Vec::new()),
        single => Ok(vec![single]),
    }
}

// ============================================================================
// Host -> VM
// ============================================================================

fn to_vm(sandbox: &Sandbox, value: &HostValue, sink: &GarbageDisposal, depth: usize) -> Result<Handle, BridgeError> {
    if depth > MAX_DEPTH {
        return Err(BridgeError::TooDeep(MAX_DEPTH));
    }
    trace!(target: "xcell::bridge", kind = value.kind(), "host -> vm");

    Ok(match value {
        HostValue::Error(error) => sandbox.new_error(
            &error.name,
            &error.message,
            error.stack.as_deref().unwrap_or(HOST_STACK_UNKNOWN),
        )?,
        HostValue::Undefined => sandbox.undefined()?,
        HostValue::Null => sandbox.null()?,
        HostValue::Bool(b) => sandbox.boolean(*b)?,
        HostValue::Number(n) => sandbox.number(*n)?,
        HostValue::BigInt(i) => sandbox.bigint(*i)?,
        HostValue::String(s) => sandbox.string(s)?,
        HostValue::Date(millis) => sandbox.new_date(*millis)?,
        HostValue::Array(items) => array_to_vm(sandbox, items, sink, depth)?,
        HostValue::Object(map) => object_to_vm(sandbox, map, sink, depth)?,
        HostValue::Element(element) => element_to_vm(sandbox, element, sink)?,
        HostValue::Function(function) => function_to_vm(sandbox, function, sink)?,
        HostValue::Node(node) => node_to_vm(sandbox, node, sink, depth)?,
        HostValue::Computed(calc) => computed_to_vm(sandbox, calc, sink)?,
    })
}

fn array_to_vm(sandbox: &Sandbox, items: &[HostValue], sink: &GarbageDisposal, depth: usize) -> Result<Handle, BridgeError> {
    let array = sandbox.new_array()?;
    for (index, item) in items.iter().enumerate() {
        let item = to_vm(sandbox, item, sink, depth + 1)?;
        sandbox.set_prop(&array, index, &item)?;
    }
    Ok(array)
}

fn object_to_vm(
    sandbox: &Sandbox,
    map: &IndexMap<String, HostValue>,
    sink: &GarbageDisposal,
    depth: usize,
) -> Result<Handle, BridgeError> {
    let object = sandbox.new_object()?;
    for (key, value) in map {
        let value = to_vm(sandbox, value, sink, depth + 1)?;
        sandbox.set_prop(&object, key.as_str(), &value)?;
    }
    Ok(object)
}

fn function_to_vm(sandbox: &Sandbox, function: &HostFunction, sink: &GarbageDisposal) -> Result<Handle, BridgeError> {
    if let Some(origin) = function.origin() {
        if sandbox.owns(&origin) {
            return Ok(origin.dup()?);
        }
    }

    let name = function.name().to_string();
    let function = function.clone();
    let weak_sink = sink.downgrade();
    let callback: HostCallback = Rc::new(move |sandbox: &Sandbox, args: Vec<Handle>| {
        let sink = weak_sink.upgrade_or_transient();
        call_host(sandbox, &function, args, &sink).map_err(BridgeError::into_exception)
    });
    Ok(sandbox.new_function(&name, callback)?)
}

fn call_host(
    sandbox: &Sandbox,
    function: &HostFunction,
    args: Vec<Handle>,
    sink: &GarbageDisposal,
) -> Result<Handle, BridgeError> {
    let mut host_args = Vec::with_capacity(args.len());
    for arg in &args {
        host_args.push(vm_to_host(sandbox, arg, sink)?);
    }
    drop(args);
    let result = function.call(&host_args)?;
    host_to_vm(sandbox, &result, sink)
}

fn element_to_vm(sandbox: &Sandbox, element: &Element, sink: &GarbageDisposal) -> Result<Handle, BridgeError> {
    let handler = element_proxy_handler(element, sink.downgrade());
    let proxy = sandbox.make_simple_proxy(handler)?;
    let handle = proxy.handle().dup()?;
    sink.manage(proxy);
    Ok(handle)
}

/// Proxy traps forwarding to the live element's properties; `tagName` is a
/// read-only pseudo-property.
fn element_proxy_handler(element: &Element, sink: WeakDisposal) -> SimpleProxyHandler {
    const TAG_NAME: &str = "tagName";

    let get = {
        let (element, sink) = (element.clone(), sink.clone());
        move |sandbox: &Sandbox, key: &str| -> Result<Handle, VmException> {
            let sink = sink.upgrade_or_transient();
            let value = if key == TAG_NAME {
                Some(HostValue::String(element.tag().to_string()))
            } else {
                element.property(key)
            };
            let converted = match value {
                Some(value) => host_to_vm(sandbox, &value, &sink),
                None => sandbox.undefined().map_err(BridgeError::from),
            };
            converted.map_err(BridgeError::into_exception)
        }
    };
    let set = {
        let (element, sink) = (element.clone(), sink);
        move |sandbox: &Sandbox, key: &str, value: Handle| -> Result<bool, VmException> {
            if key == TAG_NAME {
                return Ok(false);
            }
            let sink = sink.upgrade_or_transient();
            let value = vm_to_host(sandbox, &value, &sink).map_err(BridgeError::into_exception)?;
            element.set_property(key, value);
            Ok(true)
        }
    };
    let has = {
        let element = element.clone();
        move |_: &Sandbox, key: &str| -> Result<bool, VmException> { Ok(key == TAG_NAME || element.has_property(key)) }
    };
    let keys = {
        let element = element.clone();
        move |_: &Sandbox| -> Result<Vec<String>, VmException> {
            let mut names = vec![TAG_NAME.to_string()];
            names.extend(element.property_names());
            Ok(names)
        }
    };

    SimpleProxyHandler {
        get: Rc::new(get),
        set: Rc::new(set),
        has: Rc::new(has),
        keys: Rc::new(keys),
    }
}

fn node_to_vm(sandbox: &Sandbox, node: &RenderNode, sink: &GarbageDisposal, depth: usize) -> Result<Handle, BridgeError> {
    match node {
        RenderNode::Element { tag, props, children } => {
            let tag = sandbox.string(tag)?;
            let props = object_to_vm(sandbox, props, sink, depth + 1)?;
            let children = array_to_vm(sandbox, children, sink, depth + 1)?;
            Ok(sandbox.tag_element(&tag, &props, &children)?)
        }
        RenderNode::Fragment { children } => {
            let children = array_to_vm(sandbox, children, sink, depth + 1)?;
            Ok(sandbox.tag_fragment(&children)?)
        }
    }
}

fn computed_to_vm(sandbox: &Sandbox, calc: &HostCalc, sink: &GarbageDisposal) -> Result<Handle, BridgeError> {
    let calc = calc.clone();
    let weak_sink = sink.downgrade();
    let callback: HostCallback = Rc::new(move |sandbox: &Sandbox, _args: Vec<Handle>| {
        let sink = weak_sink.upgrade_or_transient();
        let value = calc
            .get()
            .map_err(BridgeError::from)
            .and_then(|result| result)
            .and_then(|value| host_to_vm(sandbox, &value, &sink));
        value.map_err(BridgeError::into_exception)
    });
    let function = sandbox.new_function("calc", callback)?;
    Ok(sandbox.tag_calc(&function)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxOptions;

    fn sandbox() -> Sandbox {
        Sandbox::new(&SandboxOptions::default()).unwrap()
    }

    fn eval_host(sb: &Sandbox, code: &str, sink: &GarbageDisposal) -> HostValue {
        let handle = sb.eval(code).unwrap();
        vm_to_host(sb, &handle, sink).unwrap()
    }

    #[test]
    fn test_plain_data_to_host() {
        let sb = sandbox();
        let sink = GarbageDisposal::new();
        let value = eval_host(&sb, "({ a: 1, b: ['x', true, null], c: undefined, d: 10n })", &sink);
        assert_eq!(
            value,
            HostValue::object([
                ("a", HostValue::from(1)),
                (
                    "b",
                    HostValue::from(vec![HostValue::from("x"), HostValue::Bool(true), HostValue::Null])
                ),
                ("c", HostValue::Undefined),
                ("d", HostValue::BigInt(10)),
            ])
        );
        assert!(sink.is_empty());
    }

    #[test]
    fn test_symbol_is_unsupported() {
        let sb = sandbox();
        let handle = sb.eval("Symbol('nope')").unwrap();
        let err = vm_to_host(&sb, &handle, &GarbageDisposal::new()).unwrap_err();
        assert_eq!(err, BridgeError::Unsupported { kind: "symbol".to_string() });
    }

    #[test]
    fn test_cyclic_object_is_rejected() {
        let sb = sandbox();
        let handle = sb.eval("const loop = {}; loop.self = loop; loop").unwrap();
        let err = vm_to_host(&sb, &handle, &GarbageDisposal::new()).unwrap_err();
        assert_eq!(err, BridgeError::TooDeep(MAX_DEPTH));
    }

    #[test]
    fn test_vm_function_called_from_host() {
        let sb = sandbox();
        let sink = GarbageDisposal::new();
        let value = eval_host(&sb, "(function add(a, b) { return a + b; })", &sink);
        let add = value.as_function().unwrap();
        assert_eq!(add.name(), "add");
        assert_eq!(add.call(&[HostValue::from(2), HostValue::from(3)]).unwrap(), HostValue::from(5));
        assert_eq!(sink.len(), 1);

        sink.dispose();
        assert_eq!(add.call(&[]), Err(BridgeError::Released));
    }

    #[test]
    fn test_vm_function_identity_survives_round_trip() {
        let sb = sandbox();
        let sink = GarbageDisposal::new();
        let original = sb.eval("globalThis.f = () => 1; f").unwrap();
        let host = vm_to_host(&sb, &original, &sink).unwrap();
        let back = host_to_vm(&sb, &host, &sink).unwrap();
        assert!(sb.eq(&original, &back).unwrap());
    }

    #[test]
    fn test_vm_functions_compare_by_vm_value() {
        let sb = sandbox();
        let sink = GarbageDisposal::new();
        let value = eval_host(&sb, "(() => { const f = () => 1; return [f, f, () => 1]; })()", &sink);
        let items = value.as_array().unwrap();
        assert_eq!(items[0], items[1]);
        assert_ne!(items[0], items[2]);

        // Once released there is nothing left to compare.
        sink.dispose();
        assert_ne!(items[0], items[1]);
    }

    #[test]
    fn test_proxied_array_to_host() {
        let sb = sandbox();
        let sink = GarbageDisposal::new();
        let value = eval_host(&sb, "new Proxy(['a', 'b'], {})", &sink);
        assert_eq!(value, HostValue::from(vec![HostValue::from("a"), HostValue::from("b")]));
    }

    #[test]
    fn test_host_function_called_from_vm() {
        let sb = sandbox();
        let sink = GarbageDisposal::new();
        let double = HostFunction::new("double", |args| {
            let n = args.first().and_then(HostValue::as_number).unwrap_or(0.0);
            Ok(HostValue::Number(n * 2.0))
        });
        let handle = host_to_vm(&sb, &HostValue::Function(double), &sink).unwrap();
        let global = sb.global().unwrap();
        sb.set_prop(&global, "double", &handle).unwrap();
        let result = sb.eval("double(21)").unwrap();
        assert_eq!(sb.as_number(&result).unwrap(), 42.0);
    }

    #[test]
    fn test_host_error_becomes_vm_error() {
        let sb = sandbox();
        let sink = GarbageDisposal::new();
        let error = HostValue::Error(crate::error::VmException::named("RangeError", "too far"));
        let handle = host_to_vm(&sb, &error, &sink).unwrap();
        assert!(sb.is_error(&handle).unwrap());
        let parts = sb.error_parts(&handle).unwrap();
        assert_eq!(parts.name, "RangeError");
        assert_eq!(parts.message, "too far");
        assert_eq!(parts.stack.as_deref(), Some(HOST_STACK_UNKNOWN));
    }

    #[test]
    fn test_jsx_renders_to_nodes() {
        let sb = sandbox();
        let sink = GarbageDisposal::new();
        let value = eval_host(
            &sb,
            "JSX.createElement('p', { id: 'x' }, 'hi ', JSX.createElement(JSX.Fragment, null, 'there'))",
            &sink,
        );
        let HostValue::Node(node) = value else {
            panic!("expected a render node, got {:?}", value);
        };
        assert_eq!(node.tag(), Some("p"));
        assert_eq!(node.text_content(), "hi there");
    }

    #[test]
    fn test_calc_becomes_computed() {
        let sb = sandbox();
        let sink = GarbageDisposal::new();
        let value = eval_host(&sb, "globalThis.n = 1; calc(() => n * 10)", &sink);
        let HostValue::Computed(calc) = value else {
            panic!("expected a computed value");
        };
        assert_eq!(calc.get().unwrap(), Ok(HostValue::from(10)));
        sb.eval("n = 2").unwrap();
        calc.invalidate();
        assert_eq!(calc.get().unwrap(), Ok(HostValue::from(20)));
    }

    #[test]
    fn test_element_proxy_forwards_properties() {
        let sb = sandbox();
        let sink = GarbageDisposal::new();
        let element = Element::new("input");
        element.set_property("value", HostValue::from("abc"));

        let proxy = host_to_vm(&sb, &HostValue::Element(element.clone()), &sink).unwrap();
        let global = sb.global().unwrap();
        sb.set_prop(&global, "el", &proxy).unwrap();

        let read = sb.eval("el.tagName + ':' + el.value + ':' + ('value' in el) + ':' + ('nope' in el)").unwrap();
        assert_eq!(sb.as_string(&read).unwrap(), "input:abc:true:false");

        sb.eval("el.value = 'xyz'").unwrap();
        assert_eq!(element.property("value"), Some(HostValue::from("xyz")));
    }
}
