//! JavaScript evaluated once per sandbox at startup.
//!
//! `HELPERS` returns an object of small functions the host calls instead of
//! re-evaluating snippets (strict equality, type tests, accessor definition,
//! revocable proxies, ...). It captures the built-ins it needs at startup so
//! later user code that reassigns `Proxy` or `Reflect` cannot affect the
//! boundary.
//!
//! `BOUNDARY` installs the `JSX` and `calc` globals. Values they produce
//! carry a non-enumerable discriminant property, [`KIND_KEY`], whose value is
//! one of the `KIND_*` constants.

/// Discriminant property carried by boundary values
pub const KIND_KEY: &str = "__xcell_kind__";

/// Render element produced by `JSX.createElement`
pub const KIND_ELEMENT: &str = "element";

/// Fragment produced by `JSX.Fragment`
pub const KIND_FRAGMENT: &str = "fragment";

/// Reactive computation produced by `calc`
pub const KIND_CALC: &str = "calc";

pub(crate) const HELPERS: &str = r#"
(() => {
    const KIND = "__xcell_kind__";
    const { defineProperty, getOwnPropertyNames, create } = Object;
    const { apply, deleteProperty, has } = Reflect;
    const hasOwn = Object.prototype.hasOwnProperty;
    const revocable = Proxy.revocable;
    const NativeDate = Date;
    const NativeError = Error;
    const NativeBigInt = BigInt;
    const isArray = Array.isArray;
    const tag = (value, kind) => defineProperty(value, KIND, { value: kind });

    return {
        is: (a, b) => a === b,
        truthy: (v) => !!v,
        typeOf: (v) => (v === null ? "null" : typeof v),
        isArray: (v) => isArray(v),
        isDate: (v) => v instanceof NativeDate,
        isError: (v) => v instanceof NativeError,
        kindOf: (v) =>
            v !== null && typeof v === "object" && apply(hasOwn, v, [KIND]) ? v[KIND] : undefined,
        newDate: (ms) => new NativeDate(ms),
        dateValue: (d) => d.getTime(),
        newBigInt: (digits) => NativeBigInt(digits),
        bigIntDigits: (v) => v.toString(),
        newError: (name, message, stack) => {
            const error = new NativeError(message);
            error.name = name;
            defineProperty(error, "stack", { value: stack, writable: true, configurable: true });
            return error;
        },
        errorParts: (e) =>
            e !== null && typeof e === "object"
                ? [String(e.name ?? "Error"), String(e.message ?? ""), e.stack === undefined ? undefined : String(e.stack)]
                : ["Error", String(e), undefined],
        apply: (f, self, args) => apply(f, self, args),
        ownKeys: (obj) => getOwnPropertyNames(obj),
        createObject: (proto) => create(proto),
        deleteProperty: (obj, key) => deleteProperty(obj, key),
        has: (obj, key) => has(obj, key),
        defineAccessor: (obj, name, get, set) => {
            const descriptor = { get, enumerable: true, configurable: true };
            if (set !== undefined) {
                descriptor.set = (value) => {
                    if (!set(value)) {
                        throw new NativeError("Unable to set " + name);
                    }
                };
            }
            defineProperty(obj, name, descriptor);
        },
        simpleProxy: (get, set, hasKey, keys) => {
            const isName = (key) => typeof key === "string";
            const { proxy, revoke } = revocable({}, {
                get: (_target, key) => (isName(key) ? get(key) : undefined),
                set: (_target, key, value) => isName(key) && set(key, value),
                has: (_target, key) => isName(key) && hasKey(key),
                ownKeys: () => keys(),
                getOwnPropertyDescriptor: (_target, key) =>
                    isName(key) && hasKey(key)
                        ? { value: get(key), enumerable: true, configurable: true, writable: true }
                        : undefined,
                defineProperty: () => false,
                deleteProperty: () => false,
            });
            return [proxy, revoke];
        },
        tagElement: (type, props, children) => tag({ type, props, children }, "element"),
        tagFragment: (children) => tag({ children }, "fragment"),
        tagCalc: (fn) => tag({ fn }, "calc"),
    };
})()
"#;

pub(crate) const BOUNDARY: &str = r#"
(() => {
    const KIND = "__xcell_kind__";
    const tag = (value, kind) => Object.defineProperty(value, KIND, { value: kind });
    const flatten = (children) => children.flat(Infinity);

    const JSX = {
        createElement(type, props, ...children) {
            if (type === JSX.Fragment) {
                return JSX.Fragment({ ...(props ?? {}), children });
            }
            return tag({ type, props: props ?? {}, children: flatten(children) }, "element");
        },
        Fragment(props) {
            const children = props?.children ?? [];
            return tag({ children: flatten(Array.isArray(children) ? children : [children]) }, "fragment");
        },
    };

    const calc = (fn) => {
        if (typeof fn !== "function") {
            throw new TypeError("calc() expects a function");
        }
        return tag({ fn }, "calc");
    };

    Object.defineProperty(globalThis, "JSX", { value: JSX, writable: true, configurable: true });
    Object.defineProperty(globalThis, "calc", { value: calc, writable: true, configurable: true });
})();
"#;
