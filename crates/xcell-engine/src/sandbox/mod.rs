//! Sandbox runtime
//!
//! An isolated QuickJS runtime + context with a per-sandbox handle table.
//! Every interpreter value the host holds is reached through a [`Handle`];
//! everything else (`eval`, property access, calls, accessors, proxies) is an
//! operation on the [`Sandbox`] taking and returning handles.
//!
//! # Re-entrancy
//!
//! Host callbacks (functions, accessors, proxy traps) run while the
//! interpreter is executing and may call any sandbox operation. The context
//! entered by the outermost operation is kept in an "active" slot and reused
//! by nested operations instead of entering the context a second time.
//!
//! # Teardown
//!
//! [`Sandbox::dispose`] (or dropping the last `Sandbox` clone) releases, in
//! order: outstanding table handles (reported as leaks), cached helpers and
//! the boundary prelude, the context, then the runtime.

mod handle;
pub mod prelude;
mod proxy;

pub use handle::{Handle, PropKey};
pub use proxy::{PropertyAccessor, PropertyRevoker, SimpleProxy, SimpleProxyHandler};

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rquickjs::function::{IntoArgs, Rest};
use rquickjs::{Array, Context, Ctx, Exception, Function, IntoJs, Null, Object, Persistent, Runtime, Undefined, Value};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::bridge::render::{NodeRenderer, Renderer};
use crate::config::SandboxOptions;
use crate::error::{SandboxError, SandboxResult, VmException};

/// Host function callable from inside the VM.
///
/// Receives owned handles for its arguments and returns an owned handle for
/// its result; an `Err` is thrown into the VM as an `Error` with the same
/// name, message and stack.
pub type HostCallback = Rc<dyn Fn(&Sandbox, Vec<Handle>) -> Result<Handle, VmException>>;

/// Result of `typeof`, with `null` split out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmType {
    Undefined,
    Null,
    Boolean,
    Number,
    BigInt,
    String,
    Symbol,
    Object,
    Function,
}

impl VmType {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "undefined" => VmType::Undefined,
            "null" => VmType::Null,
            "boolean" => VmType::Boolean,
            "number" => VmType::Number,
            "bigint" => VmType::BigInt,
            "string" => VmType::String,
            "symbol" => VmType::Symbol,
            "object" => VmType::Object,
            "function" => VmType::Function,
            _ => return None,
        })
    }

    /// `typeof`-style name
    pub fn name(self) -> &'static str {
        match self {
            VmType::Undefined => "undefined",
            VmType::Null => "null",
            VmType::Boolean => "boolean",
            VmType::Number => "number",
            VmType::BigInt => "bigint",
            VmType::String => "string",
            VmType::Symbol => "symbol",
            VmType::Object => "object",
            VmType::Function => "function",
        }
    }
}

/// Boundary kinds produced by the `JSX` and `calc` globals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryKind {
    /// `JSX.createElement(...)`
    Element,
    /// `JSX.Fragment(...)`
    Fragment,
    /// `calc(() => ...)`
    Calc,
}

// ============================================================================
// Inner state
// ============================================================================

struct Live {
    helpers: Persistent<Object<'static>>,
    context: Context,
    runtime: Runtime,
}

pub(crate) struct SandboxInner {
    state: RefCell<Option<Live>>,
    handles: RefCell<FxHashMap<u64, Persistent<Value<'static>>>>,
    next_handle: Cell<u64>,
    active: RefCell<Option<Ctx<'static>>>,
    deadline: Arc<Mutex<Option<Instant>>>,
    renderer: RefCell<Rc<dyn Renderer>>,
    options: SandboxOptions,
}

impl SandboxInner {
    pub(crate) fn release_slot(&self, id: u64) {
        // Dropping the persistent value may free VM functions whose host
        // closures own further handles; do it outside the table borrow.
        let removed = self.handles.borrow_mut().remove(&id);
        drop(removed);
    }

    fn arm(&self) {
        *self.deadline.lock() = Some(Instant::now() + self.options.eval_budget());
    }

    fn disarm(&self) {
        *self.deadline.lock() = None;
    }

    fn teardown(&self, live: Live) -> usize {
        let table = std::mem::take(&mut *self.handles.borrow_mut());
        let leaked = table.len();
        if leaked > 0 {
            warn!(target: "xcell::sandbox", leaked, "disposing sandbox with live handles");
        }
        drop(table);

        let Live {
            helpers,
            context,
            runtime,
        } = live;
        drop(helpers);
        drop(context);
        drop(runtime);
        debug!(target: "xcell::sandbox", "sandbox disposed");
        leaked
    }
}

impl Drop for SandboxInner {
    fn drop(&mut self) {
        if let Some(live) = self.state.get_mut().take() {
            self.teardown(live);
        }
    }
}

/// Marks a context as entered for the duration of the outermost operation
struct ActiveGuard<'a> {
    inner: &'a SandboxInner,
}

impl<'a> ActiveGuard<'a> {
    fn enter(inner: &'a SandboxInner, ctx: &Ctx<'_>) -> Self {
        // SAFETY: the erased context is only handed out while this guard is
        // alive, i.e. strictly inside the `Context::with` call that produced
        // `ctx`, and is dropped by the guard before that call returns.
        let erased: Ctx<'static> = unsafe { std::mem::transmute::<Ctx<'_>, Ctx<'static>>(ctx.clone()) };
        *inner.active.borrow_mut() = Some(erased);
        inner.arm();
        Self { inner }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let ctx = self.inner.active.borrow_mut().take();
        self.inner.disarm();
        drop(ctx);
    }
}

pub(crate) trait CatchExt<T> {
    /// Turn an interpreter error into a [`SandboxError`], extracting the
    /// pending exception if there is one
    fn catch_in(self, sandbox: &Sandbox, ctx: &Ctx<'_>) -> SandboxResult<T>;
}

impl<T> CatchExt<T> for rquickjs::Result<T> {
    fn catch_in(self, sandbox: &Sandbox, ctx: &Ctx<'_>) -> SandboxResult<T> {
        self.map_err(|err| sandbox.capture(ctx, err))
    }
}

// ============================================================================
// Sandbox
// ============================================================================

/// An isolated interpreter instance. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Sandbox {
    inner: Rc<SandboxInner>,
}

/// Non-owning reference to a [`Sandbox`]
#[derive(Clone)]
pub struct WeakSandbox(Weak<SandboxInner>);

impl WeakSandbox {
    /// Upgrade if the sandbox is still alive
    pub fn upgrade(&self) -> Option<Sandbox> {
        self.0.upgrade().map(Sandbox::from_inner)
    }
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox")
            .field("live_handles", &self.live_handles())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Sandbox {
    /// Create a runtime + context, install the interrupt handler and limits,
    /// and evaluate the helper and boundary preludes.
    pub fn new(options: &SandboxOptions) -> SandboxResult<Sandbox> {
        let runtime = Runtime::new().map_err(|e| SandboxError::Runtime(e.to_string()))?;
        if let Some(limit) = options.memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(size) = options.max_stack_size {
            runtime.set_max_stack_size(size);
        }

        let deadline: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
        let interrupt_deadline = Arc::clone(&deadline);
        runtime.set_interrupt_handler(Some(Box::new(move || {
            let deadline = *interrupt_deadline.lock();
            deadline.map_or(false, |deadline| Instant::now() >= deadline)
        })));

        let context = Context::full(&runtime).map_err(|e| SandboxError::Runtime(e.to_string()))?;
        let helpers = context
            .with(|ctx| -> rquickjs::Result<Persistent<Object<'static>>> {
                let helpers: Object = ctx.eval(prelude::HELPERS)?;
                ctx.eval::<(), _>(prelude::BOUNDARY)?;
                Ok(Persistent::save(&ctx, helpers))
            })
            .map_err(|e| SandboxError::Runtime(format!("failed to install prelude: {}", e)))?;

        debug!(
            target: "xcell::sandbox",
            budget_ms = options.eval_budget_ms,
            "sandbox created"
        );
        Ok(Sandbox {
            inner: Rc::new(SandboxInner {
                state: RefCell::new(Some(Live {
                    helpers,
                    context,
                    runtime,
                })),
                handles: RefCell::new(FxHashMap::default()),
                next_handle: Cell::new(1),
                active: RefCell::new(None),
                deadline,
                renderer: RefCell::new(Rc::new(NodeRenderer)),
                options: options.clone(),
            }),
        })
    }

    pub(crate) fn from_inner(inner: Rc<SandboxInner>) -> Sandbox {
        Sandbox { inner }
    }

    /// Non-owning reference, for closures that live inside the VM
    pub fn downgrade(&self) -> WeakSandbox {
        WeakSandbox(Rc::downgrade(&self.inner))
    }

    /// Whether both values refer to the same sandbox
    pub fn ptr_eq(&self, other: &Sandbox) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Options the sandbox was created with
    pub fn options(&self) -> &SandboxOptions {
        &self.inner.options
    }

    /// Whether `handle` was issued by this sandbox
    pub fn owns(&self, handle: &Handle) -> bool {
        handle.belongs_to(&self.inner)
    }

    /// Number of outstanding handles (for leak assertions)
    pub fn live_handles(&self) -> usize {
        self.inner.handles.borrow().len()
    }

    /// Whether [`Sandbox::dispose`] has run
    pub fn is_disposed(&self) -> bool {
        self.inner.state.borrow().is_none()
    }

    /// Renderer used for `JSX` boundary values
    pub fn renderer(&self) -> Rc<dyn Renderer> {
        Rc::clone(&self.inner.renderer.borrow())
    }

    /// Replace the renderer used for `JSX` boundary values
    pub fn set_renderer(&self, renderer: Rc<dyn Renderer>) {
        *self.inner.renderer.borrow_mut() = renderer;
    }

    /// Tear the sandbox down now.
    ///
    /// Idempotent. Reports handles that were still alive as
    /// [`SandboxError::LeakedHandles`]; they are freed regardless and any
    /// later use of them fails with [`SandboxError::Released`].
    pub fn dispose(&self) -> SandboxResult<()> {
        if self.inner.active.borrow().is_some() {
            return Err(SandboxError::Busy);
        }
        let live = self.inner.state.borrow_mut().take();
        match live {
            Some(live) => match self.inner.teardown(live) {
                0 => Ok(()),
                leaked => Err(SandboxError::LeakedHandles(leaked)),
            },
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------------
    // Context access
    // ------------------------------------------------------------------------

    /// Run `f` inside the context, reusing the active one when re-entered
    pub(crate) fn with<R>(&self, f: impl for<'js> FnOnce(&Ctx<'js>) -> SandboxResult<R>) -> SandboxResult<R> {
        let active = self.inner.active.borrow().clone();
        if let Some(ctx) = active {
            return f(&ctx);
        }
        let context = self
            .inner
            .state
            .borrow()
            .as_ref()
            .map(|live| live.context.clone())
            .ok_or(SandboxError::Disposed)?;
        context.with(|ctx| {
            let _active = ActiveGuard::enter(&self.inner, &ctx);
            f(&ctx)
        })
    }

    pub(crate) fn store<'js>(&self, ctx: &Ctx<'js>, value: Value<'js>) -> Handle {
        let id = self.inner.next_handle.get();
        self.inner.next_handle.set(id + 1);
        let persistent = Persistent::save(ctx, value);
        self.inner.handles.borrow_mut().insert(id, persistent);
        Handle::new(id, Rc::downgrade(&self.inner))
    }

    pub(crate) fn load<'js>(&self, ctx: &Ctx<'js>, handle: &Handle) -> SandboxResult<Value<'js>> {
        if !handle.belongs_to(&self.inner) {
            return Err(SandboxError::ForeignHandle(handle.id()));
        }
        let persistent = self
            .inner
            .handles
            .borrow()
            .get(&handle.id())
            .cloned()
            .ok_or(SandboxError::Released(handle.id()))?;
        persistent
            .restore(ctx)
            .map_err(|e| SandboxError::Runtime(e.to_string()))
    }

    fn helper<'js>(&self, ctx: &Ctx<'js>, name: &str) -> SandboxResult<Function<'js>> {
        let helpers = self
            .inner
            .state
            .borrow()
            .as_ref()
            .map(|live| live.helpers.clone())
            .ok_or(SandboxError::Disposed)?;
        helpers
            .restore(ctx)
            .and_then(|helpers| helpers.get::<_, Function>(name))
            .map_err(|e| SandboxError::Runtime(format!("helper '{}' unavailable: {}", name, e)))
    }

    fn invoke<'js, A: IntoArgs<'js>>(&self, ctx: &Ctx<'js>, helper: &str, args: A) -> SandboxResult<Value<'js>> {
        self.helper(ctx, helper)?
            .call::<A, Value<'js>>(args)
            .catch_in(self, ctx)
    }

    fn capture(&self, ctx: &Ctx<'_>, err: rquickjs::Error) -> SandboxError {
        if !matches!(err, rquickjs::Error::Exception) {
            return SandboxError::Runtime(err.to_string());
        }
        let thrown = ctx.catch();
        let exception = self.describe(ctx, thrown);
        if exception.name == "InternalError" && exception.message == "interrupted" {
            return SandboxError::Interrupted {
                budget_ms: self.inner.options.eval_budget_ms,
            };
        }
        SandboxError::Exception(exception)
    }

    fn describe<'js>(&self, ctx: &Ctx<'js>, thrown: Value<'js>) -> VmException {
        // The budget may already be spent; extraction must not be interrupted.
        let saved = self.inner.deadline.lock().take();
        let parts = self
            .helper(ctx, "errorParts")
            .ok()
            .and_then(|describe| describe.call::<_, Array>((thrown,)).ok());
        *self.inner.deadline.lock() = saved;

        match parts {
            Some(parts) => VmException {
                name: parts.get::<String>(0).unwrap_or_else(|_| "Error".to_string()),
                message: parts.get::<String>(1).unwrap_or_default(),
                stack: parts.get::<Option<String>>(2).ok().flatten(),
            },
            None => {
                let _ = ctx.catch();
                VmException::new("exception could not be described")
            }
        }
    }

    /// Build the interpreter error that throws `exception` into the VM
    fn throw<'js>(&self, ctx: &Ctx<'js>, exception: &VmException) -> rquickjs::Error {
        let stack = exception.stack.as_deref().unwrap_or("<host stack unknown>");
        match self.invoke(
            ctx,
            "newError",
            (exception.name.as_str(), exception.message.as_str(), stack),
        ) {
            Ok(error) => ctx.throw(error),
            Err(_) => Exception::throw_message(ctx, &exception.message),
        }
    }

    pub(crate) fn make_function<'js>(
        &self,
        ctx: &Ctx<'js>,
        name: &str,
        callback: HostCallback,
    ) -> SandboxResult<Function<'js>> {
        let weak = Rc::downgrade(&self.inner);
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<Value<'js>> {
                trampoline(&weak, &callback, &ctx, args.0)
            },
        )
        .and_then(|function| function.with_name(name))
        .catch_in(self, ctx)
    }

    // ------------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------------

    /// Evaluate `code` as a global script and return its completion value.
    ///
    /// The time budget restarts at the beginning of every evaluation.
    pub fn eval(&self, code: &str) -> SandboxResult<Handle> {
        self.with(|ctx| {
            self.inner.arm();
            let value = ctx.eval::<Value, _>(code).catch_in(self, ctx)?;
            Ok(self.store(ctx, value))
        })
    }

    /// Call `func` with `this` and `args`
    pub fn call(&self, func: &Handle, this: &Handle, args: &[Handle]) -> SandboxResult<Handle> {
        self.with(|ctx| {
            let function = self.load(ctx, func)?;
            let this = self.load(ctx, this)?;
            let list = Array::new(ctx.clone()).catch_in(self, ctx)?;
            for (index, arg) in args.iter().enumerate() {
                list.set(index, self.load(ctx, arg)?).catch_in(self, ctx)?;
            }
            let result = self.invoke(ctx, "apply", (function, this, list))?;
            Ok(self.store(ctx, result))
        })
    }

    // ------------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------------

    /// The global object
    pub fn global(&self) -> SandboxResult<Handle> {
        self.with(|ctx| Ok(self.store(ctx, ctx.globals().into_value())))
    }

    /// `undefined`
    pub fn undefined(&self) -> SandboxResult<Handle> {
        self.with(|ctx| {
            let value = Undefined.into_js(ctx).catch_in(self, ctx)?;
            Ok(self.store(ctx, value))
        })
    }

    /// `null`
    pub fn null(&self) -> SandboxResult<Handle> {
        self.with(|ctx| {
            let value = Null.into_js(ctx).catch_in(self, ctx)?;
            Ok(self.store(ctx, value))
        })
    }

    /// `true` / `false`
    pub fn boolean(&self, value: bool) -> SandboxResult<Handle> {
        self.with(|ctx| {
            let value = value.into_js(ctx).catch_in(self, ctx)?;
            Ok(self.store(ctx, value))
        })
    }

    /// A number
    pub fn number(&self, value: f64) -> SandboxResult<Handle> {
        self.with(|ctx| {
            let value = value.into_js(ctx).catch_in(self, ctx)?;
            Ok(self.store(ctx, value))
        })
    }

    /// A string
    pub fn string(&self, value: &str) -> SandboxResult<Handle> {
        self.with(|ctx| {
            let value = value.into_js(ctx).catch_in(self, ctx)?;
            Ok(self.store(ctx, value))
        })
    }

    /// A bigint
    pub fn bigint(&self, value: i64) -> SandboxResult<Handle> {
        self.with(|ctx| {
            let value = self.invoke(ctx, "newBigInt", (value.to_string(),))?;
            Ok(self.store(ctx, value))
        })
    }

    /// `{}`
    pub fn new_object(&self) -> SandboxResult<Handle> {
        self.with(|ctx| {
            let object = Object::new(ctx.clone()).catch_in(self, ctx)?;
            Ok(self.store(ctx, object.into_value()))
        })
    }

    /// `[]`
    pub fn new_array(&self) -> SandboxResult<Handle> {
        self.with(|ctx| {
            let array = Array::new(ctx.clone()).catch_in(self, ctx)?;
            Ok(self.store(ctx, array.into_value()))
        })
    }

    /// `Object.create(proto)`
    pub fn object_create(&self, proto: &Handle) -> SandboxResult<Handle> {
        self.with(|ctx| {
            let proto = self.load(ctx, proto)?;
            let object = self.invoke(ctx, "createObject", (proto,))?;
            Ok(self.store(ctx, object))
        })
    }

    /// `new Date(ms)`
    pub fn new_date(&self, millis: f64) -> SandboxResult<Handle> {
        self.with(|ctx| {
            let date = self.invoke(ctx, "newDate", (millis,))?;
            Ok(self.store(ctx, date))
        })
    }

    /// An `Error` with the given name, message and `stack`
    pub fn new_error(&self, name: &str, message: &str, stack: &str) -> SandboxResult<Handle> {
        self.with(|ctx| {
            let error = self.invoke(ctx, "newError", (name, message, stack))?;
            Ok(self.store(ctx, error))
        })
    }

    /// A property key value: a string for names, a number for indices
    pub fn new_prop(&self, key: &PropKey) -> SandboxResult<Handle> {
        match key {
            PropKey::Name(name) => self.string(name),
            PropKey::Index(index) => self.number(f64::from(*index)),
        }
    }

    /// A VM function that calls back into the host
    pub fn new_function(&self, name: &str, callback: HostCallback) -> SandboxResult<Handle> {
        self.with(|ctx| {
            let function = self.make_function(ctx, name, callback)?;
            Ok(self.store(ctx, function.into_value()))
        })
    }

    /// Second owned handle to the same value
    pub fn dup(&self, handle: &Handle) -> SandboxResult<Handle> {
        self.with(|ctx| {
            let value = self.load(ctx, handle)?;
            Ok(self.store(ctx, value))
        })
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    /// `typeof value` (with `null` reported separately)
    pub fn type_of(&self, handle: &Handle) -> SandboxResult<VmType> {
        let name = self.with(|ctx| {
            let value = self.load(ctx, handle)?;
            let name = self.invoke(ctx, "typeOf", (value,))?;
            name.get::<String>().catch_in(self, ctx)
        })?;
        VmType::parse(&name).ok_or(SandboxError::TypeMismatch {
            expected: "a typeof result".to_string(),
            got: name,
        })
    }

    /// Strict equality (`===`)
    pub fn eq(&self, a: &Handle, b: &Handle) -> SandboxResult<bool> {
        self.predicate("is", &[a, b])
    }

    /// `!!value`
    pub fn is_truthy(&self, handle: &Handle) -> SandboxResult<bool> {
        self.predicate("truthy", &[handle])
    }

    /// `Array.isArray(value)`
    pub fn is_array(&self, handle: &Handle) -> SandboxResult<bool> {
        self.predicate("isArray", &[handle])
    }

    /// `value instanceof Date`
    pub fn is_date(&self, handle: &Handle) -> SandboxResult<bool> {
        self.predicate("isDate", &[handle])
    }

    /// `value instanceof Error`
    pub fn is_error(&self, handle: &Handle) -> SandboxResult<bool> {
        self.predicate("isError", &[handle])
    }

    /// `typeof value === "function"`
    pub fn is_function(&self, handle: &Handle) -> SandboxResult<bool> {
        Ok(self.type_of(handle)? == VmType::Function)
    }

    fn predicate(&self, helper: &str, args: &[&Handle]) -> SandboxResult<bool> {
        self.with(|ctx| {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(self.load(ctx, arg)?);
            }
            let result = self.invoke(ctx, helper, (Rest(values),))?;
            Ok(result.as_bool().unwrap_or(false))
        })
    }

    /// Number value
    pub fn as_number(&self, handle: &Handle) -> SandboxResult<f64> {
        self.with(|ctx| {
            let value = self.load(ctx, handle)?;
            value.as_number().ok_or_else(|| SandboxError::TypeMismatch {
                expected: "number".to_string(),
                got: value.type_name().to_string(),
            })
        })
    }

    /// Boolean value
    pub fn as_bool(&self, handle: &Handle) -> SandboxResult<bool> {
        self.with(|ctx| {
            let value = self.load(ctx, handle)?;
            value.as_bool().ok_or_else(|| SandboxError::TypeMismatch {
                expected: "boolean".to_string(),
                got: value.type_name().to_string(),
            })
        })
    }

    /// String value
    pub fn as_string(&self, handle: &Handle) -> SandboxResult<String> {
        self.with(|ctx| {
            let value = self.load(ctx, handle)?;
            match value.as_string() {
                Some(string) => string.to_string().catch_in(self, ctx),
                None => Err(SandboxError::TypeMismatch {
                    expected: "string".to_string(),
                    got: value.type_name().to_string(),
                }),
            }
        })
    }

    /// Bigint value; values outside the `i64` range are a type mismatch
    pub fn as_bigint(&self, handle: &Handle) -> SandboxResult<i64> {
        let digits = self.with(|ctx| {
            let value = self.load(ctx, handle)?;
            let digits = self.invoke(ctx, "bigIntDigits", (value,))?;
            digits.get::<String>().catch_in(self, ctx)
        })?;
        digits.parse::<i64>().map_err(|_| SandboxError::TypeMismatch {
            expected: "bigint within i64 range".to_string(),
            got: digits,
        })
    }

    /// Milliseconds since the epoch of a `Date`
    pub fn date_value(&self, handle: &Handle) -> SandboxResult<f64> {
        self.with(|ctx| {
            let value = self.load(ctx, handle)?;
            let millis = self.invoke(ctx, "dateValue", (value,))?;
            Ok(millis.as_number().unwrap_or(f64::NAN))
        })
    }

    /// `name`, `message` and `stack` of a thrown or constructed error
    pub fn error_parts(&self, handle: &Handle) -> SandboxResult<VmException> {
        self.with(|ctx| {
            let value = self.load(ctx, handle)?;
            Ok(self.describe(ctx, value))
        })
    }

    /// Boundary discriminant, if the value was produced by `JSX` or `calc`
    pub fn boundary_kind(&self, handle: &Handle) -> SandboxResult<Option<BoundaryKind>> {
        self.with(|ctx| {
            let value = self.load(ctx, handle)?;
            let kind = self.invoke(ctx, "kindOf", (value,))?;
            let kind = kind.get::<Option<String>>().catch_in(self, ctx)?;
            Ok(match kind.as_deref() {
                Some(prelude::KIND_ELEMENT) => Some(BoundaryKind::Element),
                Some(prelude::KIND_FRAGMENT) => Some(BoundaryKind::Fragment),
                Some(prelude::KIND_CALC) => Some(BoundaryKind::Calc),
                _ => None,
            })
        })
    }

    /// Own string-keyed property names (`Object.getOwnPropertyNames`)
    pub fn own_keys(&self, handle: &Handle) -> SandboxResult<Vec<String>> {
        self.with(|ctx| {
            let value = self.load(ctx, handle)?;
            let keys = self.invoke(ctx, "ownKeys", (value,))?;
            let keys = keys.into_array().ok_or_else(|| SandboxError::TypeMismatch {
                expected: "array".to_string(),
                got: "non-array".to_string(),
            })?;
            let mut names = Vec::with_capacity(keys.len());
            for index in 0..keys.len() {
                names.push(keys.get::<String>(index).catch_in(self, ctx)?);
            }
            Ok(names)
        })
    }

    /// `value.length` of anything `Array.isArray` accepts, proxies included
    pub fn array_len(&self, handle: &Handle) -> SandboxResult<usize> {
        if !self.is_array(handle)? {
            return Err(SandboxError::TypeMismatch {
                expected: "array".to_string(),
                got: self.type_of(handle)?.name().to_string(),
            });
        }
        let length = self.get_prop(handle, "length")?;
        let length = self.as_number(&length)?;
        Ok(length as usize)
    }

    // ------------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------------

    /// `obj[key]`
    pub fn get_prop(&self, obj: &Handle, key: impl Into<PropKey>) -> SandboxResult<Handle> {
        let key = key.into();
        self.with(|ctx| {
            let object = self.load(ctx, obj)?;
            let value = match (object_view(&object), &key) {
                (Some(object), PropKey::Name(name)) => object.get::<_, Value>(name.as_str()),
                (Some(object), PropKey::Index(index)) => object.get::<_, Value>(*index),
                (None, _) => {
                    return Err(SandboxError::TypeMismatch {
                        expected: "object".to_string(),
                        got: object.type_name().to_string(),
                    })
                }
            }
            .catch_in(self, ctx)?;
            Ok(self.store(ctx, value))
        })
    }

    /// `obj[key] = value`
    pub fn set_prop(&self, obj: &Handle, key: impl Into<PropKey>, value: &Handle) -> SandboxResult<()> {
        let key = key.into();
        self.with(|ctx| {
            let object = self.load(ctx, obj)?;
            let value = self.load(ctx, value)?;
            match (object_view(&object), &key) {
                (Some(object), PropKey::Name(name)) => object.set(name.as_str(), value),
                (Some(object), PropKey::Index(index)) => object.set(*index, value),
                (None, _) => {
                    return Err(SandboxError::TypeMismatch {
                        expected: "object".to_string(),
                        got: object.type_name().to_string(),
                    })
                }
            }
            .catch_in(self, ctx)
        })
    }

    /// `delete obj[key]`
    pub fn delete_prop(&self, obj: &Handle, key: impl Into<PropKey>) -> SandboxResult<bool> {
        let key = self.new_prop(&key.into())?;
        self.predicate("deleteProperty", &[obj, &key])
    }

    /// `key in obj`
    pub fn has_prop(&self, obj: &Handle, key: impl Into<PropKey>) -> SandboxResult<bool> {
        let key = self.new_prop(&key.into())?;
        self.predicate("has", &[obj, &key])
    }

    // ------------------------------------------------------------------------
    // Boundary values
    // ------------------------------------------------------------------------

    /// Rebuild a render element (`{ type, props, children }` + discriminant)
    pub fn tag_element(&self, element_type: &Handle, props: &Handle, children: &Handle) -> SandboxResult<Handle> {
        self.with(|ctx| {
            let args = (
                self.load(ctx, element_type)?,
                self.load(ctx, props)?,
                self.load(ctx, children)?,
            );
            let element = self.invoke(ctx, "tagElement", args)?;
            Ok(self.store(ctx, element))
        })
    }

    /// Rebuild a fragment (`{ children }` + discriminant)
    pub fn tag_fragment(&self, children: &Handle) -> SandboxResult<Handle> {
        self.with(|ctx| {
            let children = self.load(ctx, children)?;
            let fragment = self.invoke(ctx, "tagFragment", (children,))?;
            Ok(self.store(ctx, fragment))
        })
    }

    /// Rebuild a reactive computation (`{ fn }` + discriminant)
    pub fn tag_calc(&self, function: &Handle) -> SandboxResult<Handle> {
        self.with(|ctx| {
            let function = self.load(ctx, function)?;
            let calc = self.invoke(ctx, "tagCalc", (function,))?;
            Ok(self.store(ctx, calc))
        })
    }
}

/// Object view of objects, functions and arrays
fn object_view<'a, 'js>(value: &'a Value<'js>) -> Option<&'a Object<'js>> {
    value
        .as_object()
        .or_else(|| value.as_function().map(|function| &**function))
        .or_else(|| value.as_array().map(|array| &**array))
}

/// Entry point of every host function called from the VM
fn trampoline<'js>(
    weak: &Weak<SandboxInner>,
    callback: &HostCallback,
    ctx: &Ctx<'js>,
    args: Vec<Value<'js>>,
) -> rquickjs::Result<Value<'js>> {
    let Some(inner) = weak.upgrade() else {
        return Err(Exception::throw_message(ctx, "sandbox has been disposed"));
    };
    let sandbox = Sandbox::from_inner(inner);
    let handles = args.into_iter().map(|arg| sandbox.store(ctx, arg)).collect();
    let outcome = callback(&sandbox, handles)
        .and_then(|result| sandbox.load(ctx, &result).map_err(SandboxError::into_exception));
    match outcome {
        Ok(value) => Ok(value),
        Err(exception) => Err(sandbox.throw(ctx, &exception)),
    }
}
