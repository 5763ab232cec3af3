//! # Extern Predicates
//!
//! Host functions callable from rule bodies as positional predicates. Each
//! registration declares, per argument, whether the callee receives it
//! (`In`) or produces it (`Out`). A name may be registered several times
//! with different modes.
//!
//! ## Resolution
//!
//! At compile time the set of arguments the call site has bound selects a
//! registration: an exact mode match wins; otherwise the registration whose
//! `In` arguments are the largest subset of the bound ones. Arguments the
//! call site bound but the registration produces are compared against the
//! produced values, so `add(1, 2, 3)` can run through an `(In, In, Out)`
//! registration.
//!
//! ## Failure isolation
//!
//! A callee that reports an error or panics produces no rows for that call;
//! the failure is recorded as [`EngineError::ExternCall`] and evaluation
//! continues.

use crate::error::{EngineError, EngineResult};
use crate::interner::Interner;
use crate::table::ColumnMask;
use crate::value::{Row, Value};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgMode {
    In,
    Out,
}

/// Index of one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExternId(pub u32);

/// Host callback. Returning `Err` is equivalent to `report_error`.
pub type ExternFn = dyn Fn(&mut CallContext<'_>) -> Result<(), String> + Send + Sync;

struct Registration {
    name: String,
    arg_names: Vec<String>,
    modes: Vec<ArgMode>,
    callback: Arc<ExternFn>,
}

impl Registration {
    fn in_mask(&self) -> ColumnMask {
        self.modes
            .iter()
            .enumerate()
            .filter(|(_, m)| **m == ArgMode::In)
            .fold(ColumnMask::EMPTY, |mask, (i, _)| mask.with(i))
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("arg_names", &self.arg_names)
            .field("modes", &self.modes)
            .finish_non_exhaustive()
    }
}

/// A bundle of registrations loaded together.
pub trait ExternModule {
    fn name(&self) -> &str;

    fn register(&self, registry: &mut ExternRegistry) -> Result<(), String>;
}

#[derive(Debug, Default)]
pub struct ExternRegistry {
    registrations: Vec<Registration>,
    by_name: HashMap<String, Vec<ExternId>>,
}

impl ExternRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` under `name` with one `(name, mode)` per argument.
    pub fn register<F>(&mut self, name: &str, args: &[(&str, ArgMode)], callback: F) -> ExternId
    where
        F: Fn(&mut CallContext<'_>) -> Result<(), String> + Send + Sync + 'static,
    {
        let id = ExternId(self.registrations.len() as u32);
        self.registrations.push(Registration {
            name: name.to_string(),
            arg_names: args.iter().map(|(n, _)| (*n).to_string()).collect(),
            modes: args.iter().map(|(_, m)| *m).collect(),
            callback: Arc::new(callback),
        });
        self.by_name.entry(name.to_string()).or_default().push(id);
        id
    }

    pub fn load_module(&mut self, module: &dyn ExternModule) -> EngineResult<()> {
        module
            .register(self)
            .map_err(|message| EngineError::ModuleLoad {
                module: module.name().to_string(),
                message,
            })?;
        info!(module = module.name(), "extern_module_loaded");
        Ok(())
    }

    /// Whether some registration of `name` takes `arity` arguments.
    pub fn has(&self, name: &str, arity: usize) -> bool {
        self.candidates(name, arity).next().is_some()
    }

    fn candidates<'a>(&'a self, name: &str, arity: usize) -> impl Iterator<Item = ExternId> + 'a {
        self.by_name
            .get(name)
            .into_iter()
            .flatten()
            .copied()
            .filter(move |id| self.registrations[id.0 as usize].modes.len() == arity)
    }

    /// Registration serving a call with the arguments in `bound` supplied.
    pub fn resolve(&self, name: &str, arity: usize, bound: ColumnMask) -> Option<ExternId> {
        let mut best: Option<(usize, ExternId)> = None;
        for id in self.candidates(name, arity) {
            let wants = self.registrations[id.0 as usize].in_mask();
            if wants == bound {
                return Some(id);
            }
            if wants.0 & !bound.0 == 0 {
                let size = wants.count();
                if best.map_or(true, |(s, _)| size > s) {
                    best = Some((size, id));
                }
            }
        }
        best.map(|(_, id)| id)
    }

    pub fn name_of(&self, id: ExternId) -> &str {
        &self.registrations[id.0 as usize].name
    }

    /// Invoke registration `id`. `args` holds the call site's values, `None`
    /// where unbound; the caller filters produced rows against the values it
    /// bound.
    pub fn call(&self, id: ExternId, args: &[Value], strings: &mut Interner) -> EngineResult<Vec<Row>> {
        let registration = &self.registrations[id.0 as usize];
        let current = registration
            .modes
            .iter()
            .zip(args)
            .map(|(mode, value)| match mode {
                ArgMode::In => *value,
                ArgMode::Out => Value::None,
            })
            .collect();
        let mut context = CallContext {
            arg_names: &registration.arg_names,
            modes: &registration.modes,
            current,
            results: Vec::new(),
            errors: Vec::new(),
            strings,
        };
        let callback = Arc::clone(&registration.callback);
        let outcome = catch_unwind(AssertUnwindSafe(|| callback(&mut context)));
        let failure = |message: String| EngineError::ExternCall {
            name: registration.name.clone(),
            message,
        };
        match outcome {
            Err(panic) => Err(failure(panic_message(panic.as_ref()))),
            Ok(Err(message)) => Err(failure(message)),
            Ok(Ok(())) => match context.errors.into_iter().next() {
                Some(message) => Err(failure(message)),
                None => Ok(context.results),
            },
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

/// The callee's view of one call.
pub struct CallContext<'a> {
    arg_names: &'a [String],
    modes: &'a [ArgMode],
    current: Vec<Value>,
    results: Vec<Row>,
    errors: Vec<String>,
    strings: &'a mut Interner,
}

impl CallContext<'_> {
    pub fn arg_count(&self) -> usize {
        self.current.len()
    }

    pub fn arg_name(&self, index: usize) -> Option<&str> {
        self.arg_names.get(index).map(String::as_str)
    }

    pub fn mode(&self, index: usize) -> Option<ArgMode> {
        self.modes.get(index).copied()
    }

    pub fn get_value(&self, index: usize) -> Option<Value> {
        self.current.get(index).copied().filter(|v| !v.is_none())
    }

    pub fn get_integer(&self, index: usize) -> Option<i64> {
        self.get_value(index)?.as_integer()
    }

    /// Numeric argument, integers promoted.
    pub fn get_float(&self, index: usize) -> Option<f64> {
        self.get_value(index)?.as_f64()
    }

    pub fn get_boolean(&self, index: usize) -> Option<bool> {
        self.get_value(index)?.as_bool()
    }

    /// Text of a string or atom argument.
    pub fn get_string(&self, index: usize) -> Option<String> {
        let id = self.get_value(index)?.as_str_id()?;
        self.strings.resolve(id).map(ToString::to_string)
    }

    pub fn set_value(&mut self, index: usize, value: Value) {
        if let Some(slot) = self.current.get_mut(index) {
            *slot = value;
        }
    }

    pub fn set_integer(&mut self, index: usize, value: i64) {
        self.set_value(index, Value::Integer(value));
    }

    pub fn set_float(&mut self, index: usize, value: f64) {
        self.set_value(index, Value::Float(value));
    }

    pub fn set_boolean(&mut self, index: usize, value: bool) {
        self.set_value(index, Value::Boolean(value));
    }

    pub fn set_string(&mut self, index: usize, text: &str) {
        let value = Value::string(self.strings, text);
        self.set_value(index, value);
    }

    pub fn set_atom(&mut self, index: usize, text: &str) {
        let value = Value::atom(self.strings, text);
        self.set_value(index, value);
    }

    /// Emit the current argument values as one result row.
    pub fn yield_row(&mut self) {
        match self.current.iter().position(Value::is_none) {
            Some(missing) => self
                .errors
                .push(format!("argument {missing} not set before yield")),
            None => self.results.push(self.current.clone()),
        }
    }

    pub fn report_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }
}

/// Arithmetic and string helpers: `add/3`, `range/3`, `length/2`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardModule;

impl ExternModule for StandardModule {
    fn name(&self) -> &str {
        "standard"
    }

    fn register(&self, registry: &mut ExternRegistry) -> Result<(), String> {
        use ArgMode::{In, Out};

        registry.register("add", &[("a", In), ("b", In), ("sum", Out)], |cx| {
            let (a, b) = (cx.get_integer(0), cx.get_integer(1));
            match (a, b) {
                (Some(a), Some(b)) => {
                    let sum = a.checked_add(b).ok_or("integer overflow")?;
                    cx.set_integer(2, sum);
                    cx.yield_row();
                    Ok(())
                }
                _ => Err("add expects integers".to_string()),
            }
        });
        registry.register("add", &[("a", In), ("b", Out), ("sum", In)], |cx| {
            let (a, sum) = (cx.get_integer(0), cx.get_integer(2));
            match (a, sum) {
                (Some(a), Some(sum)) => {
                    let b = sum.checked_sub(a).ok_or("integer overflow")?;
                    cx.set_integer(1, b);
                    cx.yield_row();
                    Ok(())
                }
                _ => Err("add expects integers".to_string()),
            }
        });
        registry.register("range", &[("low", In), ("high", In), ("x", Out)], |cx| {
            let (Some(low), Some(high)) = (cx.get_integer(0), cx.get_integer(1)) else {
                return Err("range expects integers".to_string());
            };
            for x in low..high {
                cx.set_integer(2, x);
                cx.yield_row();
            }
            Ok(())
        });
        registry.register("length", &[("text", In), ("length", Out)], |cx| {
            let text = cx.get_string(0).ok_or("length expects a string")?;
            cx.set_integer(1, text.chars().count() as i64);
            cx.yield_row();
            Ok(())
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standard() -> ExternRegistry {
        let mut registry = ExternRegistry::new();
        registry.load_module(&StandardModule).unwrap();
        registry
    }

    #[test]
    fn test_exact_resolution() {
        let registry = standard();
        let forward = registry.resolve("add", 3, ColumnMask(0b011)).unwrap();
        let backward = registry.resolve("add", 3, ColumnMask(0b101)).unwrap();
        assert_ne!(forward, backward);
        assert!(registry.resolve("add", 3, ColumnMask(0b100)).is_none());
        assert!(registry.resolve("add", 2, ColumnMask(0b11)).is_none());
    }

    #[test]
    fn test_chained_resolution_uses_largest_subset() {
        let registry = standard();
        // All three bound: both registrations qualify with two inputs; the
        // first one found wins.
        let id = registry.resolve("add", 3, ColumnMask(0b111)).unwrap();
        let mut strings = Interner::new();
        let rows = registry
            .call(id, &[Value::Integer(1), Value::Integer(2), Value::Integer(3)], &mut strings)
            .unwrap();
        assert_eq!(rows, vec![vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]]);
    }

    #[test]
    fn test_range_yields_many_rows() {
        let registry = standard();
        let id = registry.resolve("range", 3, ColumnMask(0b011)).unwrap();
        let mut strings = Interner::new();
        let rows = registry
            .call(id, &[Value::Integer(0), Value::Integer(3), Value::None], &mut strings)
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2][2], Value::Integer(2));
    }

    #[test]
    fn test_error_and_panic_become_extern_errors() {
        let mut registry = ExternRegistry::new();
        let failing = registry.register("fail", &[("x", ArgMode::In)], |cx| {
            cx.report_error("nope");
            Ok(())
        });
        let panicking = registry.register("boom", &[("x", ArgMode::In)], |_| panic!("kaboom"));
        let mut strings = Interner::new();
        let err = registry.call(failing, &[Value::Integer(1)], &mut strings).unwrap_err();
        assert_eq!(
            err,
            EngineError::ExternCall {
                name: "fail".to_string(),
                message: "nope".to_string()
            }
        );
        let err = registry.call(panicking, &[Value::Integer(1)], &mut strings).unwrap_err();
        assert!(matches!(err, EngineError::ExternCall { ref message, .. } if message.contains("kaboom")));
    }

    #[test]
    fn test_yield_with_unset_output_is_an_error() {
        let mut registry = ExternRegistry::new();
        let id = registry.register("lazy", &[("x", ArgMode::Out)], |cx| {
            cx.yield_row();
            Ok(())
        });
        let mut strings = Interner::new();
        assert!(registry.call(id, &[Value::None], &mut strings).is_err());
    }

    #[test]
    fn test_string_arguments() {
        let registry = standard();
        let mut strings = Interner::new();
        let text = Value::string(&mut strings, "héllo");
        let id = registry.resolve("length", 2, ColumnMask(0b01)).unwrap();
        let rows = registry.call(id, &[text, Value::None], &mut strings).unwrap();
        assert_eq!(rows[0][1], Value::Integer(5));
    }

    struct Broken;

    impl ExternModule for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn register(&self, _registry: &mut ExternRegistry) -> Result<(), String> {
            Err("missing symbol".to_string())
        }
    }

    #[test]
    fn test_module_load_failure() {
        let mut registry = ExternRegistry::new();
        let err = registry.load_module(&Broken).unwrap_err();
        assert!(matches!(err, EngineError::ModuleLoad { ref module, .. } if module == "broken"));
    }
}
