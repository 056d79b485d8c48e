//! Rhai scripting for user-authored operators
//!
//! An operator script is a Rhai module that defines a single entry point
//! taking the input dataset:
//!
//! ```rhai
//! fn transform_scalars(dataset) {
//!     dataset.scale(2.0);
//! }
//! ```
//!
//! The entry point may mutate `dataset` in place, return nothing, or return
//! an object map whose keys are the result and child-dataset names declared
//! in the operator descriptor:
//!
//! ```rhai
//! fn transform_scalars(dataset) {
//!     #{ hist: dataset.histogram(64) }
//! }
//! ```
//!
//! A script may also define `fn is_cancelable() { true }` to declare that it
//! polls `cancel_requested()` and can stop early.
//!
//! Top-level statements run once when the script is bound, not on every
//! invocation.

pub mod context;
mod engine;

pub use context::{ActiveContext, OperatorContext, SharedOperatorContext};
pub use engine::{Interpreter, InterpreterLock};

use crate::data::DataHandle;
use crate::error::{OperatorError, Result, ResultExt};
use rhai::{CallFnOptions, Dynamic, Scope, AST};
use std::sync::atomic::{AtomicU64, Ordering};

/// Name of the transform entry point
pub const ENTRY_POINT: &str = "transform_scalars";

/// Accepted alternative entry point name
pub const FALLBACK_ENTRY_POINT: &str = "transform";

/// Optional capability hook reporting cancellation support
pub const CANCEL_HOOK: &str = "is_cancelable";

static NEXT_MODULE_ID: AtomicU64 = AtomicU64::new(1);

/// Build a unique module name from an operator label.
pub fn synthetic_module_name(label: &str) -> String {
    let sanitized: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    let sanitized = sanitized.trim_matches('_');
    let stem = if sanitized.is_empty() {
        "operator"
    } else {
        sanitized
    };
    format!(
        "tomo_{}_{}",
        stem,
        NEXT_MODULE_ID.fetch_add(1, Ordering::Relaxed)
    )
}

/// A compiled, bound operator script.
///
/// Built in one step by [`CompiledScript::compile`]; there is no way to
/// obtain a partially bound script.
pub struct CompiledScript {
    /// The compiled AST
    ast: AST,
    /// Variables left behind by the top-level statements
    namespace: Scope<'static>,
    /// The resolved entry point name
    entry_point: &'static str,
    /// Synthetic module name, also the AST source
    module_name: String,
    /// Result of the capability hook
    supports_cancel: bool,
}

impl CompiledScript {
    /// Compile `source`, evaluate its top-level statements, and bind the
    /// entry point and capability hook. Holds the interpreter lock for the
    /// whole sequence.
    pub fn compile(interpreter: &Interpreter, label: &str, source: &str) -> Result<Self> {
        let module_name = synthetic_module_name(label);
        let engine = interpreter.lock();

        let mut ast = engine.compile(source).map_err(|e| OperatorError::Compile {
            module: module_name.clone(),
            message: e.to_string(),
        })?;
        ast.set_source(module_name.as_str());

        let mut namespace = Scope::new();
        engine
            .run_ast_with_scope(&mut namespace, &ast)
            .map_err(|e| OperatorError::Compile {
                module: module_name.clone(),
                message: format!("Failed to create module: {}", e),
            })?;

        let entry_point = find_entry_point(&ast).map_err(|message| OperatorError::Binding {
            module: module_name.clone(),
            message,
        })?;

        let supports_cancel = match script_fn_arity(&ast, CANCEL_HOOK) {
            None => false,
            Some(0) => {
                let mut scope = namespace.clone();
                let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
                let result = engine
                    .call_fn_with_options::<Dynamic>(options, &mut scope, &ast, CANCEL_HOOK, ())
                    .map_err(|e| OperatorError::Binding {
                        module: module_name.clone(),
                        message: format!("Error calling {}: {}", CANCEL_HOOK, e),
                    })?;
                result.as_bool().map_err(|t| OperatorError::Binding {
                    module: module_name.clone(),
                    message: format!("{} must return a bool, found {}", CANCEL_HOOK, t),
                })?
            }
            Some(n) => {
                return Err(OperatorError::Binding {
                    module: module_name,
                    message: format!("{} must take no parameters, found {}", CANCEL_HOOK, n),
                })
            }
        };

        tracing::debug!(
            "Bound '{}' in {} (cancelable: {})",
            entry_point,
            module_name,
            supports_cancel
        );

        Ok(Self {
            ast,
            namespace,
            entry_point,
            module_name,
            supports_cancel,
        })
    }

    /// Call the entry point with `input` as its single argument.
    ///
    /// The operator `context` is active for the duration of the call so that
    /// progress and cancellation functions reach it.
    pub fn invoke(
        &self,
        interpreter: &Interpreter,
        context: &SharedOperatorContext,
        input: &DataHandle,
    ) -> Result<Dynamic> {
        let engine = interpreter.lock();
        let _active = ActiveContext::enter(context.clone());

        let mut scope = self.namespace.clone();
        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
        engine
            .call_fn_with_options::<Dynamic>(
                options,
                &mut scope,
                &self.ast,
                self.entry_point,
                (input.clone(),),
            )
            .with_context(|| {
                format!("Error running '{}' in {}", self.entry_point, self.module_name)
            })
    }

    pub fn entry_point(&self) -> &str {
        self.entry_point
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn supports_cancel(&self) -> bool {
        self.supports_cancel
    }
}

impl std::fmt::Debug for CompiledScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledScript")
            .field("module_name", &self.module_name)
            .field("entry_point", &self.entry_point)
            .field("supports_cancel", &self.supports_cancel)
            .finish()
    }
}

/// Arity of the first script function called `name`, if any.
fn script_fn_arity(ast: &AST, name: &str) -> Option<usize> {
    ast.iter_functions()
        .find(|f| f.name == name)
        .map(|f| f.params.len())
}

fn find_entry_point(ast: &AST) -> std::result::Result<&'static str, String> {
    for name in [ENTRY_POINT, FALLBACK_ENTRY_POINT] {
        let mut arities = ast
            .iter_functions()
            .filter(|f| f.name == name)
            .map(|f| f.params.len())
            .peekable();
        if arities.peek().is_none() {
            continue;
        }
        let arities: Vec<usize> = arities.collect();
        if arities.contains(&1) {
            return Ok(name);
        }
        return Err(format!(
            "'{}' must take exactly one parameter, found {}",
            name, arities[0]
        ));
    }
    Err(format!("Script doesn't have any '{}' function", ENTRY_POINT))
}

/// Built-in operator scripts with their descriptors
pub mod builtins {
    /// A built-in operator: label, script and JSON descriptor
    #[derive(Debug, Clone, Copy)]
    pub struct Builtin {
        pub label: &'static str,
        pub script: &'static str,
        pub descriptor: &'static str,
    }

    /// Identity - returns the dataset unchanged
    pub const IDENTITY: &str = r#"
fn transform_scalars(dataset) {
    dataset
}
"#;

    /// Invert intensities within the current range
    pub const INVERT: &str = r#"
fn transform_scalars(dataset) {
    let lo = dataset.min();
    let hi = dataset.max();
    dataset.scale(-1.0);
    dataset.offset(lo + hi);
}
"#;

    /// Normalize intensities to [0, 1], checking for cancellation per slice
    pub const NORMALIZE: &str = r#"
fn is_cancelable() { true }

fn transform_scalars(dataset) {
    let lo = dataset.min();
    let span = dataset.max() - lo;
    if span == 0.0 {
        return;
    }
    let dims = dataset.dims;
    let slice = dims[0] * dims[1];
    set_progress_maximum(dims[2]);
    for z in 0..dims[2] {
        if cancel_requested() {
            return;
        }
        for i in (z * slice)..((z + 1) * slice) {
            dataset[i] = (dataset[i] - lo) / span;
        }
        set_progress(z + 1);
    }
}
"#;

    /// Intensity histogram as a secondary result
    pub const HISTOGRAM: &str = r#"
fn transform_scalars(dataset) {
    #{ hist: dataset.histogram(32) }
}
"#;

    pub const HISTOGRAM_DESCRIPTOR: &str = r#"{
  "label": "Histogram",
  "results": [{ "name": "hist", "label": "Histogram" }]
}"#;

    /// Threshold segmentation spawning a child dataset
    pub const SEGMENT: &str = r#"
fn transform_scalars(dataset) {
    let hi = dataset.max();
    let mask = dataset.threshold(hi * 0.5, hi);
    #{ segmentation: mask }
}
"#;

    pub const SEGMENT_DESCRIPTOR: &str = r#"{
  "label": "Threshold Segmentation",
  "children": [{ "name": "segmentation", "label": "Segmented Volume" }]
}"#;

    /// All built-in operators
    pub fn all() -> Vec<Builtin> {
        vec![
            Builtin {
                label: "Identity",
                script: IDENTITY,
                descriptor: "{}",
            },
            Builtin {
                label: "Invert",
                script: INVERT,
                descriptor: "{}",
            },
            Builtin {
                label: "Normalize",
                script: NORMALIZE,
                descriptor: "{}",
            },
            Builtin {
                label: "Histogram",
                script: HISTOGRAM,
                descriptor: HISTOGRAM_DESCRIPTOR,
            },
            Builtin {
                label: "Threshold Segmentation",
                script: SEGMENT,
                descriptor: SEGMENT_DESCRIPTOR,
            },
        ]
    }

    /// Look up a built-in by label, case-insensitively
    pub fn find(label: &str) -> Option<Builtin> {
        all()
            .into_iter()
            .find(|b| b.label.eq_ignore_ascii_case(label))
    }
}
