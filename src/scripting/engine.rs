//! Process-wide Rhai interpreter.
//!
//! There is exactly one interpreter per process unless a caller builds its
//! own with [`Interpreter::new`]. Every compile, namespace evaluation,
//! function lookup and invocation goes through [`Interpreter::lock`]; the
//! returned guard is the only path to the underlying `Engine`, so holding it
//! is the interpreter's global execution lock. The lock has no timeout.
//!
//! ## Script API
//!
//! Volumes (`DataObject` values holding an image):
//! - `new_volume(x, y, z)` - zero-filled volume
//! - `.dims`, `.spacing`, `.origin`, `.len`, `.is_volume`, `.is_table`
//! - `get(i)`, `set(i, v)`, `get(x, y, z)`, `set(x, y, z, v)`, `d[i]`
//! - `scalars()`, `set_scalars(array)`, `fill(v)`, `scale(f)`, `offset(v)`
//! - `min()`, `max()`, `mean()`, `threshold(lo, hi)`, `copy()`
//! - `set_spacing(x, y, z)`, `histogram(bins)`
//!
//! Tables (`DataObject` values holding a table):
//! - `new_table(["col", ...])`, `add_row([...])`, `row(i)`, `.row_count`, `.columns`
//!
//! Operator context:
//! - `cancel_requested()`, `set_progress(v)`, `set_progress_maximum(v)`, `progress()`

use crate::config::InterpreterLimits;
use crate::data::{DataHandle, ImageData, Table};
use crate::error::OperatorError;
use crate::scripting::context::with_active;
use rhai::{Array, Dynamic, Engine, EvalAltResult, FLOAT, INT};
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

type FnResult<T> = Result<T, Box<EvalAltResult>>;

static GLOBAL: OnceLock<Arc<Interpreter>> = OnceLock::new();

/// The embedded interpreter and its execution lock.
pub struct Interpreter {
    engine: Mutex<Engine>,
    limits: InterpreterLimits,
}

/// Scoped hold on the interpreter lock. Dereferences to the engine.
pub struct InterpreterLock<'a> {
    guard: MutexGuard<'a, Engine>,
}

impl Deref for InterpreterLock<'_> {
    type Target = Engine;

    fn deref(&self) -> &Engine {
        &self.guard
    }
}

impl Interpreter {
    /// Create a standalone interpreter with the given limits
    pub fn new(limits: &InterpreterLimits) -> Self {
        let mut engine = Engine::new();
        Self::configure_engine(&mut engine, limits);
        Self {
            engine: Mutex::new(engine),
            limits: limits.clone(),
        }
    }

    /// Initialize the process-wide interpreter. Later calls return the
    /// existing instance; differing limits are ignored with a warning.
    pub fn init_global(limits: &InterpreterLimits) -> Arc<Interpreter> {
        let global = GLOBAL.get_or_init(|| {
            tracing::debug!("Initializing shared interpreter");
            Arc::new(Interpreter::new(limits))
        });
        if &global.limits != limits {
            tracing::warn!("Shared interpreter already initialized; ignoring new limits");
        }
        global.clone()
    }

    /// The process-wide interpreter, created with default limits on first use
    pub fn global() -> Arc<Interpreter> {
        GLOBAL
            .get_or_init(|| Arc::new(Interpreter::new(&InterpreterLimits::default())))
            .clone()
    }

    /// Acquire the interpreter lock. Blocks while another thread holds it.
    pub fn lock(&self) -> InterpreterLock<'_> {
        InterpreterLock {
            guard: self.engine.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    pub fn limits(&self) -> &InterpreterLimits {
        &self.limits
    }

    /// Configure the Rhai engine with safety limits and the data API
    fn configure_engine(engine: &mut Engine, limits: &InterpreterLimits) {
        // Set safety limits
        engine.set_max_expr_depths(limits.max_expr_depth, limits.max_function_expr_depth);
        engine.set_max_call_levels(limits.max_call_levels);
        engine.set_max_operations(limits.max_operations);
        engine.set_max_string_size(limits.max_string_size);
        engine.set_max_array_size(limits.max_array_size);
        engine.set_max_map_size(limits.max_map_size);

        // Script output goes to the log instead of stdout
        engine.on_print(|text| tracing::info!(target: "tomo_operators::script", "{}", text));
        engine.on_debug(|text, source, pos| {
            tracing::debug!(
                target: "tomo_operators::script",
                "[{}] {:?}: {}",
                source.unwrap_or("script"),
                pos,
                text
            )
        });

        engine.register_type_with_name::<DataHandle>("DataObject");
        engine.register_fn("to_string", |d: &mut DataHandle| d.to_string());
        engine.register_fn("to_debug", |d: &mut DataHandle| format!("{:?}", d));
        engine.register_get("is_volume", |d: &mut DataHandle| {
            d.read().as_image().is_some()
        });
        engine.register_get("is_table", |d: &mut DataHandle| d.read().as_table().is_some());

        Self::register_volume_api(engine, limits);
        Self::register_table_api(engine);
        Self::register_context_api(engine);
    }

    fn register_volume_api(engine: &mut Engine, limits: &InterpreterLimits) {
        let max_voxels = limits.max_volume_voxels;
        engine.register_fn(
            "new_volume",
            move |x: INT, y: INT, z: INT| -> FnResult<DataHandle> {
                let dims = [to_index(x)?, to_index(y)?, to_index(z)?];
                let count = ImageData::voxel_count(dims).map_err(data_error)?;
                within_limit("volume voxels", count, max_voxels)?;
                ImageData::new(dims)
                    .map(DataHandle::from_image)
                    .map_err(data_error)
            },
        );

        engine.register_get("dims", |d: &mut DataHandle| -> FnResult<Array> {
            with_image(d, |img| {
                img.dims().iter().map(|&n| Dynamic::from(n as INT)).collect()
            })
        });
        engine.register_get("spacing", |d: &mut DataHandle| -> FnResult<Array> {
            with_image(d, |img| img.spacing().iter().map(|&s| Dynamic::from(s)).collect())
        });
        engine.register_get("origin", |d: &mut DataHandle| -> FnResult<Array> {
            with_image(d, |img| img.origin().iter().map(|&s| Dynamic::from(s)).collect())
        });
        engine.register_get("len", |d: &mut DataHandle| -> FnResult<INT> {
            with_image(d, |img| img.len() as INT)
        });

        engine.register_fn("get", |d: &mut DataHandle, i: INT| -> FnResult<FLOAT> {
            let i = to_index(i)?;
            with_image(d, |img| img.get(i))?.ok_or_else(|| out_of_range(i))
        });
        engine.register_fn(
            "get",
            |d: &mut DataHandle, x: INT, y: INT, z: INT| -> FnResult<FLOAT> {
                let (x, y, z) = (to_index(x)?, to_index(y)?, to_index(z)?);
                with_image(d, |img| img.index_of(x, y, z).and_then(|i| img.get(i)))?
                    .ok_or_else(|| format!("voxel ({}, {}, {}) is outside the volume", x, y, z).into())
            },
        );
        engine.register_indexer_get(|d: &mut DataHandle, i: INT| -> FnResult<FLOAT> {
            let i = to_index(i)?;
            with_image(d, |img| img.get(i))?.ok_or_else(|| out_of_range(i))
        });

        engine.register_fn("set", |d: &mut DataHandle, i: INT, v: FLOAT| set_voxel(d, i, v));
        engine.register_fn("set", |d: &mut DataHandle, i: INT, v: INT| {
            set_voxel(d, i, v as FLOAT)
        });
        engine.register_fn(
            "set",
            |d: &mut DataHandle, x: INT, y: INT, z: INT, v: FLOAT| -> FnResult<()> {
                let (x, y, z) = (to_index(x)?, to_index(y)?, to_index(z)?);
                let index = with_image(d, |img| img.index_of(x, y, z))?.ok_or_else(
                    || -> Box<EvalAltResult> {
                        format!("voxel ({}, {}, {}) is outside the volume", x, y, z).into()
                    },
                )?;
                set_voxel(d, index as INT, v)
            },
        );
        engine.register_indexer_set(|d: &mut DataHandle, i: INT, v: FLOAT| set_voxel(d, i, v));

        engine.register_fn("scalars", |d: &mut DataHandle| -> FnResult<Array> {
            with_image(d, |img| img.scalars().iter().map(|&v| Dynamic::from(v)).collect())
        });
        engine.register_fn(
            "set_scalars",
            |d: &mut DataHandle, values: Array| -> FnResult<()> {
                let values = values
                    .iter()
                    .map(as_number)
                    .collect::<FnResult<Vec<FLOAT>>>()?;
                with_image_mut(d, |img| img.set_scalars(values))?
                    .map_err(|e| e.to_string().into())
            },
        );

        engine.register_fn("fill", |d: &mut DataHandle, v: FLOAT| {
            with_image_mut(d, |img| img.fill(v))
        });
        engine.register_fn("fill", |d: &mut DataHandle, v: INT| {
            with_image_mut(d, |img| img.fill(v as FLOAT))
        });
        engine.register_fn("scale", |d: &mut DataHandle, f: FLOAT| {
            with_image_mut(d, |img| img.scalars_mut().iter_mut().for_each(|v| *v *= f))
        });
        engine.register_fn("offset", |d: &mut DataHandle, o: FLOAT| {
            with_image_mut(d, |img| img.scalars_mut().iter_mut().for_each(|v| *v += o))
        });

        engine.register_fn("min", |d: &mut DataHandle| -> FnResult<FLOAT> {
            with_image(d, |img| img.range().map_or(FLOAT::NAN, |(lo, _)| lo))
        });
        engine.register_fn("max", |d: &mut DataHandle| -> FnResult<FLOAT> {
            with_image(d, |img| img.range().map_or(FLOAT::NAN, |(_, hi)| hi))
        });
        engine.register_fn("mean", |d: &mut DataHandle| -> FnResult<FLOAT> {
            with_image(d, |img| img.mean().unwrap_or(FLOAT::NAN))
        });

        engine.register_fn(
            "threshold",
            |d: &mut DataHandle, lo: FLOAT, hi: FLOAT| -> FnResult<DataHandle> {
                with_image(d, |img| DataHandle::from_image(img.threshold(lo, hi)))
            },
        );
        engine.register_fn("copy", |d: &mut DataHandle| d.deep_copy());
        engine.register_fn(
            "set_spacing",
            |d: &mut DataHandle, x: FLOAT, y: FLOAT, z: FLOAT| {
                with_image_mut(d, |img| img.set_spacing([x, y, z]))
            },
        );
        let max_bins = limits.max_histogram_bins;
        engine.register_fn(
            "histogram",
            move |d: &mut DataHandle, bins: INT| -> FnResult<DataHandle> {
                let bins = to_index(bins)?;
                within_limit("histogram bins", bins, max_bins)?;
                with_image(d, |img| img.histogram(bins))?
                    .map(DataHandle::from_table)
                    .map_err(data_error)
            },
        );
    }

    fn register_table_api(engine: &mut Engine) {
        engine.register_fn("new_table", |columns: Array| -> FnResult<DataHandle> {
            let columns = columns
                .into_iter()
                .map(|c| {
                    c.into_string()
                        .map_err(|t| format!("column names must be strings, found {}", t).into())
                })
                .collect::<FnResult<Vec<String>>>()?;
            Ok(DataHandle::from_table(Table::new(columns)))
        });

        engine.register_fn("add_row", |t: &mut DataHandle, row: Array| -> FnResult<()> {
            let row = row.iter().map(as_number).collect::<FnResult<Vec<FLOAT>>>()?;
            with_table_mut(t, |table| table.add_row(row))?.map_err(|e| e.to_string().into())
        });
        engine.register_fn("row", |t: &mut DataHandle, i: INT| -> FnResult<Array> {
            let i = to_index(i)?;
            with_table(t, |table| {
                table
                    .rows()
                    .get(i)
                    .map(|r| r.iter().map(|&v| Dynamic::from(v)).collect::<Array>())
            })?
            .ok_or_else(|| out_of_range(i))
        });
        engine.register_get("row_count", |t: &mut DataHandle| -> FnResult<INT> {
            with_table(t, |table| table.row_count() as INT)
        });
        engine.register_get("columns", |t: &mut DataHandle| -> FnResult<Array> {
            with_table(t, |table| {
                table.columns().iter().map(|c| Dynamic::from(c.clone())).collect()
            })
        });
    }

    fn register_context_api(engine: &mut Engine) {
        engine.register_fn("cancel_requested", || {
            with_active(|ctx| ctx.is_cancel_requested()).unwrap_or(false)
        });
        engine.register_fn("set_progress", |value: INT| {
            with_active(|ctx| ctx.set_progress(value));
        });
        engine.register_fn("set_progress_maximum", |value: INT| {
            with_active(|ctx| ctx.set_progress_maximum(value));
        });
        engine.register_fn("progress", || with_active(|ctx| ctx.progress()).unwrap_or(0));
    }
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("limits", &self.limits)
            .finish()
    }
}

fn to_index(value: INT) -> FnResult<usize> {
    usize::try_from(value).map_err(|_| format!("negative index {}", value).into())
}

/// A `limit` of 0 means unlimited.
fn within_limit(what: &str, value: usize, limit: usize) -> FnResult<()> {
    if limit > 0 && value > limit {
        Err(format!("{} {} exceeds the limit of {}", what, value, limit).into())
    } else {
        Ok(())
    }
}

fn data_error(err: OperatorError) -> Box<EvalAltResult> {
    err.to_string().into()
}

fn out_of_range(index: usize) -> Box<EvalAltResult> {
    format!("index {} is out of range", index).into()
}

fn as_number(value: &Dynamic) -> FnResult<FLOAT> {
    value
        .as_float()
        .or_else(|_| value.as_int().map(|i| i as FLOAT))
        .map_err(|t| format!("expected a number, found {}", t).into())
}

fn set_voxel(d: &mut DataHandle, index: INT, value: FLOAT) -> FnResult<()> {
    let index = to_index(index)?;
    if with_image_mut(d, |img| img.set(index, value))? {
        Ok(())
    } else {
        Err(out_of_range(index))
    }
}

fn with_image<R>(d: &DataHandle, f: impl FnOnce(&ImageData) -> R) -> FnResult<R> {
    let object = d.read();
    object
        .as_image()
        .map(f)
        .ok_or_else(|| "data object is not a volume".into())
}

fn with_image_mut<R>(d: &DataHandle, f: impl FnOnce(&mut ImageData) -> R) -> FnResult<R> {
    let mut object = d.write();
    object
        .as_image_mut()
        .map(f)
        .ok_or_else(|| "data object is not a volume".into())
}

fn with_table<R>(d: &DataHandle, f: impl FnOnce(&Table) -> R) -> FnResult<R> {
    let object = d.read();
    object
        .as_table()
        .map(f)
        .ok_or_else(|| "data object is not a table".into())
}

fn with_table_mut<R>(d: &DataHandle, f: impl FnOnce(&mut Table) -> R) -> FnResult<R> {
    let mut object = d.write();
    object
        .as_table_mut()
        .map(f)
        .ok_or_else(|| "data object is not a table".into())
}
