//! Python bindings: the recorder hook plugin and the batch entry points.
//!
//! Host objects are described once at the boundary, as [`Callable`] and
//! [`Value`] trees; everything past that point is plain Rust.

use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use pyo3::prelude::*;
use pyo3::types::{
    PyBool, PyBytes, PyDict, PyFloat, PyFrozenSet, PyInt, PyList, PySet, PyString, PyTuple,
    PyType,
};
use pyo3::wrap_pyfunction;
use tracing::debug;

use crate::config::{
    CoverageMode, PathMatch, RecorderConfig, RunnerConfig, SynthesisPolicy, DEFAULT_CAPTURE_LIMIT,
    DEFAULT_WORKERS, MAX_CAPTURE_LIMIT, MAX_WORKERS,
};
use crate::housekeeping;
use crate::models::{CallSite, Callable, ModuleLink, ObjectValue, Origin, Value};
use crate::recorder::hook::{CallHook, Recorder};
use crate::runner::batch::{self, RunSummary};
use crate::runner::process;
use crate::store::catalog::NOT_CLASS_METHOD;
use crate::store::ledger::LedgerCounts;
use crate::synth::generator;

/// Nesting deeper than this is captured as opaque.
const MAX_VALUE_DEPTH: usize = 64;

// ---------------------------------------------------------------------------
// Host object -> Callable
// ---------------------------------------------------------------------------

fn attr_string(obj: &Bound<'_, PyAny>, name: &str) -> Option<String> {
    obj.getattr(name).ok()?.extract::<String>().ok()
}

fn origin_of(obj: &Bound<'_, PyAny>) -> PyResult<Origin> {
    let inspect = obj.py().import("inspect")?;
    let module = inspect.call_method1("getmodule", (obj,))?;
    if module.is_none() {
        return Ok(Origin::unknown());
    }
    let link = if module.is(obj) {
        ModuleLink::Itself
    } else {
        match attr_string(&module, "__name__") {
            Some(name) => ModuleLink::Named(name),
            None => ModuleLink::Unresolved,
        }
    };
    Ok(Origin {
        module: link,
        file: attr_string(&module, "__file__"),
    })
}

/// Describe a called host object.
pub fn callable_from_py(obj: &Bound<'_, PyAny>) -> PyResult<Callable> {
    let inspect = obj.py().import("inspect")?;
    let origin = origin_of(obj)?;
    let name = attr_string(obj, "__name__");

    if inspect.call_method1("ismethod", (obj,))?.is_truthy()? {
        let receiver = obj.getattr("__self__")?;
        if receiver.is_instance_of::<PyType>() {
            return Ok(Callable::ClassBound {
                name,
                owner: attr_string(&receiver, "__name__"),
                origin,
            });
        }
        return Ok(Callable::InstanceBound { name, origin });
    }

    let qualname = attr_string(obj, "__qualname__");
    if obj.is_instance_of::<PyType>() {
        Ok(Callable::Class {
            name,
            qualname,
            origin,
        })
    } else {
        Ok(Callable::Function {
            name,
            qualname,
            origin,
        })
    }
}

// ---------------------------------------------------------------------------
// Host object -> Value
// ---------------------------------------------------------------------------

fn opaque(obj: &Bound<'_, PyAny>) -> Value {
    let type_name = obj
        .get_type()
        .getattr("__qualname__")
        .ok()
        .and_then(|n| n.extract::<String>().ok())
        .unwrap_or_else(|| "<unknown>".to_string());
    Value::Opaque { type_name }
}

fn defines_own_eq(obj: &Bound<'_, PyAny>) -> PyResult<bool> {
    let own_eq = obj.get_type().getattr("__eq__")?;
    let object_eq = obj
        .py()
        .import("builtins")?
        .getattr("object")?
        .getattr("__eq__")?;
    Ok(!own_eq.is(&object_eq))
}

fn items_from_py<'py>(
    items: impl Iterator<Item = Bound<'py, PyAny>>,
    depth: usize,
) -> Vec<Value> {
    items.map(|item| value_at_depth(&item, depth + 1)).collect()
}

/// Functions, methods, modules and classes carry a `__dict__` too, but are
/// not instances a test could rebuild from their fields.
fn is_code_object(obj: &Bound<'_, PyAny>) -> PyResult<bool> {
    let inspect = obj.py().import("inspect")?;
    for check in ["isroutine", "ismodule", "isclass"] {
        if inspect.call_method1(check, (obj,))?.is_truthy()? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Whether importing `module` and walking `qualname` leads back to `ty`.
fn type_is_importable(ty: &Bound<'_, PyType>, module: &str, qualname: &str) -> bool {
    if module == "builtins" || qualname.contains('<') {
        return false;
    }
    let Ok(mut owner) = ty.py().import(module).map(Bound::into_any) else {
        return false;
    };
    for part in qualname.split('.') {
        match owner.getattr(part) {
            Ok(next) => owner = next,
            Err(_) => return false,
        }
    }
    owner.is(ty)
}

fn object_from_py(obj: &Bound<'_, PyAny>, depth: usize) -> PyResult<Option<Value>> {
    if is_code_object(obj)? {
        return Ok(None);
    }
    let Ok(attrs) = obj.getattr("__dict__") else {
        return Ok(None);
    };
    let Ok(attrs) = attrs.downcast::<PyDict>() else {
        return Ok(None);
    };
    let ty = obj.get_type();
    let (Some(module), Some(type_name)) = (
        attr_string(ty.as_any(), "__module__"),
        attr_string(ty.as_any(), "__qualname__"),
    ) else {
        return Ok(None);
    };
    if !type_is_importable(&ty, &module, &type_name) {
        debug!(module = %module, type_name = %type_name, "instance type cannot be re-imported");
        return Ok(None);
    }

    let mut fields = IndexMap::new();
    for (key, field) in attrs.iter() {
        let Ok(key) = key.extract::<String>() else {
            return Ok(None);
        };
        fields.insert(key, value_at_depth(&field, depth + 1));
    }
    Ok(Some(Value::Object(ObjectValue {
        module,
        type_name,
        fields,
        defines_eq: defines_own_eq(obj)?,
    })))
}

fn value_at_depth(obj: &Bound<'_, PyAny>, depth: usize) -> Value {
    if depth > MAX_VALUE_DEPTH {
        return opaque(obj);
    }
    if obj.is_none() {
        return Value::None;
    }
    if let Ok(b) = obj.downcast::<PyBool>() {
        return Value::Bool(b.is_true());
    }
    if obj.is_instance_of::<PyInt>() {
        return match obj.extract::<i64>() {
            Ok(i) => Value::Int(i),
            Err(_) => match obj.str() {
                Ok(text) => Value::BigInt(text.to_string()),
                Err(_) => opaque(obj),
            },
        };
    }
    if obj.is_instance_of::<PyFloat>() {
        return match obj.extract::<f64>() {
            Ok(f) => Value::Float(f),
            Err(_) => opaque(obj),
        };
    }
    if obj.is_instance_of::<PyString>() {
        return match obj.extract::<String>() {
            Ok(s) => Value::Str(s),
            Err(_) => opaque(obj),
        };
    }
    if let Ok(b) = obj.downcast::<PyBytes>() {
        return Value::Bytes(b.as_bytes().to_vec());
    }
    if let Ok(t) = obj.downcast::<PyTuple>() {
        return Value::Tuple(items_from_py(t.iter(), depth));
    }
    if let Ok(l) = obj.downcast::<PyList>() {
        return Value::List(items_from_py(l.iter(), depth));
    }
    if let Ok(s) = obj.downcast::<PySet>() {
        return Value::Set(items_from_py(s.iter(), depth));
    }
    if let Ok(s) = obj.downcast::<PyFrozenSet>() {
        return Value::Set(items_from_py(s.iter(), depth));
    }
    if let Ok(d) = obj.downcast::<PyDict>() {
        return Value::Dict(
            d.iter()
                .map(|(k, v)| (value_at_depth(&k, depth + 1), value_at_depth(&v, depth + 1)))
                .collect(),
        );
    }
    match object_from_py(obj, depth) {
        Ok(Some(value)) => value,
        _ => opaque(obj),
    }
}

/// Describe a host value. Anything that cannot be described becomes
/// [`Value::Opaque`], which fails serialization later.
pub fn value_from_py(obj: &Bound<'_, PyAny>) -> Value {
    value_at_depth(obj, 0)
}

fn kw_from_py(kw_args: Option<&Bound<'_, PyAny>>) -> PyResult<IndexMap<String, Value>> {
    let mut out = IndexMap::new();
    let Some(kw_args) = kw_args.filter(|kw| !kw.is_none()) else {
        return Ok(out);
    };
    for (key, value) in kw_args.downcast::<PyDict>()?.iter() {
        out.insert(key.extract::<String>()?, value_from_py(&value));
    }
    Ok(out)
}

fn pos_from_py(pos_args: &Bound<'_, PyAny>) -> PyResult<Vec<Value>> {
    pos_args
        .try_iter()?
        .map(|item| item.map(|item| value_from_py(&item)))
        .collect()
}

// ---------------------------------------------------------------------------
// Recorder pyclass
// ---------------------------------------------------------------------------

struct HostCall {
    site: CallSite,
    callable: Callable,
    pos_args: Vec<Value>,
    kw_args: IndexMap<String, Value>,
}

fn describe_call(
    call_site: &Bound<'_, PyAny>,
    callable: &Bound<'_, PyAny>,
    pos_args: &Bound<'_, PyAny>,
    kw_args: Option<&Bound<'_, PyAny>>,
) -> PyResult<HostCall> {
    let (unit, site_id) = call_site.extract::<(String, u64)>()?;
    Ok(HostCall {
        site: CallSite::new(unit, site_id),
        callable: callable_from_py(callable)?,
        pos_args: pos_from_py(pos_args)?,
        kw_args: kw_from_py(kw_args)?,
    })
}

/// Hook plugin handed to the instrumentation host. Holds the counters of one
/// capture run.
#[pyclass(name = "Recorder")]
pub struct PyRecorder {
    inner: Mutex<Recorder>,
}

#[pymethods]
impl PyRecorder {
    #[new]
    #[pyo3(signature = (target_path=None, log_base=None, capture_limit=None, path_match=None))]
    fn new(
        target_path: Option<String>,
        log_base: Option<String>,
        capture_limit: Option<i64>,
        path_match: Option<&str>,
    ) -> PyResult<Self> {
        let mut config = RecorderConfig::from_env();
        if let Some(target) = target_path {
            config.target_prefix = target;
        }
        if let Some(base) = log_base {
            config.log_base = PathBuf::from(base);
        }
        if let Some(limit) = capture_limit {
            config = config.with_capture_limit(limit);
        }
        if let Some(raw) = path_match {
            config.match_mode = PathMatch::parse(raw).ok_or_else(|| {
                pyo3::exceptions::PyValueError::new_err(format!("unknown path match mode {raw:?}"))
            })?;
        }
        Ok(Self {
            inner: Mutex::new(Recorder::new(config)),
        })
    }

    #[getter]
    fn run_dir(&self) -> String {
        self.inner.lock().run_dir().display().to_string()
    }

    /// Captures persisted so far in this run.
    #[getter]
    fn captured(&self) -> u64 {
        self.inner.lock().next_sequence()
    }

    #[pyo3(signature = (call_site, callable, pos_args, kw_args=None))]
    fn on_call(
        &self,
        call_site: &Bound<'_, PyAny>,
        callable: &Bound<'_, PyAny>,
        pos_args: &Bound<'_, PyAny>,
        kw_args: Option<&Bound<'_, PyAny>>,
    ) {
        let _ = (call_site, callable, pos_args, kw_args);
    }

    /// Never raises into the traced program.
    #[pyo3(signature = (call_site, result, callable, pos_args, kw_args=None))]
    fn on_return(
        &self,
        call_site: &Bound<'_, PyAny>,
        result: &Bound<'_, PyAny>,
        callable: &Bound<'_, PyAny>,
        pos_args: &Bound<'_, PyAny>,
        kw_args: Option<&Bound<'_, PyAny>>,
    ) {
        let call = match describe_call(call_site, callable, pos_args, kw_args) {
            Ok(call) => call,
            Err(e) => {
                debug!(error = %e, "cannot describe host call, skipping");
                return;
            }
        };
        let result = value_from_py(result);
        self.inner.lock().on_return(
            &call.site,
            &result,
            &call.callable,
            &call.pos_args,
            &call.kw_args,
        );
    }
}

// ---------------------------------------------------------------------------
// Batch entry points
// ---------------------------------------------------------------------------

fn counts_to_py(py: Python<'_>, counts: &LedgerCounts) -> PyResult<PyObject> {
    let out = PyDict::new(py);
    for (label, bucket) in [
        ("success", &counts.success),
        ("failure", &counts.failure),
        ("timeout", &counts.timeout),
    ] {
        let per_symbol = PyDict::new(py);
        for (symbol, n) in bucket {
            per_symbol.set_item(symbol, *n)?;
        }
        out.set_item(label, per_symbol)?;
    }
    Ok(out.into())
}

fn summary_to_py(py: Python<'_>, summary: &RunSummary) -> PyResult<PyObject> {
    let out = PyDict::new(py);
    out.set_item("submitted", summary.submitted)?;
    out.set_item("passed", summary.passed)?;
    out.set_item("failed", summary.failed)?;
    out.set_item("timed_out", summary.timed_out)?;
    out.set_item("counts", counts_to_py(py, &summary.counts)?)?;
    out.set_item(
        "counts_path",
        summary.counts_path.as_ref().map(|p| p.display().to_string()),
    )?;
    Ok(out.into())
}

fn parse_coverage(raw: &str) -> PyResult<CoverageMode> {
    match raw.trim().to_lowercase().as_str() {
        "off" | "" => Ok(CoverageMode::Off),
        "append" => Ok(CoverageMode::Append),
        "parallel" => Ok(CoverageMode::Parallel),
        other => Err(pyo3::exceptions::PyValueError::new_err(format!(
            "unknown coverage mode {other:?}"
        ))),
    }
}

#[allow(clippy::too_many_arguments)]
fn runner_config(
    ledger_dir: &str,
    log_base: Option<String>,
    interpreter: Option<String>,
    workers: Option<i64>,
    timeout_secs: Option<u64>,
    coverage: &str,
    coverage_data: Option<String>,
    python_path: Option<Vec<String>>,
) -> PyResult<RunnerConfig> {
    let mut config = RunnerConfig::from_env();
    config.ledger_dir = PathBuf::from(ledger_dir);
    if let Some(base) = log_base {
        config.log_base = PathBuf::from(base);
    }
    if let Some(interpreter) = interpreter {
        config.interpreter = interpreter;
    }
    if let Some(workers) = workers {
        config = config.with_workers(workers);
    }
    if let Some(secs) = timeout_secs {
        config.timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }
    config.coverage = parse_coverage(coverage)?;
    config.coverage_data = coverage_data.map(PathBuf::from);
    if let Some(paths) = python_path {
        config.python_path = paths.into_iter().map(PathBuf::from).collect();
    }
    Ok(config)
}

/// Polls the host's signal handlers; a pending KeyboardInterrupt stops the run.
fn host_interrupted() -> bool {
    Python::with_gil(|py| py.check_signals().is_err())
}

#[pyfunction]
#[pyo3(signature = (log_base, out_base, workers=DEFAULT_WORKERS as i64, skip_no_arg_calls=None))]
fn generate_tests(
    py: Python<'_>,
    log_base: &str,
    out_base: &str,
    workers: i64,
    skip_no_arg_calls: Option<bool>,
) -> PyResult<PyObject> {
    let mut policy = SynthesisPolicy::from_env();
    if let Some(skip) = skip_no_arg_calls {
        policy.skip_no_arg_calls = skip;
    }
    let workers = workers.clamp(1, MAX_WORKERS as i64) as usize;
    let (log_base, out_base) = (PathBuf::from(log_base), PathBuf::from(out_base));
    let report =
        py.allow_threads(|| generator::generate_tests(&log_base, &out_base, &policy, workers))?;

    let out = PyDict::new(py);
    let generated: Vec<String> = report
        .generated
        .iter()
        .map(|p| p.display().to_string())
        .collect();
    out.set_item("generated", generated)?;
    let skipped = PyDict::new(py);
    for (reason, n) in &report.skipped {
        skipped.set_item(reason.as_str(), *n)?;
    }
    out.set_item("skipped", skipped)?;
    out.set_item("malformed", report.malformed)?;
    Ok(out.into())
}

#[pyfunction]
#[pyo3(signature = (
    test_dir, ledger_dir, log_base=None, interpreter=None, workers=None,
    timeout_secs=None, coverage="off", coverage_data=None, python_path=None
))]
#[allow(clippy::too_many_arguments)]
fn run_tests(
    py: Python<'_>,
    test_dir: &str,
    ledger_dir: &str,
    log_base: Option<String>,
    interpreter: Option<String>,
    workers: Option<i64>,
    timeout_secs: Option<u64>,
    coverage: &str,
    coverage_data: Option<String>,
    python_path: Option<Vec<String>>,
) -> PyResult<PyObject> {
    let config = runner_config(
        ledger_dir,
        log_base,
        interpreter,
        workers,
        timeout_secs,
        coverage,
        coverage_data,
        python_path,
    )?;
    let tests = batch::discover_tests(Path::new(test_dir));
    let summary = py.allow_threads(|| batch::run_batch(&tests, &config, host_interrupted))?;
    if config.coverage == CoverageMode::Parallel {
        py.allow_threads(|| process::combine_coverage(&config))?;
    }
    summary_to_py(py, &summary)
}

#[pyfunction]
#[pyo3(signature = (
    success_ledger, ledger_dir, log_base=None, interpreter=None, workers=None,
    timeout_secs=None, coverage="off", coverage_data=None, python_path=None
))]
#[allow(clippy::too_many_arguments)]
fn rerun_successes(
    py: Python<'_>,
    success_ledger: &str,
    ledger_dir: &str,
    log_base: Option<String>,
    interpreter: Option<String>,
    workers: Option<i64>,
    timeout_secs: Option<u64>,
    coverage: &str,
    coverage_data: Option<String>,
    python_path: Option<Vec<String>>,
) -> PyResult<PyObject> {
    let config = runner_config(
        ledger_dir,
        log_base,
        interpreter,
        workers,
        timeout_secs,
        coverage,
        coverage_data,
        python_path,
    )?;
    let ledger = PathBuf::from(success_ledger);
    let summary =
        py.allow_threads(|| batch::rerun_successes(&ledger, &config, host_interrupted))?;
    if config.coverage == CoverageMode::Parallel {
        py.allow_threads(|| process::combine_coverage(&config))?;
    }
    summary_to_py(py, &summary)
}

#[pyfunction]
fn clear_coverage_data(dir: &str) -> PyResult<Vec<String>> {
    Ok(housekeeping::clear_coverage_data(Path::new(dir))?
        .iter()
        .map(|p| p.display().to_string())
        .collect())
}

#[pyfunction]
fn prune_empty_runs(log_base: &str) -> PyResult<Vec<String>> {
    Ok(housekeeping::prune_empty_runs(Path::new(log_base))?
        .iter()
        .map(|p| p.display().to_string())
        .collect())
}

#[pymodule]
fn _callrec_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add("DEFAULT_CAPTURE_LIMIT", DEFAULT_CAPTURE_LIMIT)?;
    m.add("MAX_CAPTURE_LIMIT", MAX_CAPTURE_LIMIT)?;
    m.add("DEFAULT_WORKERS", DEFAULT_WORKERS)?;
    m.add("NOT_CLASS_METHOD", NOT_CLASS_METHOD)?;

    m.add_class::<PyRecorder>()?;

    m.add_function(wrap_pyfunction!(generate_tests, m)?)?;
    m.add_function(wrap_pyfunction!(run_tests, m)?)?;
    m.add_function(wrap_pyfunction!(rerun_successes, m)?)?;
    m.add_function(wrap_pyfunction!(clear_coverage_data, m)?)?;
    m.add_function(wrap_pyfunction!(prune_empty_runs, m)?)?;
    Ok(())
}

#[cfg(all(test, feature = "python"))]
mod tests {
    use super::*;
    use std::ffi::CStr;

    const SHAPES: &CStr = c"
class Point:
    def __init__(self, x, y):
        self.x = x
        self.y = y

    @classmethod
    def origin(cls):
        return cls(0, 0)

    def norm(self):
        return abs(self.x) + abs(self.y)


class Money:
    def __init__(self, cents):
        self.cents = cents

    def __eq__(self, other):
        return isinstance(other, Money) and self.cents == other.cents


def area(w, h):
    return w * h


def local_point():
    class Local:
        pass

    return Local()
";

    /// Each test registers the fixture under its own module name so that
    /// concurrent tests never replace each other's `sys.modules` entry.
    fn with_shapes(name: &CStr, f: impl FnOnce(&Bound<'_, PyModule>)) {
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| {
            let module = PyModule::from_code(py, SHAPES, c"shapes.py", name).unwrap();
            f(&module);
        });
    }

    fn eval<'py>(module: &Bound<'py, PyModule>, expr: &CStr) -> Bound<'py, PyAny> {
        module.py().eval(expr, Some(&module.dict()), None).unwrap()
    }

    #[test]
    fn test_classmethod_is_class_bound() {
        with_shapes(c"callrec_shapes_cls", |m| {
            match callable_from_py(&eval(m, c"Point.origin")).unwrap() {
                Callable::ClassBound {
                    name,
                    owner,
                    origin,
                } => {
                    assert_eq!(name.as_deref(), Some("origin"));
                    assert_eq!(owner.as_deref(), Some("Point"));
                    assert_eq!(
                        origin.module,
                        ModuleLink::Named("callrec_shapes_cls".to_string())
                    );
                }
                other => panic!("expected a class-bound method, got {other:?}"),
            }
        });
    }

    #[test]
    fn test_instance_method_is_instance_bound() {
        with_shapes(c"callrec_shapes_inst", |m| {
            let callable = callable_from_py(&eval(m, c"Point(1, 2).norm")).unwrap();
            assert!(matches!(
                callable,
                Callable::InstanceBound { name: Some(ref n), .. } if n == "norm"
            ));
        });
    }

    #[test]
    fn test_functions_and_classes() {
        with_shapes(c"callrec_shapes_fn", |m| {
            assert!(matches!(
                callable_from_py(&eval(m, c"area")).unwrap(),
                Callable::Function { qualname: Some(ref q), .. } if q == "area"
            ));
            assert!(matches!(
                callable_from_py(&eval(m, c"Point")).unwrap(),
                Callable::Class { qualname: Some(ref q), .. } if q == "Point"
            ));
        });
    }

    #[test]
    fn test_defines_own_eq() {
        with_shapes(c"callrec_shapes_eq", |m| {
            assert!(defines_own_eq(&eval(m, c"Money(5)")).unwrap());
            assert!(!defines_own_eq(&eval(m, c"Point(1, 2)")).unwrap());
        });
    }

    #[test]
    fn test_plain_values() {
        with_shapes(c"callrec_shapes_plain", |m| {
            assert_eq!(value_from_py(&eval(m, c"5")), Value::Int(5));
            assert_eq!(
                value_from_py(&eval(m, c"2 ** 80")),
                Value::BigInt("1208925819614629174706176".to_string())
            );
            assert_eq!(
                value_from_py(&eval(m, c"b'\\x00\\xff'")),
                Value::Bytes(vec![0x00, 0xff])
            );
            assert_eq!(
                value_from_py(&eval(m, c"float('-inf')")),
                Value::Float(f64::NEG_INFINITY)
            );
            assert_eq!(
                value_from_py(&eval(m, c"{3}")),
                Value::Set(vec![Value::Int(3)])
            );
            assert_eq!(
                value_from_py(&eval(m, c"{'a': (1, [True, None])}")),
                Value::Dict(vec![(
                    Value::str("a"),
                    Value::Tuple(vec![
                        Value::Int(1),
                        Value::List(vec![Value::Bool(true), Value::None]),
                    ]),
                )])
            );
        });
    }

    #[test]
    fn test_instance_becomes_object() {
        with_shapes(c"callrec_shapes_obj", |m| {
            let expected = ObjectValue::new("callrec_shapes_obj", "Point")
                .with_field("x", Value::Int(1))
                .with_field("y", Value::Int(2));
            assert_eq!(
                value_from_py(&eval(m, c"Point(1, 2)")),
                Value::Object(expected)
            );
            match value_from_py(&eval(m, c"Money(5)")) {
                Value::Object(money) => assert!(money.defines_eq),
                other => panic!("expected an object, got {other:?}"),
            }
        });
    }

    #[test]
    fn test_code_objects_and_unimportable_types_are_opaque() {
        with_shapes(c"callrec_shapes_opaque", |m| {
            for expr in [
                c"lambda: 0",
                c"area",
                c"Point",
                c"Point.origin",
                c"Point(0, 0).norm",
                c"local_point()",
                c"Exception('boom')",
            ] {
                let value = value_from_py(&eval(m, expr));
                assert!(matches!(value, Value::Opaque { .. }), "{expr:?}: {value:?}");
            }
            assert!(matches!(value_from_py(m.as_any()), Value::Opaque { .. }));

            match value_from_py(&eval(m, c"Point(1, lambda: 0)")) {
                Value::Object(point) => {
                    assert!(matches!(point.fields["y"], Value::Opaque { .. }));
                }
                other => panic!("expected an object, got {other:?}"),
            }
        });
    }
}
