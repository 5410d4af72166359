//! Identity resolution for captured callables.
//!
//! Turns a [`Callable`] into the symbol name, optional owning type, and the
//! import statement that brings it back into scope. Resolution never fails
//! outright: every missing piece of host metadata degrades to an absent field.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::{Callable, ModuleLink, ResolvedIdentity};

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

static MODULE_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*$").unwrap()
});

pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER_RE.is_match(name)
}

fn is_module_path(name: &str) -> bool {
    MODULE_PATH_RE.is_match(name)
}

/// Owner type derived from a dotted qualified path.
///
/// `Ok(None)` is a plain function, `Ok(Some(owner))` a function reached through
/// a class, `Err(())` a nesting depth that cannot be re-imported.
fn owner_from_qualname(qualname: &str) -> Result<Option<String>, ()> {
    let segments: Vec<&str> = qualname.split('.').collect();
    match segments.as_slice() {
        [_] => Ok(None),
        [owner, _] => Ok(Some((*owner).to_string())),
        _ => Err(()),
    }
}

/// Resolve a callable's reconstructable identity.
pub fn resolve(callable: &Callable) -> ResolvedIdentity {
    let Some(symbol_name) = callable.name().map(str::to_string) else {
        return ResolvedIdentity::default();
    };
    let symbol_only = ResolvedIdentity {
        symbol_name: Some(symbol_name.clone()),
        owner_type_name: None,
        import_expression: None,
    };

    let owner_type_name = match callable {
        Callable::ClassBound { owner, .. } => match owner {
            Some(owner) => Some(owner.clone()),
            None => return symbol_only,
        },
        // The receiver cannot be rebuilt generically.
        Callable::InstanceBound { .. } => return symbol_only,
        Callable::Function { qualname, .. } | Callable::Class { qualname, .. } => {
            let Some(qualname) = qualname.as_deref() else {
                return symbol_only;
            };
            match owner_from_qualname(qualname) {
                Ok(owner) => owner,
                Err(()) => return symbol_only,
            }
        }
    };

    let binding = owner_type_name.as_deref().unwrap_or(&symbol_name);
    let import_expression = if is_identifier(binding) {
        match &callable.origin().module {
            ModuleLink::Itself => Some(format!("import {binding}")),
            ModuleLink::Named(module) if is_module_path(module) => {
                Some(format!("from {module} import {binding}"))
            }
            ModuleLink::Named(_) | ModuleLink::Unresolved => None,
        }
    } else {
        None
    };

    ResolvedIdentity {
        symbol_name: Some(symbol_name),
        owner_type_name,
        import_expression,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Origin;

    fn origin() -> Origin {
        Origin::new("pdfrw.objects", "/src/pdfrw/pdfrw/objects.py")
    }

    #[test]
    fn test_plain_function() {
        let identity = resolve(&Callable::function("add", "add", origin()));
        assert_eq!(identity.symbol_name.as_deref(), Some("add"));
        assert_eq!(identity.owner_type_name, None);
        assert_eq!(
            identity.import_expression.as_deref(),
            Some("from pdfrw.objects import add")
        );
    }

    #[test]
    fn test_static_method_through_class() {
        let identity = resolve(&Callable::function("encode", "PdfString.encode", origin()));
        assert_eq!(identity.owner_type_name.as_deref(), Some("PdfString"));
        assert_eq!(
            identity.import_expression.as_deref(),
            Some("from pdfrw.objects import PdfString")
        );
    }

    #[test]
    fn test_deep_nesting_keeps_symbol_only() {
        let identity = resolve(&Callable::function(
            "inner",
            "outer.<locals>.inner",
            origin(),
        ));
        assert_eq!(identity.symbol_name.as_deref(), Some("inner"));
        assert_eq!(identity.owner_type_name, None);
        assert_eq!(identity.import_expression, None);
    }

    #[test]
    fn test_class_bound_method() {
        let callable = Callable::ClassBound {
            name: Some("from_dict".to_string()),
            owner: Some("Sentence".to_string()),
            origin: Origin::new("flair.data", "/src/flair/flair/data.py"),
        };
        let identity = resolve(&callable);
        assert_eq!(identity.owner_type_name.as_deref(), Some("Sentence"));
        assert_eq!(
            identity.import_expression.as_deref(),
            Some("from flair.data import Sentence")
        );
    }

    #[test]
    fn test_class_bound_without_owner_name() {
        let callable = Callable::ClassBound {
            name: Some("build".to_string()),
            owner: None,
            origin: origin(),
        };
        let identity = resolve(&callable);
        assert_eq!(identity.symbol_name.as_deref(), Some("build"));
        assert_eq!(identity.import_expression, None);
    }

    #[test]
    fn test_instance_method_is_excluded() {
        let callable = Callable::InstanceBound {
            name: Some("tokenize".to_string()),
            origin: origin(),
        };
        let identity = resolve(&callable);
        assert_eq!(identity.symbol_name.as_deref(), Some("tokenize"));
        assert_eq!(identity.owner_type_name, None);
        assert_eq!(identity.import_expression, None);
    }

    #[test]
    fn test_missing_name_resolves_nothing() {
        let callable = Callable::Function {
            name: None,
            qualname: Some("f".to_string()),
            origin: origin(),
        };
        assert_eq!(resolve(&callable), ResolvedIdentity::default());
    }

    #[test]
    fn test_self_defined_module_uses_plain_import() {
        let callable = Callable::Function {
            name: Some("datetime".to_string()),
            qualname: Some("datetime".to_string()),
            origin: Origin {
                module: ModuleLink::Itself,
                file: None,
            },
        };
        let identity = resolve(&callable);
        assert_eq!(identity.import_expression.as_deref(), Some("import datetime"));
    }

    #[test]
    fn test_unresolved_module_has_no_import() {
        let callable = Callable::function("f", "f", Origin::unknown());
        let identity = resolve(&callable);
        assert_eq!(identity.symbol_name.as_deref(), Some("f"));
        assert_eq!(identity.import_expression, None);
    }

    #[test]
    fn test_class_constructor() {
        let callable = Callable::Class {
            name: Some("PdfDict".to_string()),
            qualname: Some("PdfDict".to_string()),
            origin: origin(),
        };
        let identity = resolve(&callable);
        assert_eq!(
            identity.import_expression.as_deref(),
            Some("from pdfrw.objects import PdfDict")
        );
    }

    #[test]
    fn test_lambda_is_not_importable() {
        let identity = resolve(&Callable::function("<lambda>", "<lambda>", origin()));
        assert_eq!(identity.symbol_name.as_deref(), Some("<lambda>"));
        assert_eq!(identity.import_expression, None);
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("pos_arg_00"));
        assert!(is_identifier("_private"));
        assert!(!is_identifier("2fast"));
        assert!(!is_identifier("with-dash"));
        assert!(!is_identifier(""));
    }
}
