//! The native standard library: `pkl:` modules, global factories, and
//! the built-in properties and methods of primitive values.
//!
//! Nothing here is parsed from source; standard-library modules are
//! built directly as objects, the way native modules are registered in
//! an interpreter runtime.

use std::{cell::RefCell, rc::Rc, str::FromStr};

use crate::{
    class::ClassInfo,
    cst::Modifiers,
    error::{EvalError, EvalResult},
    eval::Machine,
    object::{Member, ObjRef, ObjectData, ObjectKind, Receivers},
    types::{DataSize, DataSizeUnit, Duration, DurationUnit, IntSeq},
    uri::ModuleUri,
    value::{Pair, RegexValue, Value, ValueMap, ValueSet},
};

/// Names servable as `pkl:<name>` modules.
#[must_use]
pub fn is_stdlib_module(name: &str) -> bool {
    matches!(name, "base" | "test" | "Project" | "math")
}

/// Names resolvable as bare identifiers when nothing shadows them.
#[must_use]
pub fn is_global(name: &str) -> bool {
    matches!(
        name,
        "List" | "Set" | "Map" | "Pair" | "Regex" | "IntSeq" | "math" | "NaN" | "Infinity"
    )
}

/// Builds the native module for a `pkl:` URI.
pub(crate) fn instantiate_module(m: &mut Machine, uri: &ModuleUri) -> EvalResult<ObjRef> {
    let name = uri.scheme_specific();
    match name {
        "base" => Ok(native_module(m, uri, "pkl.base", vec![])),
        "test" => {
            let facts = Value::Object(m.new_mapping(vec![]));
            let examples = Value::Object(m.new_mapping(vec![]));
            Ok(native_module(
                m,
                uri,
                "pkl.test",
                vec![("facts".to_owned(), facts), ("examples".to_owned(), examples)],
            ))
        }
        "Project" => {
            let dependencies = Value::Object(m.new_mapping(vec![]));
            Ok(native_module(
                m,
                uri,
                "pkl.Project",
                vec![
                    ("package".to_owned(), Value::Null),
                    ("dependencies".to_owned(), dependencies),
                    ("allowedModules".to_owned(), Value::Null),
                    ("allowedResources".to_owned(), Value::Null),
                    ("externalProperties".to_owned(), Value::Null),
                    ("environmentVariables".to_owned(), Value::Null),
                    ("moduleCacheDir".to_owned(), Value::Null),
                    ("rootDir".to_owned(), Value::Null),
                    ("timeout".to_owned(), Value::Null),
                ],
            ))
        }
        "math" => Ok(native_module(
            m,
            uri,
            "pkl.math",
            vec![
                ("e".to_owned(), Value::Float(std::f64::consts::E)),
                ("pi".to_owned(), Value::Float(std::f64::consts::PI)),
                ("minInt".to_owned(), Value::Int(i64::MIN)),
                ("maxInt".to_owned(), Value::Int(i64::MAX)),
            ],
        )),
        other => Err(EvalError::resolve(format!(
            "Cannot find standard library module `pkl:{other}`."
        ))),
    }
}

fn native_module(m: &mut Machine, uri: &ModuleUri, class_name: &str, props: Vec<(String, Value)>) -> ObjRef {
    let class = Rc::new(ClassInfo {
        name: class_name.to_owned(),
        modifiers: Modifiers::open(),
        superclass: Some(Rc::clone(&m.classes.module)),
        instance_kind: ObjectKind::Module,
        declared: Default::default(),
        source: None,
        prototype: RefCell::new(None),
    });
    let module = ObjectData::new_module(class, None, None, uri.as_str().to_owned());
    for (name, value) in props {
        module.set_property(name, Member::of_value(value));
    }
    module
}

/// A bare-identifier standard-library value.
pub(crate) fn global_value(m: &mut Machine, name: &str) -> EvalResult<Option<Value>> {
    match name {
        "math" => {
            let uri = ModuleUri::parse("pkl:math")?;
            Ok(Some(Value::Object(m.load_module(&uri, None)?)))
        }
        "NaN" => Ok(Some(Value::Float(f64::NAN))),
        "Infinity" => Ok(Some(Value::Float(f64::INFINITY))),
        _ => Ok(None),
    }
}

/// A standard-library factory call (`List(…)`, `Map(…)`, …).
pub(crate) fn call_global(m: &mut Machine, name: &str, args: &[Value]) -> EvalResult<Option<Value>> {
    let _ = m;
    match name {
        "List" => Ok(Some(Value::List(Rc::new(args.to_vec())))),
        "Set" => {
            let set: ValueSet = args.iter().cloned().collect();
            Ok(Some(Value::Set(Rc::new(set))))
        }
        "Map" => {
            if args.len() % 2 != 0 {
                return Err(EvalError::type_error(format!(
                    "`Map` expects an even number of arguments, but got {}.",
                    args.len()
                )));
            }
            let mut map = ValueMap::default();
            for pair in args.chunks_exact(2) {
                map.insert(pair[0].clone(), pair[1].clone());
            }
            Ok(Some(Value::Map(Rc::new(map))))
        }
        "Pair" => {
            let [first, second] = args else {
                return Err(EvalError::type_error(format!(
                    "`Pair` expects 2 arguments, but got {}.",
                    args.len()
                )));
            };
            Ok(Some(Value::Pair(Rc::new(Pair {
                first: first.clone(),
                second: second.clone(),
            }))))
        }
        "Regex" => {
            let [pattern] = args else {
                return Err(EvalError::type_error(format!(
                    "`Regex` expects 1 argument, but got {}.",
                    args.len()
                )));
            };
            let Some(pattern) = pattern.as_str() else {
                return Err(EvalError::type_error(format!(
                    "`Regex` expects a `String`, but got a value of type `{}`.",
                    pattern.type_name()
                )));
            };
            Ok(Some(compile_regex(pattern)?))
        }
        "IntSeq" => {
            let (Some(start), Some(end)) = (args.first().and_then(Value::as_int), args.get(1).and_then(Value::as_int))
            else {
                return Err(EvalError::type_error("`IntSeq` expects 2 `Int` arguments."));
            };
            Ok(Some(Value::IntSeq(IntSeq::new(start, end))))
        }
        _ => Ok(None),
    }
}

fn compile_regex(pattern: &str) -> EvalResult<Value> {
    let regex = regex::Regex::new(pattern)
        .map_err(|e| EvalError::type_error(format!("Invalid regular expression `{pattern}`: {e}.")))?;
    Ok(Value::Regex(Rc::new(RegexValue {
        pattern: pattern.to_owned(),
        regex,
    })))
}

// =============================================================================
// Built-in properties
// =============================================================================

/// Built-in property of a value, or `None` when no such property
/// exists (the caller reports the miss).
pub(crate) fn value_property(m: &mut Machine, value: &Value, name: &str) -> EvalResult<Option<Value>> {
    let result = match value {
        Value::Int(i) => number_property(*i as f64, Some(*i), name),
        Value::Float(f) => number_property(*f, None, name),
        Value::Str(s) => match name {
            "length" => Some(Value::Int(count(s.chars().count()))),
            "isEmpty" => Some(Value::Bool(s.is_empty())),
            "isBlank" => Some(Value::Bool(s.trim().is_empty())),
            _ => None,
        },
        Value::Duration(d) => match name {
            "value" => Some(Value::Float(d.value)),
            "unit" => Some(Value::string(d.unit.to_string())),
            "isPositive" => Some(Value::Bool(d.in_seconds() >= 0.0)),
            _ => None,
        },
        Value::DataSize(d) => match name {
            "value" => Some(Value::Float(d.value)),
            "unit" => Some(Value::string(d.unit.to_string())),
            "isPositive" => Some(Value::Bool(d.in_bytes() >= 0.0)),
            _ => None,
        },
        Value::Pair(p) => match name {
            "first" => Some(p.first.clone()),
            "second" => Some(p.second.clone()),
            _ => None,
        },
        Value::Regex(r) => (name == "pattern").then(|| Value::string(r.pattern.clone())),
        Value::Bytes(b) => (name == "length").then(|| Value::Int(count(b.len()))),
        Value::IntSeq(seq) => match name {
            "start" => Some(Value::Int(seq.start)),
            "end" => Some(Value::Int(seq.end)),
            "step" => Some(Value::Int(seq.step)),
            _ => None,
        },
        Value::List(items) => sequence_property(items, name),
        Value::Set(items) => match name {
            "length" => Some(Value::Int(count(items.len()))),
            "isEmpty" => Some(Value::Bool(items.is_empty())),
            _ => None,
        },
        Value::Map(map) => match name {
            "length" => Some(Value::Int(count(map.len()))),
            "isEmpty" => Some(Value::Bool(map.is_empty())),
            "keys" => Some(Value::Set(Rc::new(map.keys().cloned().collect()))),
            "values" => Some(Value::List(Rc::new(map.values().cloned().collect()))),
            _ => None,
        },
        Value::Object(obj) => return object_property(m, obj, name),
        _ => None,
    };
    Ok(result)
}

fn count(len: usize) -> i64 {
    i64::try_from(len).unwrap_or(i64::MAX)
}

fn number_property(as_float: f64, as_int: Option<i64>, name: &str) -> Option<Value> {
    if let Ok(unit) = DurationUnit::from_str(name) {
        return Some(Value::Duration(Duration::new(as_float, unit)));
    }
    if let Ok(unit) = DataSizeUnit::from_str(name) {
        return Some(Value::DataSize(DataSize::new(as_float, unit)));
    }
    match name {
        "isPositive" => Some(Value::Bool(as_float >= 0.0)),
        "isFinite" => Some(Value::Bool(as_float.is_finite())),
        "isNaN" => Some(Value::Bool(as_int.is_none() && as_float.is_nan())),
        "isEven" => as_int.map(|i| Value::Bool(i % 2 == 0)),
        "isOdd" => as_int.map(|i| Value::Bool(i % 2 != 0)),
        _ => None,
    }
}

fn sequence_property(items: &[Value], name: &str) -> Option<Value> {
    match name {
        "length" => Some(Value::Int(count(items.len()))),
        "isEmpty" => Some(Value::Bool(items.is_empty())),
        "first" => items.first().cloned(),
        "last" => items.last().cloned(),
        "firstOrNull" => Some(items.first().cloned().unwrap_or(Value::Null)),
        "lastOrNull" => Some(items.last().cloned().unwrap_or(Value::Null)),
        _ => None,
    }
}

fn object_property(m: &mut Machine, obj: &ObjRef, name: &str) -> EvalResult<Option<Value>> {
    let _ = m;
    let result = match obj.kind {
        ObjectKind::Listing => match name {
            "length" => Some(Value::Int(count(obj.element_count()))),
            "isEmpty" => Some(Value::Bool(obj.element_count() == 0)),
            "lastIndex" => Some(Value::Int(count(obj.element_count()) - 1)),
            _ => None,
        },
        ObjectKind::Mapping => match name {
            "length" => Some(Value::Int(count(obj.entries.borrow().len()))),
            "isEmpty" => Some(Value::Bool(obj.entries.borrow().is_empty())),
            "keys" => Some(Value::Set(Rc::new(obj.entries.borrow().keys().cloned().collect()))),
            _ => None,
        },
        _ => None,
    };
    Ok(result)
}

// =============================================================================
// Built-in methods
// =============================================================================

/// Built-in method of a value, or `None` when no such method exists.
pub(crate) fn value_method(
    m: &mut Machine,
    value: &Value,
    name: &str,
    args: &[Value],
    recv: &Receivers,
) -> EvalResult<Option<Value>> {
    let _ = recv;
    // Methods available on every value.
    match name {
        "toString" if args.is_empty() => return m.value_to_string(value).map(|s| Some(Value::string(s))),
        "ifNonNull" => {
            let [function] = args else {
                return Err(EvalError::type_error("`ifNonNull` expects 1 argument."));
            };
            if value.is_null() {
                return Ok(Some(Value::Null));
            }
            let Value::Function(f) = function else {
                return Err(EvalError::type_error(format!(
                    "`ifNonNull` expects a `Function`, but got a value of type `{}`.",
                    function.type_name()
                )));
            };
            return m.apply_function(&Rc::clone(f), vec![value.clone()]).map(Some);
        }
        _ => {}
    }
    match value {
        Value::Int(_) | Value::Float(_) => number_method(value, name, args),
        Value::Str(s) => string_method(m, s, name, args),
        Value::Duration(d) => match name {
            "convertTo" => {
                let unit = required_str(args, "convertTo")?;
                let unit = DurationUnit::from_str(unit)
                    .map_err(|_| EvalError::arithmetic(format!("Unknown duration unit `{unit}`.")))?;
                Ok(Some(Value::Duration(d.convert_to(unit))))
            }
            "isBetween" => is_between(value, args),
            _ => Ok(None),
        },
        Value::DataSize(d) => match name {
            "convertTo" => {
                let unit = required_str(args, "convertTo")?;
                let unit = DataSizeUnit::from_str(unit)
                    .map_err(|_| EvalError::arithmetic(format!("Unknown data size unit `{unit}`.")))?;
                Ok(Some(Value::DataSize(d.convert_to(unit))))
            }
            "isBetween" => is_between(value, args),
            _ => Ok(None),
        },
        Value::Regex(r) => match name {
            "matches" => {
                let text = required_str(args, "matches")?;
                Ok(Some(Value::Bool(full_match(&r.regex, text))))
            }
            "findAllIn" => {
                let text = required_str(args, "findAllIn")?;
                let found: Vec<Value> = r.regex.find_iter(text).map(|m| Value::string(m.as_str())).collect();
                Ok(Some(Value::List(Rc::new(found))))
            }
            _ => Ok(None),
        },
        Value::List(items) => list_method(m, items, name, args),
        Value::Set(items) => match name {
            "contains" => {
                let [needle] = args else {
                    return Err(EvalError::type_error("`contains` expects 1 argument."));
                };
                Ok(Some(Value::Bool(items.contains(needle))))
            }
            "toList" => Ok(Some(Value::List(Rc::new(items.iter().cloned().collect())))),
            "toSet" => Ok(Some(value.clone())),
            _ => Ok(None),
        },
        Value::Map(map) => match name {
            "containsKey" => {
                let [key] = args else {
                    return Err(EvalError::type_error("`containsKey` expects 1 argument."));
                };
                Ok(Some(Value::Bool(map.contains_key(key))))
            }
            "getOrNull" => {
                let [key] = args else {
                    return Err(EvalError::type_error("`getOrNull` expects 1 argument."));
                };
                Ok(Some(map.get(key).cloned().unwrap_or(Value::Null)))
            }
            "toMap" => Ok(Some(value.clone())),
            "toMapping" => {
                let entries = map
                    .iter()
                    .map(|(k, v)| (k.clone(), Member::of_value(v.clone())))
                    .collect();
                Ok(Some(Value::Object(m.new_mapping(entries))))
            }
            _ => Ok(None),
        },
        Value::IntSeq(seq) => match name {
            "step" => {
                let [step] = args else {
                    return Err(EvalError::type_error("`step` expects 1 argument."));
                };
                let Some(step) = step.as_int() else {
                    return Err(EvalError::type_error("`step` expects an `Int`."));
                };
                if step == 0 {
                    return Err(EvalError::arithmetic("`step` cannot be zero."));
                }
                Ok(Some(Value::IntSeq(seq.with_step(step))))
            }
            "toList" => Ok(Some(Value::List(Rc::new(seq.iter().map(Value::Int).collect())))),
            "contains" => {
                let [needle] = args else {
                    return Err(EvalError::type_error("`contains` expects 1 argument."));
                };
                Ok(Some(Value::Bool(
                    needle.as_int().is_some_and(|n| seq.contains(n)),
                )))
            }
            _ => Ok(None),
        },
        Value::Object(obj) => object_method(m, obj, name, args),
        _ => Ok(None),
    }
}

fn required_str<'a>(args: &'a [Value], method: &str) -> EvalResult<&'a str> {
    let [arg] = args else {
        return Err(EvalError::type_error(format!("`{method}` expects 1 argument.")));
    };
    arg.as_str().ok_or_else(|| {
        EvalError::type_error(format!(
            "`{method}` expects a `String`, but got a value of type `{}`.",
            arg.type_name()
        ))
    })
}

fn full_match(regex: &regex::Regex, text: &str) -> bool {
    regex.find(text).is_some_and(|m| m.start() == 0 && m.end() == text.len())
}

fn number_method(value: &Value, name: &str, args: &[Value]) -> EvalResult<Option<Value>> {
    match name {
        "toInt" => match value {
            Value::Int(_) => Ok(Some(value.clone())),
            Value::Float(f) => {
                let truncated = f.trunc();
                if truncated.is_finite() && truncated.abs() < 9.0e18 {
                    #[expect(clippy::cast_possible_truncation, reason = "range checked above")]
                    let as_int = truncated as i64;
                    Ok(Some(Value::Int(as_int)))
                } else {
                    Err(EvalError::arithmetic(format!("Cannot convert `{f}` to an `Int`.")))
                }
            }
            _ => unreachable!("number_method is called on numbers only"),
        },
        "toFloat" => match value {
            Value::Int(i) => Ok(Some(Value::Float(*i as f64))),
            _ => Ok(Some(value.clone())),
        },
        "isBetween" => is_between(value, args),
        _ => Ok(None),
    }
}

fn is_between(value: &Value, args: &[Value]) -> EvalResult<Option<Value>> {
    let [low, high] = args else {
        return Err(EvalError::type_error("`isBetween` expects 2 arguments."));
    };
    let ge = crate::ops::binary(crate::cst::BinaryOp::Gte, value, low)?;
    let le = crate::ops::binary(crate::cst::BinaryOp::Lte, value, high)?;
    Ok(Some(Value::Bool(
        ge.as_bool().unwrap_or(false) && le.as_bool().unwrap_or(false),
    )))
}

fn string_method(m: &mut Machine, s: &Rc<str>, name: &str, args: &[Value]) -> EvalResult<Option<Value>> {
    let _ = m;
    let result = match name {
        "contains" => Value::Bool(s.contains(required_str(args, name)?)),
        "startsWith" => Value::Bool(s.starts_with(required_str(args, name)?)),
        "endsWith" => Value::Bool(s.ends_with(required_str(args, name)?)),
        "toUpperCase" => Value::string(s.to_uppercase()),
        "toLowerCase" => Value::string(s.to_lowercase()),
        "trim" => Value::string(s.trim().to_owned()),
        "repeat" => {
            let [n] = args else {
                return Err(EvalError::type_error("`repeat` expects 1 argument."));
            };
            let Some(n) = n.as_int().and_then(|n| usize::try_from(n).ok()) else {
                return Err(EvalError::type_error("`repeat` expects a non-negative `Int`."));
            };
            Value::string(s.repeat(n))
        }
        "replaceAll" => {
            let [pattern, replacement] = args else {
                return Err(EvalError::type_error("`replaceAll` expects 2 arguments."));
            };
            let Some(replacement) = replacement.as_str() else {
                return Err(EvalError::type_error("`replaceAll` expects a `String` replacement."));
            };
            match pattern {
                Value::Str(p) => Value::string(s.replace(p.as_ref(), replacement)),
                Value::Regex(r) => Value::string(r.regex.replace_all(s, replacement).into_owned()),
                other => {
                    return Err(EvalError::type_error(format!(
                        "`replaceAll` expects a `String` or `Regex` pattern, but got a value of type `{}`.",
                        other.type_name()
                    )));
                }
            }
        }
        "split" => {
            let [separator] = args else {
                return Err(EvalError::type_error("`split` expects 1 argument."));
            };
            let parts: Vec<Value> = match separator {
                Value::Str(sep) => s.split(sep.as_ref()).map(Value::from).collect(),
                Value::Regex(r) => r.regex.split(s).map(Value::from).collect(),
                other => {
                    return Err(EvalError::type_error(format!(
                        "`split` expects a `String` or `Regex` separator, but got a value of type `{}`.",
                        other.type_name()
                    )));
                }
            };
            Value::List(Rc::new(parts))
        }
        "matches" => {
            let [pattern] = args else {
                return Err(EvalError::type_error("`matches` expects 1 argument."));
            };
            match pattern {
                Value::Regex(r) => Value::Bool(full_match(&r.regex, s)),
                Value::Str(p) => {
                    let regex = regex::Regex::new(p)
                        .map_err(|e| EvalError::type_error(format!("Invalid regular expression `{p}`: {e}.")))?;
                    Value::Bool(full_match(&regex, s))
                }
                other => {
                    return Err(EvalError::type_error(format!(
                        "`matches` expects a `String` or `Regex`, but got a value of type `{}`.",
                        other.type_name()
                    )));
                }
            }
        }
        "codePoints" => Value::List(Rc::new(s.chars().map(|c| Value::Int(i64::from(u32::from(c)))).collect())),
        "substring" => {
            let (Some(start), Some(end)) = (args.first().and_then(Value::as_int), args.get(1).and_then(Value::as_int))
            else {
                return Err(EvalError::type_error("`substring` expects 2 `Int` arguments."));
            };
            let chars: Vec<char> = s.chars().collect();
            let (start, end) = (usize::try_from(start).ok(), usize::try_from(end).ok());
            match (start, end) {
                (Some(start), Some(end)) if start <= end && end <= chars.len() => {
                    Value::string(chars[start..end].iter().collect::<String>())
                }
                _ => {
                    return Err(EvalError::type_error(format!(
                        "`substring` bounds are out of range for a string of length {}.",
                        chars.len()
                    )));
                }
            }
        }
        "toInt" => return parse_int(s).map(Some),
        "toIntOrNull" => parse_int(s).unwrap_or(Value::Null),
        "toFloat" => return parse_float(s).map(Some),
        "toFloatOrNull" => parse_float(s).unwrap_or(Value::Null),
        "toBoolean" => return parse_bool(s).map(Some),
        "toBooleanOrNull" => parse_bool(s).unwrap_or(Value::Null),
        _ => return Ok(None),
    };
    Ok(Some(result))
}

fn parse_int(s: &str) -> EvalResult<Value> {
    s.trim()
        .parse::<i64>()
        .map(Value::Int)
        .map_err(|_| EvalError::type_error(format!("Cannot parse `{s}` as `Int`.")))
}

fn parse_float(s: &str) -> EvalResult<Value> {
    match s.trim() {
        "NaN" => Ok(Value::Float(f64::NAN)),
        "Infinity" => Ok(Value::Float(f64::INFINITY)),
        "-Infinity" => Ok(Value::Float(f64::NEG_INFINITY)),
        other => other
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| EvalError::type_error(format!("Cannot parse `{s}` as `Float`."))),
    }
}

fn parse_bool(s: &str) -> EvalResult<Value> {
    match s.trim() {
        "true" => Ok(Value::Bool(true)),
        "false" => Ok(Value::Bool(false)),
        _ => Err(EvalError::type_error(format!("Cannot parse `{s}` as `Boolean`."))),
    }
}

fn list_method(m: &mut Machine, items: &Rc<Vec<Value>>, name: &str, args: &[Value]) -> EvalResult<Option<Value>> {
    let result = match name {
        "contains" => {
            let [needle] = args else {
                return Err(EvalError::type_error("`contains` expects 1 argument."));
            };
            Value::Bool(items.contains(needle))
        }
        "join" => {
            let separator = required_str(args, name)?;
            let mut parts = Vec::with_capacity(items.len());
            for item in items.iter() {
                parts.push(m.value_to_string(item)?);
            }
            Value::string(parts.join(separator))
        }
        "getOrNull" => {
            let [index] = args else {
                return Err(EvalError::type_error("`getOrNull` expects 1 argument."));
            };
            index
                .as_int()
                .and_then(|i| usize::try_from(i).ok())
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(Value::Null)
        }
        "toSet" => Value::Set(Rc::new(items.iter().cloned().collect())),
        "toList" => Value::List(Rc::clone(items)),
        "toListing" => {
            let members = items.iter().cloned().map(Member::of_value).collect();
            Value::Object(m.new_listing(members))
        }
        _ => return Ok(None),
    };
    Ok(Some(result))
}

// =============================================================================
// Object methods
// =============================================================================

fn object_method(m: &mut Machine, obj: &ObjRef, name: &str, args: &[Value]) -> EvalResult<Option<Value>> {
    let obj = Rc::clone(obj);
    // The math module's members are native.
    if obj.class.name == "pkl.math" {
        if let Some(result) = math_method(name, args)? {
            return Ok(Some(result));
        }
    }
    let result = match name {
        "toDynamic" => Value::Object(to_dynamic(m, &obj)),
        "hasProperty" => {
            let property = required_str(args, name)?;
            Value::Bool(obj.visible_property(property).is_some())
        }
        "getProperty" => {
            let property = required_str(args, name)?.to_owned();
            let member = obj
                .visible_property(&property)
                .ok_or_else(|| EvalError::name_error(format!("Cannot find property `{property}`.")))?;
            m.force_member(&obj, &member, &property)?
        }
        "getPropertyOrNull" => {
            let property = required_str(args, name)?.to_owned();
            match obj.visible_property(&property) {
                Some(member) => m.force_member(&obj, &member, &property)?,
                None => Value::Null,
            }
        }
        "toList" if obj.kind == ObjectKind::Listing => {
            let elements = obj.elements.borrow().clone();
            let mut out = Vec::with_capacity(elements.len());
            for (i, member) in elements.iter().enumerate() {
                out.push(m.force_member(&obj, member, &format!("[{i}]"))?);
            }
            Value::List(Rc::new(out))
        }
        "toMap" if obj.kind == ObjectKind::Mapping => {
            let entries = obj.entries.borrow().clone();
            let mut out = ValueMap::default();
            for (key, member) in &entries {
                out.insert(key.clone(), m.force_member(&obj, member, "entry")?);
            }
            Value::Map(Rc::new(out))
        }
        "containsKey" if matches!(obj.kind, ObjectKind::Mapping | ObjectKind::Dynamic) => {
            let [key] = args else {
                return Err(EvalError::type_error("`containsKey` expects 1 argument."));
            };
            Value::Bool(obj.entry(key).is_some())
        }
        "getOrNull" if matches!(obj.kind, ObjectKind::Mapping | ObjectKind::Dynamic) => {
            let [key] = args else {
                return Err(EvalError::type_error("`getOrNull` expects 1 argument."));
            };
            match obj.entry(key) {
                Some(member) => m.force_member(&obj, &member, "entry")?,
                None => Value::Null,
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(result))
}

/// `toDynamic()` erases the schema: the copy is `Dynamic`, declared
/// types are dropped, and `fixed`/`const` markers no longer apply, so
/// otherwise-illegal amendments become legal.
fn to_dynamic(m: &mut Machine, obj: &ObjRef) -> ObjRef {
    let copy = ObjectData::new(
        ObjectKind::Dynamic,
        Rc::clone(&m.classes.dynamic),
        None,
        obj.outers.clone(),
        None,
    );
    {
        let mut properties = copy.properties.borrow_mut();
        for (name, member) in obj.properties.borrow().iter() {
            if member.is_deleted() {
                continue;
            }
            let mut erased = member.fresh_copy();
            erased.ty = None;
            erased.modifiers.fixed = false;
            erased.modifiers.is_const = false;
            properties.insert(name.clone(), erased);
        }
    }
    {
        let mut elements = copy.elements.borrow_mut();
        elements.extend(obj.elements.borrow().iter().map(Member::fresh_copy));
    }
    {
        let mut entries = copy.entries.borrow_mut();
        for (key, member) in obj.entries.borrow().iter() {
            entries.insert(key.clone(), member.fresh_copy());
        }
    }
    copy
}

fn math_method(name: &str, args: &[Value]) -> EvalResult<Option<Value>> {
    let two_numbers = || -> EvalResult<(f64, f64, bool)> {
        let [a, b] = args else {
            return Err(EvalError::type_error(format!("`math.{name}` expects 2 arguments.")));
        };
        let both_int = matches!((a, b), (Value::Int(_), Value::Int(_)));
        match (number(a), number(b)) {
            (Some(a), Some(b)) => Ok((a, b, both_int)),
            _ => Err(EvalError::type_error(format!("`math.{name}` expects `Number` arguments."))),
        }
    };
    let one_number = || -> EvalResult<f64> {
        let [a] = args else {
            return Err(EvalError::type_error(format!("`math.{name}` expects 1 argument.")));
        };
        number(a).ok_or_else(|| EvalError::type_error(format!("`math.{name}` expects a `Number` argument.")))
    };
    let result = match name {
        "min" => {
            let (a, b, both_int) = two_numbers()?;
            numeric(a.min(b), both_int)
        }
        "max" => {
            let (a, b, both_int) = two_numbers()?;
            numeric(a.max(b), both_int)
        }
        "abs" => match args {
            [Value::Int(i)] => i
                .checked_abs()
                .map(Value::Int)
                .ok_or_else(|| EvalError::arithmetic(format!("Integer overflow computing `math.abs({i})`.")))?,
            _ => Value::Float(one_number()?.abs()),
        },
        "floor" => Value::Float(one_number()?.floor()),
        "ceil" => Value::Float(one_number()?.ceil()),
        "round" => Value::Float(one_number()?.round()),
        "sqrt" => Value::Float(one_number()?.sqrt()),
        "pow" => {
            let (a, b, _) = two_numbers()?;
            Value::Float(a.powf(b))
        }
        _ => return Ok(None),
    };
    Ok(Some(result))
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

fn numeric(value: f64, as_int: bool) -> Value {
    if as_int && value.fract() == 0.0 && value.abs() < 9.0e18 {
        #[expect(clippy::cast_possible_truncation, reason = "integrality checked above")]
        let int = value as i64;
        Value::Int(int)
    } else {
        Value::Float(value)
    }
}
