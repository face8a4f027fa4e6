//! Built-in emitters targeting the Python polars runtime.
//!
//! Every emitter produces one-line statements. Datasets are referenced through
//! [`Statement::dataset`], so the same emitter serves the global scope, branch
//! units and concurrent write units.

use super::fragment::{Fragment, Statement, py_literal, py_str, py_str_list};
use super::registry::{Descriptor, EmitContext, EmitterKey, EmitterRegistry, StepEmitter};
use super::spec::{Endpoint, Params};
use crate::error::{PipelineError, Result, StepLocation};
use serde_json::Value;
use std::sync::Arc;
use url::Url;

/// Identifier holding the right-hand side of a join.
const JOIN_RIGHT: &str = "join_right";

const AGGREGATIONS: &[&str] = &[
    "sum", "mean", "median", "min", "max", "count", "first", "last", "n_unique",
];

const JOIN_KINDS: &[&str] = &["inner", "left", "right", "full", "semi", "anti", "cross"];

pub(crate) fn register_builtin(registry: &mut EmitterRegistry) {
    registry.register(EmitterKey::read("csv"), CsvRead);
    registry.register(EmitterKey::write("csv"), CsvWrite);

    // `mariadb` is the legacy spelling of a database endpoint.
    registry.register_shared(
        [EmitterKey::read("database"), EmitterKey::read("mariadb")],
        Arc::new(DatabaseRead),
    );
    registry.register_shared(
        [EmitterKey::write("database"), EmitterKey::write("mariadb")],
        Arc::new(DatabaseWrite),
    );

    registry.register(EmitterKey::transform("filter"), Filter);
    registry.register(EmitterKey::transform("join"), Join);
    registry.register(EmitterKey::transform("group"), Group);
    registry.register(EmitterKey::Merge, Merge);
}

struct CsvRead;
struct CsvWrite;
struct DatabaseRead;
struct DatabaseWrite;
struct Filter;
struct Join;
struct Group;
struct Merge;

impl StepEmitter for CsvRead {
    fn emit(&self, descriptor: &Descriptor<'_>, ctx: &EmitContext<'_>) -> Result<Fragment> {
        let source = expect_read(descriptor, ctx.location)?;
        let path = require_str(&source.params, "path", ctx.location)?;
        let mut call = format!("pl.read_csv({}", py_str(path));
        if let Some(separator) = optional_str(&source.params, "separator", ctx.location)? {
            call.push_str(&format!(", separator={}", py_str(separator)));
        }
        call.push(')');

        Ok(Fragment::single(Statement::new().dataset().text(format!(" = {call}"))))
    }
}

impl StepEmitter for CsvWrite {
    fn emit(&self, descriptor: &Descriptor<'_>, ctx: &EmitContext<'_>) -> Result<Fragment> {
        let target = expect_write(descriptor, ctx.location)?;
        let path = require_str(&target.params, "path", ctx.location)?;
        let mut args = py_str(path);
        if let Some(separator) = optional_str(&target.params, "separator", ctx.location)? {
            args.push_str(&format!(", separator={}", py_str(separator)));
        }

        Ok(Fragment::single(
            Statement::new().dataset().text(format!(".write_csv({args})")),
        ))
    }
}

impl StepEmitter for DatabaseRead {
    fn emit(&self, descriptor: &Descriptor<'_>, ctx: &EmitContext<'_>) -> Result<Fragment> {
        let source = expect_read(descriptor, ctx.location)?;
        let uri = connection_uri(&source.params, ctx.location)?;
        let query = match optional_str(&source.params, "query", ctx.location)? {
            Some(query) => query.to_owned(),
            None => {
                let table = require_str(&source.params, "table", ctx.location)?;
                format!("SELECT * FROM {table}")
            }
        };

        Ok(Fragment::single(Statement::new().dataset().text(format!(
            " = pl.read_database_uri(query={}, uri={})",
            py_str(&query),
            py_str(&uri)
        ))))
    }
}

impl StepEmitter for DatabaseWrite {
    fn emit(&self, descriptor: &Descriptor<'_>, ctx: &EmitContext<'_>) -> Result<Fragment> {
        let target = expect_write(descriptor, ctx.location)?;
        let uri = connection_uri(&target.params, ctx.location)?;
        let table = require_str(&target.params, "table", ctx.location)?;
        let if_exists = optional_str(&target.params, "if_exists", ctx.location)?.unwrap_or("append");
        if !matches!(if_exists, "append" | "replace" | "fail") {
            return Err(PipelineError::invalid_step(
                ctx.location,
                format!("unsupported if_exists mode '{if_exists}'"),
            ));
        }

        // The URI is passed as text so each write opens its own connection.
        Ok(Fragment::single(Statement::new().dataset().text(format!(
            ".write_database(table_name={}, connection={}, if_table_exists={})",
            py_str(table),
            py_str(&uri),
            py_str(if_exists)
        ))))
    }
}

impl StepEmitter for Filter {
    fn emit(&self, descriptor: &Descriptor<'_>, ctx: &EmitContext<'_>) -> Result<Fragment> {
        let params = expect_transform(descriptor, ctx.location)?;

        let mut statement = Statement::new().dataset().text(" = ").dataset().text(".filter(");
        if let Some(condition) = optional_str(params, "condition", ctx.location)? {
            statement = statement.expr(condition);
        } else {
            let column = require_str(params, "column", ctx.location)?;
            let operator = require_str(params, "operator", ctx.location)?;
            if operator == "matches" {
                let pattern = require_str(params, "value", ctx.location)?;
                // polars evaluates patterns with the same regex engine.
                regex::Regex::new(pattern).map_err(|e| {
                    PipelineError::invalid_step(ctx.location, format!("Invalid regex pattern: {e}"))
                })?;
                let statement = statement.text(format!(
                    "pl.col({}).str.contains({})",
                    py_str(column),
                    py_str(pattern)
                ));
                return Ok(Fragment::single(statement.text(")")));
            }
            if !matches!(operator, "==" | "!=" | ">" | ">=" | "<" | "<=") {
                return Err(PipelineError::invalid_step(
                    ctx.location,
                    format!("unsupported filter operator '{operator}'"),
                ));
            }
            let value = params.get("value").ok_or_else(|| {
                PipelineError::invalid_step(ctx.location, "filter needs a 'condition' or 'value'")
            })?;
            // Comparing with a null literal yields null in polars, never true.
            let predicate = match (operator, value) {
                ("==", Value::Null) => format!("pl.col({}).is_null()", py_str(column)),
                ("!=", Value::Null) => format!("pl.col({}).is_not_null()", py_str(column)),
                (_, Value::Null) => {
                    return Err(PipelineError::invalid_step(
                        ctx.location,
                        format!("operator '{operator}' cannot compare with null"),
                    ));
                }
                _ => format!(
                    "pl.col({}) {operator} {}",
                    py_str(column),
                    py_literal(value, ctx.location)?
                ),
            };
            statement = statement.text(predicate);
        }

        Ok(Fragment::single(statement.text(")")))
    }
}

impl StepEmitter for Join {
    fn emit(&self, descriptor: &Descriptor<'_>, ctx: &EmitContext<'_>) -> Result<Fragment> {
        let params = expect_transform(descriptor, ctx.location)?;
        let right = right_endpoint(params, ctx.location)?;
        let how = optional_str(params, "how", ctx.location)?.unwrap_or("inner");
        if !JOIN_KINDS.contains(&how) {
            return Err(PipelineError::invalid_step(
                ctx.location,
                format!("unsupported join kind '{how}'"),
            ));
        }

        // The right side is read by whichever emitter handles its kind.
        let mut fragment = ctx.registry.emit(&Descriptor::Read(&right), ctx.location)?;
        fragment.bind_dataset(JOIN_RIGHT);

        let mut args = String::new();
        if how != "cross" {
            let on = string_or_list(params, "on", ctx.location)?;
            args.push_str(&format!(", on={}", py_str_list(&on)));
        }
        args.push_str(&format!(", how={}", py_str(how)));

        fragment.push(
            Statement::new()
                .dataset()
                .text(" = ")
                .dataset()
                .text(".join(")
                .ident(JOIN_RIGHT)
                .text(format!("{args})")),
        );
        Ok(fragment)
    }
}

impl StepEmitter for Group {
    fn emit(&self, descriptor: &Descriptor<'_>, ctx: &EmitContext<'_>) -> Result<Fragment> {
        let params = expect_transform(descriptor, ctx.location)?;
        let by = string_or_list(params, "by", ctx.location)?;
        let aggregations = aggregations(params, ctx.location)?;
        if aggregations.is_empty() {
            return Err(PipelineError::invalid_step(
                ctx.location,
                "group needs at least one aggregation",
            ));
        }

        // Output columns default to the input name, so repeats need an alias.
        let exprs: Vec<String> = aggregations
            .iter()
            .map(|(column, func)| {
                let expr = format!("pl.col({}).{func}()", py_str(column));
                let uses = aggregations.iter().filter(|(c, _)| c == column).count();
                if uses > 1 {
                    format!("{expr}.alias({})", py_str(&format!("{column}_{func}")))
                } else {
                    expr
                }
            })
            .collect();

        Ok(Fragment::single(Statement::new().dataset().text(" = ").dataset().text(
            format!(
                ".group_by({}, maintain_order=True).agg([{}])",
                py_str_list(&by),
                exprs.join(", ")
            ),
        )))
    }
}

impl StepEmitter for Merge {
    fn emit(&self, descriptor: &Descriptor<'_>, ctx: &EmitContext<'_>) -> Result<Fragment> {
        let Descriptor::Merge { params, inputs } = *descriptor else {
            return Err(mismatch(ctx.location));
        };
        let Some((first, rest)) = inputs.split_first() else {
            return Err(PipelineError::invalid_step(
                ctx.location,
                "merge needs at least one branch",
            ));
        };

        let how = optional_str(params, "how", ctx.location)?.unwrap_or("concat");
        let mut statement = Statement::new().dataset().text(" = ");

        if how == "concat" {
            statement = statement.text("pl.concat([");
            for (idx, input) in inputs.iter().enumerate() {
                if idx > 0 {
                    statement = statement.text(", ");
                }
                statement = statement.ident(input);
            }
            statement = statement.text("], how=\"diagonal\")");
        } else if JOIN_KINDS.contains(&how) {
            let on = if how == "cross" {
                None
            } else {
                Some(string_or_list(params, "on", ctx.location)?)
            };
            statement = statement.ident(first);
            for input in rest {
                statement = statement.text(".join(").ident(input);
                if let Some(on) = &on {
                    statement = statement.text(format!(", on={}", py_str_list(on)));
                }
                statement = statement.text(format!(", how={})", py_str(how)));
            }
        } else {
            return Err(PipelineError::invalid_step(
                ctx.location,
                format!("unsupported merge mode '{how}'"),
            ));
        }

        Ok(Fragment::single(statement))
    }
}

fn expect_read<'a>(descriptor: &Descriptor<'a>, location: &StepLocation) -> Result<&'a Endpoint> {
    match *descriptor {
        Descriptor::Read(endpoint) => Ok(endpoint),
        _ => Err(mismatch(location)),
    }
}

fn expect_write<'a>(descriptor: &Descriptor<'a>, location: &StepLocation) -> Result<&'a Endpoint> {
    match *descriptor {
        Descriptor::Write(endpoint) => Ok(endpoint),
        _ => Err(mismatch(location)),
    }
}

fn expect_transform<'a>(
    descriptor: &Descriptor<'a>,
    location: &StepLocation,
) -> Result<&'a Params> {
    match *descriptor {
        Descriptor::Transform(transform) => Ok(&transform.params),
        _ => Err(mismatch(location)),
    }
}

fn mismatch(location: &StepLocation) -> PipelineError {
    PipelineError::invalid_step(location, "emitter received a descriptor of the wrong kind")
}

fn require_str<'a>(params: &'a Params, key: &str, location: &StepLocation) -> Result<&'a str> {
    optional_str(params, key, location)?
        .ok_or_else(|| PipelineError::invalid_step(location, format!("missing required '{key}'")))
}

fn optional_str<'a>(
    params: &'a Params,
    key: &str,
    location: &StepLocation,
) -> Result<Option<&'a str>> {
    match params.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(PipelineError::invalid_step(
            location,
            format!("'{key}' must be a string"),
        )),
    }
}

/// A column name or list of column names.
fn string_or_list(params: &Params, key: &str, location: &StepLocation) -> Result<Vec<String>> {
    let invalid =
        || PipelineError::invalid_step(location, format!("'{key}' must be a column or list of columns"));
    let columns = match params.get(key) {
        None => {
            return Err(PipelineError::invalid_step(
                location,
                format!("missing required '{key}'"),
            ));
        }
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| item.as_str().map(str::to_owned).ok_or_else(invalid))
            .collect::<Result<Vec<_>>>()?,
        Some(_) => return Err(invalid()),
    };
    if columns.is_empty() {
        return Err(invalid());
    }
    Ok(columns)
}

/// `(column, function)` pairs from an `aggregations` map and/or shorthand keys.
fn aggregations(params: &Params, location: &StepLocation) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();

    if let Some(map) = params.get("aggregations") {
        let Some(map) = map.as_object() else {
            return Err(PipelineError::invalid_step(
                location,
                "'aggregations' must map columns to functions",
            ));
        };
        for (column, func) in map {
            let Some(func) = func.as_str() else {
                return Err(PipelineError::invalid_step(
                    location,
                    format!("aggregation for '{column}' must be a function name"),
                ));
            };
            pairs.push((column.clone(), checked_aggregation(func, location)?));
        }
    }

    for func in AGGREGATIONS {
        if params.contains_key(*func) {
            for column in string_or_list(params, func, location)? {
                pairs.push((column, (*func).to_owned()));
            }
        }
    }

    for (idx, (column, func)) in pairs.iter().enumerate() {
        if pairs.iter().take(idx).any(|(c, f)| c == column && f == func) {
            return Err(PipelineError::invalid_step(
                location,
                format!("'{column}' is aggregated with {func} more than once"),
            ));
        }
    }

    Ok(pairs)
}

fn checked_aggregation(func: &str, location: &StepLocation) -> Result<String> {
    if AGGREGATIONS.contains(&func) {
        Ok(func.to_owned())
    } else {
        Err(PipelineError::invalid_step(
            location,
            format!("unsupported aggregation '{func}'"),
        ))
    }
}

fn right_endpoint(params: &Params, location: &StepLocation) -> Result<Endpoint> {
    let Some(right) = params.get("right").and_then(Value::as_object) else {
        return Err(PipelineError::invalid_step(
            location,
            "join needs a 'right' source",
        ));
    };
    let Some(kind) = right.get("type").and_then(Value::as_str) else {
        return Err(PipelineError::invalid_step(location, "'right' needs a 'type'"));
    };
    Ok(Endpoint {
        kind: kind.to_owned(),
        params: right
            .iter()
            .filter(|(k, _)| k.as_str() != "type")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        branch: None,
    })
}

/// Connection URI from `uri` or from its parts.
fn connection_uri(params: &Params, location: &StepLocation) -> Result<String> {
    if let Some(uri) = optional_str(params, "uri", location)? {
        return Ok(uri.to_owned());
    }

    let driver = optional_str(params, "driver", location)?.unwrap_or("mysql");
    let host = require_str(params, "host", location)?;
    let database = require_str(params, "database", location)?;
    let user = optional_str(params, "user", location)?;
    let password = optional_str(params, "password", location)?;
    let port = match params.get("port") {
        None => None,
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            return Err(PipelineError::invalid_step(
                location,
                "'port' must be a number",
            ));
        }
    };

    let port = port.map(|p| format!(":{p}")).unwrap_or_default();
    let mut uri = Url::parse(&format!("{driver}://{host}{port}/{database}")).map_err(|e| {
        PipelineError::invalid_step(location, format!("invalid connection settings: {e}"))
    })?;

    // Credentials are percent-encoded by the setters.
    let rejected = || PipelineError::invalid_step(location, "credentials need a host");
    if let Some(user) = user {
        uri.set_username(user).map_err(|()| rejected())?;
        if let Some(password) = password {
            uri.set_password(Some(password)).map_err(|()| rejected())?;
        }
    }
    Ok(uri.into())
}
