//! Integration tests for compiling pipeline documents
//!
//! These compile fixture and inline documents and check the generated program
//! text. Nothing here needs a Python interpreter.

use pipewright::config::{BranchRefPolicy, CompileOptions};
use pipewright::error::{EndpointRole, PipelineError};
use pipewright::pipeline::fragment::{Fragment, Statement};
use pipewright::pipeline::{
    Compiler, Descriptor, EmitContext, EmitterKey, EmitterRegistry, PipelineSpec, StepEmitter,
    compile_json,
};
use serde_json::json;

fn compile(doc: &serde_json::Value) -> Result<String, PipelineError> {
    Ok(Compiler::with_defaults().compile_document(doc)?.render())
}

#[test]
fn test_orders_fixture_matches_golden_program() {
    let spec = PipelineSpec::from_file("testdata/orders_pipeline.json").unwrap();
    let program = Compiler::with_defaults().compile(&spec).unwrap().render();
    let expected = std::fs::read_to_string("testdata/expected/orders_pipeline.py").unwrap();
    assert_eq!(program, expected.replace("\r\n", "\n"));
}

#[test]
fn test_compilation_is_deterministic() {
    let json = std::fs::read_to_string("testdata/orders_pipeline.json").unwrap();
    let first = compile_json(&json).unwrap().render();
    let second = compile_json(&json).unwrap().render();
    assert_eq!(first, second);
}

#[test]
fn test_main_body_follows_declared_order() {
    let doc = json!({"steps": [
        {"step": "read", "source": {"type": "csv", "path": "a.csv"}},
        {"step": "group", "by": "k", "max": "v"},
        {"step": "filter", "column": "v", "operator": "!=", "value": null},
        {"step": "join", "right": {"type": "csv", "path": "b.csv"}, "on": "k", "how": "left"},
        {"step": "write", "target": [
            {"type": "csv", "path": "x.csv"},
            {"type": "csv", "path": "y.csv"}
        ]}
    ]});
    let artifact = Compiler::with_defaults().compile_document(&doc).unwrap();

    assert_eq!(
        artifact.main_body,
        vec![
            "df = pl.read_csv(\"a.csv\")",
            "df = df.group_by([\"k\"], maintain_order=True).agg([pl.col(\"v\").max()])",
            "df = df.filter(pl.col(\"v\").is_not_null())",
            "join_right = pl.read_csv(\"b.csv\")\ndf = df.join(join_right, on=[\"k\"], how=\"left\")",
            "df.write_csv(\"x.csv\")\ndf.write_csv(\"y.csv\")",
        ]
    );
}

#[test]
fn test_branch_rewrite_is_whole_token() {
    let program = compile(&json!({"steps": [
        {"step": "read", "source": {"type": "csv", "path": "a.csv"}},
        {"step": "split", "branches": [{"name": "agg", "steps": [
            {"step": "filter", "condition": "(df[\"v\"] > 0) & (pl.col(\"df_total\") < df.height)"}
        ]}]}
    ]}))
    .unwrap();

    assert!(program.contains(
        "    df_agg = df_agg.filter((df_agg[\"v\"] > 0) & (pl.col(\"df_total\") < df_agg.height))"
    ));
}

#[test]
fn test_branch_units_never_alias_global_dataset() {
    let program = compile(&json!({"steps": [
        {"step": "read", "source": {"type": "csv", "path": "a.csv"}},
        {"step": "split", "parallel": true, "branches": [
            {"name": "a", "steps": [{"step": "filter", "column": "v", "operator": ">", "value": 1}]},
            {"name": "b", "steps": [{"step": "filter", "column": "v", "operator": "<", "value": 1}]}
        ]}
    ]}))
    .unwrap();

    assert!(program.contains("def branch_1_a(df):\n    df_a = df.clone()\n"));
    assert!(program.contains("def branch_1_b(df):\n    df_b = df.clone()\n"));
    assert!(!program.contains("    df = df."));
}

#[test]
fn test_units_defined_before_use() {
    let program = compile(&json!({"steps": [
        {"step": "read", "source": {"type": "csv", "path": "a.csv"}},
        {"step": "split", "parallel": true, "branches": [
            {"name": "one", "steps": [
                {"step": "write", "concurrent_write": true, "target": [
                    {"type": "csv", "path": "p.csv"},
                    {"type": "csv", "path": "q.csv"}
                ]}
            ]},
            {"name": "two", "steps": []}
        ]},
        {"step": "write", "concurrent_write": true, "target": [
            {"type": "csv", "path": "one.csv", "branch": "one"},
            {"type": "csv", "path": "two.csv", "branch": "two"}
        ]}
    ]}))
    .unwrap();

    for unit in ["write_1_1", "write_1_2", "branch_1_one", "branch_1_two", "write_2_1", "write_2_2"] {
        let definition = program
            .find(&format!("def {unit}("))
            .unwrap_or_else(|| panic!("{unit} is not defined"));
        let first_use = program
            .find(&format!("submit({unit},"))
            .unwrap_or_else(|| panic!("{unit} is never submitted"));
        assert!(definition < first_use, "{unit} is used before its definition");
    }
    let main = program.find("def main():").unwrap();
    assert!(program.find("def write_2_2(").unwrap() < main);
}

#[test]
fn test_sequential_split_blocks_in_declared_order() {
    let program = compile(&json!({"steps": [
        {"step": "read", "source": {"type": "csv", "path": "a.csv"}},
        {"step": "split", "branches": [
            {"name": "second", "steps": []},
            {"name": "first", "steps": []}
        ]}
    ]}))
    .unwrap();

    assert!(program.contains(
        "    result_second = branch_1_second(df)\n    result_first = branch_1_first(df)\n"
    ));
    assert!(!program.contains("pool.submit"));
}

#[test]
fn test_missing_steps_is_configuration_error() {
    let err = compile(&json!({"name": "no steps"})).unwrap_err();
    assert!(matches!(err, PipelineError::Configuration { ref key, .. } if key == "steps"));
}

#[test]
fn test_unknown_step_kind_is_named() {
    let err = compile(&json!({"steps": [{"step": "unknown"}]})).unwrap_err();
    assert!(matches!(err, PipelineError::UnknownStep { ref kind, .. } if kind == "unknown"));
    assert!(err.to_string().contains("'unknown'"));
}

#[test]
fn test_unknown_source_type() {
    let err = compile(&json!({"steps": [
        {"step": "read", "source": {"type": "ftp", "path": "x"}}
    ]}))
    .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::UnknownEndpoint { ref kind, role: EndpointRole::Source, .. } if kind == "ftp"
    ));
}

#[test]
fn test_unknown_target_type_inside_branch() {
    let err = compile(&json!({"steps": [
        {"step": "read", "source": {"type": "csv", "path": "a.csv"}},
        {"step": "split", "branches": [{"name": "out", "steps": [
            {"step": "write", "target": {"type": "s3", "path": "x"}}
        ]}]}
    ]}))
    .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Unknown endpoint error at step 2, branch 'out', step 1: unknown target type 's3'"
    );
}

#[test]
fn test_write_to_undeclared_branch() {
    let err = compile(&json!({"steps": [
        {"step": "read", "source": {"type": "csv", "path": "a.csv"}},
        {"step": "split", "branches": [{"name": "a", "steps": []}]},
        {"step": "write", "target": {"type": "csv", "path": "x.csv", "branch": "b"}}
    ]}))
    .unwrap_err();
    assert!(matches!(err, PipelineError::UnknownBranch { ref name, .. } if name == "b"));
}

#[test]
fn test_strict_branch_refs() {
    let doc = json!({"steps": [
        {"step": "read", "source": {"type": "csv", "path": "a.csv"}},
        {"step": "split", "branches": [{"name": "a", "steps": []}]},
        {"step": "write", "target": {"type": "csv", "path": "x.csv"}}
    ]});

    // Positional binding is the default.
    assert!(compile(&doc).unwrap().contains("    result_a.write_csv(\"x.csv\")"));

    let strict = Compiler::new(
        EmitterRegistry::polars(),
        CompileOptions {
            threads: None,
            branch_refs: BranchRefPolicy::Explicit,
        },
    );
    assert!(strict.compile_document(&doc).is_err());
}

struct Dedupe;

impl StepEmitter for Dedupe {
    fn emit(
        &self,
        _descriptor: &Descriptor<'_>,
        _ctx: &EmitContext<'_>,
    ) -> pipewright::error::Result<Fragment> {
        Ok(Fragment::single(
            Statement::new()
                .dataset()
                .text(" = ")
                .dataset()
                .text(".unique(maintain_order=True)"),
        ))
    }
}

#[test]
fn test_custom_emitter_registry() {
    let doc = json!({"steps": [
        {"step": "read", "source": {"type": "csv", "path": "a.csv"}},
        {"step": "dedupe"}
    ]});
    assert!(compile(&doc).is_err());

    let mut registry = EmitterRegistry::polars();
    registry.register(EmitterKey::transform("dedupe"), Dedupe);
    let artifact = Compiler::new(registry, CompileOptions::default())
        .compile_document(&doc)
        .unwrap();
    assert_eq!(artifact.main_body[1], "df = df.unique(maintain_order=True)");
}

#[test]
fn test_database_endpoints_and_merge() {
    let program = compile(&json!({"threads": 2, "steps": [
        {"step": "read", "source": {"type": "mariadb", "host": "db", "user": "etl",
            "password": "secret", "database": "shop", "table": "orders"}},
        {"step": "split", "parallel": true, "branches": [
            {"name": "eu", "steps": [{"step": "filter", "column": "region", "operator": "==", "value": "eu"}]},
            {"name": "us", "steps": [{"step": "filter", "column": "region", "operator": "==", "value": "us"}]}
        ]},
        {"step": "merge", "branches": ["us", "eu"]},
        {"step": "write", "target": {"type": "database", "host": "db", "user": "etl",
            "password": "secret", "database": "shop", "table": "orders_by_region"}}
    ]}))
    .unwrap();

    assert!(program.contains("MAX_WORKERS = 2\n"));
    assert!(program.contains(
        "    df = pl.read_database_uri(query=\"SELECT * FROM orders\", uri=\"mysql://etl:secret@db/shop\")"
    ));
    assert!(program.contains("    merged_1 = pl.concat([result_us, result_eu], how=\"diagonal\")"));
    assert!(program.contains("    merged_1.write_database(table_name=\"orders_by_region\""));
}
