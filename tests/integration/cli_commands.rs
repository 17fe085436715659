#![allow(missing_docs)]

use std::fs;
use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use querykit::query::{Aggregation, JoinType, QueryBuilder, QueryModel};
use serde_json::Value;
use tempfile::TempDir;

const CATALOG: &str = r#"{
  "tables": [
    {
      "id": "orders",
      "fields": [
        { "name": "order_id", "dataType": "number", "isPrimaryKey": true },
        { "name": "customer_id", "dataType": "string",
          "references": { "tableId": "customers", "fieldName": "customer_id" } },
        { "name": "amount", "dataType": "number" }
      ]
    },
    {
      "id": "customers",
      "fields": [
        { "name": "customer_id", "dataType": "string", "isPrimaryKey": true },
        { "name": "name", "dataType": "string" }
      ]
    }
  ]
}"#;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("catalog.json"), CATALOG).expect("catalog");
        let data = dir.path().join("data");
        fs::create_dir(&data).expect("data dir");
        fs::write(
            data.join("orders.csv"),
            "order_id,customer_id,amount\n1,A,100\n2,A,50\n3,B,30\n",
        )
        .expect("orders");
        fs::write(
            data.join("customers.json"),
            r#"[{"customer_id": "A", "name": "Alice"}, {"customer_id": "B", "name": "Bob"}]"#,
        )
        .expect("customers");
        Self { dir }
    }

    /// Binary isolated from the caller's config and log settings.
    fn querykit(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("querykit");
        cmd.env_remove("QUERYKIT_CONFIG")
            .env_remove("QUERYKIT_LOG")
            .env("XDG_CONFIG_HOME", self.path("xdg"))
            .env("HOME", self.dir.path());
        cmd
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn write_query(&self, model: &QueryModel) -> PathBuf {
        let path = self.path("query.json");
        fs::write(&path, serde_json::to_string_pretty(model).expect("json")).expect("query");
        path
    }

    fn totals(&self) -> PathBuf {
        let model = QueryBuilder::new("totals")
            .table("orders")
            .table("customers")
            .join(("o", "customer_id"), ("c", "customer_id"), JoinType::Left)
            .select("c", "name")
            .group_by()
            .alias("name")
            .select("o", "amount")
            .aggregate(Aggregation::Sum)
            .alias("amount_sum")
            .build()
            .expect("model");
        self.write_query(&model)
    }
}

#[test]
fn suggest_lists_foreign_key_joins() {
    let ws = Workspace::new();
    let output = ws
        .querykit()
        .args(["--format", "json", "suggest", "--catalog"])
        .arg(ws.path("catalog.json"))
        .args(["--tables", "orders,customers"])
        .output()
        .expect("run suggest");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let json: Value = serde_json::from_slice(&output.stdout).expect("json output");
    let candidates = json["candidates"].as_array().expect("candidates");
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0]["leftAlias"], "o");
    assert_eq!(candidates[0]["rightField"], "customer_id");
    assert_eq!(json["tables"][1]["alias"], "c");
}

#[test]
fn render_prints_canonical_text() {
    let ws = Workspace::new();
    let query = ws.totals();
    let output = ws
        .querykit()
        .args(["--theme", "plain", "render", "--catalog"])
        .arg(ws.path("catalog.json"))
        .arg("--query")
        .arg(&query)
        .output()
        .expect("run render");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("LEFT JOIN customers c ON o.customer_id = c.customer_id"));
    assert!(stdout.contains("SUM(o.amount) AS amount_sum"));
}

#[test]
fn validate_reports_error_code_and_exits_nonzero() {
    let ws = Workspace::new();
    let mut model = QueryModel::new("broken");
    model.add_table("orders");
    let query = ws.write_query(&model);

    let output = ws
        .querykit()
        .args(["--format", "json", "validate", "--catalog"])
        .arg(ws.path("catalog.json"))
        .arg("--query")
        .arg(&query)
        .output()
        .expect("run validate");
    assert_eq!(output.status.code(), Some(2));
    let json: Value = serde_json::from_slice(&output.stdout).expect("json output");
    assert_eq!(json["valid"], false);
    assert_eq!(json["code"], "EmptyProjection");
}

#[test]
fn run_executes_and_appends_history() {
    let ws = Workspace::new();
    let query = ws.totals();
    let history = ws.path("history.jsonl");

    for _ in 0..2 {
        let output = ws
            .querykit()
            .args(["--theme", "plain", "run", "--catalog"])
            .arg(ws.path("catalog.json"))
            .arg("--query")
            .arg(&query)
            .arg("--data")
            .arg(ws.path("data"))
            .arg("--history")
            .arg(&history)
            .output()
            .expect("run query");
        assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("Alice  150"), "stdout: {stdout}");
        assert!(stdout.contains("2 row(s)"));
    }

    let lines: Vec<Value> = fs::read_to_string(&history)
        .expect("history")
        .lines()
        .map(|line| serde_json::from_str(line).expect("audit line"))
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["status"], "success");
    assert_eq!(lines[0]["recordCount"], 2);
    assert_eq!(lines[0]["tables"], serde_json::json!(["orders", "customers"]));
}

#[test]
fn run_failure_is_audited() {
    let ws = Workspace::new();
    let mut model = QueryModel::new("too small");
    model.add_table("orders");
    model.add_field("o", "amount").expect("field");
    model.row_limit = 0;
    let query = ws.write_query(&model);
    let history = ws.path("history.jsonl");

    let output = ws
        .querykit()
        .args(["run", "--catalog"])
        .arg(ws.path("catalog.json"))
        .arg("--query")
        .arg(&query)
        .arg("--data")
        .arg(ws.path("data"))
        .arg("--history")
        .arg(&history)
        .output()
        .expect("run query");
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("[ZeroRowLimit]"));

    let line = fs::read_to_string(&history).expect("history");
    let audit: Value = serde_json::from_str(line.trim()).expect("audit");
    assert_eq!(audit["status"], "failed");
    assert_eq!(audit["code"], "ZeroRowLimit");
    assert_eq!(audit["recordCount"], 0);
}

#[test]
fn missing_data_file_is_audited() {
    let ws = Workspace::new();
    let query = ws.totals();
    let history = ws.path("history.jsonl");
    fs::remove_file(ws.path("data").join("customers.json")).expect("remove customers");

    let output = ws
        .querykit()
        .args(["run", "--catalog"])
        .arg(ws.path("catalog.json"))
        .arg("--query")
        .arg(&query)
        .arg("--data")
        .arg(ws.path("data"))
        .arg("--history")
        .arg(&history)
        .output()
        .expect("run query");
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("no data file for table 'customers'"));

    let line = fs::read_to_string(&history).expect("history");
    let audit: Value = serde_json::from_str(line.trim()).expect("audit");
    assert_eq!(audit["status"], "failed");
    assert_eq!(audit["code"], "MissingTable");
    assert_eq!(audit["recordCount"], 0);
    assert!(audit["text"].as_str().is_some_and(|t| t.contains("LEFT JOIN customers c")));
}

#[test]
fn explicit_config_limits_rows() {
    let ws = Workspace::new();
    let query = ws.totals();
    let config = ws.path("config.toml");
    fs::write(&config, "[engine]\nmax_row_limit = 1\n").expect("config");

    let output = ws
        .querykit()
        .args(["--format", "json", "--config"])
        .arg(&config)
        .args(["run", "--catalog"])
        .arg(ws.path("catalog.json"))
        .arg("--query")
        .arg(&query)
        .arg("--data")
        .arg(ws.path("data"))
        .output()
        .expect("run query");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let json: Value = serde_json::from_slice(&output.stdout).expect("json output");
    assert_eq!(json["rows"].as_array().map(Vec::len), Some(1));
    assert!(json["text"].as_str().is_some_and(|t| t.ends_with("LIMIT 1")));
}
