//! CLI tests
//!
//! Runs the `volu-bq` binary for commands that never reach the warehouse,
//! plus a `fetch` against a stand-in `bq` script on unix.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn volu_bq(dir: &Path, args: &[&str], env: &[(&str, &str)]) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_volu-bq"));
    cmd.current_dir(dir).args(args);
    for var in [
        "CACHE_DIR",
        "CACHE_TTL_HOURS",
        "CACHE_LOCK_TIMEOUT_SECONDS",
        "GCP_PROJECT",
        "BQ_LOCATION",
        "MAX_BYTES_BILLED",
        "BQ_BINARY",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd.envs(env.iter().copied());
    cmd.output().expect("failed to run volu-bq")
}

fn write_sql(dir: &Path) {
    fs::write(dir.join("q.sql"), "SELECT @brand AS brand_name").unwrap();
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn test_fingerprint_is_stable_and_order_free() {
    let temp = TempDir::new().unwrap();
    write_sql(temp.path());

    let a = volu_bq(
        temp.path(),
        &["fingerprint", "-a", "Demo", "-s", "q.sql", "-p", "brand=Acme", "-p", "n:INT64=5"],
        &[],
    );
    let b = volu_bq(
        temp.path(),
        &["fingerprint", "-a", "Demo", "-s", "q.sql", "-p", "n:INT64=5", "-p", "brand=Acme"],
        &[],
    );

    assert!(a.status.success(), "{}", String::from_utf8_lossy(&a.stderr));
    assert_eq!(stdout(&a), stdout(&b));

    let lines: Vec<_> = stdout(&a).lines().map(str::to_string).collect();
    assert_eq!(lines[0].len(), 64);
    assert!(lines[1].ends_with(&format!("{}.parquet", lines[0])));
    assert!(lines[1].contains("Demo"));
}

#[test]
fn test_fingerprint_follows_location() {
    let temp = TempDir::new().unwrap();
    write_sql(temp.path());
    let args = ["fingerprint", "-a", "Demo", "-s", "q.sql"];

    let eu = volu_bq(temp.path(), &args, &[]);
    let us_env = volu_bq(temp.path(), &args, &[("BQ_LOCATION", "US")]);
    let mut flag_args = args.to_vec();
    flag_args.extend(["--location", "US"]);
    let us_flag = volu_bq(temp.path(), &flag_args, &[]);

    assert_ne!(stdout(&eu), stdout(&us_env));
    assert_eq!(stdout(&us_env), stdout(&us_flag));
}

#[test]
fn test_status_json_without_entry() {
    let temp = TempDir::new().unwrap();
    write_sql(temp.path());

    let output = volu_bq(
        temp.path(),
        &["status", "-a", "Demo", "-s", "q.sql", "--json"],
        &[("CACHE_DIR", "cache-root")],
    );
    assert!(output.status.success());

    let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status["analysis"], "Demo");
    assert_eq!(status["fresh"], false);
    assert!(status["path"].as_str().unwrap().starts_with("cache-root"));
}

#[test]
fn test_config_json_reports_sources() {
    let temp = TempDir::new().unwrap();
    fs::write(
        temp.path().join("volu-bq.toml"),
        "[cache]\nttl_hours = 12\n",
    )
    .unwrap();

    let output = volu_bq(temp.path(), &["config", "--json"], &[("GCP_PROJECT", "p1")]);
    assert!(output.status.success());

    let config: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(config["config"]["cache"]["ttl_hours"], 12);
    assert_eq!(config["config"]["warehouse"]["project"], "p1");
    assert_eq!(config["config"]["warehouse"]["location"], "EU");

    let origins: Vec<_> = config["sources"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["origin"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(origins, vec!["builtin", "file", "env"]);
}

#[test]
fn test_errors_exit_nonzero() {
    let temp = TempDir::new().unwrap();
    write_sql(temp.path());

    let missing_sql = volu_bq(temp.path(), &["fingerprint", "-a", "Demo", "-s", "nope.sql"], &[]);
    assert_eq!(missing_sql.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&missing_sql.stderr).starts_with("Error:"));

    let bad_param = volu_bq(
        temp.path(),
        &["fingerprint", "-a", "Demo", "-s", "q.sql", "-p", "d:DATE=yesterday"],
        &[],
    );
    assert_eq!(bad_param.status.code(), Some(1));

    let bad_env = volu_bq(temp.path(), &["config"], &[("CACHE_TTL_HOURS", "soon")]);
    assert_eq!(bad_env.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&bad_env.stderr).contains("CACHE_TTL_HOURS"));

    let bad_analysis = volu_bq(temp.path(), &["fingerprint", "-a", "../x", "-s", "q.sql"], &[]);
    assert_eq!(bad_analysis.status.code(), Some(1));
}

#[test]
#[cfg(unix)]
fn test_fetch_writes_csv_and_reuses_cache() {
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().unwrap();
    write_sql(temp.path());
    let script = temp.path().join("fake-bq");
    let counter = temp.path().join("calls");
    fs::write(
        &script,
        format!(
            "#!/bin/sh\necho x >> '{}'\nprintf 'brand_name,count\\nAcme,12\\n'\n",
            counter.display()
        ),
    )
    .unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    let bq = script.display().to_string();
    let env = [("BQ_BINARY", bq.as_str())];
    let args = ["fetch", "-a", "Demo", "-s", "q.sql", "-p", "brand=Acme", "--ttl-hours", "1"];

    let first = volu_bq(temp.path(), &args, &env);
    assert!(first.status.success(), "{}", String::from_utf8_lossy(&first.stderr));
    assert!(stdout(&first).starts_with("brand_name,count"));
    assert!(stdout(&first).contains("Acme,12"));

    let mut out_args = args.to_vec();
    out_args.extend(["--out", "out/result.csv"]);
    let second = volu_bq(temp.path(), &out_args, &env);
    assert!(second.status.success());
    let written = fs::read_to_string(temp.path().join("out/result.csv")).unwrap();
    assert_eq!(written, stdout(&first));

    assert_eq!(fs::read_to_string(&counter).unwrap().lines().count(), 1);

    let mut forced = args.to_vec();
    forced.push("--force-refresh");
    assert!(volu_bq(temp.path(), &forced, &env).status.success());
    assert_eq!(fs::read_to_string(&counter).unwrap().lines().count(), 2);
}
