use assert_cmd::cargo::cargo_bin_cmd;

fn fixture(path: &str) -> String {
    format!("{}/tests/fixtures/{path}", env!("CARGO_MANIFEST_DIR"))
}

#[test]
fn help_lists_bench_flags() {
    let mut cmd = cargo_bin_cmd!("marionette");
    cmd.arg("--help");
    let out = cmd.assert().success();
    let stdout = String::from_utf8(out.get_output().stdout.clone()).expect("utf8");

    assert!(stdout.contains("--check-config"));
    assert!(stdout.contains("--cadence-ms"));
    assert!(stdout.contains("--trajectory"));
}

#[test]
fn check_config_prints_the_resolved_configuration() {
    let mut cmd = cargo_bin_cmd!("marionette");
    cmd.arg("--check-config")
        .arg("--config")
        .arg(fixture("configs/bench-minimal.toml"));
    let out = cmd.assert().success();
    let stdout = String::from_utf8(out.get_output().stdout.clone()).expect("utf8");

    assert!(stdout.contains("cadence_ms = 2"));
    assert!(stdout.contains("id = \"13\""));
}

#[test]
fn check_config_rejects_a_broken_group() {
    let mut cmd = cargo_bin_cmd!("marionette");
    cmd.arg("--check-config")
        .arg("--config")
        .arg(fixture("configs/broken-group.toml"));
    cmd.assert().failure();
}

#[test]
fn bench_console_runs_a_record_stop_cycle() {
    let temp = tempfile::tempdir().expect("tempdir");
    let trajectory = temp.path().join("frames.json");

    let mut cmd = cargo_bin_cmd!("marionette");
    cmd.arg("--config")
        .arg(fixture("configs/bench-minimal.toml"))
        .arg("--trajectory")
        .arg(&trajectory)
        .write_stdin("record\nstop\nstatus\nquit\n");
    let out = cmd.assert().success();
    let stdout = String::from_utf8(out.get_output().stdout.clone()).expect("utf8");

    assert!(stdout.contains("ok"));
    assert!(stdout.contains("session=idle"));
    assert!(trajectory.exists(), "recording was persisted on stop");
}
