//! End-to-end smoke tests for the `strpool` binary.

use assert_cmd::Command;
use predicates::prelude::*;

fn strpool() -> Command {
    Command::cargo_bin("strpool").unwrap()
}

#[test]
fn prints_one_line_per_benchmark_section() {
    strpool()
        .args(["--variant", "fab", "--malloc-times", "200", "--retry-times", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("System default malloc/free"))
        .stdout(predicate::str::contains("Memory pool Malloc/Free (FAB)"));
}

#[test]
fn every_variant_runs_to_completion() {
    for variant in ["ful", "fal", "fub", "fab", "vul", "val"] {
        strpool()
            .args(["--variant", variant, "--malloc-times", "64", "--retry-times", "2"])
            .assert()
            .success()
            .stdout(predicate::str::contains("cost"));
    }
}

#[test]
fn random_mode_runs_on_the_chunk_variant() {
    strpool()
        .args([
            "--variant",
            "fab",
            "--mode",
            "random",
            "--malloc-times",
            "64",
            "--retry-times",
            "2",
        ])
        .assert()
        .success();
}

#[test]
fn missing_profile_file_is_an_error() {
    strpool()
        .args(["--config", "/definitely/not/a/profile.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}
