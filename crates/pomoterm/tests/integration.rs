use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn test_help_flag() {
    cargo_bin_cmd!()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("A command-driven pomodoro timer"));
}

#[test]
fn test_exec_play() {
    cargo_bin_cmd!()
        .args(["--in-memory", "--no-hooks", "exec", "/play"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Focus Session started"))
        .stdout(predicate::str::contains("running | remaining 25:00"));
}

#[test]
fn test_exec_requires_lines() {
    cargo_bin_cmd!()
        .args(["--in-memory", "--no-hooks", "exec"])
        .assert()
        .failure();
}

#[test]
fn test_exec_rejects_multiline_argument() {
    cargo_bin_cmd!()
        .args(["--in-memory", "--no-hooks", "exec", "/play\n/complete"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot contain line breaks"))
        .stdout(predicate::str::contains("Focus Session complete").not());
}

#[test]
fn test_shell_reads_commands_from_stdin() {
    cargo_bin_cmd!()
        .args(["--in-memory", "--no-hooks"])
        .write_stdin("/set work 50\n/play\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Work duration set to 50 minutes"))
        .stdout(predicate::str::contains("remaining 50:00"));
}

#[test]
fn test_unknown_command() {
    cargo_bin_cmd!()
        .args(["--in-memory", "--no-hooks", "shell"])
        .write_stdin("/dance\n")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "error: Unknown command: /dance. Type /help for available commands.",
        ));
}

#[test]
fn test_input_errors_do_not_stop_the_shell() {
    cargo_bin_cmd!()
        .args(["--in-memory", "--no-hooks"])
        .write_stdin("\nplay\n/set work 0\n/pause\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("error: Command cannot be empty"))
        .stdout(predicate::str::contains("error: Commands must start with '/'"))
        .stdout(predicate::str::contains("error: Duration must be a whole number"))
        .stdout(predicate::str::contains("warning: Timer is not running"));
}

#[test]
fn test_help_lists_commands() {
    cargo_bin_cmd!()
        .args(["--in-memory", "--no-hooks", "exec", "/help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/confirm-reset"))
        .stdout(predicate::str::contains("/set {work|break|long} <minutes>"));
}

#[test]
fn test_complete_moves_to_break() {
    cargo_bin_cmd!()
        .args(["--in-memory", "--no-hooks"])
        .write_stdin("/play\n/complete\n/stats\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Focus Session complete. Up next: Short Break"))
        .stdout(predicate::str::contains("Completed today: 1"))
        .stdout(predicate::str::contains("Total focus time: 25m"));
}

#[test]
fn test_commit_shows_in_stats() {
    cargo_bin_cmd!()
        .args(["--in-memory", "--no-hooks"])
        .write_stdin("/commit \"did X\"\n/stats\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Committed 0 min: did X"))
        .stdout(predicate::str::contains("Completed today: 0"))
        .stdout(predicate::str::contains("(0 min): did X"));
}

#[test]
fn test_reset_data_alone_keeps_stats() {
    cargo_bin_cmd!()
        .args(["--in-memory", "--no-hooks"])
        .write_stdin("/play\n/complete\n/reset-data\n/stats\n/confirm-reset\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("warning: This permanently deletes"))
        .stdout(predicate::str::contains("Completed today: 1"))
        .stdout(predicate::str::contains("error: No reset is pending"));
}

#[test]
fn test_confirm_reset_deletes_data() {
    cargo_bin_cmd!()
        .args(["--in-memory", "--no-hooks"])
        .write_stdin("/play\n/complete\n/reset-data\n/confirm-reset\n/stats\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("All data has been reset"))
        .stdout(predicate::str::contains("Completed today: 0"));
}

#[test]
fn test_logout_stops_reading_input() {
    cargo_bin_cmd!()
        .args(["--in-memory", "--no-hooks"])
        .write_stdin("/logout\n/play\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Logged out"))
        .stdout(predicate::str::contains("Focus Session started").not());
}

#[test]
fn test_json_output() {
    cargo_bin_cmd!()
        .args(["--in-memory", "--no-hooks", "--output", "json", "exec", "/pause"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""success":true"#))
        .stdout(predicate::str::contains(r#""kind":"warning","data":"Timer is not running""#));
}

#[test]
fn test_user_flag_selects_document() {
    cargo_bin_cmd!()
        .args(["--in-memory", "--no-hooks", "--user", "ada", "exec", "/stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Completed today: 0"));
}
