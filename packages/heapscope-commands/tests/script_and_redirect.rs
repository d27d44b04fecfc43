//! Script sourcing and output redirection against real files.

mod common;

use std::io::Write;

use common::{run_commands, session_from_json, SMALL_HEAP};

#[test]
fn test_redirect_suffix_writes_file_and_notice() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("run");
    let json = SMALL_HEAP.replace(
        "\"redirect_prefix\": \"run\"",
        &format!("\"redirect_prefix\": {}", serde_json::to_string(&prefix.display().to_string()).unwrap()),
    );
    let session = session_from_json(&json);
    let (out, err) = run_commands(&session, "count used /redirectSuffix summary\n");

    let expected_path = dir.path().join("run.summary");
    assert!(expected_path.exists(), "redirect file was not created");
    assert_eq!(
        std::fs::read_to_string(&expected_path).unwrap(),
        "4 allocations use 0x40 (64) bytes.\n"
    );
    assert!(out.contains(&format!("Wrote results to {}", expected_path.display())));
    assert!(err.is_empty());
}

#[test]
fn test_redirect_on_derives_name_from_arguments() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("run");
    let json = SMALL_HEAP.replace(
        "\"redirect_prefix\": \"run\"",
        &format!("\"redirect_prefix\": {}", serde_json::to_string(&prefix.display().to_string()).unwrap()),
    );
    let session = session_from_json(&json);
    let (out, _err) = run_commands(&session, "redirect on\ncount free\nredirect off\ncount free\n");

    let expected_path = dir.path().join("run.count_free");
    assert!(expected_path.exists());
    assert_eq!(
        std::fs::read_to_string(&expected_path).unwrap(),
        "3 allocations use 0x50 (80) bytes.\n"
    );
    // The second count, after redirect off, went to the terminal.
    assert!(out.contains("3 allocations use 0x50 (80) bytes.\n"));
}

#[test]
fn test_source_runs_script_statements() {
    let dir = tempfile::tempdir().unwrap();
    let script_path = dir.path().join("counts.hsc");
    let mut script = std::fs::File::create(&script_path).unwrap();
    writeln!(script, "# comment only").unwrap();
    writeln!(script, "count free").unwrap();
    writeln!(script, "count leaked").unwrap();
    drop(script);

    let session = session_from_json(SMALL_HEAP);
    let (out, err) = run_commands(&session, &format!("source {}\n", script_path.display()));
    assert_eq!(
        out,
        "3 allocations use 0x50 (80) bytes.\n2 allocations use 0x20 (32) bytes.\n"
    );
    assert!(err.is_empty());
}

#[test]
fn test_script_error_carries_line_context_and_aborts_script() {
    let dir = tempfile::tempdir().unwrap();
    let script_path = dir.path().join("bad.hsc");
    let mut script = std::fs::File::create(&script_path).unwrap();
    writeln!(script, "count free").unwrap();
    writeln!(script, "frobnicate").unwrap();
    writeln!(script, "count free").unwrap();
    drop(script);

    let session = session_from_json(SMALL_HEAP);
    let (out, err) = run_commands(&session, &format!("source {}\n", script_path.display()));
    // The first statement ran; the bad one aborted the rest of the script.
    assert_eq!(out, "3 allocations use 0x50 (80) bytes.\n");
    assert!(err.contains(&format!("Error at line 2 of {}", script_path.display())));
    assert!(err.contains("Command frobnicate is not recognized"));
}

#[test]
fn test_missing_script_is_reported() {
    let session = session_from_json(SMALL_HEAP);
    let (_out, err) = run_commands(&session, "source /no/such/script.hsc\n");
    assert!(err.contains("Failed to open script \"/no/such/script.hsc\"."));
}
