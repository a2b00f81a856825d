//! Integration tests for CLI argument handling
//!
//! Runs the compiled binary; every case here is rejected or answered before
//! any provider request is made.

use std::process::Command;

/// Helper to run the CLI with given args and capture output
fn run_cli(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_ongkir"))
        .args(args)
        .env_remove("RAJAONGKIR_API_KEY")
        .env_remove("RAJAONGKIR_BASE_URL")
        .output()
        .expect("Failed to execute ongkir")
}

#[test]
fn test_help_flag_exits_successfully() {
    let output = run_cli(&["--help"]);
    assert!(output.status.success(), "Expected --help to exit successfully");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ongkir"), "Help should mention ongkir");
    assert!(stdout.contains("search"), "Help should list the search command");
    assert!(stdout.contains("cost"), "Help should list the cost command");
}

#[test]
fn test_short_search_query_is_rejected() {
    let output = run_cli(&["--memory-only", "search", "ab"]);
    assert!(!output.status.success(), "Expected a two-character query to fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("too short"), "Should explain the rejection: {}", stderr);
}

#[test]
fn test_zero_weight_cost_is_rejected() {
    let output = run_cli(&[
        "--memory-only", "cost", "--origin", "152", "--destination", "23", "--weight", "0",
    ]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("weight"), "Should mention the weight: {}", stderr);
}

#[test]
fn test_preload_depth_out_of_range_is_rejected() {
    let output = run_cli(&["--memory-only", "preload", "--depth", "5"]);
    assert!(!output.status.success());
}

#[test]
fn test_clear_endpoint_succeeds_without_provider() {
    let output = run_cli(&["--memory-only", "clear", "/destination/province"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("/destination/province"));
}

#[test]
fn test_couriers_lists_catalogue() {
    let output = run_cli(&["couriers", "--memory-only"]);
    assert!(output.status.success());
    let couriers: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("couriers output should be JSON");
    assert_eq!(couriers.as_array().map(Vec::len), Some(17));
}

#[test]
fn test_missing_api_key_yields_empty_list() {
    let output = run_cli(&["--memory-only", "provinces"]);
    assert!(output.status.success(), "Missing key must not be a failure");
    let provinces: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("provinces output should be JSON");
    assert_eq!(provinces, serde_json::json!([]));
}

#[test]
fn test_stats_on_empty_cache() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_cli(&["--cache-dir", dir.path().to_str().unwrap(), "stats"]);
    assert!(output.status.success());
    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["total_entries"], 0);
}

#[cfg(test)]
mod unit_tests {
    //! Unit tests for CLI parsing that don't require running the binary

    use clap::Parser;
    use ongkir::cli::{parse_courier_list, Cli, Command, WarmTarget};

    #[test]
    fn test_cli_parses_search_with_paging() {
        let cli = Cli::parse_from(["ongkir", "search", "gambir", "--limit", "5", "--offset", "10"]);
        match cli.command {
            Command::Search { query, limit, offset } => {
                assert_eq!(query, "gambir");
                assert_eq!(limit, 5);
                assert_eq!(offset, 10);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_parses_warm_targets() {
        let cli = Cli::parse_from(["ongkir", "warm", "searches"]);
        assert!(matches!(cli.command, Command::Warm { target: WarmTarget::Searches, .. }));
    }

    #[test]
    fn test_cli_rejects_unknown_warm_target() {
        assert!(Cli::try_parse_from(["ongkir", "warm", "everything"]).is_err());
    }

    #[test]
    fn test_courier_list_parsing() {
        assert_eq!(parse_courier_list("jne:pos"), vec!["jne", "pos"]);
    }
}
