//! Tests for the `add` and `run` subcommands.

use super::parse;
use crate::cli::CliCommand;

#[test]
fn cli_parse_add() {
    match parse(&["dlm", "add", "https://example.com/file.iso"]) {
        CliCommand::Add { url, download_dir, start, .. } => {
            assert_eq!(url, "https://example.com/file.iso");
            assert!(download_dir.is_none());
            assert!(!start);
        }
        _ => panic!("expected Add"),
    }
}

#[test]
fn cli_parse_add_download_dir_and_start() {
    match parse(&[
        "dlm", "add", "https://example.com/x", "--download-dir", "/tmp", "--start",
    ]) {
        CliCommand::Add { url, download_dir, start, .. } => {
            assert_eq!(url, "https://example.com/x");
            assert_eq!(download_dir.as_deref(), Some(std::path::Path::new("/tmp")));
            assert!(start);
        }
        _ => panic!("expected Add with --download-dir --start"),
    }
}

#[test]
fn cli_parse_add_headers_and_connections() {
    match parse(&[
        "dlm",
        "add",
        "https://example.com/x",
        "--connections",
        "4",
        "--header",
        "Authorization: Bearer t",
        "--header",
        "X-Foo: bar",
        "--speed-limit",
        "1048576",
    ]) {
        CliCommand::Add {
            connections,
            headers,
            speed_limit,
            ..
        } => {
            assert_eq!(connections, Some(4));
            assert_eq!(headers.len(), 2);
            assert_eq!(speed_limit, Some(1_048_576));
        }
        _ => panic!("expected Add with headers/connections/speed-limit"),
    }
}

#[test]
fn cli_parse_run_defaults() {
    match parse(&["dlm", "run"]) {
        CliCommand::Run { id, jobs } => {
            assert!(id.is_none());
            assert!(jobs.is_none());
        }
        _ => panic!("expected Run"),
    }
}

#[test]
fn cli_parse_run_with_id_and_jobs() {
    match parse(&["dlm", "run", "job-00000001", "--jobs", "4"]) {
        CliCommand::Run { id, jobs } => {
            assert_eq!(id.as_deref(), Some("job-00000001"));
            assert_eq!(jobs, Some(4));
        }
        _ => panic!("expected Run with id and --jobs"),
    }
}
