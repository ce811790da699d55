// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn seed_jobs_file(dir: &Path) {
    let jobs = JobsFile {
        job_list: vec![ForwardModelJob {
            name: "copy_file".to_string(),
            executable: "/usr/bin/cp".to_string(),
            arg_list: vec!["a".to_string(), "b".to_string()],
            stdout: Some("copy_file.stdout".to_string()),
            stderr: Some("copy_file.stderr".to_string()),
            ..Default::default()
        }],
        run_id: "run-1".to_string(),
        ..Default::default()
    };
    jobs.write(dir).unwrap();
}

#[test]
fn jobs_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    seed_jobs_file(dir.path());

    let jobs = JobsFile::read(dir.path()).unwrap();
    assert_eq!(jobs.run_id, "run-1");
    assert_eq!(jobs.job_list.len(), 1);
    assert_eq!(jobs.job_list[0].arg_list, vec!["a", "b"]);
}

#[test]
fn wire_keys_are_camel_case_where_specified() {
    let dir = tempfile::tempdir().unwrap();
    seed_jobs_file(dir.path());

    let text = std::fs::read_to_string(dir.path().join(JOBS_FILE)).unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert!(json.get("jobList").is_some());
    assert!(json["jobList"][0].get("argList").is_some());
}

#[test]
fn dispatch_info_is_stamped_in() {
    let dir = tempfile::tempdir().unwrap();
    seed_jobs_file(dir.path());

    add_dispatch_info(
        dir.path(),
        &DispatchInfo {
            ens_id: "ens-1".to_string(),
            real_id: 3,
            step_id: 0,
            dispatch_url: "wss://localhost:51820/dispatch".to_string(),
            token: Some("secret".to_string()),
            experiment_id: Some("exp-1".to_string()),
        },
        None,
    )
    .unwrap();

    let jobs = JobsFile::read(dir.path()).unwrap();
    assert_eq!(jobs.ens_id.as_deref(), Some("ens-1"));
    assert_eq!(jobs.real_id, Some(3));
    assert_eq!(jobs.step_id, Some(0));
    assert_eq!(jobs.dispatch_url.as_deref(), Some("wss://localhost:51820/dispatch"));
    assert_eq!(jobs.ee_token.as_deref(), Some("secret"));
    assert_eq!(jobs.experiment_id.as_deref(), Some("exp-1"));
    assert_eq!(jobs.ee_cert_path, None);
    // Original content survives the rewrite.
    assert_eq!(jobs.job_list[0].name, "copy_file");
}

#[test]
fn cert_bytes_written_and_referenced() {
    let dir = tempfile::tempdir().unwrap();
    seed_jobs_file(dir.path());

    let pem = b"-----BEGIN CERTIFICATE-----\nabc\n-----END CERTIFICATE-----\n";
    add_dispatch_info(
        dir.path(),
        &DispatchInfo {
            ens_id: "ens-1".to_string(),
            real_id: 0,
            step_id: 0,
            dispatch_url: "wss://localhost:51820/dispatch".to_string(),
            token: None,
            experiment_id: None,
        },
        Some(pem),
    )
    .unwrap();

    let jobs = JobsFile::read(dir.path()).unwrap();
    let cert_path = jobs.ee_cert_path.unwrap();
    assert!(cert_path.ends_with(CERT_FILE));
    assert_eq!(std::fs::read(cert_path).unwrap(), pem);
}

#[test]
fn lifecycle_marker_files() {
    let dir = tempfile::tempdir().unwrap();
    assert!(!has_error_file(dir.path()));
    assert!(!has_exit_file(dir.path()));

    std::fs::write(dir.path().join(ERROR_FILE), "boom").unwrap();
    std::fs::write(dir.path().join(EXIT_FILE), "1").unwrap();
    assert!(has_error_file(dir.path()));
    assert!(has_exit_file(dir.path()));
}

#[test]
fn missing_jobs_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(JobsFile::read(dir.path()).is_err());
}
