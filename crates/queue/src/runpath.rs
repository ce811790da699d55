// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-job on-disk contract.
//!
//! Before submission every run path gets a `jobs.json` the job runner
//! consumes; the runner signals its lifecycle back through `status.txt`,
//! `ERROR` and `EXIT` (presence/append-only). `CERT` carries PEM bytes when
//! TLS is configured.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const JOBS_FILE: &str = "jobs.json";
pub const STATUS_FILE: &str = "status.txt";
pub const ERROR_FILE: &str = "ERROR";
pub const EXIT_FILE: &str = "EXIT";
pub const CERT_FILE: &str = "CERT";

/// One forward-model job entry in `jobs.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForwardModelJob {
    pub name: String,
    pub executable: String,
    #[serde(rename = "argList", default, skip_serializing_if = "Vec::is_empty")]
    pub arg_list: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub environment: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub exec_env: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_running_minutes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_running: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_arg: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_arg: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arg_types: Vec<String>,
}

/// The `jobs.json` document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobsFile {
    #[serde(rename = "jobList", default)]
    pub job_list: Vec<ForwardModelJob>,
    #[serde(default)]
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ert_pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ens_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub real_id: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatch_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ee_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ee_cert_path: Option<String>,
}

impl JobsFile {
    pub fn read(run_path: &Path) -> std::io::Result<Self> {
        let text = fs::read_to_string(run_path.join(JOBS_FILE))?;
        serde_json::from_str(&text).map_err(std::io::Error::other)
    }

    pub fn write(&self, run_path: &Path) -> std::io::Result<()> {
        let text = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(run_path.join(JOBS_FILE), text)
    }
}

/// Dispatch fields stamped into `jobs.json` before submission.
#[derive(Debug, Clone)]
pub struct DispatchInfo {
    pub ens_id: String,
    pub real_id: usize,
    pub step_id: usize,
    pub dispatch_url: String,
    pub token: Option<String>,
    pub experiment_id: Option<String>,
}

/// Rewrite the run path's `jobs.json` with dispatch info.
///
/// When `cert` is given its PEM bytes are written to `CERT` next to the
/// jobs file and the path recorded as `ee_cert_path`.
pub fn add_dispatch_info(
    run_path: &Path,
    info: &DispatchInfo,
    cert: Option<&[u8]>,
) -> std::io::Result<()> {
    let mut jobs = JobsFile::read(run_path)?;

    jobs.ens_id = Some(info.ens_id.clone());
    jobs.real_id = Some(info.real_id);
    jobs.step_id = Some(info.step_id);
    jobs.dispatch_url = Some(info.dispatch_url.clone());
    jobs.ee_token = info.token.clone();
    jobs.experiment_id = info.experiment_id.clone();

    if let Some(cert) = cert {
        let cert_path = run_path.join(CERT_FILE);
        fs::write(&cert_path, cert)?;
        jobs.ee_cert_path = Some(cert_path.to_string_lossy().into_owned());
    } else {
        jobs.ee_cert_path = None;
    }

    jobs.write(run_path)
}

/// Whether the run signalled a hard error (`ERROR` file present).
pub fn has_error_file(run_path: &Path) -> bool {
    run_path.join(ERROR_FILE).exists()
}

/// Whether the run signalled an exit (`EXIT` file present).
pub fn has_exit_file(run_path: &Path) -> bool {
    run_path.join(EXIT_FILE).exists()
}

#[cfg(test)]
#[path = "runpath_tests.rs"]
mod tests;
