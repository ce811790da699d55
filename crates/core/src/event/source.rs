// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event source paths — `/ensemble/{E}/real/{R}/step/{S}/job/{J}/index/{I}`.

use serde::{Deserialize, Serialize};

/// A hierarchical source path identifying the entity an event concerns.
///
/// Segments are `token/value` pairs; deeper levels are optional, so
/// `/ensemble/e1/real/0` addresses a whole realization. Values are opaque
/// strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Source(String);

impl Source {
    pub fn ensemble(ens_id: &str) -> Self {
        Self(format!("/ensemble/{ens_id}"))
    }

    pub fn real(ens_id: &str, real_id: &str) -> Self {
        Self(format!("/ensemble/{ens_id}/real/{real_id}"))
    }

    pub fn step(ens_id: &str, real_id: &str, step_id: &str) -> Self {
        Self(format!("/ensemble/{ens_id}/real/{real_id}/step/{step_id}"))
    }

    pub fn job(ens_id: &str, real_id: &str, step_id: &str, job_id: &str, index: &str) -> Self {
        Self(format!(
            "/ensemble/{ens_id}/real/{real_id}/step/{step_id}/job/{job_id}/index/{index}"
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value following `token` in the path, if any.
    fn segment(&self, token: &str) -> Option<&str> {
        let mut parts = self.0.split('/');
        while let Some(part) = parts.next() {
            if part == token {
                return parts.next().filter(|v| !v.is_empty());
            }
        }
        None
    }

    pub fn ensemble_id(&self) -> Option<&str> {
        self.segment("ensemble")
    }

    pub fn real_id(&self) -> Option<&str> {
        self.segment("real")
    }

    pub fn step_id(&self) -> Option<&str> {
        self.segment("step")
    }

    pub fn job_id(&self) -> Option<&str> {
        self.segment("job")
    }

    pub fn job_index(&self) -> Option<&str> {
        self.segment("index")
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Source {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Source {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
#[path = "source_tests.rs"]
mod tests;
