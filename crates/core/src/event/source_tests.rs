// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    full = { "/ensemble/ee-0/real/1111/step/asd123ASD/job/0/index/0", Some("1111"), Some("asd123ASD"), Some("0") },
    step_only = { "/ensemble/ee-0/real/1111/step/asd123ASD", Some("1111"), Some("asd123ASD"), None },
    real_only = { "/ensemble/ee-0/real/1111", Some("1111"), None, None },
    ensemble_only = { "/ensemble/ee-0", None, None, None },
)]
fn source_ids(
    source: &str,
    real: Option<&str>,
    step: Option<&str>,
    job: Option<&str>,
) {
    let source = Source::from(source);
    assert_eq!(source.real_id(), real);
    assert_eq!(source.step_id(), step);
    assert_eq!(source.job_id(), job);
}

#[test]
fn source_builders_round_trip() {
    let source = Source::job("e1", "0", "0", "2", "2");
    assert_eq!(source.as_str(), "/ensemble/e1/real/0/step/0/job/2/index/2");
    assert_eq!(source.ensemble_id(), Some("e1"));
    assert_eq!(source.job_index(), Some("2"));
}

#[test]
fn trailing_token_without_value() {
    let source = Source::from("/ensemble/e1/real/");
    assert_eq!(source.real_id(), None);
}

#[test]
fn source_serde_is_plain_string() {
    let source = Source::real("e1", "3");
    let json = serde_json::to_string(&source).unwrap();
    assert_eq!(json, "\"/ensemble/e1/real/3\"");
}
