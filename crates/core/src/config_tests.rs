// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[test]
fn defaults() {
    let config = QueueConfig::default();
    assert_eq!(config.max_submit, 2);
    assert_eq!(config.max_running, 0);
    assert_eq!(config.max_runtime, 0);
    assert_eq!(config.min_realizations_required, 0);
    assert_eq!(config.long_running_factor, LONG_RUNNING_FACTOR);
    assert_eq!(config.queue_driver, DriverKind::Local);
}

#[test]
fn parse_full_table() {
    let config = QueueConfig::from_toml_str(
        r#"
        max_submit = 3
        max_running = 10
        max_runtime = 3600
        min_realizations_required = 5
        long_running_factor = 2.0
        queue_driver = "lsf"

        [driver_options]
        LSF_QUEUE = "mr"
        "#,
    )
    .unwrap();

    assert_eq!(config.max_submit, 3);
    assert_eq!(config.max_running, 10);
    assert_eq!(config.queue_driver, DriverKind::Lsf);
    assert_eq!(config.driver_options.get("LSF_QUEUE").map(String::as_str), Some("mr"));
}

#[test]
fn missing_fields_use_defaults() {
    let config = QueueConfig::from_toml_str("max_running = 4").unwrap();
    assert_eq!(config.max_running, 4);
    assert_eq!(config.max_submit, 2);
}

#[test]
fn invalid_driver_is_an_error() {
    assert!(QueueConfig::from_toml_str("queue_driver = \"cloud\"").is_err());
}

#[parameterized(
    local = { DriverKind::Local, "local" },
    lsf = { DriverKind::Lsf, "lsf" },
    pbs = { DriverKind::Pbs, "pbs" },
    slurm = { DriverKind::Slurm, "slurm" },
    torque = { DriverKind::Torque, "torque" },
)]
fn driver_kind_names(kind: DriverKind, name: &str) {
    assert_eq!(kind.to_string(), name);
}

#[test]
fn builder_setters() {
    let config = QueueConfig::default()
        .max_running(2)
        .max_submit(1)
        .driver_option("PBS_QUEUE", "fast");
    assert_eq!(config.max_running, 2);
    assert_eq!(config.max_submit, 1);
    assert_eq!(config.driver_options.len(), 1);
}
