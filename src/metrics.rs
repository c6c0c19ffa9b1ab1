/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/metrics.rs
*
* This module defines and registers the custom Prometheus metrics that the
* keycloak-operator exposes. They describe how reconciliations end, how long
* failing resources are parked, and how the Keycloak API answers.
*
* Using `lazy_static`, we ensure that the metrics are created only once and are
* available globally and safely across all concurrent reconciliation loops and
* the web server.
*
* SPDX-License-Identifier: Apache-2.0
*/

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec, Registry,
};

// --- Metric Definitions ---

lazy_static! {
    /// Reconciliation cycles, labeled by resource kind and result.
    pub static ref RECONCILIATIONS_TOTAL: IntCounterVec =
        register_int_counter_vec!(
            "keycloak_operator_reconciliations_total",
            "Total number of reconciliation cycles.",
            &["kind", "result"]
        ).unwrap();

    /// Delay chosen by the backoff policy after a failed cycle, in seconds.
    pub static ref FAILURE_REQUEUE_SECONDS: HistogramVec =
        register_histogram_vec!(
            "keycloak_operator_failure_requeue_seconds",
            "Requeue delay applied after a failed reconciliation.",
            &["kind"],
            vec![1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0]
        ).unwrap();

    /// Requests sent to the Keycloak admin API, labeled by outcome.
    pub static ref KEYCLOAK_REQUESTS_TOTAL: IntCounterVec =
        register_int_counter_vec!(
            "keycloak_operator_keycloak_requests_total",
            "Total number of requests sent to the Keycloak admin API.",
            &["outcome"]
        ).unwrap();
}

/// Creates a new Prometheus registry and registers all custom metrics.
///
/// This function is intended to be called once at operator startup.
pub fn create_and_register_metrics() -> Result<Registry, prometheus::Error> {
    let r = Registry::new();
    r.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    r.register(Box::new(FAILURE_REQUEUE_SECONDS.clone()))?;
    r.register(Box::new(KEYCLOAK_REQUESTS_TOTAL.clone()))?;
    Ok(r)
}
