use prometheus::{Encoder, IntCounterVec, IntGauge, Registry, TextEncoder};
use lazy_static::lazy_static;
use std::sync::OnceLock;

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}
static QUERY_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();
static GENERATION_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();
static RECONCILE_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();
static SESSION_ONLINE: OnceLock<IntGauge> = OnceLock::new();

pub fn init_metrics() {
    let query_counter = QUERY_COUNTER.get_or_init(|| {
        IntCounterVec::new(
            prometheus::opts!("queries_total", "Query submissions by outcome"),
            &["outcome"],
        )
        .expect("valid queries_total metric")
    });

    let generation_counter = GENERATION_COUNTER.get_or_init(|| {
        IntCounterVec::new(
            prometheus::opts!("generation_total", "Language-model generation calls by outcome"),
            &["outcome"],
        )
        .expect("valid generation_total metric")
    });

    let reconcile_counter = RECONCILE_COUNTER.get_or_init(|| {
        IntCounterVec::new(
            prometheus::opts!("knowledge_reconcile_total", "Knowledge reconciliations by source"),
            &["source"],
        )
        .expect("valid knowledge_reconcile_total metric")
    });

    let session_online = SESSION_ONLINE.get_or_init(|| {
        IntGauge::new("session_online", "1 while the relational store is reachable").expect("valid session_online metric")
    });

    REGISTRY.register(Box::new(query_counter.clone())).ok();
    REGISTRY.register(Box::new(generation_counter.clone())).ok();
    REGISTRY.register(Box::new(reconcile_counter.clone())).ok();
    REGISTRY.register(Box::new(session_online.clone())).ok();
}

pub fn inc_query(outcome: &str) {
    if let Some(counter) = QUERY_COUNTER.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn inc_generation(outcome: &str) {
    if let Some(counter) = GENERATION_COUNTER.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn inc_reconcile(source: &str) {
    if let Some(counter) = RECONCILE_COUNTER.get() {
        counter.with_label_values(&[source]).inc();
    }
}

pub fn set_session_online(online: bool) {
    if let Some(gauge) = SESSION_ONLINE.get() {
        gauge.set(online as i64);
    }
}

/// Prometheus text exposition of everything registered.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
