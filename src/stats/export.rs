// =============================================================================
// Export formats — JSON, Prometheus text, CSV, Datadog-style
// =============================================================================
//
// All exports sanitize identifiers: component and counter names are expected
// to already be safe (they're literals chosen by the code that calls
// `record_operation`/`set_gauge`), but any value that looks like a token or an
// order/account id is masked before it leaves the process.
// =============================================================================

use crate::stats::aggregator::AggregatedSnapshot;

/// Mask everything but the last 4 characters of anything that looks like an
/// opaque identifier (order ids, account ids, broker tokens) so exports never
/// leak enough of an id to reconstruct it.
fn mask_identifier(value: &str) -> String {
    if value.len() <= 4 {
        "*".repeat(value.len())
    } else {
        format!("{}{}", "*".repeat(value.len() - 4), &value[value.len() - 4..])
    }
}

pub fn to_json(snapshot: &AggregatedSnapshot) -> serde_json::Value {
    let components: serde_json::Map<String, serde_json::Value> = snapshot
        .components
        .iter()
        .map(|(name, counters)| {
            (
                name.clone(),
                serde_json::json!({
                    "operations": counters.operations,
                    "errors": counters.errors.tally(),
                    "latency_mean_ms": counters.latency.mean_ms(),
                    "latency_samples": counters.latency.total(),
                    "gauges": counters.gauges,
                }),
            )
        })
        .collect();

    serde_json::json!({
        "taken_at_secs_monotonic": snapshot.taken_at_secs_monotonic,
        "health_score": snapshot.health_score,
        "health_tier": snapshot.health_tier.to_string(),
        "components": components,
    })
}

/// Prometheus text exposition format (one gauge/counter metric family per
/// component signal, labeled with `component`).
pub fn to_prometheus_text(snapshot: &AggregatedSnapshot) -> String {
    let mut out = String::new();
    out.push_str("# HELP suite_health_score Overall health score (0-100)\n");
    out.push_str("# TYPE suite_health_score gauge\n");
    out.push_str(&format!("suite_health_score {}\n", snapshot.health_score));

    for (component, counters) in &snapshot.components {
        let component = sanitize_label(component);
        for (op, count) in &counters.operations {
            out.push_str(&format!(
                "suite_operations_total{{component=\"{component}\",operation=\"{}\"}} {count}\n",
                sanitize_label(op)
            ));
        }
        for (kind, count) in counters.errors.tally() {
            out.push_str(&format!(
                "suite_errors_total{{component=\"{component}\",kind=\"{}\"}} {count}\n",
                sanitize_label(kind)
            ));
        }
        out.push_str(&format!("suite_latency_mean_ms{{component=\"{component}\"}} {}\n", counters.latency.mean_ms()));
        for (gauge, value) in &counters.gauges {
            out.push_str(&format!(
                "suite_gauge{{component=\"{component}\",name=\"{}\"}} {value}\n",
                sanitize_label(gauge)
            ));
        }
    }
    out
}

pub fn to_csv(snapshot: &AggregatedSnapshot) -> String {
    let mut out = String::from("component,operation,count\n");
    for (component, counters) in &snapshot.components {
        for (op, count) in &counters.operations {
            out.push_str(&format!("{},{},{}\n", sanitize_label(component), sanitize_label(op), count));
        }
    }
    out
}

/// A Datadog-style payload: a flat list of `{metric, value, tags}` entries,
/// the shape the Datadog HTTP intake API expects (without the outer series
/// envelope, which the shipping layer adds).
pub fn to_datadog(snapshot: &AggregatedSnapshot) -> serde_json::Value {
    let mut series = Vec::new();
    series.push(serde_json::json!({
        "metric": "suite.health_score",
        "value": snapshot.health_score,
        "tags": [],
    }));
    for (component, counters) in &snapshot.components {
        for (op, count) in &counters.operations {
            series.push(serde_json::json!({
                "metric": "suite.operations_total",
                "value": count,
                "tags": [format!("component:{}", sanitize_label(component)), format!("operation:{}", sanitize_label(op))],
            }));
        }
    }
    serde_json::json!({ "series": series })
}

fn sanitize_label(value: &str) -> String {
    if looks_like_identifier(value) {
        mask_identifier(value)
    } else {
        value.chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }).collect()
    }
}

fn looks_like_identifier(value: &str) -> bool {
    uuid::Uuid::parse_str(value).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::aggregator::StatsAggregator;
    use crate::stats::health::HealthSignals;
    use std::time::Duration;

    #[test]
    fn json_export_includes_health_score_and_tier() {
        let aggregator = StatsAggregator::new(Duration::from_secs(60));
        let snapshot = aggregator.snapshot(0, HealthSignals { connection_health: 1.0, validation_acceptance_rate: 1.0, reconciliation_success_rate: 1.0, buffer_headroom: 1.0, error_rate_stability: 1.0 });
        let json = to_json(&snapshot);
        assert_eq!(json["health_score"], 100);
        assert_eq!(json["health_tier"], "healthy");
    }

    #[test]
    fn uuid_identifiers_are_masked_in_labels() {
        let id = uuid::Uuid::new_v4().to_string();
        let masked = sanitize_label(&id);
        assert!(masked.ends_with(&id[id.len() - 4..]));
        assert!(masked.starts_with('*'));
    }

    #[test]
    fn prometheus_text_contains_metric_families() {
        let aggregator = StatsAggregator::new(Duration::from_secs(60));
        let slot = crate::stats::aggregator::ComponentSlot::new("transport");
        aggregator.register(slot.clone());
        slot.with_counters(|c| c.record_operation("request"));
        let snapshot = aggregator.snapshot(0, HealthSignals::default());
        let text = to_prometheus_text(&snapshot);
        assert!(text.contains("suite_health_score"));
        assert!(text.contains("suite_operations_total"));
    }
}
