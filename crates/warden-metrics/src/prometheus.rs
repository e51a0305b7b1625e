//! Prometheus text exposition format.
//!
//! Renders the cluster snapshot and per-worker metrics for scraping by a
//! Prometheus server or compatible agent.

use std::fmt::Write;

use warden_core::{ClusterSnapshot, WorkerHandle, WorkerStatus};

const STATUSES: [WorkerStatus; 5] = [
    WorkerStatus::Starting,
    WorkerStatus::Ready,
    WorkerStatus::Degraded,
    WorkerStatus::Terminating,
    WorkerStatus::Dead,
];

fn header(out: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
}

/// Render a snapshot plus the current workers into Prometheus text format.
///
/// Cluster gauges are unlabelled; per-worker gauges carry a `worker` label.
pub fn render_prometheus(snapshot: &ClusterSnapshot, workers: &[WorkerHandle]) -> String {
    let mut out = String::new();

    header(&mut out, "warden_workers", "Workers by status.", "gauge");
    for status in STATUSES {
        let count = workers.iter().filter(|w| w.status == status).count();
        let _ = writeln!(out, "warden_workers{{status=\"{}\"}} {count}", status_label(status));
    }

    header(&mut out, "warden_eligible_workers", "Workers counted in the cluster snapshot.", "gauge");
    let _ = writeln!(out, "warden_eligible_workers {}", snapshot.worker_count);

    header(&mut out, "warden_cpu_percent_avg", "Average CPU utilisation of eligible workers.", "gauge");
    let _ = writeln!(out, "warden_cpu_percent_avg {:.2}", snapshot.avg_cpu);

    header(&mut out, "warden_memory_percent_avg", "Average memory utilisation of eligible workers.", "gauge");
    let _ = writeln!(out, "warden_memory_percent_avg {:.2}", snapshot.avg_memory);

    header(&mut out, "warden_requests_per_minute", "Cluster request rate per minute.", "gauge");
    let _ = writeln!(out, "warden_requests_per_minute {:.2}", snapshot.request_rate_per_minute);

    header(&mut out, "warden_error_rate_percent", "Errors as a percentage of requests served.", "gauge");
    let _ = writeln!(out, "warden_error_rate_percent {:.4}", snapshot.error_rate_percent);

    header(&mut out, "warden_worker_cpu_percent", "CPU utilisation per worker.", "gauge");
    for w in workers {
        let _ = writeln!(out, "warden_worker_cpu_percent{{worker=\"{}\"}} {:.2}", w.id, w.last_metrics.cpu_percent);
    }

    header(&mut out, "warden_worker_memory_percent", "Memory utilisation per worker.", "gauge");
    for w in workers {
        let _ = writeln!(
            out,
            "warden_worker_memory_percent{{worker=\"{}\"}} {:.2}",
            w.id, w.last_metrics.memory_percent
        );
    }

    header(&mut out, "warden_worker_requests_total", "Requests served per worker.", "counter");
    for w in workers {
        let _ = writeln!(
            out,
            "warden_worker_requests_total{{worker=\"{}\"}} {}",
            w.id, w.last_metrics.requests_served
        );
    }

    out
}

fn status_label(status: WorkerStatus) -> &'static str {
    match status {
        WorkerStatus::Starting => "starting",
        WorkerStatus::Ready => "ready",
        WorkerStatus::Degraded => "degraded",
        WorkerStatus::Terminating => "terminating",
        WorkerStatus::Dead => "dead",
    }
}
