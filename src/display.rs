//! Live terminal display for suite progress.
//!
//! Renders a compact, in-place updating status line showing active VU
//! count, requests per second, P95 latency, error count/rate, and
//! elapsed time. Updates from the engine's watch channel (published
//! every 2 seconds), not per-request. During ramping phases a
//! `[scenario: stage N/M]` prefix is shown.

use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::engine::DisplayState;
use crate::metrics::MetricsSnapshot;
use crate::vu::ActiveVuCounter;

/// In-place status line backed by an indicatif spinner.
pub struct LiveDisplay {
    _multi: MultiProgress,
    status_bar: ProgressBar,
}

impl LiveDisplay {
    /// Create a new live display.
    ///
    /// If `no_color` is true or stderr is not a terminal (piped), color
    /// output is disabled globally.
    pub fn new(no_color: bool) -> Self {
        if no_color || !std::io::stderr().is_terminal() {
            colored::control::set_override(false);
        }

        let multi = MultiProgress::new();
        let status_bar = multi.add(ProgressBar::new_spinner());
        status_bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {wide_msg}")
                .expect("status template is valid")
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );
        status_bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            _multi: multi,
            status_bar,
        }
    }

    /// Format a single line of live status from a snapshot.
    pub fn format_status(
        snap: &MetricsSnapshot,
        elapsed: Duration,
        active_vus: u32,
        stage_label: Option<&str>,
    ) -> String {
        let elapsed_secs = elapsed.as_secs_f64();
        let rps = if elapsed_secs > 0.0 {
            snap.total_requests as f64 / elapsed_secs
        } else {
            0.0
        };

        let vu_display = active_vus.to_string().green();
        let rps_display = format!("{rps:.1}").green();
        let p95_str = format!("{}ms", snap.p95);
        let p95_display = if snap.p95 > 1000 {
            p95_str.yellow().to_string()
        } else {
            p95_str.green().to_string()
        };
        let error_rate_str = format!("{:.1}%", snap.error_rate * 100.0);
        let error_display = if snap.error_count > 0 {
            format!(
                "{} ({})",
                snap.error_count.to_string().red(),
                error_rate_str.red()
            )
        } else {
            format!("{} ({})", snap.error_count, error_rate_str)
        };

        let metrics_line = format!(
            "vus: {}  |  rps: {}  |  p95: {}  |  errors: {}  |  elapsed: {}s",
            vu_display,
            rps_display,
            p95_display,
            error_display,
            elapsed.as_secs()
        );

        match stage_label {
            Some(label) => format!("  [{label}]  {metrics_line}"),
            None => format!("  {metrics_line}"),
        }
    }

    /// Update the display with the latest snapshot.
    pub fn update(
        &self,
        snap: &MetricsSnapshot,
        elapsed: Duration,
        active_vus: u32,
        stage_label: Option<&str>,
    ) {
        self.status_bar
            .set_message(Self::format_status(snap, elapsed, active_vus, stage_label));
    }

    /// Stop the display and clear the spinner.
    pub fn finish(&self) {
        self.status_bar.finish_and_clear();
    }
}

/// Run the live display loop.
///
/// Subscribes to the watch channel of [`DisplayState`] and re-renders on
/// every published snapshot. Stops when the token is cancelled or the
/// watch sender is dropped.
pub async fn display_loop(
    mut display_rx: watch::Receiver<DisplayState>,
    active_vus: ActiveVuCounter,
    cancel: CancellationToken,
    test_start: Instant,
) {
    let display = LiveDisplay::new(false);

    eprintln!();
    eprintln!("  Running suite...");
    eprintln!();

    loop {
        tokio::select! {
            result = display_rx.changed() => {
                match result {
                    Ok(()) => {
                        let state = display_rx.borrow_and_update().clone();
                        display.update(
                            &state.snapshot,
                            test_start.elapsed(),
                            active_vus.get(),
                            state.stage_label.as_deref(),
                        );
                    }
                    Err(_) => {
                        // Sender dropped, the run is ending.
                        break;
                    }
                }
            }
            _ = cancel.cancelled() => {
                let state = display_rx.borrow().clone();
                display.update(
                    &state.snapshot,
                    test_start.elapsed(),
                    active_vus.get(),
                    state.stage_label.as_deref(),
                );
                break;
            }
        }
    }

    display.finish();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_status_zero_state() {
        let snap = MetricsSnapshot::default();
        let status = LiveDisplay::format_status(&snap, Duration::ZERO, 0, None);
        assert!(status.contains("vus:"), "got: {status}");
        assert!(status.contains("0.0"), "got: {status}");
        assert!(status.contains("errors:"), "got: {status}");
    }

    #[test]
    fn test_format_status_with_errors_and_latency() {
        let snap = MetricsSnapshot {
            p95: 42,
            success_count: 45,
            error_count: 5,
            total_requests: 50,
            error_rate: 0.1,
            ..MetricsSnapshot::default()
        };
        let status = LiveDisplay::format_status(&snap, Duration::from_secs(30), 10, None);
        assert!(status.contains("42ms"), "got: {status}");
        assert!(status.contains("10.0%"), "got: {status}");
    }

    #[test]
    fn test_format_status_with_stage_label() {
        let snap = MetricsSnapshot::default();
        let status = LiveDisplay::format_status(
            &snap,
            Duration::from_secs(10),
            5,
            Some("stress: stage 2/11 -> 150 VUs"),
        );
        assert!(
            status.contains("[stress: stage 2/11 -> 150 VUs]"),
            "got: {status}"
        );
    }

    #[test]
    fn test_format_status_without_stage_label_has_no_brackets() {
        let snap = MetricsSnapshot::default();
        let status = LiveDisplay::format_status(&snap, Duration::from_secs(10), 5, None);
        assert!(!status.contains('['), "got: {status}");
    }

    #[test]
    fn test_live_display_new_does_not_panic() {
        let display = LiveDisplay::new(true);
        display.finish();
    }
}
