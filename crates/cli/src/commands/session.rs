//! Session status and control commands

use anyhow::Result;
use chrono::Local;
use colored::Colorize;
use pulse_lib::session::DashboardSnapshot;
use tabled::{settings::Style, Table, Tabled};

use crate::client::{ApiClient, ApiError};
use crate::output::{
    color_score, color_tier, format_loss, format_ms, print_info, print_json, print_success,
    print_warning, OutputFormat,
};

/// Row for the history table
#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Latency")]
    latency: String,
    #[tabled(rename = "Jitter")]
    jitter: String,
}

/// Row for the window summary table
#[derive(Tabled)]
struct SummaryRow {
    #[tabled(rename = "Series")]
    series: &'static str,
    #[tabled(rename = "Min")]
    min: String,
    #[tabled(rename = "Mean")]
    mean: String,
    #[tabled(rename = "P95")]
    p95: String,
    #[tabled(rename = "Max")]
    max: String,
}

/// Show the current reading and session flags
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let snapshot = client.snapshot().await?;
    print_snapshot(&snapshot, format)
}

/// Show the rolling history window
pub async fn show_history(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let snapshot = client.snapshot().await?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "history": snapshot.history,
            "summary": snapshot.summary,
        })),
        OutputFormat::Table => {
            if snapshot.history.is_empty() {
                print_warning("No samples in the history window");
                return Ok(());
            }

            let history = &snapshot.history;
            let rows: Vec<HistoryRow> = history
                .labels
                .iter()
                .zip(history.latency.iter().zip(history.jitter.iter()))
                .map(|(label, (latency, jitter))| HistoryRow {
                    time: label.clone(),
                    latency: format_ms(*latency),
                    jitter: format_ms(*jitter),
                })
                .collect();
            println!("{}", Table::new(rows).with(Style::rounded()).to_string());

            if let Some(summary) = &snapshot.summary {
                let stats = [("Latency", summary.latency), ("Jitter", summary.jitter)];
                let rows: Vec<SummaryRow> = stats
                    .into_iter()
                    .map(|(series, s)| SummaryRow {
                        series,
                        min: format_ms(s.min),
                        mean: format_ms(s.mean),
                        p95: format_ms(s.p95),
                        max: format_ms(s.max),
                    })
                    .collect();
                println!("{}", Table::new(rows).with(Style::rounded()).to_string());
                println!("\nWindow: {} samples", summary.points);
            }
            Ok(())
        }
    }
}

pub async fn start(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let snapshot = client.start().await?;
    if format == OutputFormat::Table {
        if snapshot.simulated_mode {
            print_warning("Live probe unavailable, session is running on simulated samples");
        } else {
            print_success("Monitoring session started");
        }
    }
    print_snapshot(&snapshot, format)
}

pub async fn stop(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let snapshot = client.stop().await?;
    if format == OutputFormat::Table {
        print_success("Monitoring session stopped");
    }
    print_snapshot(&snapshot, format)
}

/// Begin a stress test; a stopped session is reported, not treated as a failure
pub async fn stress(client: &ApiClient, format: OutputFormat) -> Result<()> {
    match client.stress().await {
        Ok(snapshot) => {
            if format == OutputFormat::Table {
                print_success(&format!(
                    "Stress test running for {} ticks",
                    snapshot.stress_remaining_ticks
                ));
            }
            print_snapshot(&snapshot, format)
        }
        Err(err) => match err.downcast_ref::<ApiError>() {
            Some(api_err) if api_err.is_conflict() => {
                print_warning("No session is running, start one with `pulsectl start`");
                Ok(())
            }
            _ => Err(err),
        },
    }
}

fn print_snapshot(snapshot: &DashboardSnapshot, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(snapshot);
    }

    println!("{}", "Network Status".bold());
    println!("{}", "=".repeat(40));

    let mode = if snapshot.simulated_mode {
        " (simulated)".yellow().to_string()
    } else {
        String::new()
    };
    let state = format!("{:?}", snapshot.state).to_lowercase();
    println!("State:   {}{}", state.cyan(), mode);

    match &snapshot.current {
        Some(reading) => {
            let sample = &reading.sample;
            println!(
                "Health:  {}  score {}",
                color_tier(reading.tier),
                color_score(reading.score)
            );
            println!("RTT:     {}", format_ms(sample.rtt_ms));
            println!("Jitter:  {}", format_ms(sample.jitter_ms));
            println!("Loss:    {}", format_loss(sample.loss_percent));
            println!(
                "Sampled: {} ({:?})",
                sample.timestamp.with_timezone(&Local).format("%H:%M:%S"),
                reading.source
            );
        }
        None if snapshot.running => print_info("Waiting for the first reading"),
        None => print_info("No active session"),
    }

    if snapshot.stress_active {
        println!(
            "Stress:  {} ({} ticks left)",
            "active".red().bold(),
            snapshot.stress_remaining_ticks
        );
    }
    if snapshot.running {
        println!("Window:  {} samples, tick {}", snapshot.history.len(), snapshot.tick);
    }
    Ok(())
}
