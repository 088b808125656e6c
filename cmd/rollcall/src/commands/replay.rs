//! Replays a recorded event stream through the engine.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Args;
use serde::{Deserialize, Serialize};
use tracing::info;

use rollcall_attendance::{
    AttendanceRecord, Engine, EngineStats, MemoryReviewQueue, MemorySink, Observation, Session,
    SessionSummary,
};

use super::{load_gallery, load_request, output_result, print_success, print_warning};
use crate::Cli;

/// Replay recorded events and print the attendance they produce.
#[derive(Args)]
pub struct ReplayCommand {
    /// Gallery snapshot (JSON or YAML)
    #[arg(short = 'g', long)]
    gallery: String,

    /// Event stream: JSON lines (.jsonl), or a YAML/JSON list
    events: String,
}

/// One entry of a recorded stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReplayEvent {
    OpenSession {
        session_id: String,
        window_start: DateTime<Utc>,
        #[serde(default)]
        window_end: Option<DateTime<Utc>>,
    },
    Observation(Observation),
    CloseSession {
        session_id: String,
        closed_at: DateTime<Utc>,
    },
}

#[derive(Debug, Serialize)]
struct ReplayReport {
    records: Vec<AttendanceRecord>,
    review: Vec<AttendanceRecord>,
    summaries: Vec<SessionSummary>,
    stats: EngineStats,
    errors: Vec<String>,
    undelivered: Vec<String>,
}

impl ReplayCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let (gallery, cfg) = load_gallery(cli, &self.gallery)?;
        let events = load_events(&self.events)?;
        info!(events = events.len(), identities = gallery.len(), "replay starting");

        let sink = Arc::new(MemorySink::new());
        let review = Arc::new(MemoryReviewQueue::new());
        let (engine, mut failures) =
            Engine::with_gallery(cfg, Arc::new(gallery), sink.clone(), review.clone())?;

        let mut errors = Vec::new();
        for (i, event) in events.into_iter().enumerate() {
            let result = match event {
                ReplayEvent::OpenSession {
                    session_id,
                    window_start,
                    window_end,
                } => {
                    let mut session = Session::open(session_id, window_start);
                    if let Some(end) = window_end {
                        session = session.with_end(end);
                    }
                    engine.open_session(session)
                }
                ReplayEvent::Observation(obs) => engine.observe(&obs).map(|_| ()),
                ReplayEvent::CloseSession {
                    session_id,
                    closed_at,
                } => engine.close_session(&session_id, closed_at).map(|_| ()),
            };
            if let Err(e) = result {
                errors.push(format!("event {i}: {e}"));
            }
        }
        engine.shutdown().await;

        let mut undelivered = Vec::new();
        while let Ok(failure) = failures.try_recv() {
            undelivered.push(format!(
                "{}/{} after {} attempts: {:?}",
                failure.record.session_id,
                failure.record.identity_id,
                failure.attempts,
                failure.reason
            ));
        }

        let mut summaries = Vec::new();
        for session in engine.tracker().sessions() {
            summaries.push(engine.summary(&session.id)?);
        }
        summaries.sort_by(|a, b| a.session_id.cmp(&b.session_id));

        if !errors.is_empty() {
            print_warning(&format!("{} events were not applied", errors.len()));
        }
        let report = ReplayReport {
            records: sink.records(),
            review: review.items(),
            summaries,
            stats: engine.stats(),
            errors,
            undelivered,
        };
        output_result(&report, cli.output.as_deref(), cli.json)?;
        print_success(&format!(
            "replayed: {} confirmed, {} for review",
            report.records.len(),
            report.review.len()
        ));
        Ok(())
    }
}

fn load_events(path: &str) -> anyhow::Result<Vec<ReplayEvent>> {
    let is_jsonl = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("jsonl"));
    if !is_jsonl {
        return load_request(path);
    }
    let content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    parse_jsonl(&content)
}

fn parse_jsonl(content: &str) -> anyhow::Result<Vec<ReplayEvent>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("line {}: bad event", n + 1))
        })
        .collect()
}
