//! Terminal rendering for captions, analysis and segmentation plans.

use crate::audio::analyzer::AudioAnalysis;
use crate::caption::CaptionSegment;
use crate::error::{PipelineError, Result};
use crate::pipeline::fallback::LocaleRun;
use crate::pipeline::orchestrator::TranscriptionReport;
use crate::segmentation::TimeRange;
use serde::Serialize;

const DIM: &str = "\x1b[2m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

/// Format seconds as `hh:mm:ss.mmm`.
pub fn format_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let secs = (total_ms / 1000) % 60;
    let millis = total_ms % 1000;
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, secs, millis)
}

/// One caption as `[start --> end] text`.
pub fn format_caption(segment: &CaptionSegment, color: bool) -> String {
    let range = format!(
        "[{} --> {}]",
        format_timestamp(segment.start),
        format_timestamp(segment.end())
    );
    if color {
        format!("{DIM}{range}{RESET} {}", segment.text)
    } else {
        format!("{range} {}", segment.text)
    }
}

pub fn render_captions(captions: &[CaptionSegment], color: bool) -> String {
    captions
        .iter()
        .map(|segment| format_caption(segment, color))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Serialize)]
struct JsonFailure<'a> {
    locale: &'a str,
    error: String,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    captions: &'a [CaptionSegment],
    skipped_locales: &'a [String],
    failures: Vec<JsonFailure<'a>>,
}

/// Captions plus per-locale failures as pretty JSON.
pub fn render_report_json(report: &TranscriptionReport) -> Result<String> {
    let json = JsonReport {
        captions: &report.captions,
        skipped_locales: &report.skipped_locales,
        failures: report
            .failures
            .iter()
            .map(|f| JsonFailure {
                locale: &f.locale,
                error: f.error.to_string(),
            })
            .collect(),
    };
    serde_json::to_string_pretty(&json).map_err(|e| PipelineError::Other(e.to_string()))
}

fn push_line(out: &mut String, line: String) {
    out.push_str(&line);
    out.push('\n');
}

/// Per-locale stage trace, one line per stage.
pub fn render_stage_trace(runs: &[LocaleRun], color: bool) -> String {
    let mut out = String::new();
    for run in runs {
        let mode = if run.segmented { " (segmented)" } else { "" };
        push_line(
            &mut out,
            format!(
                "{}: {} segment(s){}",
                run.transcript.locale,
                run.transcript.segments.len(),
                mode
            ),
        );
        for report in &run.stages {
            let line = format!(
                "  {:<20} {:<22} {}",
                report.stage.to_string(),
                report.outcome,
                report.segments
            );
            if color && report.outcome != "success" {
                push_line(&mut out, format!("{YELLOW}{line}{RESET}"));
            } else {
                push_line(&mut out, line);
            }
        }
    }
    out
}

/// Skipped and failed locales, or an empty string when there are none.
pub fn render_problems(report: &TranscriptionReport, color: bool) -> String {
    let mut out = String::new();
    for locale in &report.skipped_locales {
        push_line(&mut out, format!("skipped {}: not available on this device", locale));
    }
    for failure in &report.failures {
        if color {
            push_line(&mut out, format!("{RED}failed {}{RESET}: {}", failure.locale, failure.error));
        } else {
            push_line(&mut out, format!("failed {}: {}", failure.locale, failure.error));
        }
    }
    out
}

pub fn render_analysis(analysis: &AudioAnalysis) -> String {
    let mut out = String::new();
    push_line(&mut out, format!("duration:         {:.3}s", analysis.duration));
    push_line(&mut out, format!("file size:        {} bytes", analysis.file_size_bytes));
    push_line(&mut out, format!("average RMS:      {:.1} dBFS", analysis.average_rms_dbfs));
    push_line(&mut out, format!("leading silence:  {:.3}s", analysis.leading_silence));
    push_line(
        &mut out,
        format!("normalized audio: {}", analysis.normalized_audio_path.display()),
    );
    out
}

/// Numbered chunk plan; an open-ended range prints as `end`.
pub fn render_plan(plan: &[TimeRange]) -> String {
    let mut out = String::new();
    for (index, range) in plan.iter().enumerate() {
        let end = range
            .end
            .map(format_timestamp)
            .unwrap_or_else(|| "end".to_string());
        push_line(
            &mut out,
            format!("#{:<4} {} --> {}", index, format_timestamp(range.start), end),
        );
    }
    out.push_str(&format!("{} chunk(s)", plan.len()));
    out
}
