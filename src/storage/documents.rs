//! Rendering of transcript and summary artifacts from remote meeting data.

use anyhow::Result;
use chrono::{TimeZone, Utc};
use serde_json::json;

use crate::remote::RemoteMeeting;

/// Structured transcript with sentences, as pretty-printed JSON.
pub fn transcript_json(meeting: &RemoteMeeting) -> Result<Vec<u8>> {
    let sentences: Vec<_> = meeting
        .sentences
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|s| {
            json!({
                "speaker_name": s.speaker_name,
                "text": s.text,
                "start_time": s.start_time,
                "end_time": s.end_time,
            })
        })
        .collect();

    let doc = json!({
        "id": meeting.id,
        "title": meeting.title,
        "date": meeting.started_at_ms(),
        "duration": meeting.duration,
        "organizer_email": meeting.organizer_email,
        "participants": meeting.participants,
        "sentences": sentences,
    });
    Ok(serde_json::to_vec_pretty(&doc)?)
}

/// Human-readable transcript with speaker-attributed, timestamped lines.
pub fn transcript_markdown(meeting: &RemoteMeeting) -> String {
    let mut out = String::new();
    push_header(&mut out, meeting);

    out.push_str("## Transcript\n\n");
    let sentences = meeting.sentences.as_deref().unwrap_or_default();
    if sentences.is_empty() {
        out.push_str("_No transcript available._\n");
        return out;
    }
    for sentence in sentences {
        let speaker = sentence.speaker_name.as_deref().unwrap_or("Unknown");
        out.push_str(&format!(
            "**[{}] {}:** {}\n\n",
            format_timestamp(sentence.start_time),
            speaker,
            sentence.text
        ));
    }
    out
}

/// Meeting summary, one markdown section per populated summary field.
pub fn summary_markdown(meeting: &RemoteMeeting) -> String {
    let mut out = String::new();
    push_header(&mut out, meeting);

    let Some(summary) = &meeting.summary else {
        out.push_str("_No summary available._\n");
        return out;
    };

    if let Some(overview) = summary.overview.as_deref().filter(|s| !s.trim().is_empty()) {
        out.push_str("## Overview\n\n");
        out.push_str(overview.trim());
        out.push_str("\n\n");
    }
    if !summary.keywords.is_empty() {
        out.push_str("## Keywords\n\n");
        out.push_str(&summary.keywords.join(", "));
        out.push_str("\n\n");
    }
    if let Some(items) = summary
        .action_items
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    {
        out.push_str("## Action Items\n\n");
        out.push_str(items.trim());
        out.push_str("\n\n");
    }
    if let Some(outline) = summary.outline.as_deref().filter(|s| !s.trim().is_empty()) {
        out.push_str("## Outline\n\n");
        out.push_str(outline.trim());
        out.push_str("\n\n");
    }
    if out.ends_with("\n\n") {
        out.pop();
    }
    out
}

fn push_header(out: &mut String, meeting: &RemoteMeeting) {
    let title = meeting.title.as_deref().unwrap_or("Untitled meeting");
    out.push_str(&format!("# {}\n\n", title));
    out.push_str(&format!("- Date: {}\n", format_date(meeting.started_at_ms())));
    out.push_str(&format!(
        "- Duration: {}\n",
        format_duration(meeting.duration)
    ));
    if let Some(organizer) = &meeting.organizer_email {
        out.push_str(&format!("- Organizer: {}\n", organizer));
    }
    if !meeting.participants.is_empty() {
        out.push_str(&format!(
            "- Participants: {}\n",
            meeting.participants.join(", ")
        ));
    }
    out.push('\n');
}

fn format_date(ms: i64) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M UTC").to_string(),
        None => format!("epoch+{}ms", ms),
    }
}

fn format_duration(secs: f64) -> String {
    let total = secs.round() as i64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else {
        format!("{}m {:02}s", m, s)
    }
}

fn format_timestamp(secs: f64) -> String {
    let total = secs.max(0.0) as i64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{:02}:{:02}", m, s)
    }
}
