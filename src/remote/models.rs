//! Wire types for the meeting provider's GraphQL API.

use serde::Deserialize;

use crate::meeting_store::MeetingRecord;

/// Page of meetings, newest first. Lightweight fields only; sentences and
/// summaries are fetched per meeting.
pub const LIST_MEETINGS_QUERY: &str = r#"
query ListMeetings($limit: Int!, $skip: Int!) {
  transcripts(limit: $limit, skip: $skip) {
    id
    title
    date
    duration
    organizer_email
    participants
    transcript_url
    audio_url
  }
}
"#;

/// Single meeting with full transcript sentences and summary.
pub const GET_MEETING_QUERY: &str = r#"
query GetMeeting($id: String!) {
  transcript(id: $id) {
    id
    title
    date
    duration
    organizer_email
    participants
    transcript_url
    audio_url
    sentences {
      speaker_name
      text
      start_time
      end_time
    }
    summary {
      keywords
      action_items
      outline
      overview
    }
  }
}
"#;

/// Cheapest authenticated query there is, used to probe credentials.
pub const VIEWER_QUERY: &str = r#"
query Viewer {
  user {
    name
    email
  }
}
"#;

/// Outcome of a credential probe.
#[derive(Debug, Clone)]
pub struct ConnectionProbe {
    pub ok: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlError {
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptsData {
    #[serde(default)]
    pub transcripts: Vec<RemoteMeeting>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptData {
    pub transcript: Option<RemoteMeeting>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViewerData {
    pub user: Option<RemoteUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteUser {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// A meeting as the provider reports it. `date` is epoch milliseconds,
/// `duration` is seconds. Both arrive as GraphQL floats.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteMeeting {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub date: f64,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub organizer_email: Option<String>,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub transcript_url: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub sentences: Option<Vec<RemoteSentence>>,
    #[serde(default)]
    pub summary: Option<RemoteSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSentence {
    #[serde(default)]
    pub speaker_name: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub start_time: f64,
    #[serde(default)]
    pub end_time: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSummary {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub action_items: Option<String>,
    #[serde(default)]
    pub outline: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
}

impl RemoteMeeting {
    pub fn started_at_ms(&self) -> i64 {
        self.date as i64
    }

    /// Convert to a local catalog record. The record starts unsynced; the
    /// merge step decides whether it lands at all.
    pub fn to_meeting_record(&self) -> MeetingRecord {
        let title = self
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or("Untitled meeting")
            .to_string();
        MeetingRecord::new(self.id.clone(), title, self.started_at_ms())
            .with_duration(self.duration.round() as i64)
            .with_organizer(self.organizer_email.clone())
            .with_participants(self.participants.clone())
            .with_urls(self.transcript_url.clone(), self.audio_url.clone())
    }
}
