//! Meeting fixture builders.

use meetvault::remote::{RemoteMeeting, RemoteSentence, RemoteSummary};

/// 2024-03-05 09:00:00 UTC.
pub const MARCH_5_2024_MS: i64 = 1_709_629_200_000;

/// A remote meeting with every artifact available: audio url, transcript
/// sentences and a summary. Tests mutate fields for the variants they need.
pub fn remote_meeting(id: &str, title: &str, date_ms: i64) -> RemoteMeeting {
    RemoteMeeting {
        id: id.to_string(),
        title: Some(title.to_string()),
        date: date_ms as f64,
        duration: 1800.0,
        organizer_email: Some("organizer@example.com".to_string()),
        participants: vec![
            "organizer@example.com".to_string(),
            "dev@example.com".to_string(),
        ],
        transcript_url: Some(format!("https://provider.test/transcripts/{}", id)),
        audio_url: Some(format!("https://provider.test/audio/{}.mp3", id)),
        sentences: Some(vec![
            RemoteSentence {
                speaker_name: Some("Organizer".to_string()),
                text: "Let's get started.".to_string(),
                start_time: 0.0,
                end_time: 2.0,
            },
            RemoteSentence {
                speaker_name: Some("Dev".to_string()),
                text: "I pushed the fix yesterday.".to_string(),
                start_time: 2.5,
                end_time: 5.0,
            },
        ]),
        summary: Some(RemoteSummary {
            keywords: vec!["fix".to_string(), "release".to_string()],
            action_items: Some("Ship the release.".to_string()),
            outline: None,
            overview: Some("Short status round.".to_string()),
        }),
    }
}
