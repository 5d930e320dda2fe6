//! Object key layout.
//!
//! ```text
//! jobs/{job_id}/audio/extracted.wav
//! jobs/{job_id}/stems/{vocals,background}.wav
//! jobs/{job_id}/transcript.json
//! jobs/{job_id}/chunks/{chunk:03}/audio.wav
//! jobs/{job_id}/chunks/{chunk:03}/avatar_input_{speaker}.wav
//! jobs/{job_id}/chunks/{chunk:03}/avatar_{speaker}.mp4
//! jobs/{job_id}/chunks/{chunk:03}/segment.mp4
//! jobs/{job_id}/final.mp4
//! stories/{story_id}/analysis/audio.wav
//! ```

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn chunk_prefix(job_id: &str, chunk: u32) -> String {
    format!("jobs/{}/chunks/{:03}", sanitize(job_id), chunk)
}

pub fn extracted_audio(job_id: &str) -> String {
    format!("jobs/{}/audio/extracted.wav", sanitize(job_id))
}

pub fn vocals(job_id: &str) -> String {
    format!("jobs/{}/stems/vocals.wav", sanitize(job_id))
}

pub fn background(job_id: &str) -> String {
    format!("jobs/{}/stems/background.wav", sanitize(job_id))
}

pub fn transcript(job_id: &str) -> String {
    format!("jobs/{}/transcript.json", sanitize(job_id))
}

pub fn chunk_audio(job_id: &str, chunk: u32) -> String {
    format!("{}/audio.wav", chunk_prefix(job_id, chunk))
}

pub fn avatar_input(job_id: &str, chunk: u32, speaker: &str) -> String {
    format!(
        "{}/avatar_input_{}.wav",
        chunk_prefix(job_id, chunk),
        sanitize(speaker)
    )
}

pub fn chunk_avatar(job_id: &str, chunk: u32, speaker: &str) -> String {
    format!("{}/avatar_{}.mp4", chunk_prefix(job_id, chunk), sanitize(speaker))
}

pub fn chunk_segment(job_id: &str, chunk: u32) -> String {
    format!("{}/segment.mp4", chunk_prefix(job_id, chunk))
}

pub fn final_video(job_id: &str) -> String {
    format!("jobs/{}/final.mp4", sanitize(job_id))
}

pub fn analysis_audio(story_id: &str) -> String {
    format!("stories/{}/analysis/audio.wav", sanitize(story_id))
}

/// Content type from a key's extension.
pub fn content_type_for(key: &str) -> &'static str {
    match key.rsplit_once('.').map(|(_, ext)| ext) {
        Some("mp4") => "video/mp4",
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(extracted_audio("job-1"), "jobs/job-1/audio/extracted.wav");
        assert_eq!(chunk_segment("job-1", 2), "jobs/job-1/chunks/002/segment.mp4");
        assert_eq!(
            chunk_avatar("job-1", 0, "SPEAKER 01"),
            "jobs/job-1/chunks/000/avatar_SPEAKER_01.mp4"
        );
    }

    #[test]
    fn test_ids_cannot_escape_prefix() {
        assert_eq!(final_video("../etc"), "jobs/___etc/final.mp4");
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for(&final_video("j")), "video/mp4");
        assert_eq!(content_type_for(&vocals("j")), "audio/wav");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }
}
