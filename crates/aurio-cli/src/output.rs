//! JSON output formatting

use aurio_core::Match;
use serde::Serialize;

/// Fingerprinting statistics of one file
#[derive(Debug, Clone, Serialize)]
pub struct FingerprintSummary {
    pub path: String,
    pub sub_fingerprints: usize,
    pub frames: usize,
    pub duration_seconds: f64,
}

/// A match with the tracks resolved to their files
#[derive(Debug, Clone, Serialize)]
pub struct MatchRecord {
    pub track1: String,
    pub track1_time: f64,
    pub track2: String,
    pub track2_time: f64,
    pub offset: f64,
    pub similarity: f32,
    pub source: String,
}

impl MatchRecord {
    /// Resolves track ids as indices into `files`
    pub fn new(m: &Match, files: &[String]) -> Self {
        let name = |id: u32| {
            files
                .get(id as usize)
                .cloned()
                .unwrap_or_else(|| format!("track {}", id))
        };
        Self {
            track1: name(m.track1.0),
            track1_time: m.track1_time,
            track2: name(m.track2.0),
            track2_time: m.track2_time,
            offset: m.offset(),
            similarity: m.similarity,
            source: m.source.clone(),
        }
    }
}

#[derive(Serialize)]
struct MatchOutput<'a> {
    files: &'a [String],
    matches: Vec<MatchRecord>,
}

/// Print fingerprinting statistics as JSON array
pub fn print_json_summaries(summaries: &[FingerprintSummary]) {
    match serde_json::to_string_pretty(summaries) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing summaries: {}", e),
    }
}

/// Print matches together with the file list
pub fn print_json_matches(files: &[String], matches: &[Match]) {
    let mut records: Vec<MatchRecord> = matches.iter().map(|m| MatchRecord::new(m, files)).collect();
    records.sort_by(|a, b| {
        a.track1
            .cmp(&b.track1)
            .then_with(|| a.track2.cmp(&b.track2))
            .then_with(|| a.track1_time.total_cmp(&b.track1_time))
    });

    let output = MatchOutput {
        files,
        matches: records,
    };
    match serde_json::to_string_pretty(&output) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing matches: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aurio_core::TrackId;

    #[test]
    fn test_match_record_resolves_files() {
        let files = vec!["a.wav".to_string(), "b.wav".to_string()];
        let m = Match {
            track1: TrackId(0),
            track1_time: 4.0,
            track2: TrackId(1),
            track2_time: 1.5,
            similarity: 0.75,
            source: "FP-W03".to_string(),
        };
        let record = MatchRecord::new(&m, &files);
        assert_eq!(record.track1, "a.wav");
        assert_eq!(record.track2, "b.wav");
        assert_eq!(record.offset, 2.5);

        let unknown = Match {
            track2: TrackId(7),
            ..m
        };
        assert_eq!(MatchRecord::new(&unknown, &files).track2, "track 7");
    }
}
