//! Watermark codec: the replayed commit message is the only persisted state.
//!
//! Every replayed commit carries `Project: <id> commit: <hash>`. Decoding the
//! head commit's message tells the next run where to resume.

use std::fmt;
use std::str::FromStr;

use crate::errors::WatermarkError;
use crate::models::{ProjectId, Watermark};

const PROJECT_LABEL: &str = "Project:";
const COMMIT_LABEL: &str = "commit:";
const MIN_TOKENS: usize = 4;

/// Build the commit message for a replayed source commit.
///
/// Only hashes accepted by [`is_encodable_hash`] decode back.
pub fn encode(project_id: ProjectId, hash: &str) -> String {
    format!("{PROJECT_LABEL} {project_id} {COMMIT_LABEL} {hash}")
}

/// Whether `hash` survives an encode/decode round trip.
pub fn is_encodable_hash(hash: &str) -> bool {
    !hash.is_empty() && !hash.contains(char::is_whitespace)
}

/// Recover the watermark from a replayed commit message.
pub fn decode(message: &str) -> Result<Watermark, WatermarkError> {
    let tokens: Vec<&str> = message.split_whitespace().collect();
    if tokens.len() < MIN_TOKENS || tokens[0] != PROJECT_LABEL || tokens[2] != COMMIT_LABEL {
        return Err(WatermarkError::Malformed(message.to_string()));
    }

    let project_id = tokens[1]
        .parse::<ProjectId>()
        .map_err(|_| WatermarkError::InvalidProjectId {
            token: tokens[1].to_string(),
        })?;

    Ok(Watermark {
        project_id,
        hash: tokens[3].to_string(),
    })
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode(self.project_id, &self.hash))
    }
}

impl FromStr for Watermark {
    type Err = WatermarkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "9bc457f81c86307f28662b40a164105f14df64e3";

    #[test]
    fn test_encode() {
        assert_eq!(
            encode(2323, HASH),
            "Project: 2323 commit: 9bc457f81c86307f28662b40a164105f14df64e3"
        );
    }

    #[test]
    fn test_decode_valid() {
        let wm = decode("Project: 2323 commit: 9bc457f81c86307f28662b40a164105f14df64e3").unwrap();
        assert_eq!(wm.project_id, 2323);
        assert_eq!(wm.hash, HASH);
    }

    #[test]
    fn test_decode_tolerates_trailing_newline() {
        let wm = decode(&format!("{}\n", encode(7, "abc123"))).unwrap();
        assert_eq!(wm, Watermark { project_id: 7, hash: "abc123".into() });
    }

    #[test]
    fn test_round_trip() {
        for (id, hash) in [(1, "a"), (42, HASH), (u64::MAX, "deadbeef"), (0, "0000000")] {
            let wm: Watermark = encode(id, hash).parse().unwrap();
            assert_eq!((wm.project_id, wm.hash.as_str()), (id, hash));
        }
    }

    #[test]
    fn test_display_matches_encode() {
        let wm = Watermark { project_id: 5, hash: "cafe".into() };
        assert_eq!(wm.to_string(), encode(5, "cafe"));
    }

    #[test]
    fn test_decode_wrong_project_id() {
        let err = decode("Project: PROJ commit: 9bc457f81c86307f28662b40a164105f14df64e3").unwrap_err();
        assert_eq!(err, WatermarkError::InvalidProjectId { token: "PROJ".into() });
    }

    #[test]
    fn test_decode_rejects_short_messages() {
        assert!(matches!(decode(""), Err(WatermarkError::Malformed(_))));
        assert!(matches!(decode("Project: 12 commit:"), Err(WatermarkError::Malformed(_))));
    }

    #[test]
    fn test_decode_rejects_foreign_history() {
        assert!(decode("Initial commit of the project tree").is_err());
        assert!(decode("Merge branch 'main' into feature").is_err());
    }

    #[test]
    fn test_encodable_hash() {
        assert!(is_encodable_hash(HASH));
        assert!(!is_encodable_hash(""));
        assert!(!is_encodable_hash("abc def"));
        assert!(!is_encodable_hash("abc\n"));
    }
}
