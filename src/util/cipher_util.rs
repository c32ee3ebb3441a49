use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use rand::RngCore;
use regex::Regex;
use sha2::{Digest, Sha224};

use crate::models::FlagSpec;
use crate::util::api_util::APIError;

static HINT_HEXID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-f]{32}$").unwrap());

pub fn is_hint_hexid(s: &str) -> bool {
    HINT_HEXID_RE.is_match(s)
}

/// Deterministic per-(team, task) generation token. The token doubles as
/// the cache key and as the unguessable path component of generated
/// artifacts, so it must be stable across restarts.
pub fn derive_token(team_seed: &str, task_seed: &str, global_seed: &str) -> String {
    let mut hasher = Sha224::new();
    hasher.update(format!(
        "team:{team_seed},task:{task_seed},glob:{global_seed};"
    ));
    hex::encode(hasher.finalize())
}

pub fn random_hex<const N: usize>() -> String {
    let mut buf = [0u8; N];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

pub fn new_task_seed() -> String {
    random_hex::<8>()
}

pub fn new_team_seed() -> String {
    random_hex::<14>()
}

pub fn new_global_seed() -> String {
    random_hex::<16>()
}

pub fn new_hint_hexid() -> String {
    random_hex::<16>()
}

/// Checks one flag spec against a submission. `Regex` patterns must match
/// the whole submission. The `program` checker is a declared capability
/// without an implementation; it must fail distinguishably rather than
/// silently open or closed.
pub fn flag_matches(spec: &FlagSpec, submission: &str) -> Result<bool, APIError> {
    match spec {
        FlagSpec::String(data) => Ok(data == submission),
        FlagSpec::Regex(pattern) => {
            let re = Regex::new(&format!(r"\A(?:{pattern})\z"))
                .map_err(|e| APIError::Validation(format!("bad flag pattern: {e}")))?;
            Ok(re.is_match(submission))
        }
        FlagSpec::Program(_) => Err(APIError::NotImplemented("program flag checker")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TOKEN_LENGTH;

    #[test]
    fn token_is_deterministic() {
        let a = derive_token("aaaa", "bbbb", "cccc");
        let b = derive_token("aaaa", "bbbb", "cccc");
        assert_eq!(a, b);
        assert_eq!(a.len(), TOKEN_LENGTH);
        assert!(a.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')));
    }

    #[test]
    fn token_depends_on_every_input() {
        let base = derive_token("aaaa", "bbbb", "cccc");
        assert_ne!(base, derive_token("aaab", "bbbb", "cccc"));
        assert_ne!(base, derive_token("aaaa", "bbbc", "cccc"));
        assert_ne!(base, derive_token("aaaa", "bbbb", "cccd"));
        // The separator matters: shifting a byte between fields must not
        // produce the same concatenation.
        assert_ne!(derive_token("aaaab", "bbb", "cccc"), base);
    }

    #[test]
    fn seed_helpers_produce_the_documented_lengths() {
        assert_eq!(new_task_seed().len(), crate::TASK_SEED_LENGTH);
        assert_eq!(new_team_seed().len(), crate::TEAM_SEED_LENGTH);
        assert_eq!(new_global_seed().len(), crate::GLOBAL_SEED_LENGTH);
        assert_eq!(new_hint_hexid().len(), crate::HINT_HEXID_LENGTH);
        assert!(is_hint_hexid(&new_hint_hexid()));
    }

    #[test]
    fn string_flags_compare_exactly() {
        let spec = FlagSpec::String("FLAG{x}".into());
        assert!(flag_matches(&spec, "FLAG{x}").unwrap());
        assert!(!flag_matches(&spec, "FLAG{x} ").unwrap());
        assert!(!flag_matches(&spec, "flag{x}").unwrap());
    }

    #[test]
    fn regex_flags_must_match_the_full_submission() {
        let spec = FlagSpec::Regex("FLAG\\{[0-9]+\\}".into());
        assert!(flag_matches(&spec, "FLAG{1234}").unwrap());
        assert!(!flag_matches(&spec, "xFLAG{1234}").unwrap());
        assert!(!flag_matches(&spec, "FLAG{1234}x").unwrap());

        let bad = FlagSpec::Regex("(".into());
        assert!(matches!(
            flag_matches(&bad, "x"),
            Err(APIError::Validation(_))
        ));
    }

    #[test]
    fn program_flags_are_not_implemented() {
        let spec = FlagSpec::Program("./check.sh".into());
        assert!(matches!(
            flag_matches(&spec, "anything"),
            Err(APIError::NotImplemented(_))
        ));
    }
}
