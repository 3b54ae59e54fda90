use regex::Regex;
use snowflake::SnowflakeIdBucket;
use std::sync::{Mutex, OnceLock};

static ID_GENERATOR: Mutex<Option<SnowflakeIdBucket>> = Mutex::new(None);

/// Initialize the Snowflake ID generator.
///
/// `machine_id`: machine identifier (0-31)
/// `node_id`: node identifier (0-31)
pub fn init(machine_id: i32, node_id: i32) {
    let mut gen = ID_GENERATOR.lock().unwrap();
    *gen = Some(SnowflakeIdBucket::new(machine_id, node_id));
}

/// Generate one Snowflake ID as a string.
pub fn next_id() -> String {
    let mut gen = ID_GENERATOR.lock().unwrap();
    let bucket = gen.get_or_insert_with(|| SnowflakeIdBucket::new(1, 1));
    bucket.get_id().to_string()
}

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[\p{L}\p{N}._-]+$").expect("static pattern"))
}

/// Validates a user-supplied resource ID.
///
/// `kind` names the resource in the error message, e.g.
/// `task ID must contain only letters, numbers, '-', '.' and '_'. "bad id"`.
pub fn validate_id(kind: &str, id: &str) -> Result<(), String> {
    if id_pattern().is_match(id) {
        Ok(())
    } else {
        Err(format!(
            "{kind} ID must contain only letters, numbers, '-', '.' and '_'. {id:?}"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn next_id_returns_unique_ids() {
        init(1, 1);
        let mut ids = HashSet::new();
        for _ in 0..1000 {
            let id = next_id();
            assert!(!id.is_empty());
            assert!(ids.insert(id), "Duplicate ID generated");
        }
    }

    #[test]
    fn valid_ids_accepted() {
        for id in [
            "newid",
            "new-id",
            "new.id",
            "new_id",
            "anything",
            "1234",
            "Ñ",
        ] {
            assert!(validate_id("task", id).is_ok(), "id {id:?} should be valid");
        }
    }

    #[test]
    fn invalid_ids_produce_kind_specific_message() {
        for id in ["", "new id", "new*id", "new!id", "new#id"] {
            match validate_id("task", id) {
                Err(msg) => assert_eq!(
                    msg,
                    format!(
                        "task ID must contain only letters, numbers, '-', '.' and '_'. {id:?}"
                    )
                ),
                Ok(()) => panic!("id {id:?} should be invalid"),
            }
        }
    }
}
