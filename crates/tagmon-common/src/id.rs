use snowflake::SnowflakeIdBucket;
use std::sync::Mutex;

static ID_GENERATOR: Mutex<Option<SnowflakeIdBucket>> = Mutex::new(None);

/// Initialize the snowflake ID generator.
///
/// `machine_id`: machine identifier (0-31)
/// `node_id`: node identifier (0-31)
pub fn init(machine_id: i32, node_id: i32) {
    let mut gen = ID_GENERATOR.lock().unwrap();
    *gen = Some(SnowflakeIdBucket::new(machine_id, node_id));
}

/// Generate a snowflake ID (string form).
pub fn next_id() -> String {
    let mut gen = ID_GENERATOR.lock().unwrap();
    let bucket = gen.get_or_insert_with(|| SnowflakeIdBucket::new(1, 1));
    bucket.get_id().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_next_id_returns_unique_ids() {
        init(1, 1);
        let mut ids = HashSet::new();
        for _ in 0..1000 {
            let id = next_id();
            assert!(!id.is_empty());
            assert!(ids.insert(id), "Duplicate ID generated");
        }
    }
}
