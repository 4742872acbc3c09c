use uuid::Uuid;

pub struct CacheKeys;

impl CacheKeys {
    /// Current-epoch memory entries: ms:epoch:{conversation_id}:{client_id}
    pub fn epoch_entries(conversation_id: Uuid, client_id: &str) -> String {
        format!("ms:epoch:{}:{}", conversation_id, client_id)
    }

    /// Response-recording locator: ms:resume:{conversation_id}
    pub fn resume_locator(conversation_id: Uuid) -> String {
        format!("ms:resume:{}", conversation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_entries_key_format() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(
            CacheKeys::epoch_entries(id, "agent-1"),
            "ms:epoch:550e8400-e29b-41d4-a716-446655440000:agent-1"
        );
    }

    #[test]
    fn test_resume_locator_key_format() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(
            CacheKeys::resume_locator(id),
            "ms:resume:550e8400-e29b-41d4-a716-446655440000"
        );
    }
}
