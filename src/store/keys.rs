/// Key layout and encoding utilities for store partitions
///
/// Partition structure:
/// - `profiles`: profile:{id:020} -> Profile (JSON)
/// - `preferences`: pref:{profile_id:020}:{key} -> value (UTF-8)
/// - `credentials`: cred:{profile_id:020}:{hostname} -> Credential (JSON)
/// - `companies`: company:{normalized_name} -> Company (JSON)
/// - `roles`: role:{id:020} -> Role (JSON)
/// - `applications`: app:{id:020} -> Application (JSON)
/// - `lookups`: phone:{phone} / hash:{unique_hash} / active:{p:020}:{r:020} -> id
/// - `dead_letter`: dl:{seq:020} -> DeadLetter (JSON)
/// - `inbound`: sms:{seq:020} -> InboundMessage (JSON)
/// - `metadata`: meta:{key} -> value

pub fn encode_profile_key(id: u64) -> Vec<u8> {
    format!("profile:{:020}", id).into_bytes()
}

pub fn encode_pref_key(profile_id: u64, key: &str) -> Vec<u8> {
    format!("pref:{:020}:{}", profile_id, key).into_bytes()
}

/// Prefix for range-scanning one profile's preferences
pub fn encode_pref_prefix(profile_id: u64) -> Vec<u8> {
    format!("pref:{:020}:", profile_id).into_bytes()
}

/// Decode a preference key back to its preference name
pub fn decode_pref_key(key: &[u8]) -> Option<String> {
    let key_str = std::str::from_utf8(key).ok()?;
    let rest = key_str.strip_prefix("pref:")?;
    let (_, name) = rest.split_once(':')?;
    Some(name.to_string())
}

pub fn encode_cred_key(profile_id: u64, hostname: &str) -> Vec<u8> {
    format!("cred:{:020}:{}", profile_id, hostname.trim().to_lowercase()).into_bytes()
}

pub fn encode_company_key(normalized: &str) -> Vec<u8> {
    format!("company:{}", normalized).into_bytes()
}

pub fn encode_role_key(id: u64) -> Vec<u8> {
    format!("role:{:020}", id).into_bytes()
}

pub fn encode_app_key(id: u64) -> Vec<u8> {
    format!("app:{:020}", id).into_bytes()
}

pub fn encode_phone_idx(phone: &str) -> Vec<u8> {
    format!("phone:{}", phone.trim()).into_bytes()
}

pub fn encode_hash_idx(unique_hash: &str) -> Vec<u8> {
    format!("hash:{}", unique_hash).into_bytes()
}

pub fn encode_active_idx(profile_id: u64, role_id: u64) -> Vec<u8> {
    format!("active:{:020}:{:020}", profile_id, role_id).into_bytes()
}

pub fn encode_dead_letter_key(seq: u64) -> Vec<u8> {
    format!("dl:{:020}", seq).into_bytes()
}

pub fn encode_inbound_key(seq: u64) -> Vec<u8> {
    format!("sms:{:020}", seq).into_bytes()
}

pub fn encode_meta_key(key: &str) -> Vec<u8> {
    format!("meta:{}", key).into_bytes()
}

/// Company names dedupe on their normalized form
pub fn normalize_company(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Parse an id stored as a UTF-8 decimal value (index partitions)
pub fn decode_id_value(value: &[u8]) -> Option<u64> {
    std::str::from_utf8(value).ok()?.parse().ok()
}

pub fn encode_id_value(id: u64) -> Vec<u8> {
    id.to_string().into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_key_encoding() {
        assert_eq!(encode_profile_key(7), b"profile:00000000000000000007");
    }

    #[test]
    fn test_pref_key_round_trip() {
        let key = encode_pref_key(3, "salary_expectation");
        assert_eq!(key, b"pref:00000000000000000003:salary_expectation");
        assert_eq!(
            decode_pref_key(&key).as_deref(),
            Some("salary_expectation")
        );
    }

    #[test]
    fn test_pref_prefix_matches_keys() {
        let prefix = encode_pref_prefix(3);
        let key = encode_pref_key(3, "city");
        assert!(key.starts_with(&prefix));
        let other = encode_pref_key(30, "city");
        assert!(!other.starts_with(&prefix));
    }

    #[test]
    fn test_cred_key_lowercases_hostname() {
        assert_eq!(
            encode_cred_key(1, " Jobs.Example.COM "),
            b"cred:00000000000000000001:jobs.example.com"
        );
    }

    #[test]
    fn test_active_idx_is_per_pair() {
        assert_ne!(encode_active_idx(1, 2), encode_active_idx(2, 1));
    }

    #[test]
    fn test_normalize_company() {
        assert_eq!(normalize_company("  Acme Corp "), "acme corp");
        assert_eq!(normalize_company("ACME CORP"), "acme corp");
    }

    #[test]
    fn test_id_value_round_trip() {
        assert_eq!(decode_id_value(&encode_id_value(42)), Some(42));
        assert_eq!(decode_id_value(b"not a number"), None);
    }
}
