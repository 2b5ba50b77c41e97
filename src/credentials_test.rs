use super::*;

#[test]
fn test_fresh_credential_not_expired() {
    let credential = StreamCredential::new("tok".to_string(), Duration::from_secs(300));
    assert!(!credential.is_expired());
    assert_eq!(credential.token(), "tok");
}

#[test]
fn test_short_ttl_counts_as_expired() {
    // TTL inside the safety margin is already unusable.
    let credential = StreamCredential::new("tok".to_string(), Duration::from_secs(3));
    assert!(credential.is_expired());
}

#[test]
fn test_zero_ttl_expired() {
    let credential = StreamCredential::new("tok".to_string(), Duration::ZERO);
    assert!(credential.is_expired());
}

#[test]
fn test_token_response_parses() {
    let body: TokenResponse =
        serde_json::from_str(r#"{"token":"abc123","expires_in":120}"#).unwrap();
    assert_eq!(body.token, "abc123");
    assert_eq!(body.expires_in, 120);
}
