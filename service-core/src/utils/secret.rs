use subtle::ConstantTimeEq;

/// Compare a caller-supplied shared secret against the configured one in
/// constant time.
pub fn shared_secret_matches(expected: &str, provided: &str) -> bool {
    let expected_bytes = expected.as_bytes();
    let provided_bytes = provided.as_bytes();

    if expected_bytes.len() != provided_bytes.len() {
        return false;
    }

    expected_bytes.ct_eq(provided_bytes).into()
}
