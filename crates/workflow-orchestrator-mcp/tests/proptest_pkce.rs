//! Property tests for PKCE challenge computation and verification.

use proptest::prelude::*;

use workflow_orchestrator_mcp::server::oauth::pkce::{self, MAX_VERIFIER_LEN, MIN_VERIFIER_LEN, PkceMethod};

/// RFC 7636 §4.1 unreserved characters.
fn verifier_strategy() -> impl Strategy<Value = String> {
    proptest::string::string_regex("[A-Za-z0-9._~-]{43,128}").unwrap()
}

proptest! {
    #[test]
    fn s256_round_trip(verifier in verifier_strategy()) {
        let challenge = pkce::compute_challenge(&verifier, PkceMethod::S256).unwrap();
        prop_assert_eq!(challenge.len(), 43);
        prop_assert!(pkce::verify(&verifier, &challenge, PkceMethod::S256));
    }

    #[test]
    fn plain_round_trip(verifier in verifier_strategy()) {
        let challenge = pkce::compute_challenge(&verifier, PkceMethod::Plain).unwrap();
        prop_assert_eq!(&challenge, &verifier);
        prop_assert!(pkce::verify(&verifier, &challenge, PkceMethod::Plain));
    }

    #[test]
    fn mutated_verifier_is_rejected(
        verifier in verifier_strategy(),
        index in any::<prop::sample::Index>(),
        replacement in proptest::char::range('a', 'z'),
    ) {
        let position = index.index(verifier.len());
        let mut mutated: Vec<char> = verifier.chars().collect();
        prop_assume!(mutated[position] != replacement);
        mutated[position] = replacement;
        let mutated: String = mutated.into_iter().collect();

        let challenge = pkce::compute_challenge(&verifier, PkceMethod::S256).unwrap();
        prop_assert!(!pkce::verify(&mutated, &challenge, PkceMethod::S256));
    }

    #[test]
    fn out_of_range_lengths_are_rejected(len in prop_oneof![0usize..MIN_VERIFIER_LEN, (MAX_VERIFIER_LEN + 1)..300]) {
        let verifier = "a".repeat(len);
        prop_assert!(pkce::compute_challenge(&verifier, PkceMethod::S256).is_err());
        prop_assert!(!pkce::verify(&verifier, &verifier, PkceMethod::Plain));
    }

    #[test]
    fn methods_do_not_cross_verify(verifier in verifier_strategy()) {
        let s256 = pkce::compute_challenge(&verifier, PkceMethod::S256).unwrap();
        prop_assert!(!pkce::verify(&verifier, &s256, PkceMethod::Plain));
    }
}
