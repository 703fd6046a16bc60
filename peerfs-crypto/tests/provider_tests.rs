use peerfs_crypto::{CryptoError, CryptoProvider, Ed25519Provider, KeyPair, VerifyingKey};

#[test]
fn provider_sign_verify() {
    let provider = Ed25519Provider;
    let kp = provider.generate_keypair();
    let sig = provider.sign(b"payload", &kp.signing_key);
    assert!(provider
        .verify(b"payload", &sig.to_bytes(), &kp.verifying_key)
        .unwrap());
}

#[test]
fn provider_rejects_other_key() {
    let provider = Ed25519Provider;
    let kp = provider.generate_keypair();
    let other = provider.generate_keypair();
    let sig = provider.sign(b"payload", &kp.signing_key);
    assert!(!provider
        .verify(b"payload", &sig.to_bytes(), &other.verifying_key)
        .unwrap());
}

#[test]
fn malformed_signature_is_an_error() {
    let provider = Ed25519Provider;
    let kp = KeyPair::generate();
    let err = provider
        .verify(b"payload", &[1, 2, 3], &kp.verifying_key)
        .unwrap_err();
    assert!(matches!(
        err,
        CryptoError::MalformedSignature {
            expected: 64,
            actual: 3
        }
    ));
}

#[test]
fn hash_is_sha256() {
    let fp = Ed25519Provider.hash(b"abc");
    assert_eq!(
        fp.to_hex(),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

#[test]
fn hash_distinguishes_content() {
    assert_ne!(Ed25519Provider.hash(b"one"), Ed25519Provider.hash(b"two"));
}

#[test]
fn verifying_key_hex_roundtrip() {
    let kp = KeyPair::generate();
    let parsed = VerifyingKey::from_hex(&kp.verifying_key.to_hex()).unwrap();
    assert_eq!(parsed, kp.verifying_key);
}

#[test]
fn verifying_key_serde_roundtrip() {
    let kp = KeyPair::generate();
    let json = serde_json::to_string(&kp.verifying_key).unwrap();
    let back: VerifyingKey = serde_json::from_str(&json).unwrap();
    assert_eq!(back, kp.verifying_key);
}

#[test]
fn verifying_key_rejects_short_hex() {
    assert!(VerifyingKey::from_hex("abcd").is_err());
    assert!(VerifyingKey::from_hex("not hex").is_err());
}

#[test]
fn keypair_from_signing_key() {
    let kp = KeyPair::generate();
    let rebuilt = KeyPair::from_signing_key(kp.signing_key.clone());
    assert_eq!(rebuilt.verifying_key, kp.verifying_key);
}
