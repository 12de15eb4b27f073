use erasure_proof::{
    Algorithm, ArtifactHashes, Ed25519Signer, KeyRing, ProofSigner, PublicKey, merkle_root,
    receipt_leaf,
};
use rsa::pkcs8::EncodePublicKey;
use rsa::signature::{RandomizedSigner, SignatureEncoding};
use sha2::Sha256;

fn day_root() -> [u8; 32] {
    let leaves: Vec<[u8; 32]> = (1..=3)
        .map(|job_id| {
            let hashes = ArtifactHashes::compute(
                format!("<html>{job_id}</html>").as_bytes(),
                format!("png-{job_id}").as_bytes(),
            );
            receipt_leaf(job_id, &hashes.html_sha256, &hashes.screenshot_sha256)
        })
        .collect();
    merkle_root(&leaves).expect("non-empty day")
}

#[tokio::test]
async fn test_ed25519_rollup_signature_roundtrip() {
    let signer = Ed25519Signer::from_seed(&[42u8; 32], None);
    let ring = KeyRing::for_signer(&signer);
    let root = day_root();

    let envelope = signer.sign_envelope(&root).await.expect("sign");
    assert_eq!(envelope.algorithm, Algorithm::Ed25519);
    assert!(
        ring.verify("ed25519", &envelope.key_id, &root, &envelope.signature)
            .expect("known key")
    );

    let mut tampered = root;
    tampered[31] ^= 0x01;
    assert!(
        !ring
            .verify("ed25519", &envelope.key_id, &tampered, &envelope.signature)
            .expect("known key")
    );
}

/// A PSS signature produced over the message (as KMS does when handed the
/// message digest) verifies against the DER public key.
#[test]
fn test_rsa_pss_signature_verifies() {
    let mut rng = rand::thread_rng();
    let private = rsa::RsaPrivateKey::new(&mut rng, 1024).expect("rsa keygen");
    let der = private
        .to_public_key()
        .to_public_key_der()
        .expect("spki der")
        .as_bytes()
        .to_vec();

    let root = day_root();
    let signing_key = rsa::pss::BlindedSigningKey::<Sha256>::new(private);
    let signature = signing_key.sign_with_rng(&mut rng, &root).to_vec();

    let public = PublicKey::from_bytes(Algorithm::RsaPssSha256, &der).expect("valid key");
    assert!(public.verify(&root, &signature));

    let mut bad = signature.clone();
    bad[0] ^= 0x01;
    assert!(!public.verify(&root, &bad));

    let mut ring = KeyRing::new();
    ring.insert("kms-key", public);
    assert!(ring.verify("rsa-pss-sha256", "kms-key", &root, &signature).expect("known key"));
}
