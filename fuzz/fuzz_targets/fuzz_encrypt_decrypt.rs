#![no_main]
use libfuzzer_sys::fuzz_target;
use voice_session_client::secret_manager::SecretManager;
use voice_session_client::topic::Topic;

fuzz_target!(|data: &[u8]| {
    if data.len() < 33 {
        return;
    }

    let mut secret = [0u8; 32];
    secret.copy_from_slice(&data[..32]);
    let plaintext = &data[32..];

    let manager = SecretManager::new(secret.to_vec());

    if let Ok((iv, mac, ciphertext)) = manager.encrypt(Topic::Event, 0, plaintext) {
        let decrypted = manager
            .decrypt(Topic::Event, 0, &iv, &mac, &ciphertext)
            .expect("decryption of freshly encrypted data must succeed");
        assert_eq!(&decrypted[4..], plaintext, "round-trip mismatch");

        // A flipped MAC byte must not decrypt.
        let mut tampered_mac = mac;
        tampered_mac[0] ^= 0xFF;
        assert!(manager.decrypt(Topic::Event, 0, &iv, &tampered_mac, &ciphertext).is_err());
    }
});
