#![no_main]
use libfuzzer_sys::fuzz_target;
use voice_session_client::header::{BinaryMessageHeader, CommonHeader};

fuzz_target!(|data: &[u8]| {
    // Parsing arbitrary bytes must not panic, valid or not.
    if let Ok((hdr, encrypted)) = CommonHeader::parse(data) {
        let wire = CommonHeader::serialize(hdr.sequence_number_plain, hdr.iv, hdr.mac, encrypted);
        let (reparsed, reencrypted) = CommonHeader::parse(&wire).expect("round-trip must reparse");
        assert_eq!(reparsed.sequence_number_plain, hdr.sequence_number_plain);
        assert_eq!(reencrypted, encrypted);
    }

    let _ = BinaryMessageHeader::parse(data);
});
