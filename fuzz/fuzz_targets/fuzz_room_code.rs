#![no_main]

use libfuzzer_sys::fuzz_target;
use mesh_room::protocol::room_code::{is_valid, RoomCode};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    // Parsing must agree with validation, and accepted codes must yield credentials
    match RoomCode::parse(text) {
        Ok(code) => {
            assert!(is_valid(text));
            assert!(code.network_name().starts_with("scaffolding-mc-"));
            assert_eq!(code.network_secret().len(), 9);
        }
        Err(_) => assert!(!is_valid(text)),
    }
});
