#![no_main]

use libfuzzer_sys::fuzz_target;
use wolf_config::ServiceAccountCredential;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    if let Ok(credential) = ServiceAccountCredential::from_json(&raw) {
        assert!(!credential.client_email.trim().is_empty());
        assert!(credential.private_key.contains("PRIVATE KEY"));
        let rendered = format!("{credential:?}");
        assert!(rendered.contains("[REDACTED]"));
    }
});
