#![no_main]

use libfuzzer_sys::fuzz_target;
use wolf_analysis::{extract_text, AnalysisError};

fuzz_target!(|data: &[u8]| {
    for name in ["report.md", "report.TXT", "report.pdf", "report"] {
        match extract_text(name, data) {
            Ok(content) => {
                assert_eq!(content.source_filename, name);
                assert!(!content.text.trim().is_empty());
            }
            Err(AnalysisError::UnsupportedFormat { .. }) => {
                assert!(name.ends_with(".pdf") || !name.contains('.'));
            }
            Err(error) => assert!(!error.to_string().trim().is_empty()),
        }
    }
});
