use std::io;

use crate::records::NormalizedRecord;

/// One compact JSON object per record, newline terminated by the caller
pub struct JsonLinesFormatter;

impl JsonLinesFormatter {
    pub fn format(record: &NormalizedRecord) -> io::Result<String> {
        serde_json::to_string(record).map_err(io::Error::other)
    }
}
