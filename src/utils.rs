use base64::{engine, read};
use std::io::{Cursor, Read};

pub fn b64_decode_to_buf(enc: String, buf: &mut Vec<u8>) -> std::io::Result<usize> {
    let mut cur = Cursor::new(enc);
    let mut decoder = read::DecoderReader::new(&mut cur, &engine::general_purpose::STANDARD);
    decoder.read_to_end(buf)
}

/// Speech results sometimes arrive as whitespace; treat those as no speech at all.
pub fn non_blank(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|t| !t.is_empty())
}

/// Show only the tail of a phone number in logs.
pub fn mask_phone(phone: &str) -> String {
    let tail: String = phone
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("***{tail}")
}
