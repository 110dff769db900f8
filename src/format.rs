use feed_types::FeedFormat;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

pub fn strip_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(UTF8_BOM).unwrap_or(data)
}

/// Classifies a feed body by its first significant byte. An empty body is treated as XML.
pub fn detect_format(data: &[u8]) -> FeedFormat {
    let data = strip_bom(data);
    match data.iter().find(|b| !b.is_ascii_whitespace()) {
        None | Some(b'<') => FeedFormat::Xml,
        Some(b'[') | Some(b'{') => FeedFormat::Json,
        Some(_) => FeedFormat::Csv,
    }
}
