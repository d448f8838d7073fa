use crate::constants::XML_BUFFER_CAPACITY;
use crate::errors::{AppError, AppResult};
use crate::models::{Attributes, ElementRecord};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use quick_xml::Decoder;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::iter::FusedIterator;
use std::path::Path;

/// Streams element records out of an XML document.
///
/// Every element below the root element becomes one [`ElementRecord`], in
/// document order, whether it is written as `<x ...>` or `<x .../>` and at any
/// nesting depth. The root element only delimits the document and is never
/// yielded. Text and CDATA are discarded once checked for valid encoding and
/// entity references; comments, processing instructions and the DOCTYPE are
/// skipped.
///
/// The parser reads events into a single reusable buffer, so memory use is
/// bounded by the largest start tag rather than by the document size. It is a
/// single-pass iterator: once it has returned `None` or an error it stays
/// exhausted.
///
/// # Errors
///
/// Yields `AppError::ParseError` for malformed XML (mismatched or unclosed
/// tags, duplicate attributes, undecodable names, values or text, undefined
/// entity references, truncated input, missing root element, content after the
/// root element) and
/// `AppError::IoError` when the underlying reader fails.
pub struct TagStreamParser<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    include_tags: Option<HashSet<String>>,
    /// Open elements, root included.
    depth: usize,
    seen_root: bool,
    root_closed: bool,
    elements_seen: u64,
    records_emitted: u64,
    finished: bool,
}

impl TagStreamParser<BufReader<File>> {
    /// Opens `path` for buffered streaming.
    pub fn from_path(path: &Path) -> AppResult<Self> {
        let file = File::open(path).map_err(|e| {
            AppError::IoError(format!("Failed to open XML file {}: {e}", path.display()))
        })?;
        Ok(Self::from_reader(BufReader::new(file)))
    }
}

impl<R: BufRead> TagStreamParser<R> {
    pub fn from_reader(source: R) -> Self {
        let mut reader = Reader::from_reader(source);
        reader.config_mut().trim_text(true);

        Self {
            reader,
            buf: Vec::with_capacity(XML_BUFFER_CAPACITY),
            include_tags: None,
            depth: 0,
            seen_root: false,
            root_closed: false,
            elements_seen: 0,
            records_emitted: 0,
            finished: false,
        }
    }

    /// Restricts the yielded records to elements whose tag is in `tags`.
    pub fn with_include_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include_tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    /// Number of records yielded so far.
    pub fn records_emitted(&self) -> u64 {
        self.records_emitted
    }

    /// Number of non-root elements scanned so far, filtered out ones included.
    pub fn elements_seen(&self) -> u64 {
        self.elements_seen
    }

    fn next_record(&mut self) -> AppResult<Option<ElementRecord>> {
        // Events borrow the buffer, not the parser.
        let mut buf = std::mem::take(&mut self.buf);
        let result = self.read_until_record(&mut buf);
        self.buf = buf;
        result
    }

    fn read_until_record(&mut self, buf: &mut Vec<u8>) -> AppResult<Option<ElementRecord>> {
        loop {
            buf.clear();
            let event = match self.reader.read_event_into(buf) {
                Ok(event) => event,
                Err(quick_xml::Error::Io(e)) => {
                    return Err(AppError::IoError(format!("Failed to read XML input: {e}")))
                }
                Err(e) => {
                    return Err(AppError::ParseError {
                        message: e.to_string(),
                        position: Some(self.reader.error_position() as u64),
                    })
                }
            };
            let position = self.reader.buffer_position() as u64;

            match event {
                Event::Start(_) if self.depth == 0 => {
                    self.open_root(position)?;
                    self.depth = 1;
                }
                Event::Empty(_) if self.depth == 0 => {
                    self.open_root(position)?;
                    self.root_closed = true;
                }
                Event::Start(e) => {
                    self.depth += 1;
                    if let Some(record) = self.qualify(&e, position)? {
                        return Ok(Some(record));
                    }
                }
                Event::Empty(e) => {
                    if let Some(record) = self.qualify(&e, position)? {
                        return Ok(Some(record));
                    }
                }
                Event::End(_) => {
                    if self.depth == 0 {
                        return Err(AppError::ParseError {
                            message: "unmatched end tag".to_string(),
                            position: Some(position),
                        });
                    }
                    self.depth -= 1;
                    if self.depth == 0 {
                        self.root_closed = true;
                    }
                }
                Event::Text(_) | Event::CData(_) | Event::GeneralRef(_) if self.depth == 0 => {
                    return Err(AppError::ParseError {
                        message: "text outside the root element".to_string(),
                        position: Some(position),
                    });
                }
                // Content is dropped but must still be well-formed.
                Event::Text(e) => {
                    decode_content(self.reader.decoder(), &e, position)?;
                }
                Event::CData(e) => {
                    decode_content(self.reader.decoder(), &e, position)?;
                }
                Event::GeneralRef(e) => {
                    let name = decode_content(self.reader.decoder(), &e, position)?;
                    check_entity_reference(&name, position)?;
                }
                Event::Eof => {
                    if !self.seen_root {
                        return Err(AppError::ParseError {
                            message: "document has no root element".to_string(),
                            position: Some(position),
                        });
                    }
                    if self.depth > 0 {
                        return Err(AppError::ParseError {
                            message: format!(
                                "unexpected end of document, {} element(s) left open",
                                self.depth
                            ),
                            position: Some(position),
                        });
                    }
                    return Ok(None);
                }
                _ => {}
            }
        }
    }

    fn open_root(&mut self, position: u64) -> AppResult<()> {
        if self.root_closed {
            return Err(AppError::ParseError {
                message: "unexpected element after the root element".to_string(),
                position: Some(position),
            });
        }
        self.seen_root = true;
        Ok(())
    }

    /// Builds a record for `e` unless the tag filter rejects it.
    fn qualify(&mut self, e: &BytesStart<'_>, position: u64) -> AppResult<Option<ElementRecord>> {
        self.elements_seen += 1;
        let decoder = self.reader.decoder();
        let tag = decode(decoder, e.name().as_ref(), position)?;

        if let Some(include) = &self.include_tags {
            if !include.contains(tag.as_str()) {
                return Ok(None);
            }
        }

        let attributes = read_attributes(decoder, e, position)?;
        let record = ElementRecord {
            tag,
            attributes,
            sequence_index: self.records_emitted,
        };
        self.records_emitted += 1;
        Ok(Some(record))
    }
}

fn decode(decoder: Decoder, bytes: &[u8], position: u64) -> AppResult<String> {
    decoder
        .decode(bytes)
        .map(|s| s.into_owned())
        .map_err(|e| AppError::ParseError {
            message: format!("Failed to decode XML name: {e}"),
            position: Some(position),
        })
}

fn decode_content(decoder: Decoder, bytes: &[u8], position: u64) -> AppResult<String> {
    decoder
        .decode(bytes)
        .map(|s| s.into_owned())
        .map_err(|e| AppError::ParseError {
            message: format!("Invalid character data: {e}"),
            position: Some(position),
        })
}

/// Accepts the five predefined entities and valid character references.
fn check_entity_reference(name: &str, position: u64) -> AppResult<()> {
    let valid = match name.strip_prefix('#') {
        Some(reference) => {
            let code = match reference.strip_prefix('x') {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => reference.parse::<u32>().ok(),
            };
            code.and_then(char::from_u32).is_some()
        }
        None => matches!(name, "lt" | "gt" | "amp" | "apos" | "quot"),
    };
    if valid {
        Ok(())
    } else {
        Err(AppError::ParseError {
            message: format!("unrecognized entity `{name}`"),
            position: Some(position),
        })
    }
}

fn read_attributes(decoder: Decoder, e: &BytesStart<'_>, position: u64) -> AppResult<Attributes> {
    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| AppError::ParseError {
            message: format!("Invalid attribute: {err}"),
            position: Some(position),
        })?;
        let key = decode(decoder, attr.key.as_ref(), position)?;
        let value = attr
            .decode_and_unescape_value(decoder)
            .map_err(|err| AppError::ParseError {
                message: format!("Failed to decode value of attribute '{key}': {err}"),
                position: Some(position),
            })?
            .into_owned();
        attributes.push((key, value));
    }
    Ok(attributes)
}

impl<R: BufRead> Iterator for TagStreamParser<R> {
    type Item = AppResult<ElementRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

impl<R: BufRead> FusedIterator for TagStreamParser<R> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn parse_str(xml: &str) -> AppResult<Vec<ElementRecord>> {
        TagStreamParser::from_reader(Cursor::new(xml.as_bytes())).collect()
    }

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_yields_records_in_document_order() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<HealthData locale="en_US">
  <ExportDate value="2024-01-01 10:00:00 +0000"/>
  <Record type="HKQuantityTypeIdentifierStepCount" value="120"/>
  <Workout workoutActivityType="HKWorkoutActivityTypeRunning" duration="31.5">
    <WorkoutEvent type="HKWorkoutEventTypePause"/>
  </Workout>
</HealthData>"#;

        let records = parse_str(xml).unwrap();
        let tags: Vec<_> = records.iter().map(|r| r.tag.as_str()).collect();
        assert_eq!(tags, ["ExportDate", "Record", "Workout", "WorkoutEvent"]);
        assert_eq!(
            records[1].attributes,
            attrs(&[("type", "HKQuantityTypeIdentifierStepCount"), ("value", "120")])
        );
        let indices: Vec<_> = records.iter().map(|r| r.sequence_index).collect();
        assert_eq!(indices, [0, 1, 2, 3]);
    }

    #[test]
    fn test_root_element_is_not_a_record() {
        assert!(parse_str("<HealthData/>").unwrap().is_empty());
        assert!(parse_str(r#"<HealthData locale="en"></HealthData>"#)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_attribute_order_is_preserved() {
        let records = parse_str(r#"<r><a z="1" b="2" m="3"/></r>"#).unwrap();
        assert_eq!(records[0].attributes, attrs(&[("z", "1"), ("b", "2"), ("m", "3")]));
    }

    #[test]
    fn test_attribute_values_are_unescaped() {
        let records = parse_str(r#"<r><a note="Tom &amp; Jerry &lt;3" q="&quot;x&quot;"/></r>"#)
            .unwrap();
        assert_eq!(
            records[0].attributes,
            attrs(&[("note", "Tom & Jerry <3"), ("q", "\"x\"")])
        );
    }

    #[test]
    fn test_include_tags_filters_by_name_only() {
        let xml = r#"<HealthData><Record type="A"/><Workout type="Record"/><Record type="B"/></HealthData>"#;
        let records: Vec<_> = TagStreamParser::from_reader(Cursor::new(xml.as_bytes()))
            .with_include_tags(["Record"])
            .collect::<AppResult<_>>()
            .unwrap();

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.tag == "Record"));
        assert_eq!(records[1].sequence_index, 1);
    }

    #[test]
    fn test_counters_track_filtered_elements() {
        let xml = r#"<h><a/><b/><a/></h>"#;
        let mut parser =
            TagStreamParser::from_reader(Cursor::new(xml.as_bytes())).with_include_tags(["a"]);
        while let Some(record) = parser.next() {
            record.unwrap();
        }
        assert_eq!(parser.records_emitted(), 2);
        assert_eq!(parser.elements_seen(), 3);
    }

    #[test]
    fn test_text_and_comments_are_ignored() {
        let xml = r#"<h><!-- note --><a x="1">some text<![CDATA[raw]]></a><?pi data?></h>"#;
        let records = parse_str(xml).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].attributes, attrs(&[("x", "1")]));
    }

    #[test]
    fn test_doctype_is_skipped() {
        let xml = r#"<?xml version="1.0"?>
<!DOCTYPE HealthData [
<!ELEMENT HealthData (Record*)>
<!ATTLIST Record type CDATA #REQUIRED>
]>
<HealthData><Record type="A"/></HealthData>"#;
        let records = parse_str(xml).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_entity_references_in_text_are_accepted() {
        let xml = r#"<h><a x="1">Tom &amp; Jerry &#65;&#x42; &lt;3</a></h>"#;
        assert_eq!(parse_str(xml).unwrap().len(), 1);
    }

    #[test]
    fn test_undefined_entity_in_text_is_parse_error() {
        let err = parse_str(r#"<HealthData><Record type="A">&bogus;</Record></HealthData>"#)
            .unwrap_err();
        match err {
            AppError::ParseError { message, position } => {
                assert!(message.contains("bogus"));
                assert!(position.is_some());
            }
            other => panic!("Expected ParseError, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_character_reference_is_parse_error() {
        let err = parse_str(r#"<h><a>&#xD800;</a></h>"#).unwrap_err();
        assert!(matches!(err, AppError::ParseError { .. }));
    }

    #[test]
    fn test_invalid_utf8_text_is_parse_error() {
        let xml: &[u8] = b"<HealthData><Record type=\"A\">\xFF\xFE</Record></HealthData>";
        let result: AppResult<Vec<_>> = TagStreamParser::from_reader(Cursor::new(xml)).collect();
        match result {
            Err(AppError::ParseError { position, .. }) => assert!(position.is_some()),
            other => panic!("Expected ParseError, got {other:?}"),
        }
    }

    #[test]
    fn test_unclosed_element_is_parse_error() {
        let err = parse_str(r#"<HealthData><Record type="A"></HealthData>"#).unwrap_err();
        assert!(matches!(err, AppError::ParseError { .. }));
    }

    #[test]
    fn test_truncated_document_is_parse_error() {
        let err = parse_str(r#"<HealthData><Record type="A"/>"#).unwrap_err();
        match err {
            AppError::ParseError { position, .. } => assert!(position.is_some()),
            other => panic!("Expected ParseError, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_document_is_parse_error() {
        let err = parse_str("").unwrap_err();
        assert!(matches!(err, AppError::ParseError { .. }));
    }

    #[test]
    fn test_duplicate_attribute_is_parse_error() {
        let err = parse_str(r#"<h><a x="1" x="2"/></h>"#).unwrap_err();
        assert!(matches!(err, AppError::ParseError { .. }));
    }

    #[test]
    fn test_second_root_is_parse_error() {
        let err = parse_str("<a></a><b/>").unwrap_err();
        assert!(matches!(err, AppError::ParseError { .. }));
    }

    #[test]
    fn test_parser_is_fused_after_error() {
        let mut parser = TagStreamParser::from_reader(Cursor::new(&b"<h><a/></b></h>"[..]));
        assert!(parser.next().unwrap().is_ok());
        assert!(parser.next().unwrap().is_err());
        assert!(parser.next().is_none());
    }

    #[test]
    fn test_from_path_reads_file() {
        let temp_dir = TempDir::new().unwrap();
        let xml_path = temp_dir.path().join("export.xml");
        fs::write(&xml_path, r#"<HealthData><Record type="A"/></HealthData>"#).unwrap();

        let records: Vec<_> = TagStreamParser::from_path(&xml_path)
            .unwrap()
            .collect::<AppResult<_>>()
            .unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_from_path_missing_file_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = TagStreamParser::from_path(&temp_dir.path().join("missing.xml"));
        assert!(matches!(result, Err(AppError::IoError(_))));
    }
}
