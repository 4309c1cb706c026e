use std::io::{Cursor, Seek, SeekFrom};

use rust_data_ingestion::ErrorKind;
use rust_data_ingestion::ingestion::csv::CsvConverter;
use rust_data_ingestion::ingestion::{ConversionHints, ConverterRegistry, IngestionFormat};
use rust_data_ingestion::types::ConversionMetadata;
use serde_json::{Value, json};

fn parse(s: &str) -> Value {
    serde_json::from_str(s).unwrap()
}

fn convert(format: &str, input: &[u8]) -> String {
    let registry = ConverterRegistry::builtin();
    registry
        .resolve(format)
        .unwrap()
        .convert(&mut Cursor::new(input), &ConversionHints::default())
        .unwrap()
}

#[test]
fn csv_rows_become_string_valued_objects_in_header_order() {
    let out = convert("csv", b"id,name,score\n1,Ada,98.5\n2,Grace,\n");
    assert_eq!(
        out,
        r#"[{"id":"1","name":"Ada","score":"98.5"},{"id":"2","name":"Grace","score":""}]"#
    );
}

#[test]
fn csv_header_only_yields_empty_array() {
    assert_eq!(convert("csv", b"id,name\n"), "[]");
}

#[test]
fn csv_quoted_fields_keep_embedded_delimiters() {
    let out = convert("csv", b"id,comment\n1,\"hello, world\"\n");
    assert_eq!(parse(&out), json!([{"id": "1", "comment": "hello, world"}]));
}

#[test]
fn csv_hints_override_delimiter_and_encoding() {
    let registry = ConverterRegistry::builtin();
    let csv = registry.resolve("csv").unwrap();
    // "Müller" in windows-1252.
    let input: &[u8] = b"id;name\n1;M\xfcller\n";
    let hints = ConversionHints {
        encoding: Some("windows-1252".to_string()),
        delimiter: Some(b';'),
    };
    let out = csv.convert(&mut Cursor::new(input), &hints).unwrap();
    assert_eq!(parse(&out), json!([{"id": "1", "name": "Müller"}]));
}

#[test]
fn csv_with_custom_default_delimiter() {
    let tsv = CsvConverter::with_delimiter(b'\t');
    let mut stream = Cursor::new(b"a\tb\n1\t2\n".to_vec());
    assert!(tsv.validate(&mut stream, &ConversionHints::default()));
    let out = tsv.convert(&mut stream, &ConversionHints::default()).unwrap();
    assert_eq!(parse(&out), json!([{"a": "1", "b": "2"}]));
}

#[test]
fn unknown_encoding_hint_is_invalid_argument() {
    let registry = ConverterRegistry::builtin();
    let hints = ConversionHints {
        encoding: Some("klingon-8".to_string()),
        delimiter: None,
    };
    let err = registry
        .resolve("csv")
        .unwrap()
        .convert(&mut Cursor::new(b"a,b\n".as_slice()), &hints)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn xml_repeated_siblings_become_arrays() {
    let out = convert("xml", b"<root><item>x</item><item>y</item></root>");
    assert_eq!(parse(&out), json!({"item": ["x", "y"]}));
}

#[test]
fn xml_nested_elements_become_objects() {
    let out = convert(
        "xml",
        br#"<?xml version="1.0" encoding="UTF-8"?>
<orders>
  <order><id>1</id><customer><name>Ada</name></customer></order>
</orders>"#,
    );
    assert_eq!(parse(&out), json!({"order": {"id": "1", "customer": {"name": "Ada"}}}));
}

#[test]
fn xml_metadata_reports_root_encoding_and_namespace() {
    let registry = ConverterRegistry::builtin();
    let xml = registry.resolve("xml").unwrap();

    let mut plain = Cursor::new(br#"<?xml version="1.0" encoding="ISO-8859-1"?><catalog/>"#.as_slice());
    assert_eq!(
        xml.extract_metadata(&mut plain).unwrap(),
        ConversionMetadata::Xml {
            root_element: "catalog".to_string(),
            encoding: "ISO-8859-1".to_string(),
            has_namespace: false,
        }
    );

    let mut namespaced = Cursor::new(br#"<c:catalog xmlns:c="urn:catalog"><c:book/></c:catalog>"#.as_slice());
    match xml.extract_metadata(&mut namespaced).unwrap() {
        ConversionMetadata::Xml { has_namespace, .. } => assert!(has_namespace),
        other => panic!("unexpected metadata: {other:?}"),
    }
}

#[test]
fn malformed_xml_is_a_format_error() {
    let registry = ConverterRegistry::builtin();
    let err = registry
        .resolve("xml")
        .unwrap()
        .convert(&mut Cursor::new(b"<a><b></a>".as_slice()), &ConversionHints::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
}

#[test]
fn json_passes_through_unchanged_without_bom() {
    let input = "{\"a\": [1, 2, {\"b\": null}]}";
    let mut with_bom = vec![0xEF, 0xBB, 0xBF];
    with_bom.extend_from_slice(input.as_bytes());
    assert_eq!(convert("json", &with_bom), input);
}

#[test]
fn detection_prefers_json_then_xml_then_csv() {
    let registry = ConverterRegistry::builtin();
    let cases: [(&[u8], IngestionFormat); 4] = [
        (b"[{\"a\":1}]", IngestionFormat::Json),
        (b"<root><a>1</a></root>", IngestionFormat::Xml),
        (b"a,b\n1,2\n", IngestionFormat::Csv),
        // Valid JSON that also contains the CSV delimiter.
        (b"[1,2,3]", IngestionFormat::Json),
    ];
    for (input, expected) in cases {
        let got = registry.detect(&mut Cursor::new(input)).unwrap().format();
        assert_eq!(got, expected, "input {:?}", String::from_utf8_lossy(input));
    }
}

#[test]
fn undetectable_input_is_unsupported_format() {
    let registry = ConverterRegistry::builtin();
    let err = registry
        .detect(&mut Cursor::new(b"just some words".as_slice()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
}

#[test]
fn validate_and_metadata_leave_stream_position_unchanged() {
    let registry = ConverterRegistry::builtin();
    let inputs: [&[u8]; 4] = [
        b"xx{\"a\":1}",
        b"xx<root><a>1</a></root>",
        b"xxa,b\n1,2\n",
        b"xxnot anything",
    ];
    for input in inputs {
        for format in registry.formats() {
            let converter = registry.resolve_format(format).unwrap();
            let mut stream = Cursor::new(input);
            stream.seek(SeekFrom::Start(2)).unwrap();

            let _ = converter.validate(&mut stream);
            assert_eq!(stream.position(), 2, "{format} validate moved the stream");
            let _ = converter.extract_metadata(&mut stream);
            assert_eq!(stream.position(), 2, "{format} extract_metadata moved the stream");
        }
    }
}

#[test]
fn conversion_is_deterministic() {
    let registry = ConverterRegistry::builtin();
    let inputs: [(&str, &[u8]); 3] = [
        ("csv", b"k,v\nb,2\na,1\n"),
        ("xml", b"<r><z>1</z><a>2</a><z>3</z></r>"),
        ("json", b"{\"z\":1,\"a\":2}"),
    ];
    for (tag, input) in inputs {
        let c = registry.resolve(tag).unwrap();
        let first = c.convert(&mut Cursor::new(input), &ConversionHints::default()).unwrap();
        let second = c.convert(&mut Cursor::new(input), &ConversionHints::default()).unwrap();
        assert_eq!(first, second, "{tag}");
    }
}

#[test]
fn registry_resolves_tags_case_insensitively() {
    let registry = ConverterRegistry::builtin();
    assert_eq!(registry.resolve("CSV").unwrap().format(), IngestionFormat::Csv);
    assert_eq!(registry.resolve("Json").unwrap().format(), IngestionFormat::Json);
    assert_eq!(registry.resolve("pdf").unwrap_err().kind(), ErrorKind::UnsupportedFormat);

    #[cfg(feature = "excel")]
    assert_eq!(registry.resolve("xlsx").unwrap().format(), IngestionFormat::Excel);
    #[cfg(not(feature = "excel"))]
    assert_eq!(registry.resolve("xlsx").unwrap_err().kind(), ErrorKind::UnsupportedFormat);
}
