//! Binary value encoding: round-trips, placeholders, and strict
//! rejection of malformed input.

use pkl::{
    binary::{decode_value, encode_value},
    types::{DataSize, DataSizeUnit, Duration, DurationUnit},
    Exported,
};
use pretty_assertions::assert_eq;

fn round_trip(value: &Exported) -> Exported {
    decode_value(&encode_value(value).unwrap()).unwrap()
}

#[test]
fn scalars_round_trip() {
    for value in [
        Exported::Null,
        Exported::Bool(true),
        Exported::Int(-42),
        Exported::Float(1.5),
        Exported::string("hello"),
    ] {
        assert_eq!(round_trip(&value), value);
    }
}

#[test]
fn quantities_round_trip() {
    let duration = Exported::Duration(Duration::new(5.0, DurationUnit::Minutes));
    assert_eq!(round_trip(&duration), duration);
    let size = Exported::DataSize(DataSize::new(3.0, DataSizeUnit::Mebibytes));
    assert_eq!(round_trip(&size), size);
}

#[test]
fn collections_round_trip() {
    let list = Exported::List(vec![Exported::Int(1), Exported::string("two")]);
    assert_eq!(round_trip(&list), list);
    let set = Exported::Set(vec![Exported::Int(1), Exported::Int(2)]);
    assert_eq!(round_trip(&set), set);
    let map = Exported::Map(vec![
        (Exported::string("a"), Exported::Int(1)),
        (Exported::Int(2), Exported::Bool(false)),
    ]);
    assert_eq!(round_trip(&map), map);
    let pair = Exported::Pair(Box::new((Exported::Int(1), Exported::Null)));
    assert_eq!(round_trip(&pair), pair);
    let bytes = Exported::Bytes(vec![0, 1, 254]);
    assert_eq!(round_trip(&bytes), bytes);
    let regex = Exported::Regex("a+b".to_owned());
    assert_eq!(round_trip(&regex), regex);
}

#[test]
fn objects_round_trip_with_member_kinds() {
    let object = Exported::Object {
        class_name: "Config".to_owned(),
        properties: vec![("x".to_owned(), Exported::Int(1))],
        elements: vec![Exported::string("elem")],
        entries: vec![(Exported::string("k"), Exported::Int(2))],
    };
    assert_eq!(round_trip(&object), object);
}

#[test]
fn non_reconstructible_kinds_decode_to_null_placeholders() {
    assert_eq!(round_trip(&Exported::Class("Foo".to_owned())), Exported::Null);
    assert_eq!(round_trip(&Exported::TypeAlias("Bar".to_owned())), Exported::Null);
}

#[test]
fn unknown_codes_are_rejected() {
    // [0x7f] — a one-element array with an unknown code.
    let bytes = [0x91, 0x7f];
    let err = decode_value(&bytes).unwrap_err();
    assert_eq!(err.kind(), pkl::ErrorKind::Protocol);
    assert!(err.message().contains("unknown value code"), "{}", err.message());
}

#[test]
fn unexpected_shapes_are_rejected() {
    // An array starting with a string is not a tagged value.
    let bytes = [0x91, 0xa1, b'x'];
    assert!(decode_value(&bytes).is_err());
    // Bare binary data outside a Bytes wrapper.
    let bytes = [0xc4, 0x01, 0xff];
    assert!(decode_value(&bytes).is_err());
}

#[test]
fn trailing_bytes_are_rejected() {
    let mut bytes = encode_value(&Exported::Int(1)).unwrap();
    bytes.push(0xc0);
    let err = decode_value(&bytes).unwrap_err();
    assert!(err.message().contains("trailing"), "{}", err.message());
}

#[test]
fn deeply_nested_values_round_trip() {
    let nested = Exported::Object {
        class_name: "Outer".to_owned(),
        properties: vec![(
            "inner".to_owned(),
            Exported::Object {
                class_name: "Inner".to_owned(),
                properties: vec![("list".to_owned(), Exported::List(vec![Exported::Int(9)]))],
                elements: vec![],
                entries: vec![],
            },
        )],
        elements: vec![],
        entries: vec![],
    };
    assert_eq!(round_trip(&nested), nested);
}
