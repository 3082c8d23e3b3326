//! Property-based test generators using proptest.
//!
//! Strategies stay inside what the log format can carry: names without
//! `/`, strings well below the length limit, finite floats.

use proptest::prelude::*;
use resdb_core::{names, LeafValue};

/// Strategy for valid resource names.
pub fn resource_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z_][a-zA-Z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for strings that exercise modified UTF-8: embedded NULs,
/// two- and three-byte characters and surrogate pairs.
pub fn mutf8_string_strategy() -> impl Strategy<Value = String> {
    let edge = prop_oneof![
        Just("\0".to_string()),
        Just("é".to_string()),
        Just("€".to_string()),
        Just("😀".to_string()),
        Just("\u{10FFFF}".to_string()),
        prop::string::string_regex("[a-z ]{0,8}").expect("Invalid regex"),
    ];
    prop::collection::vec(edge, 0..8).prop_map(|parts| parts.concat())
}

/// Strategy for nullable strings.
pub fn nullable_string_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::weighted(0.8, mutf8_string_strategy())
}

fn finite_float() -> impl Strategy<Value = f32> {
    -1.0e9f32..1.0e9f32
}

/// Strategy for a built-in leaf type name with a value of that type.
pub fn leaf_value_strategy() -> impl Strategy<Value = (&'static str, LeafValue)> {
    let short = 0..16usize;
    prop_oneof![
        any::<bool>().prop_map(|v| (names::BOOLEAN, LeafValue::Bool(v))),
        finite_float().prop_map(|v| (names::FLOAT, LeafValue::Float(v))),
        any::<i32>().prop_map(|v| (names::INTEGER, LeafValue::Int(v))),
        any::<i64>().prop_map(|v| (names::TIME, LeafValue::Long(v))),
        nullable_string_strategy().prop_map(|v| (names::STRING, LeafValue::String(v))),
        prop::collection::vec(any::<bool>(), short.clone())
            .prop_map(|v| (names::BOOLEAN_ARRAY, LeafValue::BoolArray(v))),
        prop::collection::vec(finite_float(), short.clone())
            .prop_map(|v| (names::FLOAT_ARRAY, LeafValue::FloatArray(v))),
        prop::collection::vec(any::<i32>(), short.clone())
            .prop_map(|v| (names::INTEGER_ARRAY, LeafValue::IntArray(v))),
        prop::collection::vec(any::<i64>(), short.clone())
            .prop_map(|v| (names::TIME_ARRAY, LeafValue::LongArray(v))),
        prop::collection::vec(nullable_string_strategy(), short.clone())
            .prop_map(|v| (names::STRING_ARRAY, LeafValue::StringArray(v))),
        prop::collection::vec(any::<u8>(), 0..64)
            .prop_map(|v| (names::BYTE_ARRAY, LeafValue::Opaque(v))),
    ]
}

/// Strategy for a set of distinct names paired with leaf values.
pub fn named_values_strategy(
    max: usize,
) -> impl Strategy<Value = Vec<(String, &'static str, LeafValue)>> {
    prop::collection::btree_map(resource_name_strategy(), leaf_value_strategy(), 1..=max).prop_map(
        |values| {
            values
                .into_iter()
                .map(|(name, (type_name, value))| (name, type_name, value))
                .collect()
        },
    )
}
