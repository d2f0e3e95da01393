//! Name-case translation between Rust-friendly and JSON:API wire field names.
//!
//! JSON:API servers commonly use hyphenated member names (`first-name`) and
//! dotted paths for nested attributes (`contact.phone`). Neither survives as
//! a Rust identifier, so the public API accepts `first_name` and
//! `contact__phone` and translates at the boundary.

/// Convert a local field name to its wire form.
///
/// `__` becomes `.` (nested attribute path separator) and `_` becomes `-`.
/// Names that are already in wire form pass through unchanged.
///
/// ```
/// use jsonapi_client::names::wire_name;
///
/// assert_eq!(wire_name("first_name"), "first-name");
/// assert_eq!(wire_name("contact__phone_number"), "contact.phone-number");
/// ```
#[must_use]
pub fn wire_name(name: &str) -> String {
    name.replace("__", ".").replace('_', "-")
}

/// Convert a wire field name back to its local form.
///
/// The inverse of [`wire_name`]: `.` becomes `__` and `-` becomes `_`.
#[must_use]
pub fn local_name(name: &str) -> String {
    name.replace('.', "__").replace('-', "_")
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::{local_name, wire_name};

    #[test_case("attr", "attr")]
    #[test_case("my_attr", "my-attr")]
    #[test_case("rel1__arg1", "rel1.arg1")]
    #[test_case("a__b_c", "a.b-c")]
    fn to_wire(local: &str, wire: &str) {
        assert_eq!(wire_name(local), wire);
    }

    #[test_case("attr", "attr")]
    #[test_case("my-attr", "my_attr")]
    #[test_case("rel1.arg1", "rel1__arg1")]
    fn to_local(wire: &str, local: &str) {
        assert_eq!(local_name(wire), local);
    }

    #[test]
    fn round_trip() {
        for name in ["first_name", "contact__phone_number", "plain"] {
            assert_eq!(local_name(&wire_name(name)), name);
        }
    }
}
