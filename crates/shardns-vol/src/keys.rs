//! Record keys and field names of the on-store layout.
//!
//! Every node object keeps its own metadata in one record under
//! [`INTERNAL_METADATA`]. Groups keep one record per link, keyed by the link
//! name; maps keep one record per entry, keyed by the encoded map key.
//! Names starting with `/` never come from a path component, so they cannot
//! collide with link names.

/// Record holding a node's own metadata.
pub const INTERNAL_METADATA: &[u8] = b"/Internal Metadata";

/// Highest allocated object index, in the container's global metadata object.
pub const MAX_INDEX: &[u8] = b"Max OID";

pub const GROUP_PROPS: &[u8] = b"Group Creation Property List";
pub const DATATYPE: &[u8] = b"Datatype";
pub const DATASPACE: &[u8] = b"Dataspace";
pub const DATASET_PROPS: &[u8] = b"Dataset Creation Property List";
pub const TYPE_PROPS: &[u8] = b"Datatype Creation Property List";
pub const KEY_DATATYPE: &[u8] = b"Key Datatype";
pub const VALUE_DATATYPE: &[u8] = b"Value Datatype";

/// Field of a link record.
pub const LINK: &[u8] = b"Link";

/// Record holding all attributes of an object.
pub const ATTRIBUTES: &[u8] = b"/Attribute";

/// Field of a map entry record.
pub const MAP_VALUE: &[u8] = b"Map Value";

/// Record holding a dataset's elements.
pub const RAW_DATA: &[u8] = &[0; 8];
/// Field of fixed-size dataset elements.
pub const RAW_FIELD: &[u8] = &[0];
/// Prefix of per-element fields of variable-length datasets.
pub const RAW_VLEN_PREFIX: &[u8] = b"";

/// Attribute field holding the datatype.
pub fn attr_type(name: &str) -> Vec<u8> {
    prefixed(b"T-", name)
}

/// Attribute field holding the dataspace.
pub fn attr_space(name: &str) -> Vec<u8> {
    prefixed(b"S-", name)
}

/// Attribute field holding the data, or the element prefix for
/// variable-length data.
pub fn attr_data(name: &str) -> Vec<u8> {
    prefixed(b"V-", name)
}

fn prefixed(prefix: &[u8], name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + name.len());
    key.extend_from_slice(prefix);
    key.extend_from_slice(name.as_bytes());
    key
}

/// Returns `true` for record keys the connector reserves for itself.
pub fn is_reserved(key: &[u8]) -> bool {
    key.first() == Some(&b'/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_fields() {
        assert_eq!(attr_type("units"), b"T-units".to_vec());
        assert_eq!(attr_space("units"), b"S-units".to_vec());
        assert_eq!(attr_data("units"), b"V-units".to_vec());
    }

    #[test]
    fn reserved_keys() {
        assert!(is_reserved(INTERNAL_METADATA));
        assert!(is_reserved(ATTRIBUTES));
        assert!(!is_reserved(b"child"));
        assert!(!is_reserved(b""));
    }
}
