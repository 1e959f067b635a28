//! Invertible mapping between snapshot identifiers and store-safe keys.
//!
//! Snapshot identifiers contain `@` (dataset/label boundary) and may
//! contain `:` inside timestamp-like labels; neither is welcome in an
//! object key. Both are replaced by fixed multi-character tokens that do
//! not occur in raw identifiers, so encoding and decoding are exact
//! inverses over the whole identifier domain.

/// Token standing in for the dataset/label separator `@`.
const AT_TOKEN: &str = "_AT_";

/// Token standing in for `:` inside labels.
const COLON_TOKEN: &str = "_CN_";

/// Encodes a snapshot identifier into a store-safe object key.
pub fn encode_key(identifier: &str) -> String {
    identifier.replace('@', AT_TOKEN).replace(':', COLON_TOKEN)
}

/// Decodes a store object key back into the snapshot identifier.
pub fn decode_key(key: &str) -> String {
    key.replace(AT_TOKEN, "@").replace(COLON_TOKEN, ":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_replaces_boundary() {
        assert_eq!(encode_key("tank/data@monthly-2024-01"), "tank/data_AT_monthly-2024-01");
    }

    #[test]
    fn test_encode_replaces_colons() {
        assert_eq!(
            encode_key("tank@daily-2024-01-02-10:30:00"),
            "tank_AT_daily-2024-01-02-10_CN_30_CN_00"
        );
    }

    #[test]
    fn test_decode_is_inverse() {
        let ids = [
            "tank@monthly-1",
            "tank/data@daily-2024-06-01",
            "pool/home/alice@daily-12:00",
            "a@b:c:d",
        ];
        for id in ids {
            assert_eq!(decode_key(&encode_key(id)), id);
        }
    }

    #[test]
    fn test_decode_plain_key() {
        assert_eq!(decode_key("tank_AT_daily-1"), "tank@daily-1");
    }

    #[test]
    fn test_identifier_without_reserved_chars() {
        assert_eq!(encode_key("plainname"), "plainname");
        assert_eq!(decode_key("plainname"), "plainname");
    }
}
