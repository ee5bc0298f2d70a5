use sha2::{Digest, Sha256};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

pub fn new_item_id() -> String {
    format!("I-{}", Uuid::now_v7())
}

pub fn new_invoice_id() -> String {
    format!("N-{}", Uuid::now_v7())
}

pub fn new_device_id() -> String {
    format!("D-{}", Uuid::now_v7())
}

pub fn new_envelope_id() -> String {
    Uuid::now_v7().to_string()
}

pub fn new_handle_id() -> String {
    Uuid::now_v7().to_string()
}

pub fn new_pending_id() -> String {
    Uuid::now_v7().to_string()
}

pub fn now_utc_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .expect("RFC3339 formatting for UTC timestamp should never fail")
}

pub fn content_fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::{content_fingerprint, new_device_id, new_invoice_id, new_item_id, now_utc_rfc3339};
    use time::format_description::well_known::Rfc3339;
    use time::OffsetDateTime;

    #[test]
    fn ids_carry_entity_prefixes() {
        assert!(new_item_id().starts_with("I-"));
        assert!(new_invoice_id().starts_with("N-"));
        assert!(new_device_id().starts_with("D-"));
    }

    #[test]
    fn generated_ids_are_unique() {
        let first = new_item_id();
        let second = new_item_id();
        assert_ne!(first, second);
    }

    #[test]
    fn now_is_parseable_rfc3339() {
        let stamp = now_utc_rfc3339();
        assert!(OffsetDateTime::parse(&stamp, &Rfc3339).is_ok());
    }

    #[test]
    fn fingerprint_is_stable_and_content_sensitive() {
        let a = content_fingerprint(b"front of card");
        let b = content_fingerprint(b"front of card");
        let c = content_fingerprint(b"back of card");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
