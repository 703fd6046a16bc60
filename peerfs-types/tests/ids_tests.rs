use peerfs_types::{MessageId, PeerId};

#[test]
fn peer_ids_are_unique() {
    assert_ne!(PeerId::new(), PeerId::new());
}

#[test]
fn peer_id_parse_roundtrip() {
    let id = PeerId::new();
    let parsed = PeerId::parse(&id.to_string()).unwrap();
    assert_eq!(parsed, id);
}

#[test]
fn peer_id_serde_transparent() {
    let id = PeerId::new();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, format!("\"{id}\""));
}

#[test]
fn message_ids_are_unique() {
    assert_ne!(MessageId::new(), MessageId::new());
}

#[test]
fn message_id_parse_rejects_garbage() {
    assert!(MessageId::parse("not-a-uuid").is_err());
    let id = MessageId::new();
    assert_eq!(id.to_string().parse::<MessageId>().unwrap(), id);
}
