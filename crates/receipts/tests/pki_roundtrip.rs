use chrono::{TimeZone, Utc};
use receipts::{relationship_id, Identity, PkiDirectory, Receipt, RecordSet};

#[test]
fn test_pki_save_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pki.json");

    let w = Identity::generate("warehouse");
    let a = Identity::generate("alice");
    let b = Identity::generate("bob");

    let mut pki = PkiDirectory::new();
    for id in [&w, &a, &b] {
        pki.insert(id.account().clone());
    }
    let wa = pki.link(&[w.id(), a.id()]).unwrap();
    let wb = pki.link(&[b.id(), w.id()]).unwrap();
    pki.save(&path).unwrap();

    let loaded = PkiDirectory::load(&path).unwrap();
    assert_eq!(loaded, pki);

    let rels = loaded.relationships().unwrap();
    assert_eq!(rels.len(), 2);
    assert_eq!(wa, relationship_id(&[a.id(), w.id()]));
    assert!(rels[&wb].contains(&b.id()));
    assert_eq!(loaded.get(&w.id()).unwrap().relationships.len(), 2);
}

#[test]
fn test_load_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    assert!(PkiDirectory::load(dir.path().join("absent.json")).is_err());
}

#[test]
fn test_record_set_commitment_tracks_receipts() {
    let w = Identity::generate("warehouse");
    let a = Identity::generate("alice");
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();

    let mut set = RecordSet::new();
    let empty = set.authenticated_set().unwrap().commitment();

    let mut r = Receipt::new(w.id(), a.id(), "corn", at);
    r.weight_grams = 20_000;
    let witness = set.insert(r.clone());
    let one = set.authenticated_set().unwrap().commitment();
    assert_ne!(one, empty);

    // re-inserting an identical receipt is a no-op
    set.insert(r);
    assert_eq!(set.authenticated_set().unwrap().commitment(), one);

    set.remove(&witness).unwrap();
    assert_eq!(set.authenticated_set().unwrap().commitment(), empty);
}
