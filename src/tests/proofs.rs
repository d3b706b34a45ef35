use super::test_db;
use crate::errors::Error;
use crate::key::Key;

#[test]
fn basic_proof() {
    let (mut db, mut txn) = test_db();

    let mut changes = db.change();
    for i in 0..100 {
        let key = i.to_string();
        changes
            .put(key.as_bytes(), format!("{}val", i).as_bytes())
            .unwrap();
    }
    db.apply(&mut txn, changes).unwrap();

    let orig_root = db.root(&txn).unwrap();

    let proof = db
        .export_proof(&txn, &[b"99".as_ref(), b"68".as_ref(), b"asdf".as_ref()])
        .unwrap();

    // Import into a fresh, empty store.
    let (mut db2, mut txn2) = test_db();
    db2.import_proof(&mut txn2, &proof, Some(&orig_root)).unwrap();

    assert_eq!(db2.root(&txn2).unwrap(), orig_root);
    assert_eq!(db2.get(&txn2, b"99").unwrap().unwrap(), b"99val");
    assert_eq!(db2.get(&txn2, b"68").unwrap().unwrap(), b"68val");
    assert!(db2.get(&txn2, b"asdf").unwrap().is_none());

    assert!(matches!(db2.get(&txn2, b"0"), Err(Error::IncompleteTree)));
}

#[test]
fn import_requires_empty_head() {
    let (mut db, mut txn) = test_db();

    db.put(&mut txn, b"a", b"1").unwrap();
    let root = db.root(&txn).unwrap();
    let proof = db.export_proof(&txn, &[b"a".as_ref()]).unwrap();

    assert!(matches!(
        db.import_proof(&mut txn, &proof, Some(&root)),
        Err(Error::ExistsError)
    ));
}

#[test]
fn import_rejects_wrong_root() {
    let (mut db, mut txn) = test_db();

    db.put(&mut txn, b"a", b"1").unwrap();
    let proof = db.export_proof(&txn, &[b"a".as_ref()]).unwrap();

    let (mut db2, mut txn2) = test_db();
    let bogus = Key::hash(b"not the root");
    assert!(matches!(
        db2.import_proof(&mut txn2, &proof, Some(&bogus)),
        Err(Error::ProofInvalid(_))
    ));
}

#[test]
fn shared_empty_witness() {
    let (mut db, mut txn) = test_db();

    // 735838777414 hashes to 000..., 367300200150 to 001...
    let mut changes = db.change();
    changes
        .put(b"735838777414", b"A")
        .unwrap()
        .put(b"367300200150", b"B")
        .unwrap();
    db.apply(&mut txn, changes).unwrap();

    let orig_root = db.root(&txn).unwrap();

    // 582086612140 hashes to 010..., 37481825503 to 011...
    let proof = db
        .export_proof(&txn, &[b"582086612140".as_ref(), b"37481825503".as_ref()])
        .unwrap();

    let (mut db2, mut txn2) = test_db();
    db2.import_proof(&mut txn2, &proof, Some(&orig_root)).unwrap();

    assert!(db2.get(&txn2, b"582086612140").unwrap().is_none());
    assert!(db2.get(&txn2, b"37481825503").unwrap().is_none());
    // Another 011... key is answered by the same empty witness.
    assert!(db2.get(&txn2, b"915377487270").unwrap().is_none());

    // The real records exist only as witnesses.
    assert!(matches!(
        db2.get(&txn2, b"735838777414"),
        Err(Error::IncompleteTree)
    ));
    assert!(matches!(
        db2.get(&txn2, b"367300200150"),
        Err(Error::IncompleteTree)
    ));
}

#[test]
fn multi_level_proof() {
    let (mut db, mut txn) = test_db();

    let mut changes = db.change();
    changes
        .put(b"983467173326", b"A") // 10...
        .unwrap()
        .put(b"50728759955", b"B") // 11...
        .unwrap()
        .put(b"679040280359", b"C") // 01...
        .unwrap()
        .put(b"685903554406", b"D") // 000...
        .unwrap()
        .put(b"66727828072", b"E") // 00001...
        .unwrap();
    db.apply(&mut txn, changes).unwrap();

    let orig_root = db.root(&txn).unwrap();

    let proof = db
        .export_proof(
            &txn,
            &[
                b"983467173326".as_ref(),
                b"50728759955".as_ref(),
                b"836336493412".as_ref(), // 00..
                b"826547358742".as_ref(), // 001..
                b"231172376960".as_ref(), // 001..
            ],
        )
        .unwrap();

    let (mut db2, mut txn2) = test_db();
    db2.import_proof(&mut txn2, &proof, Some(&orig_root)).unwrap();

    assert_eq!(db2.get(&txn2, b"983467173326").unwrap().unwrap(), b"A");
    assert_eq!(db2.get(&txn2, b"50728759955").unwrap().unwrap(), b"B");
    assert!(matches!(
        db2.get(&txn2, b"679040280359"),
        Err(Error::IncompleteTree)
    ));

    assert!(db2.get(&txn2, b"826547358742").unwrap().is_none());
    assert!(db2.get(&txn2, b"836336493412").unwrap().is_none());
    assert!(db2.get(&txn2, b"231172376960").unwrap().is_none());
}

#[test]
fn big_proof() {
    let (mut db, mut txn) = test_db();

    let mut changes = db.change();
    for i in 0..1000 {
        let key = i.to_string();
        changes
            .put(key.as_bytes(), format!("{}val", i).as_bytes())
            .unwrap();
    }
    db.apply(&mut txn, changes).unwrap();

    let orig_root = db.root(&txn).unwrap();

    let keys: Vec<String> = (-500..500).map(|i: i32| i.to_string()).collect();
    let key_slices: Vec<&[u8]> = keys.iter().map(|k| k.as_bytes()).collect();

    let proof = db.export_proof(&txn, &key_slices).unwrap();

    let (mut db2, mut txn2) = test_db();
    db2.import_proof(&mut txn2, &proof, Some(&orig_root)).unwrap();

    let mut query = crate::get::GetMultiQuery::new();
    for key in &keys {
        query.insert(key.as_bytes().to_vec(), Default::default());
    }
    db2.get_multi(&txn2, &mut query).unwrap();

    for i in -500..500 {
        let key = i.to_string();
        let res = &query[key.as_bytes()];
        if i < 0 {
            assert!(!res.exists);
        } else {
            assert!(res.exists);
            assert_eq!(res.val, format!("{}val", i).as_bytes());
        }
    }
}

#[test]
fn sub_proof() {
    let (mut db, mut txn) = test_db();

    let mut changes = db.change();
    for i in 0..100 {
        let key = i.to_string();
        changes
            .put(key.as_bytes(), format!("{}val", i).as_bytes())
            .unwrap();
    }
    db.apply(&mut txn, changes).unwrap();

    let orig_root = db.root(&txn).unwrap();

    let keys: Vec<String> = (-50..50).map(|i: i32| i.to_string()).collect();
    let key_slices: Vec<&[u8]> = keys.iter().map(|k| k.as_bytes()).collect();
    let proof = db.export_proof(&txn, &key_slices).unwrap();

    // First-level partial store.
    let (mut db2, mut txn2) = test_db();
    db2.import_proof(&mut txn2, &proof, Some(&orig_root)).unwrap();

    assert_eq!(db2.get(&txn2, b"33").unwrap().unwrap(), b"33val");

    // A narrower proof exported from the partial store itself.
    let keys2: Vec<String> = (-10..10).map(|i: i32| i.to_string()).collect();
    let key_slices2: Vec<&[u8]> = keys2.iter().map(|k| k.as_bytes()).collect();
    let proof2 = db2.export_proof(&txn2, &key_slices2).unwrap();

    let (mut db3, mut txn3) = test_db();
    db3.import_proof(&mut txn3, &proof2, Some(&orig_root)).unwrap();

    let mut query = crate::get::GetMultiQuery::new();
    for key in &keys2 {
        query.insert(key.as_bytes().to_vec(), Default::default());
    }
    db3.get_multi(&txn3, &mut query).unwrap();

    for i in -10..10 {
        let key = i.to_string();
        let res = &query[key.as_bytes()];
        if i < 0 {
            assert!(!res.exists);
        } else {
            assert!(res.exists);
            assert_eq!(res.val, format!("{}val", i).as_bytes());
        }
    }

    assert!(matches!(db3.get(&txn3, b"33"), Err(Error::IncompleteTree)));
}

#[test]
fn no_unnecessary_empty_witnesses() {
    let (mut db, mut txn) = test_db();

    let mut changes = db.change();
    changes
        .put(b"983467173326", b"A") // 10...
        .unwrap()
        .put(b"50728759955", b"B") // 11...
        .unwrap();
    db.apply(&mut txn, changes).unwrap();

    let orig_root = db.root(&txn).unwrap();

    let proof = db
        .export_proof(&txn, &[b"983467173326".as_ref(), b"14864808866".as_ref()]) // 00...
        .unwrap();

    // No separate WitnessEmpty strand: a HashEmpty command on the existing
    // leaf's path covers the absent key.
    assert_eq!(proof.strands.len(), 1);

    let (mut db2, mut txn2) = test_db();
    db2.import_proof(&mut txn2, &proof, Some(&orig_root)).unwrap();

    assert_eq!(db2.get(&txn2, b"983467173326").unwrap().unwrap(), b"A");
    assert!(matches!(
        db2.get(&txn2, b"50728759955"),
        Err(Error::IncompleteTree)
    ));
    assert!(db2.get(&txn2, b"14864808866").unwrap().is_none());
}

// The update-through-proof family. Keys and their hash prefixes:
//   388662362962 -> 01...    947167210798 -> 1000...
//   363565948405 -> 101...   287625867965 -> 1001...
fn setup_update_proof_db(
    db: &mut crate::db::MerkleDb,
    txn: &mut crate::storage::MemoryTrieDb,
) -> Key {
    let mut changes = db.change();
    changes
        .put(b"388662362962", b"A")
        .unwrap()
        .put(b"947167210798", b"B")
        .unwrap()
        .put(b"363565948405", b"C")
        .unwrap()
        .put(b"287625867965", b"D")
        .unwrap();
    db.apply(txn, changes).unwrap();
    db.root(txn).unwrap()
}

#[test]
fn update_leaf_through_proof() {
    let (mut db, mut txn) = test_db();

    let orig_root = setup_update_proof_db(&mut db, &mut txn);
    let proof = db.export_proof(&txn, &[b"388662362962".as_ref()]).unwrap();

    db.put(&mut txn, b"388662362962", b"A2").unwrap();
    let new_root = db.root(&txn).unwrap();

    let (mut db2, mut txn2) = test_db();
    db2.import_proof(&mut txn2, &proof, Some(&orig_root)).unwrap();

    db2.put(&mut txn2, b"388662362962", b"A2").unwrap();
    assert_eq!(db2.root(&txn2).unwrap(), new_root);

    // Keys covered only by witnesses can't be updated.
    assert!(matches!(
        db2.put(&mut txn2, b"947167210798", b"B2"),
        Err(Error::WitnessEncountered)
    ));
}

#[test]
fn update_two_leaves_at_different_levels() {
    let (mut db, mut txn) = test_db();

    let orig_root = setup_update_proof_db(&mut db, &mut txn);
    let proof = db
        .export_proof(&txn, &[b"947167210798".as_ref(), b"363565948405".as_ref()])
        .unwrap();

    db.put(&mut txn, b"947167210798", b"B2").unwrap();
    db.put(&mut txn, b"363565948405", b"C2").unwrap();
    let new_root = db.root(&txn).unwrap();

    let (mut db2, mut txn2) = test_db();
    db2.import_proof(&mut txn2, &proof, Some(&orig_root)).unwrap();

    db2.put(&mut txn2, b"947167210798", b"B2").unwrap();
    db2.put(&mut txn2, b"363565948405", b"C2").unwrap();
    assert_eq!(db2.root(&txn2).unwrap(), new_root);
}

#[test]
fn split_leaf_through_proof() {
    let (mut db, mut txn) = test_db();

    let orig_root = setup_update_proof_db(&mut db, &mut txn);
    let proof = db.export_proof(&txn, &[b"947167210798".as_ref()]).unwrap();

    // 762909246408 hashes to 1000..., splitting the proven leaf.
    db.put(&mut txn, b"762909246408", b"E").unwrap();
    let new_root = db.root(&txn).unwrap();

    let (mut db2, mut txn2) = test_db();
    db2.import_proof(&mut txn2, &proof, Some(&orig_root)).unwrap();

    db2.put(&mut txn2, b"762909246408", b"E").unwrap();
    assert_eq!(db2.root(&txn2).unwrap(), new_root);
}

#[test]
fn witness_leaf_upgrade_allocates_new_node() {
    let (mut db, mut txn) = test_db();

    let orig_root = setup_update_proof_db(&mut db, &mut txn);
    // 627438066816 hashes to 00...: the proof carries 388662362962 (01...)
    // as a WitnessLeaf on the sibling path.
    let proof = db.export_proof(&txn, &[b"627438066816".as_ref()]).unwrap();

    let (mut db2, mut txn2) = test_db();
    db2.import_proof(&mut txn2, &proof, Some(&orig_root)).unwrap();

    assert!(matches!(
        db2.get(&txn2, b"388662362962"),
        Err(Error::IncompleteTree)
    ));

    let node_id = db2.head_node_id(&txn2).unwrap();
    db2.put(&mut txn2, b"388662362962", b"A").unwrap();

    // Writing the same value still allocates: the WitnessLeaf had to be
    // upgraded to a real Leaf.
    assert_ne!(db2.head_node_id(&txn2).unwrap(), node_id);
    assert_eq!(db2.root(&txn2).unwrap(), orig_root);
    assert_eq!(db2.get(&txn2, b"388662362962").unwrap().unwrap(), b"A");
}

#[test]
fn update_witness_leaf_through_proof() {
    let (mut db, mut txn) = test_db();

    let orig_root = setup_update_proof_db(&mut db, &mut txn);
    let proof = db.export_proof(&txn, &[b"627438066816".as_ref()]).unwrap();

    db.put(&mut txn, b"388662362962", b"A2").unwrap();
    let new_root = db.root(&txn).unwrap();

    let (mut db2, mut txn2) = test_db();
    db2.import_proof(&mut txn2, &proof, Some(&orig_root)).unwrap();

    db2.put(&mut txn2, b"388662362962", b"A2").unwrap();
    assert_eq!(db2.root(&txn2).unwrap(), new_root);
}

#[test]
fn split_witness_leaf_through_proof() {
    let (mut db, mut txn) = test_db();

    let orig_root = setup_update_proof_db(&mut db, &mut txn);
    let proof = db.export_proof(&txn, &[b"627438066816".as_ref()]).unwrap();

    db.put(&mut txn, b"627438066816", b"NEW").unwrap();
    let new_root = db.root(&txn).unwrap();

    let (mut db2, mut txn2) = test_db();
    db2.import_proof(&mut txn2, &proof, Some(&orig_root)).unwrap();

    db2.put(&mut txn2, b"627438066816", b"NEW").unwrap();
    assert_eq!(db2.root(&txn2).unwrap(), new_root);
}

#[test]
fn can_bubble_witness_leaf() {
    let (mut db, mut txn) = test_db();

    let mut changes = db.change();
    changes.put(b"a", b"1").unwrap().put(b"b", b"2").unwrap();
    db.apply(&mut txn, changes).unwrap();

    // "a" hashes to 0..., "d" to 1...: the proof carries "b" as a
    // WitnessLeaf, and deleting "a" bubbles it up.
    let proof = db
        .export_proof(&txn, &[b"a".as_ref(), b"d".as_ref()])
        .unwrap();
    let orig_root = db.root(&txn).unwrap();

    db.del(&mut txn, b"a").unwrap();
    let new_root = db.root(&txn).unwrap();

    let (mut db2, mut txn2) = test_db();
    db2.import_proof(&mut txn2, &proof, Some(&orig_root)).unwrap();

    db2.del(&mut txn2, b"a").unwrap();
    assert_eq!(db2.root(&txn2).unwrap(), new_root);
}

#[test]
fn cannot_bubble_witness() {
    let (mut db, mut txn) = test_db();

    let mut changes = db.change();
    changes.put(b"a", b"1").unwrap().put(b"b", b"2").unwrap();
    db.apply(&mut txn, changes).unwrap();

    let proof = db.export_proof(&txn, &[b"a".as_ref()]).unwrap();
    let orig_root = db.root(&txn).unwrap();

    let (mut db2, mut txn2) = test_db();
    db2.import_proof(&mut txn2, &proof, Some(&orig_root)).unwrap();

    assert!(matches!(
        db2.del(&mut txn2, b"a"),
        Err(Error::CannotBubbleWitness)
    ));
}

#[test]
fn export_refuses_witness_leaf_query() {
    let (mut db, mut txn) = test_db();

    let orig_root = setup_update_proof_db(&mut db, &mut txn);
    let proof = db.export_proof(&txn, &[b"627438066816".as_ref()]).unwrap();

    let (mut db2, mut txn2) = test_db();
    db2.import_proof(&mut txn2, &proof, Some(&orig_root)).unwrap();

    // 388662362962 is a WitnessLeaf here; a real Leaf strand for it
    // cannot be produced.
    assert!(matches!(
        db2.export_proof(&txn2, &[b"388662362962".as_ref()]),
        Err(Error::IncompleteTree)
    ));
}

#[test]
fn merge_proofs() {
    let (mut db, mut txn) = test_db();

    let mut changes = db.change();
    for i in 0..100 {
        let key = i.to_string();
        changes
            .put(key.as_bytes(), format!("{}val", i).as_bytes())
            .unwrap();
    }
    db.apply(&mut txn, changes).unwrap();

    let orig_root = db.root(&txn).unwrap();

    let proof_a = db
        .export_proof(&txn, &[b"1".as_ref(), b"2".as_ref()])
        .unwrap();
    let proof_b = db
        .export_proof(&txn, &[b"50".as_ref(), b"51".as_ref()])
        .unwrap();

    let (mut db2, mut txn2) = test_db();
    db2.import_proof(&mut txn2, &proof_a, Some(&orig_root)).unwrap();

    assert_eq!(db2.get(&txn2, b"1").unwrap().unwrap(), b"1val");
    assert!(matches!(db2.get(&txn2, b"50"), Err(Error::IncompleteTree)));

    db2.merge_proof(&mut txn2, &proof_b).unwrap();

    // The merged store answers both proofs' keys under the same root.
    assert_eq!(db2.root(&txn2).unwrap(), orig_root);
    assert_eq!(db2.get(&txn2, b"1").unwrap().unwrap(), b"1val");
    assert_eq!(db2.get(&txn2, b"2").unwrap().unwrap(), b"2val");
    assert_eq!(db2.get(&txn2, b"50").unwrap().unwrap(), b"50val");
    assert_eq!(db2.get(&txn2, b"51").unwrap().unwrap(), b"51val");
}

#[test]
fn merge_requires_same_root() {
    let (mut db, mut txn) = test_db();

    db.put(&mut txn, b"a", b"1").unwrap();
    let root_a = db.root(&txn).unwrap();
    let proof_a = db.export_proof(&txn, &[b"a".as_ref()]).unwrap();

    let (mut db2, mut txn2) = test_db();
    db2.put(&mut txn2, b"b", b"2").unwrap();
    assert_ne!(db2.root(&txn2).unwrap(), root_a);

    assert!(matches!(
        db2.merge_proof(&mut txn2, &proof_a),
        Err(Error::ProofInvalid(_))
    ));
}

#[test]
fn tampered_proof_fails_verification() {
    let (mut db, mut txn) = test_db();

    let mut changes = db.change();
    for i in 0..20 {
        changes
            .put(i.to_string().as_bytes(), b"x".as_ref())
            .unwrap();
    }
    db.apply(&mut txn, changes).unwrap();

    let orig_root = db.root(&txn).unwrap();
    let mut proof = db.export_proof(&txn, &[b"7".as_ref()]).unwrap();

    // Flip a byte of the proven value.
    for strand in proof.strands.iter_mut() {
        if strand.strand_type == crate::proofs::ProofStrandType::Leaf {
            strand.val = b"y".to_vec();
        }
    }

    let (mut db2, mut txn2) = test_db();
    assert!(matches!(
        db2.import_proof(&mut txn2, &proof, Some(&orig_root)),
        Err(Error::ProofInvalid(_))
    ));
}

#[test]
fn structurally_invalid_proofs() {
    use crate::proofs::{Proof, ProofCmd, ProofCmdOp};

    let (mut db, mut txn) = test_db();

    // Empty proofs are rejected outright.
    assert!(matches!(
        db.import_proof(&mut txn, &Proof::default(), None),
        Err(Error::ProofInvalid(_))
    ));

    let (mut src_db, mut src_txn) = test_db();
    src_db.put(&mut src_txn, b"a", b"1").unwrap();
    src_db.put(&mut src_txn, b"b", b"2").unwrap();
    let base = src_db
        .export_proof(&src_txn, &[b"a".as_ref(), b"b".as_ref()])
        .unwrap();

    // Out-of-range command offset.
    let mut proof = base.clone();
    proof.cmds.push(ProofCmd {
        op: ProofCmdOp::HashEmpty,
        node_offset: 1000,
        hash: None,
    });
    assert!(matches!(
        db.import_proof(&mut txn, &proof, None),
        Err(Error::ProofInvalid(_))
    ));

    // A command on a strand that never reaches depth 0 cleanly.
    let mut proof = base.clone();
    proof.cmds.push(ProofCmd {
        op: ProofCmdOp::HashEmpty,
        node_offset: 0,
        hash: None,
    });
    assert!(matches!(
        db.import_proof(&mut txn, &proof, None),
        Err(Error::ProofInvalid(_))
    ));

    // Dangling strand: drop the command stream entirely.
    let mut proof = base;
    proof.cmds.clear();
    assert!(matches!(
        db.import_proof(&mut txn, &proof, None),
        Err(Error::ProofInvalid(_))
    ));
}
