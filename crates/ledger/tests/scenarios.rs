use chrono::{TimeZone, Utc};
use ledger::{
    commit_staged, stage, CommitmentLedger, LedgerError, Participant, Proposal, ProtocolError,
    SignatureEntry, StagedProposal,
};
use mpt::{MptDictionaryPartial, MptError};
use rand::Rng;
use receipts::{Identity, PkiDirectory, Receipt, RecordSet, RelationshipId};

struct Network {
    ledger: CommitmentLedger,
    pki: PkiDirectory,
    w: Participant,
    a: Participant,
    b: Participant,
    wa: RelationshipId,
    wb: RelationshipId,
}

fn network() -> Network {
    let mut w = Participant::new(Identity::generate("warehouse"));
    let mut a = Participant::new(Identity::generate("depositor-a"));
    let mut b = Participant::new(Identity::generate("depositor-b"));

    let mut pki = PkiDirectory::new();
    for p in [&w, &a, &b] {
        pki.insert(p.identity().account().clone());
    }
    let wa = pki.link(&[w.id(), a.id()]).unwrap();
    let wb = pki.link(&[w.id(), b.id()]).unwrap();

    let (wid, aid, bid) = (w.id(), a.id(), b.id());
    let mut ledger = CommitmentLedger::new();
    for (owners, p) in [([wid, aid], &mut a), ([wid, bid], &mut b)] {
        ledger.register_relationship(&owners, RecordSet::new()).unwrap();
        w.join(&owners, RecordSet::new()).unwrap();
        p.join(&owners, RecordSet::new()).unwrap();
    }
    ledger.commit().unwrap();

    Network { ledger, pki, w, a, b, wa, wb }
}

fn receipt(issuer: &Participant, depositor: &Participant, details: &str) -> Receipt {
    let at = Utc.with_ymd_and_hms(2024, 9, 15, 10, 0, 0).unwrap();
    let mut r = Receipt::new(issuer.id(), depositor.id(), "wheat", at);
    r.weight_grams = 25_000_000;
    r.details = details.into();
    r
}

fn publish(ledger: &CommitmentLedger, participants: &mut [&mut Participant]) {
    let number = ledger.current_commitment_number().unwrap();
    let root = ledger.get_commitment(number).unwrap();
    for p in participants.iter_mut() {
        let proof = ledger
            .get_proof(&p.relationship_ids(), number)
            .unwrap()
            .serialize()
            .unwrap();
        p.accept_commitment(number, &root, &proof).unwrap();
    }
}

#[test]
fn test_warehouse_two_depositors_proofs() {
    let w = Identity::generate("warehouse");
    let a = Identity::generate("a");
    let b = Identity::generate("b");
    let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    let r1: RecordSet = vec![Receipt::new(w.id(), a.id(), "rice", at)].into();
    let r2: RecordSet = vec![Receipt::new(w.id(), b.id(), "rice", at)].into();
    let a_digest = r1.authenticated_set().unwrap().commitment();

    let mut ledger = CommitmentLedger::new();
    let wa = ledger.register_relationship(&[w.id(), a.id()], r1).unwrap();
    let wb = ledger.register_relationship(&[w.id(), b.id()], r2).unwrap();
    let root = ledger.commit().unwrap();

    let proof = ledger.get_proof(&[wa], 0).unwrap();
    let proof = MptDictionaryPartial::deserialize(&proof.serialize().unwrap()).unwrap();
    assert_eq!(proof.get(&wa).unwrap(), Some(&a_digest[..]));
    assert_eq!(proof.commitment(), root);

    assert!(matches!(
        proof.get(&wb),
        Err(MptError::InsufficientAuthenticationData(_))
    ));
}

#[test]
fn test_monotonic_ledger() {
    let mut rng = rand::thread_rng();
    let n: u64 = rng.gen_range(1..20);

    let mut ledger = CommitmentLedger::new();
    let mut roots = Vec::new();
    for _ in 0..n {
        roots.push(ledger.commit().unwrap());
        assert_eq!(ledger.current_commitment_number(), Some(roots.len() as u64 - 1));
    }

    for i in 0..n {
        assert_eq!(ledger.get_commitment(i).unwrap(), roots[i as usize]);
        assert!(ledger.get_proof(&[], i).is_ok());
    }
    for i in [n, n + 1, u64::MAX] {
        assert!(matches!(
            ledger.get_commitment(i),
            Err(LedgerError::VersionOutOfRange(_))
        ));
        assert!(ledger.get_proof(&[], i).is_err());
    }
    assert_eq!(ledger.commitments().unwrap(), &roots[..]);
}

#[test]
fn test_issue_through_participants() {
    let mut net = network();
    let r = receipt(&net.w, &net.a, "lot 1");

    let mut proposal = net.w.propose_issue(r.clone()).unwrap();
    let sigs = net.a.approve(&proposal).unwrap();
    proposal.add_signatures(sigs);

    let mut staged = stage(&net.ledger, &net.pki, proposal).unwrap();
    assert!(staged.missing_signers().is_empty());
    commit_staged(&mut net.ledger, &net.pki, &mut staged).unwrap();

    publish(&net.ledger, &mut [&mut net.w, &mut net.a]);

    let live = net.ledger.live_digest(&net.wa).unwrap();
    assert_eq!(net.w.local_digest(&net.wa), Some(live));
    assert_eq!(net.a.local_digest(&net.wa), Some(live));
    assert!(net.a.records(&net.wa).unwrap().contains(&r.witness()));
    assert_eq!(net.w.pending(), 0);
    assert_eq!(net.a.pending(), 0);
}

fn staged_transfer(net: &mut Network) -> (StagedProposal, Vec<SignatureEntry>, Receipt) {
    // seed the receipt with A through a normal issue
    let r = receipt(&net.w, &net.a, "to transfer");
    let mut issue = net.w.propose_issue(r.clone()).unwrap();
    let sigs = net.a.approve(&issue).unwrap();
    issue.add_signatures(sigs);
    let mut staged = stage(&net.ledger, &net.pki, issue).unwrap();
    commit_staged(&mut net.ledger, &net.pki, &mut staged).unwrap();

    publish(&net.ledger, &mut [&mut net.w, &mut net.a]);

    let b_id = net.b.id();
    let a_id = net.a.id();
    let transfer = net.a.propose_transfer(r.clone(), a_id, b_id).unwrap();
    let mut all = transfer.signatures.clone();
    all.extend(net.w.approve(&transfer).unwrap());
    all.extend(net.b.approve(&transfer).unwrap());

    let bare = Proposal {
        signatures: Vec::new(),
        ..transfer
    };
    let staged = stage(&net.ledger, &net.pki, bare).unwrap();
    (staged, all, r)
}

#[test]
fn test_transfer_needs_all_four_signatures() {
    let mut net = network();
    let (staged, all, r) = staged_transfer(&mut net);
    assert_eq!(staged.required_signatures().len(), 4);
    assert_eq!(all.len(), 4);

    let wa_before = net.ledger.live_digest(&net.wa).unwrap();
    let wb_before = net.ledger.live_digest(&net.wb).unwrap();
    let roots_before = net.ledger.commitments().unwrap().to_vec();

    for skip in 0..all.len() {
        let mut attempt = staged.clone();
        attempt.add_signatures(
            all.iter()
                .enumerate()
                .filter(|(i, _)| *i != skip)
                .map(|(_, s)| s.clone()),
        );
        assert_eq!(attempt.missing_signers().len(), 1);
        assert!(matches!(
            commit_staged(&mut net.ledger, &net.pki, &mut attempt),
            Err(ProtocolError::SignatureMismatch(_))
        ));
        assert_eq!(net.ledger.live_digest(&net.wa).unwrap(), wa_before);
        assert_eq!(net.ledger.live_digest(&net.wb).unwrap(), wb_before);
        assert_eq!(net.ledger.commitments().unwrap(), &roots_before[..]);
    }

    let mut complete = staged;
    complete.add_signatures(all);
    commit_staged(&mut net.ledger, &net.pki, &mut complete).unwrap();

    let w = r.witness();
    assert!(!net.ledger.live_record_set(&net.wa).unwrap().contains(&w));
    assert!(net.ledger.live_record_set(&net.wb).unwrap().contains(&w));
    assert_eq!(net.ledger.commitments().unwrap().len(), roots_before.len() + 1);
}

#[test]
fn test_transfer_participants_accept_result() {
    let mut net = network();
    let (mut staged, all, r) = staged_transfer(&mut net);
    staged.add_signatures(all);
    commit_staged(&mut net.ledger, &net.pki, &mut staged).unwrap();

    publish(&net.ledger, &mut [&mut net.w, &mut net.a, &mut net.b]);
    for p in [&net.w, &net.a, &net.b] {
        assert_eq!(p.pending(), 0);
    }

    assert!(net.b.records(&net.wb).unwrap().contains(&r.witness()));
    assert!(net.a.records(&net.wa).unwrap().is_empty());
    assert_eq!(
        net.w.local_digest(&net.wb),
        Some(net.ledger.live_digest(&net.wb).unwrap())
    );
}

#[test]
fn test_participant_detects_omitted_relationship() {
    let mut net = network();
    let number = net.ledger.current_commitment_number().unwrap();
    let root = net.ledger.get_commitment(number).unwrap();

    // a proof that only covers A's relationship cannot satisfy the warehouse
    let proof = net.ledger.get_proof(&[net.wa], number).unwrap();
    assert!(matches!(
        net.w.accept_commitment(number, &root, &proof.serialize().unwrap()),
        Err(ProtocolError::ServerUntrusted(_))
    ));
}

#[test]
fn test_save_and_load_preserves_history() {
    let mut net = network();
    for i in 0..3 {
        let mut p = net.w.propose_issue(receipt(&net.w, &net.b, &format!("lot {i}"))).unwrap();
        let sigs = net.b.approve(&p).unwrap();
        p.add_signatures(sigs);
        let mut staged = stage(&net.ledger, &net.pki, p).unwrap();
        commit_staged(&mut net.ledger, &net.pki, &mut staged).unwrap();
        publish(&net.ledger, &mut [&mut net.w, &mut net.b]);
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.snapshot");
    net.ledger.save(&path).unwrap();
    // saving again replaces the file in place
    net.ledger.save(&path).unwrap();

    let mut loaded = CommitmentLedger::load(&path).unwrap();
    assert_eq!(loaded.commitments().unwrap(), net.ledger.commitments().unwrap());
    for n in 0..=3u64 {
        assert_eq!(
            loaded.get_record_set(&net.wb, n).unwrap().len(),
            n as usize
        );
        assert_eq!(
            loaded.get_proof(&[net.wa, net.wb], n).unwrap().serialize().unwrap(),
            net.ledger.get_proof(&[net.wa, net.wb], n).unwrap().serialize().unwrap()
        );
    }

    assert_eq!(loaded.commit().unwrap(), net.ledger.commit().unwrap());
}
