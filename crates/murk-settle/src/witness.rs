//! Witness assembly.
//!
//! A witness is the complete field-encoded input set handed to the
//! prover. Every root and inclusion proof inside it comes from one
//! [`TreeSnapshot`], so the witness is internally consistent by
//! construction; staleness against the live chain is checked separately
//! before submission.

use serde::{Deserialize, Serialize};

use murk_core::{
    address_to_fr, from_fr, Address, CombinedSecret, CoreError, Field32, Note, MAX_SPEND_INPUTS,
    MAX_SPEND_OUTPUTS,
};
use murk_ledger::NoteRecord;
use murk_tree::{InclusionProof, TreeSnapshot};

use crate::error::SettleError;

/// What a spend is about, independent of which notes fund it.
#[derive(Clone, Debug)]
pub struct SpendIntent {
    /// Normalized order hash (the circuit's public order binding).
    pub normalized_order_hash: Field32,
    /// Hash of the spend's own combined secret; zero for withdrawals.
    pub precomp_secret: Field32,
    /// The publicly disclosed asset and amount being committed to the
    /// order, carried as a note with a zero secret.
    pub order_asset: Note,
    /// Base and quote assets of the order (both the same for a
    /// withdrawal).
    pub included_assets: [Address; 2],
}

/// The complete input set for the prover.
///
/// `nullifier[i]` is exactly the combined secret of the i-th consumed
/// note; the public contract call later reveals only the nonce half.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Witness {
    /// Root of the snapshot the inclusion proofs were drawn from.
    pub merkle_root: Field32,
    /// Normalized order hash.
    pub order_hash: Field32,
    /// Combined-secret hash of the spend's own secret, or zero.
    pub precomp_secret: Field32,
    /// Publicly disclosed order asset and amount.
    pub order_asset: Note,
    /// Revealed secret pairs of the consumed notes, zero-padded.
    pub nullifier: [CombinedSecret; 2],
    /// Commitments of the produced notes, zero-padded.
    pub new_note_hash: [Field32; 2],
    /// Field-encoded base and quote assets.
    pub included_asset: [Field32; 2],
    /// Consumed notes, zero-padded.
    pub input_note: [Note; 2],
    /// Produced notes, zero-padded.
    pub output_note: [Note; 2],
    /// Inclusion proofs for the consumed notes; empty proofs pad the
    /// unused slots.
    pub inclusion_proof: [InclusionProof; 2],
}

/// Assemble a witness from one snapshot, the reserved inputs, and the
/// planned outputs.
///
/// Input notes must be synchronized leaves of the snapshot; an unknown
/// commitment surfaces as a tree error rather than producing an
/// unprovable witness.
pub fn build_witness(
    snapshot: &TreeSnapshot,
    intent: &SpendIntent,
    inputs: &[NoteRecord],
    outputs: &[Note],
) -> Result<Witness, SettleError> {
    if inputs.is_empty() || inputs.len() > MAX_SPEND_INPUTS {
        return Err(CoreError::InvalidValue("spend requires one or two input notes").into());
    }
    if outputs.len() > MAX_SPEND_OUTPUTS {
        return Err(CoreError::InvalidValue("spend produces at most two output notes").into());
    }

    let mut nullifier = [CombinedSecret::zero(), CombinedSecret::zero()];
    let mut input_note = [Note::zero(), Note::zero()];
    let mut inclusion_proof = [InclusionProof::empty(), InclusionProof::empty()];
    for (slot, record) in inputs.iter().enumerate() {
        nullifier[slot] = record.note.secret.clone();
        input_note[slot] = record.note.clone();
        inclusion_proof[slot] = snapshot.proof(&record.commitment)?;
    }

    let mut new_note_hash = [Field32::ZERO, Field32::ZERO];
    let mut output_note = [Note::zero(), Note::zero()];
    for (slot, note) in outputs.iter().enumerate() {
        new_note_hash[slot] = note.commitment()?;
        output_note[slot] = note.clone();
    }

    Ok(Witness {
        merkle_root: snapshot.root(),
        order_hash: intent.normalized_order_hash,
        precomp_secret: intent.precomp_secret,
        order_asset: intent.order_asset.clone(),
        nullifier,
        new_note_hash,
        included_asset: [
            from_fr(address_to_fr(&intent.included_assets[0])),
            from_fr(address_to_fr(&intent.included_assets[1])),
        ],
        input_note,
        output_note,
        inclusion_proof,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use murk_core::Amount;
    use murk_tree::CommitmentTree;

    fn snapshot_of(leaves: &[Field32]) -> TreeSnapshot {
        TreeSnapshot::from_tree(CommitmentTree::from_leaves(leaves).unwrap())
    }

    fn record(note: Note, created_at: u64) -> NoteRecord {
        NoteRecord::confirmed(note, 0, created_at).unwrap()
    }

    fn intent(asset: Address) -> SpendIntent {
        SpendIntent {
            normalized_order_hash: Field32::from([5u8; 32]),
            precomp_secret: Field32::from([6u8; 32]),
            order_asset: Note {
                asset,
                amount: Amount::from_units(40),
                secret: CombinedSecret::zero(),
            },
            included_assets: [asset, Address::from([2u8; 20])],
        }
    }

    #[test]
    fn nullifiers_are_the_consumed_secrets_verbatim() {
        let asset = Address::from([1u8; 20]);
        let a = Note::fresh(asset, Amount::from_units(70));
        let b = Note::fresh(asset, Amount::from_units(30));
        let snapshot = snapshot_of(&[
            a.commitment().unwrap(),
            b.commitment().unwrap(),
        ]);

        let inputs = vec![record(a.clone(), 1), record(b.clone(), 2)];
        let change = Note::fresh(asset, Amount::from_units(60));
        let witness =
            build_witness(&snapshot, &intent(asset), &inputs, &[change.clone()]).unwrap();

        assert_eq!(witness.nullifier[0], a.secret);
        assert_eq!(witness.nullifier[1], b.secret);
        assert_eq!(witness.input_note[0], a);
        assert_eq!(witness.input_note[1], b);
        assert_eq!(witness.new_note_hash[0], change.commitment().unwrap());
        assert_eq!(witness.merkle_root, snapshot.root());
    }

    #[test]
    fn single_input_pads_the_second_slot_with_zeroes() {
        let asset = Address::from([1u8; 20]);
        let a = Note::fresh(asset, Amount::from_units(70));
        let snapshot = snapshot_of(&[a.commitment().unwrap()]);

        let witness =
            build_witness(&snapshot, &intent(asset), &[record(a, 1)], &[]).unwrap();

        assert!(witness.nullifier[1].is_zero());
        assert!(witness.input_note[1].is_zero());
        assert_eq!(witness.inclusion_proof[1], InclusionProof::empty());
        assert!(witness.new_note_hash[0].is_zero());
        assert!(witness.output_note[0].is_zero());
    }

    #[test]
    fn proofs_come_from_the_given_snapshot() {
        let asset = Address::from([1u8; 20]);
        let a = Note::fresh(asset, Amount::from_units(70));
        let cm = a.commitment().unwrap();
        let snapshot = snapshot_of(&[Field32::from([9u8; 32]), cm]);

        let witness = build_witness(&snapshot, &intent(asset), &[record(a, 1)], &[]).unwrap();
        let proof = &witness.inclusion_proof[0];
        assert_eq!(proof.leaf_index, 1);
        assert!(proof.verify(&cm, &witness.merkle_root).unwrap());
    }

    #[test]
    fn unknown_input_commitment_is_rejected() {
        let asset = Address::from([1u8; 20]);
        let a = Note::fresh(asset, Amount::from_units(70));
        let snapshot = snapshot_of(&[]);
        let err = build_witness(&snapshot, &intent(asset), &[record(a, 1)], &[]);
        assert!(matches!(
            err,
            Err(SettleError::Tree(murk_tree::TreeError::NotFound))
        ));
    }

    #[test]
    fn input_count_is_bounded() {
        let asset = Address::from([1u8; 20]);
        let snapshot = snapshot_of(&[]);
        assert!(build_witness(&snapshot, &intent(asset), &[], &[]).is_err());
    }
}
