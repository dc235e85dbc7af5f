//! Prepared contract calls.
//!
//! The relay boundary takes opaque bytes; the engine encodes typed calls
//! with Borsh and leaves ABI encoding to the gateway that fronts the
//! contract. The public order call reveals only the nonce half of each
//! consumed note's secret pair, which is the on-chain nullifier.

use borsh::{BorshDeserialize, BorshSerialize};

use murk_core::{keccak256, Address, Amount, Field32, Hash32};

use crate::error::SettleError;
use crate::witness::Witness;

/// The publicly disclosed order asset of an order call.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct OrderCallAsset {
    /// Asset committed to the order.
    pub asset: Address,
    /// Amount committed to the order.
    pub amount: Amount,
    /// keccak256 of the cancel preimage; zero for withdrawals.
    pub cancel_hash: Hash32,
}

/// Public input of the contract's `order` entrypoint.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct OrderCall {
    /// Merkle root the proof was built against.
    pub merkle_root: Field32,
    /// Raw external order hash.
    pub order_hash: Hash32,
    /// Field-normalized order hash.
    pub normalized_order_hash: Field32,
    /// Combined-secret hash of the spend's own secret, or zero.
    pub precomp_secret: Field32,
    /// Disclosed asset, amount, and cancel hash.
    pub order_asset: OrderCallAsset,
    /// Public nullifiers: the nonce of each consumed note, zero-padded.
    pub nullifier: [Field32; 2],
    /// Commitments of the produced notes, zero-padded.
    pub new_note_hash: [Field32; 2],
}

/// A prepared transaction for the relay.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum ChainCall {
    /// `order(zkpInput, proof)`.
    Order {
        /// Public circuit input.
        input: OrderCall,
        /// Serialized proof.
        proof: Vec<u8>,
    },
    /// `cancel(orderHash, preimage)`.
    Cancel {
        /// The order being cancelled.
        order_hash: Hash32,
        /// Revealed cancel preimage.
        preimage: Field32,
    },
    /// `withdraw(asset, amount, to, nonce)`.
    Withdraw {
        /// Asset withdrawn.
        asset: Address,
        /// Amount withdrawn.
        amount: Amount,
        /// Receiving address.
        recipient: Address,
        /// Salt bound into the withdraw order hash.
        salt: Field32,
    },
}

impl ChainCall {
    /// Encode into the opaque transaction bytes the relay expects.
    pub fn encode(&self) -> Result<Vec<u8>, SettleError> {
        borsh::to_vec(self).map_err(|e| SettleError::Chain(e.to_string()))
    }
}

/// Build the public order call from an assembled witness.
pub fn order_call(witness: &Witness, order_hash: Hash32, cancel_hash: Hash32) -> OrderCall {
    OrderCall {
        merkle_root: witness.merkle_root,
        order_hash,
        normalized_order_hash: witness.order_hash,
        precomp_secret: witness.precomp_secret,
        order_asset: OrderCallAsset {
            asset: witness.order_asset.asset,
            amount: witness.order_asset.amount,
            cancel_hash,
        },
        nullifier: [witness.nullifier[0].nonce, witness.nullifier[1].nonce],
        new_note_hash: witness.new_note_hash,
    }
}

/// Synthetic order hash for a withdrawal:
/// `keccak256(asset ++ amount ++ recipient ++ salt)` over packed bytes.
pub fn withdraw_order_hash(
    asset: &Address,
    amount: Amount,
    recipient: &Address,
    salt: &Field32,
) -> Hash32 {
    let mut packed = Vec::with_capacity(20 + 32 + 20 + 32);
    packed.extend_from_slice(asset.as_bytes());
    let mut amount_word = [0u8; 32];
    amount_word[16..].copy_from_slice(&amount.units().to_be_bytes());
    packed.extend_from_slice(&amount_word);
    packed.extend_from_slice(recipient.as_bytes());
    packed.extend_from_slice(salt.as_bytes());
    keccak256(&packed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_round_trips() {
        let call = ChainCall::Cancel {
            order_hash: Hash32::from([1u8; 32]),
            preimage: Field32::from([2u8; 32]),
        };
        let bytes = call.encode().unwrap();
        let decoded = ChainCall::try_from_slice(&bytes).unwrap();
        assert_eq!(decoded, call);
    }

    #[test]
    fn withdraw_hash_binds_every_field() {
        let asset = Address::from([1u8; 20]);
        let to = Address::from([2u8; 20]);
        let salt = Field32::from([3u8; 32]);
        let base = withdraw_order_hash(&asset, Amount::from_units(10), &to, &salt);
        assert_ne!(
            withdraw_order_hash(&asset, Amount::from_units(11), &to, &salt),
            base
        );
        assert_ne!(
            withdraw_order_hash(&to, Amount::from_units(10), &to, &salt),
            base
        );
        assert_ne!(
            withdraw_order_hash(&asset, Amount::from_units(10), &asset, &salt),
            base
        );
        assert_ne!(
            withdraw_order_hash(&asset, Amount::from_units(10), &to, &Field32::from([4u8; 32])),
            base
        );
    }
}
