//! TLV encoding of ML-DSA seals and header extra-field layout.
//!
//! Extra field layout, in order:
//! `[vanity:32] [signers: N*20, checkpoint blocks only] [pq seal TLV?]
//!  [ecdsa seal:65]`
//!
//! TLV form: `[type:1] [sig_len:4 BE] [pk_len:4 BE] [signature] [public_key]`.
//! The ECDSA seal always stays at the very end so legacy verifiers keep
//! working through the transition.

use crate::error::{ConsensusError, ConsensusResult};
use splendor_crypto::{mldsa, MlDsaAlgorithm};
use splendor_types::{Address, EXTRA_SEAL, EXTRA_VANITY};

/// TLV header: type byte plus two big-endian u32 lengths.
pub const PQ_TLV_HEADER_SIZE: usize = 9;

const TYPE_MLDSA65: u8 = 0x01;
const TYPE_MLDSA44: u8 = 0x02;
const TYPE_MLDSA87: u8 = 0x03;

/// A decoded post-quantum seal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PqSeal {
    pub algorithm: MlDsaAlgorithm,
    pub signature: Vec<u8>,
    pub public_key: Vec<u8>,
}

impl PqSeal {
    /// The seal's type byte in the TLV encoding.
    pub fn type_byte(&self) -> u8 {
        match self.algorithm {
            MlDsaAlgorithm::MlDsa65 => TYPE_MLDSA65,
            MlDsaAlgorithm::MlDsa44 => TYPE_MLDSA44,
            MlDsaAlgorithm::MlDsa87 => TYPE_MLDSA87,
        }
    }

    fn algorithm_from_type(byte: u8) -> Option<MlDsaAlgorithm> {
        match byte {
            TYPE_MLDSA65 => Some(MlDsaAlgorithm::MlDsa65),
            TYPE_MLDSA44 => Some(MlDsaAlgorithm::MlDsa44),
            TYPE_MLDSA87 => Some(MlDsaAlgorithm::MlDsa87),
            _ => None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(PQ_TLV_HEADER_SIZE + self.signature.len() + self.public_key.len());
        out.push(self.type_byte());
        out.extend_from_slice(&(self.signature.len() as u32).to_be_bytes());
        out.extend_from_slice(&(self.public_key.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.signature);
        out.extend_from_slice(&self.public_key);
        out
    }

    /// Decode a TLV that must span exactly `data`.
    pub fn decode(data: &[u8]) -> ConsensusResult<Self> {
        if data.len() < PQ_TLV_HEADER_SIZE {
            return Err(ConsensusError::InvalidExtra("PQ seal data too short".to_string()));
        }
        let algorithm = Self::algorithm_from_type(data[0]).ok_or_else(|| {
            ConsensusError::InvalidExtra(format!("unknown PQ seal type {:#04x}", data[0]))
        })?;
        let sig_len = u32::from_be_bytes([data[1], data[2], data[3], data[4]]) as usize;
        let pk_len = u32::from_be_bytes([data[5], data[6], data[7], data[8]]) as usize;

        let expected = PQ_TLV_HEADER_SIZE
            .checked_add(sig_len)
            .and_then(|n| n.checked_add(pk_len))
            .ok_or_else(|| ConsensusError::InvalidExtra("PQ seal length overflow".to_string()))?;
        if data.len() != expected {
            return Err(ConsensusError::InvalidExtra(format!(
                "PQ seal length mismatch: have {}, TLV says {}",
                data.len(),
                expected
            )));
        }

        // Decoded lengths must match the variant's parameter set (runtime
        // sizes when the library is linked, static table otherwise).
        let (want_sig, want_pk) = mldsa::sizes(algorithm);
        if sig_len != want_sig || pk_len != want_pk {
            return Err(ConsensusError::InvalidExtra(format!(
                "PQ seal sizes {}/{} do not match {} parameter set {}/{}",
                sig_len, pk_len, algorithm, want_sig, want_pk
            )));
        }

        Ok(Self {
            algorithm,
            signature: data[PQ_TLV_HEADER_SIZE..PQ_TLV_HEADER_SIZE + sig_len].to_vec(),
            public_key: data[PQ_TLV_HEADER_SIZE + sig_len..].to_vec(),
        })
    }

    /// PQ signer address: the last 20 bytes of keccak over the public key.
    pub fn signer(&self) -> Address {
        Address::from_public_key(&self.public_key)
    }
}

/// The parsed pieces of a header extra field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraLayout {
    pub vanity: [u8; EXTRA_VANITY],
    pub signers: Vec<Address>,
    pub pq_seal: Option<PqSeal>,
    pub ecdsa_seal: [u8; EXTRA_SEAL],
}

impl ExtraLayout {
    /// Parse an extra field. `checkpoint` selects whether a signer list is
    /// expected between the vanity and the seals.
    pub fn parse(extra: &[u8], checkpoint: bool) -> ConsensusResult<Self> {
        if extra.len() < EXTRA_VANITY + EXTRA_SEAL {
            return Err(ConsensusError::InvalidExtra(format!(
                "extra too short: {} bytes",
                extra.len()
            )));
        }
        let mut vanity = [0u8; EXTRA_VANITY];
        vanity.copy_from_slice(&extra[..EXTRA_VANITY]);
        let mut ecdsa_seal = [0u8; EXTRA_SEAL];
        ecdsa_seal.copy_from_slice(&extra[extra.len() - EXTRA_SEAL..]);

        let middle = &extra[EXTRA_VANITY..extra.len() - EXTRA_SEAL];
        let (signers, pq_seal) = Self::split_middle(middle, checkpoint)?;

        Ok(Self { vanity, signers, pq_seal, ecdsa_seal })
    }

    /// Split the bytes between vanity and ECDSA seal into the signer list
    /// and an optional TLV. The TLV's internal lengths must exactly consume
    /// the remainder, which makes the split unambiguous.
    fn split_middle(middle: &[u8], checkpoint: bool) -> ConsensusResult<(Vec<Address>, Option<PqSeal>)> {
        if middle.is_empty() {
            return Ok((Vec::new(), None));
        }
        if !checkpoint {
            return Ok((Vec::new(), Some(PqSeal::decode(middle)?)));
        }

        // Checkpoint: try every signer-list prefix length; exactly one can
        // leave a remainder that parses as a full TLV.
        if middle.len() % 20 == 0 {
            // Could be all signers with no PQ seal; prefer a TLV split if
            // one exists, since a seal cannot be mistaken for addresses
            // once its lengths are checked.
            for count in 0..=middle.len() / 20 {
                let rest = &middle[count * 20..];
                if rest.is_empty() {
                    return Ok((parse_signers(&middle[..count * 20])?, None));
                }
                if let Ok(seal) = PqSeal::decode(rest) {
                    return Ok((parse_signers(&middle[..count * 20])?, Some(seal)));
                }
            }
            return Ok((parse_signers(middle)?, None));
        }

        for count in 0..=middle.len() / 20 {
            let rest = &middle[count * 20..];
            if let Ok(seal) = PqSeal::decode(rest) {
                return Ok((parse_signers(&middle[..count * 20])?, Some(seal)));
            }
        }
        Err(ConsensusError::InvalidExtra(
            "checkpoint extra is neither signers nor signers + PQ seal".to_string(),
        ))
    }

    /// Reassemble the extra bytes without any seals: what the seal hash is
    /// computed over.
    pub fn unsealed_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(EXTRA_VANITY + self.signers.len() * 20);
        out.extend_from_slice(&self.vanity);
        for signer in &self.signers {
            out.extend_from_slice(signer.as_bytes());
        }
        out
    }

    /// Assemble the full extra field from parts.
    pub fn assemble(
        vanity: &[u8; EXTRA_VANITY],
        signers: &[Address],
        pq_seal: Option<&PqSeal>,
        ecdsa_seal: &[u8; EXTRA_SEAL],
    ) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(vanity);
        for signer in signers {
            out.extend_from_slice(signer.as_bytes());
        }
        if let Some(seal) = pq_seal {
            out.extend_from_slice(&seal.encode());
        }
        out.extend_from_slice(ecdsa_seal);
        out
    }
}

fn parse_signers(bytes: &[u8]) -> ConsensusResult<Vec<Address>> {
    if bytes.len() % 20 != 0 {
        return Err(ConsensusError::InvalidExtra("invalid signer list length".to_string()));
    }
    Ok(bytes.chunks_exact(20).filter_map(Address::from_slice).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seal_for(algorithm: MlDsaAlgorithm) -> PqSeal {
        let (sig_len, pk_len) = mldsa::sizes(algorithm);
        PqSeal {
            algorithm,
            signature: vec![0x5a; sig_len],
            public_key: vec![0xa5; pk_len],
        }
    }

    #[test]
    fn tlv_round_trip_all_variants() {
        for algorithm in MlDsaAlgorithm::ALL {
            let seal = seal_for(algorithm);
            let decoded = PqSeal::decode(&seal.encode()).unwrap();
            assert_eq!(decoded, seal);
        }
    }

    #[test]
    fn tlv_rejects_wrong_parameter_sizes() {
        let mut seal = seal_for(MlDsaAlgorithm::MlDsa65);
        seal.signature.pop();
        let encoded = seal.encode();
        assert!(matches!(PqSeal::decode(&encoded), Err(ConsensusError::InvalidExtra(_))));
    }

    #[test]
    fn tlv_rejects_unknown_type() {
        let mut encoded = seal_for(MlDsaAlgorithm::MlDsa44).encode();
        encoded[0] = 0x09;
        assert!(PqSeal::decode(&encoded).is_err());
    }

    #[test]
    fn layout_round_trip_plain_header() {
        let vanity = [7u8; EXTRA_VANITY];
        let ecdsa = [9u8; EXTRA_SEAL];
        let extra = ExtraLayout::assemble(&vanity, &[], None, &ecdsa);
        let layout = ExtraLayout::parse(&extra, false).unwrap();

        assert_eq!(layout.vanity, vanity);
        assert!(layout.signers.is_empty());
        assert!(layout.pq_seal.is_none());
        assert_eq!(layout.ecdsa_seal, ecdsa);
    }

    #[test]
    fn layout_round_trip_with_pq_seal() {
        let seal = seal_for(MlDsaAlgorithm::MlDsa65);
        let extra = ExtraLayout::assemble(&[0; EXTRA_VANITY], &[], Some(&seal), &[1; EXTRA_SEAL]);
        let layout = ExtraLayout::parse(&extra, false).unwrap();
        assert_eq!(layout.pq_seal.unwrap(), seal);
    }

    #[test]
    fn layout_round_trip_checkpoint_with_signers_and_seal() {
        let signers = vec![Address([1; 20]), Address([2; 20]), Address([3; 20])];
        let seal = seal_for(MlDsaAlgorithm::MlDsa44);
        let extra =
            ExtraLayout::assemble(&[0; EXTRA_VANITY], &signers, Some(&seal), &[1; EXTRA_SEAL]);
        let layout = ExtraLayout::parse(&extra, true).unwrap();

        assert_eq!(layout.signers, signers);
        assert_eq!(layout.pq_seal.unwrap(), seal);
    }

    #[test]
    fn layout_checkpoint_signers_only() {
        let signers = vec![Address([4; 20]), Address([5; 20])];
        let extra = ExtraLayout::assemble(&[0; EXTRA_VANITY], &signers, None, &[1; EXTRA_SEAL]);
        let layout = ExtraLayout::parse(&extra, true).unwrap();
        assert_eq!(layout.signers, signers);
        assert!(layout.pq_seal.is_none());
    }

    #[test]
    fn ecdsa_seal_is_always_the_final_bytes() {
        let seal = seal_for(MlDsaAlgorithm::MlDsa65);
        let ecdsa = [0x77u8; EXTRA_SEAL];
        let extra = ExtraLayout::assemble(&[0; EXTRA_VANITY], &[], Some(&seal), &ecdsa);
        assert_eq!(&extra[extra.len() - EXTRA_SEAL..], &ecdsa);
    }

    #[test]
    fn unsealed_bytes_exclude_both_seals() {
        let signers = vec![Address([8; 20])];
        let seal = seal_for(MlDsaAlgorithm::MlDsa65);
        let extra =
            ExtraLayout::assemble(&[3; EXTRA_VANITY], &signers, Some(&seal), &[9; EXTRA_SEAL]);
        let layout = ExtraLayout::parse(&extra, true).unwrap();

        let unsealed = layout.unsealed_bytes();
        assert_eq!(unsealed.len(), EXTRA_VANITY + 20);
        assert_eq!(&unsealed[..EXTRA_VANITY], &[3u8; EXTRA_VANITY]);
    }
}
