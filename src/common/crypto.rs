use std::fmt;

use ed25519_dalek::{ed25519::{self, signature::Signer}, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest as ShaDigest, Sha256, Sha512};

pub type Digest = [u8; 64];

pub struct Keypair {
    pubkey: Pubkey,
    dalek_signer: SigningKey,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Pubkey {
    pub key: [u8; 32],
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Signature {
    pub signer: Pubkey,
    pub sig: [u8; 64],
}

/*
    A committee member is addressed by the hash of its public key. The id is
    what every automaton sees; the key itself stays with the membership and
    transport layers.
*/
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NodeId(pub [u8; 32]);

impl Keypair {
    pub fn new_pair() -> Self {
        let mut csprng = OsRng;
        let dalek_signer = SigningKey::generate(&mut csprng);
        Self::from_signer(dalek_signer)
    }

    /// Deterministic keypair, used by tests and the simulation.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::from_signer(SigningKey::from_bytes(&seed))
    }

    fn from_signer(dalek_signer: SigningKey) -> Self {
        let pubkey = Pubkey::from(&dalek_signer.verifying_key().to_bytes());

        Keypair {
            pubkey,
            dalek_signer,
        }
    }

    pub fn sign(&self, digest: &Digest) -> Signature {
        let sig = self
            .dalek_signer
            .sign(digest)
            .to_bytes();

        Signature {
            signer: self.pubkey.clone(),
            sig,
        }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.pubkey.clone()
    }

    pub fn node_id(&self) -> NodeId {
        NodeId::from(&self.pubkey)
    }
}

impl AsRef<[u8]> for Pubkey {
    fn as_ref(&self) -> &[u8] {
        &self.key
    }
}

impl From<&[u8; 32]> for Pubkey {
    fn from(bytes: &[u8; 32]) -> Self {
        Pubkey { key: *bytes }
    }
}

impl Signature {
    pub fn verify(&self, digest: &Digest) -> bool {
        let dalek_sig = ed25519::Signature::from_bytes(&self.sig);
        let Ok(dalek_pubkey) = VerifyingKey::from_bytes(&self.signer.key) else {
            return false;
        };
        dalek_pubkey
            .verify_strict(digest, &dalek_sig)
            .is_ok()
    }
}

/// SHA-512 over the concatenation of `parts`.
pub fn digest(parts: &[&[u8]]) -> Digest {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    let result = hasher.finalize();
    let mut digest = [0u8; 64];
    digest.copy_from_slice(&result[..]);
    digest
}

impl From<&Pubkey> for NodeId {
    fn from(pubkey: &Pubkey) -> Self {
        let mut id = [0u8; 32];
        id.copy_from_slice(&Sha256::digest(pubkey.as_ref())[..]);
        NodeId(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0[..4] {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({self})")
    }
}

/// Keypairs derived from fixed seeds, one per test node.
pub fn make_test_keypairs(n: usize) -> Vec<Keypair> {
    (0..n)
        .map(|i| {
            let mut seed = [0u8; 32];
            seed[..8].copy_from_slice(&(i as u64).to_le_bytes());
            seed[8..16].copy_from_slice(&0x517c_c1b7_2722_0a95u64.to_le_bytes());
            Keypair::from_seed(seed)
        })
        .collect()
}

pub fn make_test_node_ids(n: usize) -> Vec<NodeId> {
    make_test_keypairs(n).iter().map(Keypair::node_id).collect()
}
