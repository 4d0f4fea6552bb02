pub mod hashing;
pub mod identity;
pub mod seed;

pub use hashing::{commitment_hash, hash, merkle_root, verify_commitment};
pub use identity::{verify_signature, CryptoError, Keypair, Result};
pub use seed::{optimization_seed, synthetic_data_seed, verify_optimization_seed, Seed};
