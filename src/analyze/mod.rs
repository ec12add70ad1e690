pub mod fingerprint;
pub mod signatures;
