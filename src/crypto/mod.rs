pub mod cipher;

pub use cipher::{derive_key, CipherError, EncryptedPayload, HistoryCipher};
