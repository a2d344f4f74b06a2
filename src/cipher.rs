// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Authenticated symmetric encryption for session and cookie payloads.
//!
//! Message layout:
//!
//! ```text
//! CIPHERTEXT := IV || AES-256-CBC(PKCS7(cleartext), PBKDF2(cipher key, IV))
//! MESSAGE    := CIPHERTEXT || HMAC-SHA1(CIPHERTEXT, PBKDF2(hmac key, IV))
//! ```
//!
//! Decryption verifies the HMAC before touching the ciphertext.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use sha1::Sha1;
use sha2::Sha256;

use crate::context::{OsRandomGenerator, RandomGenerator};
use crate::util::timing_safe_eq;
use crate::Error;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha1 = Hmac<Sha1>;

const IV_SIZE: usize = 16;
const BLOCK_SIZE: usize = 16;
const KEY_SIZE: usize = 32;
const TAG_SIZE: usize = 20;

const MIN_KEY_LEN: usize = 32;
const MAX_ITERATIONS: u32 = 10_000;

/// Key material and derivation settings for a [`Cipher`].
///
/// The two input keys are independent secrets; the actual encryption and
/// authentication keys are derived from them per message, salted by the IV.
pub struct CipherConfig {
    cipher_key: Vec<u8>,
    hmac_key: Vec<u8>,
    iterations: u32,
}

impl CipherConfig {
    /// Creates a config from the two input keys. Both must be at least 32
    /// bytes long.
    pub fn new(cipher_key: impl Into<Vec<u8>>, hmac_key: impl Into<Vec<u8>>) -> Result<Self, Error> {
        let cipher_key = cipher_key.into();
        let hmac_key = hmac_key.into();
        if cipher_key.len() < MIN_KEY_LEN {
            return Err(Error::Configuration(format!(
                "cipher key must be at least {} bytes in length",
                MIN_KEY_LEN,
            )));
        }
        if hmac_key.len() < MIN_KEY_LEN {
            return Err(Error::Configuration(format!(
                "hmac key must be at least {} bytes in length",
                MIN_KEY_LEN,
            )));
        }
        Ok(CipherConfig {
            cipher_key,
            hmac_key,
            iterations: 4096,
        })
    }

    /// Sets the PBKDF2 iteration count, between 1 and 10000.
    pub fn with_iterations(mut self, iterations: u32) -> Result<Self, Error> {
        if iterations == 0 || iterations > MAX_ITERATIONS {
            return Err(Error::Configuration(format!(
                "pbkdf iterations must be between 1 and {}",
                MAX_ITERATIONS,
            )));
        }
        self.iterations = iterations;
        Ok(self)
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }
}

/// Encrypt-then-MAC message encryption over AES-256-CBC and HMAC-SHA1.
pub struct Cipher {
    config: CipherConfig,
    random: Box<dyn RandomGenerator>,
}

impl Cipher {
    pub fn new(config: CipherConfig) -> Self {
        Self::with_random(config, Box::new(OsRandomGenerator))
    }

    /// Like [`Cipher::new`] with an explicit IV source.
    pub fn with_random(config: CipherConfig, random: Box<dyn RandomGenerator>) -> Self {
        Cipher { config, random }
    }

    fn derive_key<const N: usize>(&self, input_key: &[u8], iv: &[u8]) -> [u8; N] {
        let mut key = [0u8; N];
        pbkdf2_hmac::<Sha256>(input_key, iv, self.config.iterations, &mut key);
        key
    }

    fn compute_tag(&self, iv: &[u8], ciphertext: &[u8]) -> Vec<u8> {
        let mac_key: [u8; TAG_SIZE] = self.derive_key(&self.config.hmac_key, iv);
        let mut mac = HmacSha1::new_from_slice(&mac_key).expect("hmac accepts any key size");
        mac.update(iv);
        mac.update(ciphertext);
        mac.finalize().into_bytes().to_vec()
    }

    /// Encrypts the message under a fresh IV and appends the authenticity
    /// tag.
    pub fn encrypt_message(&self, input: &[u8]) -> Vec<u8> {
        let iv_bytes = self.random.generate_bytes(IV_SIZE);
        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&iv_bytes);

        let key: [u8; KEY_SIZE] = self.derive_key(&self.config.cipher_key, &iv);
        let ciphertext =
            Aes256CbcEnc::new(&key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(input);

        let mut message = Vec::with_capacity(IV_SIZE + ciphertext.len() + TAG_SIZE);
        message.extend_from_slice(&iv);
        message.extend_from_slice(&ciphertext);
        let tag = self.compute_tag(&iv, &ciphertext);
        message.extend_from_slice(&tag);
        message
    }

    /// Verifies the authenticity tag and decrypts the message.
    ///
    /// Any damage to the message, including truncation, reports as
    /// [`Error::IntegrityCheckFailed`] without distinguishing the cause.
    pub fn decrypt_message(&self, message: &[u8]) -> Result<Vec<u8>, Error> {
        if message.len() < IV_SIZE + BLOCK_SIZE + TAG_SIZE {
            return Err(Error::IntegrityCheckFailed);
        }
        let (ciphertext, tag) = message.split_at(message.len() - TAG_SIZE);
        let (iv, ciphertext) = ciphertext.split_at(IV_SIZE);

        let expected = self.compute_tag(iv, ciphertext);
        if !timing_safe_eq(&expected, tag) {
            return Err(Error::IntegrityCheckFailed);
        }

        let key: [u8; KEY_SIZE] = self.derive_key(&self.config.cipher_key, iv);
        let mut iv_arr = [0u8; IV_SIZE];
        iv_arr.copy_from_slice(iv);
        Aes256CbcDec::new(&key.into(), &iv_arr.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| Error::IntegrityCheckFailed)
    }
}
