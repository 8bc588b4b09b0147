//! LCP decryption layer.
//!
//! Interposes AES-256-CBC decryption between raw container entries and
//! their consumers, driven by the per-entry encryption metadata declared in
//! the publication manifest. The content key comes from the license
//! subsystem, already resolved; this layer never talks to it.
//!
//! Encrypted resources store the IV in their first 16 bytes, followed by
//! the PKCS#7-padded ciphertext. Entries that were deflated before being
//! encrypted carry a `deflate` compression hint and must be inflated after
//! decryption.

use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::sync::Arc;

use aes::cipher::block_padding::{NoPadding, Pkcs7};
use aes::cipher::{BlockDecryptMut, KeyIvInit};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::container::{Container, Transform, TransformingContainer};
use crate::error::{ReadError, ReadResult};
use crate::mediatype::{MediaType, MediaTypeHints};
use crate::resource::{Properties, Range, Resource, sniff_resource};
use crate::url::EntryUrl;

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const AES_BLOCK: u64 = 16;

/// Algorithm identifier for AES-256-CBC, as declared in encryption metadata.
pub const ALGORITHM_AES256_CBC: &str = "http://www.w3.org/2001/04/xmlenc#aes256-cbc";

/// A resolved LCP content key.
///
/// Produced by the license/authentication subsystem; opaque here.
#[derive(Clone)]
pub struct ContentKey([u8; 32]);

impl ContentKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        ContentKey(bytes)
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContentKey(..)")
    }
}

/// Per-entry encryption metadata from the publication manifest.
#[derive(Debug, Clone)]
pub struct Encryption {
    /// Identifier of the content cipher, e.g. [`ALGORITHM_AES256_CBC`].
    pub algorithm: String,
    /// Whether the plaintext was deflated before encryption.
    pub is_deflated: bool,
    /// Plaintext length declared by the manifest, when present.
    pub original_length: Option<u64>,
}

impl Encryption {
    pub fn aes256_cbc() -> Self {
        Encryption {
            algorithm: ALGORITHM_AES256_CBC.to_string(),
            is_deflated: false,
            original_length: None,
        }
    }

    pub fn deflated(mut self) -> Self {
        self.is_deflated = true;
        self
    }

    pub fn with_original_length(mut self, length: u64) -> Self {
        self.original_length = Some(length);
        self
    }
}

/// URL to encryption metadata, one instance per publication.
pub type EncryptionMap = HashMap<EntryUrl, Encryption>;

/// Two-phase construction of an LCP-protected container.
///
/// The protection is wired into resource access before the publication
/// manifest, and with it the encryption map, is available. `LcpProtection`
/// is the unconfigured first phase: it holds the wrapped container and the
/// content key, and only [`finalize`](LcpProtection::finalize) with the map
/// yields a readable container. No read can happen before the map is known.
pub struct LcpProtection {
    inner: Arc<dyn Container>,
    key: Option<ContentKey>,
}

impl LcpProtection {
    /// Wraps `inner` with a decryption layer using `key`.
    ///
    /// `key` is `None` when no valid credentials were obtained; every read
    /// on a protected entry will then fail with
    /// [`ReadError::AccessDenied`], never return ciphertext.
    pub fn new(inner: Arc<dyn Container>, key: Option<ContentKey>) -> Self {
        LcpProtection { inner, key }
    }

    /// Finalizes the protection with the manifest's encryption map.
    ///
    /// Entries absent from the map pass through untouched.
    pub fn finalize(self, encryption: EncryptionMap) -> TransformingContainer {
        let decryptor = Arc::new(LcpDecryptor {
            key: self.key,
            encryption,
        });
        let transform: Transform = Arc::new(move |url, resource| decryptor.transform(url, resource));
        TransformingContainer::new(self.inner, transform)
    }
}

struct LcpDecryptor {
    key: Option<ContentKey>,
    encryption: EncryptionMap,
}

impl LcpDecryptor {
    fn transform(&self, url: &EntryUrl, raw: Box<dyn Resource>) -> Box<dyn Resource> {
        match self.encryption.get(url) {
            None => raw,
            Some(encryption) => Box::new(DecryptingResource {
                url: url.clone(),
                raw,
                encryption: encryption.clone(),
                key: self.key.clone(),
                plaintext_length: Mutex::new(None),
            }),
        }
    }
}

/// Decrypts an AES-256-CBC resource transparently, including ranged reads.
///
/// The raw resource is unaware of cipher block boundaries, so ranged reads
/// internally request block-aligned raw ranges, including the preceding
/// block as IV, and trim the decrypted output to the caller's range. No
/// decrypted bytes are cached; every read goes back to the raw resource.
struct DecryptingResource {
    url: EntryUrl,
    raw: Box<dyn Resource>,
    encryption: Encryption,
    key: Option<ContentKey>,
    plaintext_length: Mutex<Option<u64>>,
}

impl DecryptingResource {
    fn key(&self) -> ReadResult<&ContentKey> {
        self.key.as_ref().ok_or_else(|| {
            ReadError::AccessDenied(format!("no decryption key for \"{}\"", self.url))
        })
    }

    fn check_algorithm(&self) -> ReadResult<()> {
        if self.encryption.algorithm != ALGORITHM_AES256_CBC {
            return Err(ReadError::UnsupportedOperation(format!(
                "encryption algorithm \"{}\" of \"{}\" is not supported",
                self.encryption.algorithm, self.url
            )));
        }
        Ok(())
    }

    /// Plaintext length of the resource.
    ///
    /// Taken from the manifest when declared; otherwise learned by
    /// decrypting the final ciphertext block to read the padding size.
    async fn plaintext_length(&self) -> ReadResult<u64> {
        if let Some(length) = self.encryption.original_length {
            return Ok(length);
        }

        let mut cached = self.plaintext_length.lock().await;
        if let Some(length) = *cached {
            return Ok(length);
        }

        self.check_algorithm()?;
        let key = self.key()?;

        if self.encryption.is_deflated {
            // Without a declared length, the only way to size a deflated
            // entry is to inflate it.
            let length = self.decrypt_and_inflate().await?.len() as u64;
            *cached = Some(length);
            return Ok(length);
        }

        let cipher_length = self.raw.length().await?;
        check_cipher_length(cipher_length, &self.url)?;

        // The padding size is the last plaintext byte; decrypting the final
        // block needs the block before it as IV.
        let mut tail = self
            .raw
            .read(Some(Range::new(cipher_length - 2 * AES_BLOCK, cipher_length)))
            .await?;
        if tail.len() != 2 * AES_BLOCK as usize {
            return Err(ReadError::Decoding(format!(
                "truncated ciphertext for \"{}\"",
                self.url
            )));
        }
        let (iv, block) = tail.split_at_mut(AES_BLOCK as usize);
        decrypt_no_padding(key, iv, block)?;

        let padding = block[AES_BLOCK as usize - 1] as u64;
        if padding == 0 || padding > AES_BLOCK {
            return Err(ReadError::Decoding(format!(
                "invalid padding in \"{}\"",
                self.url
            )));
        }

        let length = cipher_length - AES_BLOCK - padding;
        *cached = Some(length);
        Ok(length)
    }

    /// Decrypts the whole resource and strips the PKCS#7 padding.
    async fn decrypt_all(&self) -> ReadResult<Vec<u8>> {
        self.check_algorithm()?;
        let key = self.key()?;

        let mut data = self.raw.read(None).await?;
        check_cipher_length(data.len() as u64, &self.url)?;

        let (iv, ciphertext) = data.split_at_mut(AES_BLOCK as usize);
        let decryptor = Aes256CbcDec::new_from_slices(&key.0, iv)
            .map_err(|_| ReadError::Decoding("invalid key or IV length".into()))?;
        let plaintext_len = decryptor
            .decrypt_padded_mut::<Pkcs7>(ciphertext)
            .map_err(|_| ReadError::Decoding(format!("invalid padding in \"{}\"", self.url)))?
            .len();

        data.copy_within(AES_BLOCK as usize.., 0);
        data.truncate(plaintext_len);
        Ok(data)
    }

    async fn decrypt_and_inflate(&self) -> ReadResult<Vec<u8>> {
        let deflated = self.decrypt_all().await?;
        let mut plaintext = Vec::new();
        flate2::read::DeflateDecoder::new(deflated.as_slice())
            .read_to_end(&mut plaintext)
            .map_err(|e| {
                ReadError::Decoding(format!("failed to inflate \"{}\": {e}", self.url))
            })?;
        Ok(plaintext)
    }

    /// Decrypts a plaintext range of an uncompressed entry.
    ///
    /// `range` must already be clamped against the plaintext length.
    async fn decrypt_range(&self, range: Range) -> ReadResult<Vec<u8>> {
        let key = self.key()?;

        // Align the raw read to cipher blocks. Plaintext block k lives in
        // the ciphertext at 16 + 16k; the 16 bytes before it (the previous
        // block, or the IV itself for k = 0) are its IV.
        let first_block = range.start() / AES_BLOCK;
        let end_block = range.end().div_ceil(AES_BLOCK);
        let raw_range = Range::new(first_block * AES_BLOCK, (end_block + 1) * AES_BLOCK);

        // The raw read clamps to the ciphertext length for us.
        let mut data = self.raw.read(Some(raw_range)).await?;
        if data.len() < 2 * AES_BLOCK as usize || data.len() % AES_BLOCK as usize != 0 {
            return Err(ReadError::Decoding(format!(
                "misaligned ciphertext for \"{}\"",
                self.url
            )));
        }

        let (iv, blocks) = data.split_at_mut(AES_BLOCK as usize);
        decrypt_no_padding(key, iv, blocks)?;

        let offset = (range.start() - first_block * AES_BLOCK) as usize;
        blocks
            .get(offset..offset + range.len() as usize)
            .map(|slice| slice.to_vec())
            .ok_or_else(|| {
                ReadError::Decoding(format!(
                    "ciphertext of \"{}\" shorter than its declared length",
                    self.url
                ))
            })
    }
}

#[async_trait]
impl Resource for DecryptingResource {
    async fn length(&self) -> ReadResult<u64> {
        self.plaintext_length().await
    }

    async fn media_type(&self) -> ReadResult<MediaType> {
        sniff_resource(self, &MediaTypeHints::from_url(&self.url)).await
    }

    async fn properties(&self) -> ReadResult<Properties> {
        self.raw.properties().await
    }

    async fn read(&self, range: Option<Range>) -> ReadResult<Vec<u8>> {
        self.check_algorithm()?;

        if self.encryption.is_deflated {
            // Deflate cannot be randomly accessed; serve ranges from a full
            // decrypt-and-inflate pass.
            let plaintext = self.decrypt_and_inflate().await?;
            return Ok(match range {
                None => plaintext,
                Some(range) => {
                    let range = range.clamp(plaintext.len() as u64);
                    plaintext[range.start() as usize..range.end() as usize].to_vec()
                }
            });
        }

        match range {
            None => self.decrypt_all().await,
            Some(range) => {
                let range = range.clamp(self.plaintext_length().await?);
                if range.is_empty() {
                    return Ok(Vec::new());
                }
                self.decrypt_range(range).await
            }
        }
    }

    async fn close(&self) {
        self.raw.close().await;
    }
}

fn check_cipher_length(length: u64, url: &EntryUrl) -> ReadResult<()> {
    if length < 2 * AES_BLOCK || length % AES_BLOCK != 0 {
        return Err(ReadError::Decoding(format!(
            "invalid ciphertext length {length} for \"{url}\""
        )));
    }
    Ok(())
}

fn decrypt_no_padding(key: &ContentKey, iv: &[u8], blocks: &mut [u8]) -> ReadResult<()> {
    let decryptor = Aes256CbcDec::new_from_slices(&key.0, iv)
        .map_err(|_| ReadError::Decoding("invalid key or IV length".into()))?;
    decryptor
        .decrypt_padded_mut::<NoPadding>(blocks)
        .map_err(|_| ReadError::Decoding("misaligned ciphertext".into()))?;
    Ok(())
}
