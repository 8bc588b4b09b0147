//! Integration tests for the container layer: ZIP archives over an
//! instrumented backing, composition through routing and transforms, and
//! LCP decryption round trips.

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pubfs::{
    Container, ContentKey, EncryptionMap, Encryption, EntryUrl, InMemoryResource, LcpProtection,
    MediaType, Range, ReadAt, ReadError, ReadResult, Resource, RoutingContainer,
    SingleResourceContainer, TransformingContainer, ZipContainer,
};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod as ZipMethod, ZipWriter};

const STORED_TEXT: &[u8] = b"hello world";

fn chapter_content() -> Vec<u8> {
    // Repetitive enough to actually deflate.
    let mut content = Vec::new();
    for i in 0..200 {
        content.extend_from_slice(format!("<p>paragraph number {i} of the chapter</p>\n").as_bytes());
    }
    content
}

fn build_zip() -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let stored = SimpleFileOptions::default().compression_method(ZipMethod::Stored);
    let deflated = SimpleFileOptions::default().compression_method(ZipMethod::Deflated);

    writer.start_file("mimetype", stored).unwrap();
    writer.write_all(b"application/epub+zip").unwrap();

    writer.start_file("text.txt", stored).unwrap();
    writer.write_all(STORED_TEXT).unwrap();

    writer.add_directory("OEBPS/images", stored).unwrap();

    writer.start_file("OEBPS/chapter1.xhtml", deflated).unwrap();
    writer.write_all(&chapter_content()).unwrap();

    writer.finish().unwrap().into_inner()
}

/// In-memory backing that records every positioned read.
#[derive(Debug)]
struct CountingReader {
    data: Vec<u8>,
    calls: Mutex<Vec<u64>>,
}

impl CountingReader {
    fn new(data: Vec<u8>) -> Self {
        CountingReader {
            data,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ReadAt for CountingReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> ReadResult<usize> {
        self.calls.lock().unwrap().push(offset);
        if offset >= self.data.len() as u64 {
            return Ok(0);
        }
        let available = &self.data[offset as usize..];
        let n = buf.len().min(available.len());
        buf[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

async fn open_container() -> (ZipContainer<CountingReader>, Arc<CountingReader>) {
    let reader = Arc::new(CountingReader::new(build_zip()));
    let container = ZipContainer::open(reader.clone()).await.unwrap();
    (container, reader)
}

fn url(path: &str) -> EntryUrl {
    EntryUrl::new(path).unwrap()
}

#[tokio::test]
async fn enumerates_files_but_not_directories() {
    let (container, _) = open_container().await;
    let entries = container.entries();

    assert!(entries.contains(&url("mimetype")));
    assert!(entries.contains(&url("text.txt")));
    assert!(entries.contains(&url("OEBPS/chapter1.xhtml")));
    assert_eq!(entries.len(), 3);

    assert!(container.get(&url("text.txt")).is_some());
    assert!(container.get(&url("nope.txt")).is_none());
    assert!(container.get(&url("OEBPS/images")).is_none());
}

#[tokio::test]
async fn stored_entry_ranged_reads() {
    let (container, _) = open_container().await;
    let entry = container.get(&url("text.txt")).unwrap();

    assert_eq!(entry.length().await.unwrap(), 11);

    let full = entry.read(None).await.unwrap();
    assert_eq!(full, STORED_TEXT);

    // The full range and `None` return identical bytes.
    let whole_range = entry.read(Some(Range::new(0, 11))).await.unwrap();
    assert_eq!(whole_range, full);

    assert_eq!(entry.read(Some(Range::new(0, 5))).await.unwrap(), b"hello");
    assert_eq!(entry.read(Some(Range::new(6, 11))).await.unwrap(), b"world");

    // Every sub-range matches slicing the full read.
    for start in 0..full.len() {
        for end in start..=full.len() {
            let range = Range::new(start as u64, end as u64);
            assert_eq!(
                entry.read(Some(range)).await.unwrap(),
                &full[start..end],
                "range [{start}, {end})"
            );
        }
    }

    let properties = entry.properties().await.unwrap();
    let archive = properties.archive.unwrap();
    assert!(!archive.is_entry_compressed);
    assert_eq!(archive.entry_length, 11);
}

#[tokio::test]
async fn deflated_entry_reads() {
    let (container, _) = open_container().await;
    let entry = container.get(&url("OEBPS/chapter1.xhtml")).unwrap();
    let content = chapter_content();

    assert_eq!(entry.length().await.unwrap(), content.len() as u64);
    assert_eq!(entry.read(None).await.unwrap(), content);

    let range = entry.read(Some(Range::new(100, 400))).await.unwrap();
    assert_eq!(range, &content[100..400]);

    let properties = entry.properties().await.unwrap();
    let archive = properties.archive.unwrap();
    assert!(archive.is_entry_compressed);
    assert!(archive.entry_length < content.len() as u64);
}

#[tokio::test]
async fn forward_reads_reuse_the_decompression_stream() {
    let (container, reader) = open_container().await;
    let entry = container.get(&url("OEBPS/chapter1.xhtml")).unwrap();
    let content = chapter_content();

    let first = entry.read(Some(Range::new(2, 5))).await.unwrap();
    assert_eq!(first, &content[2..5]);
    let calls_after_first = reader.call_count();

    // The compressed data fits the cursor's input buffer, so advancing the
    // cached stream must not go back to the backing at all.
    let second = entry.read(Some(Range::new(5, 8))).await.unwrap();
    assert_eq!(second, &content[5..8]);
    assert_eq!(reader.call_count(), calls_after_first);

    let third = entry.read(Some(Range::new(700, 900))).await.unwrap();
    assert_eq!(third, &content[700..900]);
    assert_eq!(reader.call_count(), calls_after_first);
}

#[tokio::test]
async fn sequential_ranges_match_fresh_streams() {
    // Stream reuse must be observationally transparent: the same requests
    // against a container reopened for every read return the same bytes.
    let ranges = [(0u64, 10u64), (10, 37), (37, 1000), (2000, 2500)];

    let (container, _) = open_container().await;
    let entry = container.get(&url("OEBPS/chapter1.xhtml")).unwrap();

    for (start, end) in ranges {
        let reused = entry.read(Some(Range::new(start, end))).await.unwrap();

        let (fresh_container, _) = open_container().await;
        let fresh_entry = fresh_container.get(&url("OEBPS/chapter1.xhtml")).unwrap();
        let fresh = fresh_entry.read(Some(Range::new(start, end))).await.unwrap();

        assert_eq!(reused, fresh, "range [{start}, {end})");
    }
}

#[tokio::test]
async fn backward_seek_restarts_the_stream() {
    let (container, reader) = open_container().await;
    let entry = container.get(&url("OEBPS/chapter1.xhtml")).unwrap();
    let content = chapter_content();

    let tail = entry.read(Some(Range::new(500, 600))).await.unwrap();
    assert_eq!(tail, &content[500..600]);
    let calls_after_tail = reader.call_count();

    // Going backward discards the cursor and re-reads the compressed data.
    let head = entry.read(Some(Range::new(0, 100))).await.unwrap();
    assert_eq!(head, &content[0..100]);
    assert!(reader.call_count() > calls_after_tail);
}

#[tokio::test]
async fn out_of_range_reads_clamp() {
    let (container, _) = open_container().await;

    let stored = container.get(&url("text.txt")).unwrap();
    assert_eq!(stored.read(Some(Range::new(6, 100))).await.unwrap(), b"world");
    assert!(stored.read(Some(Range::new(100, 200))).await.unwrap().is_empty());

    let deflated = container.get(&url("OEBPS/chapter1.xhtml")).unwrap();
    let content = chapter_content();
    let overshoot = deflated
        .read(Some(Range::new(content.len() as u64 - 10, u64::MAX)))
        .await
        .unwrap();
    assert_eq!(overshoot, &content[content.len() - 10..]);
    assert!(
        deflated
            .read(Some(Range::new(1 << 40, 1 << 41)))
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn close_invalidates_entries() {
    let (container, _) = open_container().await;
    let entry = container.get(&url("text.txt")).unwrap();
    assert!(entry.read(None).await.is_ok());

    container.close().await;
    container.close().await; // idempotent

    let err = entry.read(None).await.unwrap_err();
    assert!(matches!(err, ReadError::UnsupportedOperation(_)));
    let err = entry.read(Some(Range::new(0, 4))).await.unwrap_err();
    assert!(matches!(err, ReadError::UnsupportedOperation(_)));
}

#[tokio::test]
async fn close_releases_the_backing_handle() {
    let reader = Arc::new(CountingReader::new(build_zip()));
    let container = ZipContainer::open(reader.clone()).await.unwrap();
    let entry = container.get(&url("text.txt")).unwrap();

    // The container is the only other holder of the backing.
    assert_eq!(Arc::strong_count(&reader), 2);
    container.close().await;
    assert_eq!(Arc::strong_count(&reader), 1);

    let err = entry.read(None).await.unwrap_err();
    assert!(matches!(err, ReadError::UnsupportedOperation(_)));
}

/// Overwrites a little-endian field of the named entry's central directory
/// record, at `field` bytes from the record's signature.
fn patch_central_directory(archive: &mut [u8], name: &str, field: usize, value: &[u8]) {
    let mut i = 0;
    while i + 46 <= archive.len() {
        if &archive[i..i + 4] == b"PK\x01\x02" {
            let name_len = u16::from_le_bytes([archive[i + 28], archive[i + 29]]) as usize;
            if archive[i + 46..i + 46 + name_len] == *name.as_bytes() {
                archive[i + field..i + field + value.len()].copy_from_slice(value);
                return;
            }
        }
        i += 1;
    }
    panic!("no central directory record for {name}");
}

#[tokio::test]
async fn truncated_deflate_stream_is_a_decoding_error() {
    let real_len = chapter_content().len() as u64;
    let mut archive = build_zip();
    // Claim more plaintext than the deflate stream actually holds; the
    // uncompressed size sits 24 bytes into the record.
    patch_central_directory(
        &mut archive,
        "OEBPS/chapter1.xhtml",
        24,
        &(real_len as u32 + 1000).to_le_bytes(),
    );

    let container = ZipContainer::open(Arc::new(CountingReader::new(archive)))
        .await
        .unwrap();
    let entry = container.get(&url("OEBPS/chapter1.xhtml")).unwrap();

    // Skipping to an offset the stream cannot reach is fatal, not empty.
    let err = entry
        .read(Some(Range::new(real_len + 10, real_len + 20)))
        .await
        .unwrap_err();
    assert!(matches!(err, ReadError::Decoding(_)));

    // A full read hits the early end of stream the same way.
    let err = entry.read(None).await.unwrap_err();
    assert!(matches!(err, ReadError::Decoding(_)));
}

#[tokio::test]
async fn unsupported_compression_method_fails_on_read() {
    let mut archive = build_zip();
    // The compression method sits 10 bytes into the record; 99 is assigned
    // to no real method.
    patch_central_directory(&mut archive, "text.txt", 10, &99u16.to_le_bytes());

    let container = ZipContainer::open(Arc::new(CountingReader::new(archive)))
        .await
        .unwrap();
    let entry = container.get(&url("text.txt")).unwrap();

    // Metadata stays readable; only the bytes are out of reach.
    assert_eq!(entry.length().await.unwrap(), 11);

    let err = entry.read(None).await.unwrap_err();
    assert!(matches!(err, ReadError::UnsupportedOperation(_)));
    let err = entry.read(Some(Range::new(0, 4))).await.unwrap_err();
    assert!(matches!(err, ReadError::UnsupportedOperation(_)));
}

#[tokio::test]
async fn media_type_from_entry_name() {
    let (container, _) = open_container().await;
    let entry = container.get(&url("OEBPS/chapter1.xhtml")).unwrap();
    assert_eq!(
        entry.media_type().await.unwrap().as_str(),
        MediaType::XHTML
    );
}

#[tokio::test]
async fn corrupt_archive_is_a_decoding_error() {
    let reader = Arc::new(CountingReader::new(
        b"this is definitely not a zip archive, not even close".to_vec(),
    ));
    let err = ZipContainer::open(reader).await.unwrap_err();
    assert!(matches!(err, ReadError::Decoding(_)));
}

#[tokio::test]
async fn routing_prefers_local_entries() {
    let manifest = url("manifest.json");
    let shared = url("cover.jpg");

    let local = RoutingContainer::new(
        Arc::new(SingleResourceContainer::new(
            manifest.clone(),
            InMemoryResource::new(b"{\"local\":true}".to_vec()),
        )),
        Arc::new(SingleResourceContainer::new(
            shared.clone(),
            InMemoryResource::new(b"remote bytes".to_vec()),
        )),
    );

    let entries = local.entries();
    assert!(entries.contains(&manifest));
    assert!(entries.contains(&shared));
    assert_eq!(entries.len(), 2);

    assert_eq!(
        local.get(&manifest).unwrap().read(None).await.unwrap(),
        b"{\"local\":true}"
    );
    assert_eq!(
        local.get(&shared).unwrap().read(None).await.unwrap(),
        b"remote bytes"
    );
    assert!(local.get(&url("absent.css")).is_none());
}

#[tokio::test]
async fn routing_shadows_remote_with_local() {
    let both = url("manifest.json");
    let router = RoutingContainer::new(
        Arc::new(SingleResourceContainer::new(
            both.clone(),
            InMemoryResource::new(b"local".to_vec()),
        )),
        Arc::new(SingleResourceContainer::new(
            both.clone(),
            InMemoryResource::new(b"remote".to_vec()),
        )),
    );

    assert_eq!(router.entries().len(), 1);
    assert_eq!(router.get(&both).unwrap().read(None).await.unwrap(), b"local");
}

/// Length-preserving transform inverting every byte, for checking that the
/// transforming container rewires reads without touching the URL set.
struct InvertingResource(Box<dyn Resource>);

#[async_trait]
impl Resource for InvertingResource {
    async fn length(&self) -> ReadResult<u64> {
        self.0.length().await
    }

    async fn media_type(&self) -> ReadResult<MediaType> {
        self.0.media_type().await
    }

    async fn read(&self, range: Option<Range>) -> ReadResult<Vec<u8>> {
        let mut bytes = self.0.read(range).await?;
        for byte in &mut bytes {
            *byte = !*byte;
        }
        Ok(bytes)
    }

    async fn close(&self) {
        self.0.close().await;
    }
}

#[tokio::test]
async fn transforming_container_wraps_reads() {
    let target = url("a.bin");
    let inner = Arc::new(SingleResourceContainer::new(
        target.clone(),
        InMemoryResource::new(vec![0x00, 0x0F, 0xF0]),
    ));
    let container = TransformingContainer::new(
        inner,
        Arc::new(|_url: &EntryUrl, raw: Box<dyn Resource>| {
            Box::new(InvertingResource(raw)) as Box<dyn Resource>
        }),
    );

    assert_eq!(container.entries().len(), 1);
    assert_eq!(
        container.get(&target).unwrap().read(None).await.unwrap(),
        vec![0xFF, 0xF0, 0x0F]
    );
}

// --- LCP -----------------------------------------------------------------

const KEY: [u8; 32] = [7u8; 32];
const IV: [u8; 16] = [9u8; 16];

fn encrypt(plaintext: &[u8]) -> Vec<u8> {
    use aes::cipher::block_padding::Pkcs7;
    use aes::cipher::{BlockEncryptMut, KeyIvInit};
    type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

    let ciphertext = Aes256CbcEnc::new_from_slices(&KEY, &IV)
        .unwrap()
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut file = IV.to_vec();
    file.extend_from_slice(&ciphertext);
    file
}

fn lcp_plaintext() -> Vec<u8> {
    (0..1000u32).map(|i| (i % 251) as u8).collect()
}

/// An encrypted entry and a plain one behind an LCP transforming container.
fn protected_container(
    key: Option<ContentKey>,
    encryption: Encryption,
) -> TransformingContainer {
    let encrypted_url = url("OEBPS/chapter.bin");
    let plain_url = url("mimetype");

    let inner = RoutingContainer::new(
        Arc::new(SingleResourceContainer::new(
            encrypted_url.clone(),
            InMemoryResource::new(encrypt(&lcp_plaintext())),
        )),
        Arc::new(SingleResourceContainer::new(
            plain_url,
            InMemoryResource::new(b"application/epub+zip".to_vec()),
        )),
    );

    let mut map: EncryptionMap = HashMap::new();
    map.insert(encrypted_url, encryption);

    // Two-phase: the protection exists before the encryption map is known,
    // and only finalizing it yields a readable container.
    LcpProtection::new(Arc::new(inner), key).finalize(map)
}

#[tokio::test]
async fn lcp_decrypts_full_reads() {
    let container = protected_container(Some(ContentKey::new(KEY)), Encryption::aes256_cbc());
    let entry = container.get(&url("OEBPS/chapter.bin")).unwrap();

    assert_eq!(entry.read(None).await.unwrap(), lcp_plaintext());
    // Plaintext length, not ciphertext length.
    assert_eq!(entry.length().await.unwrap(), 1000);
}

#[tokio::test]
async fn lcp_chunked_ranges_concatenate_to_plaintext() {
    let container = protected_container(Some(ContentKey::new(KEY)), Encryption::aes256_cbc());
    let entry = container.get(&url("OEBPS/chapter.bin")).unwrap();
    let plaintext = lcp_plaintext();

    // Chunk boundaries deliberately misaligned with cipher blocks.
    for chunk_len in [7u64, 16, 33, 250] {
        let mut assembled = Vec::new();
        let mut start = 0;
        while start < plaintext.len() as u64 {
            let end = (start + chunk_len).min(plaintext.len() as u64);
            assembled.extend(entry.read(Some(Range::new(start, end))).await.unwrap());
            start = end;
        }
        assert_eq!(assembled, plaintext, "chunk length {chunk_len}");
    }

    // Clamping applies to the plaintext length, not the ciphertext length.
    let tail = entry.read(Some(Range::new(990, 5000))).await.unwrap();
    assert_eq!(tail, &plaintext[990..]);
    assert!(entry.read(Some(Range::new(5000, 6000))).await.unwrap().is_empty());
}

#[tokio::test]
async fn lcp_leaves_unmapped_entries_untouched() {
    let container = protected_container(Some(ContentKey::new(KEY)), Encryption::aes256_cbc());
    let entry = container.get(&url("mimetype")).unwrap();
    assert_eq!(entry.read(None).await.unwrap(), b"application/epub+zip");
}

#[tokio::test]
async fn lcp_missing_key_denies_access() {
    let container = protected_container(None, Encryption::aes256_cbc());
    let entry = container.get(&url("OEBPS/chapter.bin")).unwrap();

    let err = entry.read(None).await.unwrap_err();
    assert!(matches!(err, ReadError::AccessDenied(_)));
    let err = entry.read(Some(Range::new(0, 16))).await.unwrap_err();
    assert!(matches!(err, ReadError::AccessDenied(_)));

    // The plain sibling stays readable.
    let plain = container.get(&url("mimetype")).unwrap();
    assert!(plain.read(None).await.is_ok());
}

#[tokio::test]
async fn lcp_unsupported_algorithm_fails() {
    let encryption = Encryption {
        algorithm: "urn:example:unknown-cipher".to_string(),
        is_deflated: false,
        original_length: None,
    };
    let container = protected_container(Some(ContentKey::new(KEY)), encryption);
    let entry = container.get(&url("OEBPS/chapter.bin")).unwrap();

    let err = entry.read(None).await.unwrap_err();
    assert!(matches!(err, ReadError::UnsupportedOperation(_)));
}

#[tokio::test]
async fn lcp_decrypts_deflated_entries() {
    let plaintext = lcp_plaintext();
    let mut encoder =
        flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&plaintext).unwrap();
    let deflated = encoder.finish().unwrap();

    let encrypted_url = url("OEBPS/chapter.bin");
    let inner = SingleResourceContainer::new(
        encrypted_url.clone(),
        InMemoryResource::new(encrypt(&deflated)),
    );

    let mut map: EncryptionMap = HashMap::new();
    map.insert(
        encrypted_url.clone(),
        Encryption::aes256_cbc()
            .deflated()
            .with_original_length(plaintext.len() as u64),
    );

    let container =
        LcpProtection::new(Arc::new(inner), Some(ContentKey::new(KEY))).finalize(map);
    let entry = container.get(&encrypted_url).unwrap();

    assert_eq!(entry.length().await.unwrap(), plaintext.len() as u64);
    assert_eq!(entry.read(None).await.unwrap(), plaintext);
    assert_eq!(
        entry.read(Some(Range::new(5, 25))).await.unwrap(),
        &plaintext[5..25]
    );
}

#[tokio::test]
async fn lcp_over_zip_archive() {
    // End to end: an encrypted entry stored inside a ZIP archive, served
    // through the decrypting transform.
    let plaintext = chapter_content();
    let encrypted = encrypt(&plaintext);

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let stored = SimpleFileOptions::default().compression_method(ZipMethod::Stored);
    writer.start_file("OEBPS/chapter1.xhtml", stored).unwrap();
    writer.write_all(&encrypted).unwrap();
    let bytes = writer.finish().unwrap().into_inner();

    let zip = ZipContainer::open(Arc::new(CountingReader::new(bytes)))
        .await
        .unwrap();

    let chapter = url("OEBPS/chapter1.xhtml");
    let mut map: EncryptionMap = HashMap::new();
    map.insert(chapter.clone(), Encryption::aes256_cbc());

    let container =
        LcpProtection::new(Arc::new(zip), Some(ContentKey::new(KEY))).finalize(map);
    let entry = container.get(&chapter).unwrap();

    assert_eq!(entry.length().await.unwrap(), plaintext.len() as u64);
    assert_eq!(entry.read(None).await.unwrap(), plaintext);
    assert_eq!(
        entry.read(Some(Range::new(40, 120))).await.unwrap(),
        &plaintext[40..120]
    );
}

#[tokio::test]
async fn file_resource_serves_ranges() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"persisted publication bytes").unwrap();

    let resource = pubfs::FileResource::open(file.path()).unwrap();
    assert_eq!(resource.length().await.unwrap(), 27);
    assert_eq!(
        resource.read(Some(Range::new(10, 21))).await.unwrap(),
        b"publication"
    );
    assert_eq!(resource.read(None).await.unwrap().len(), 27);
}

#[tokio::test]
async fn zip_container_over_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&build_zip()).unwrap();

    let container = ZipContainer::open_file(file.path()).await.unwrap();
    let entry = container.get(&url("text.txt")).unwrap();
    assert_eq!(entry.read(Some(Range::new(0, 5))).await.unwrap(), b"hello");
    container.close().await;
}
