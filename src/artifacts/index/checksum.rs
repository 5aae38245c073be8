//! Checksummed I/O wrapper for the index file: every byte read or written
//! flows through a running SHA-1 digest that is compared against (or
//! appended as) the 20-byte trailer.

use crate::artifacts::core::CoreError;
use crate::artifacts::index::CHECKSUM_SIZE;
use bytes::Bytes;
use sha1::{Digest, Sha1};
use std::io::{Read, Write};

#[derive(Debug)]
pub struct Checksum<F> {
    inner: F,
    digest: Sha1,
}

impl<F> Checksum<F> {
    pub fn new(inner: F) -> Self {
        Checksum {
            inner,
            digest: Sha1::new(),
        }
    }
}

impl<F: Read> Checksum<F> {
    pub fn read(&mut self, size: usize) -> anyhow::Result<Bytes> {
        let mut buffer = vec![0; size];
        self.inner
            .read_exact(&mut buffer)
            .map_err(|_| CoreError::Corrupt("unexpected end-of-file while reading index".to_string()))?;

        self.digest.update(&buffer);
        Ok(Bytes::from(buffer))
    }

    /// Compare the running digest against the stored trailer.
    pub fn verify(&mut self) -> anyhow::Result<()> {
        let mut expected_checksum = [0u8; CHECKSUM_SIZE];
        self.inner.read_exact(&mut expected_checksum)?;

        let actual_checksum = self.digest.clone().finalize();

        if expected_checksum != actual_checksum.as_slice() {
            return Err(
                CoreError::Corrupt("index checksum does not match value stored on disk".to_string())
                    .into(),
            );
        }

        Ok(())
    }
}

impl<F: Write> Checksum<F> {
    pub fn write(&mut self, data: &[u8]) -> anyhow::Result<()> {
        self.inner.write_all(data)?;
        self.digest.update(data);
        Ok(())
    }

    pub fn write_checksum(&mut self) -> anyhow::Result<()> {
        let checksum = self.digest.clone().finalize();
        self.inner.write_all(checksum.as_slice())?;

        Ok(())
    }
}
