//! LOB handles: on-demand content operations against a server locator.
//!
//! A fetched row carries locators, not content; the application reads
//! bytes through a [`Lob`] while the connection is open and idle. Every
//! mutating operation invalidates the locator's cached length.

use std::sync::Weak;

use bytes::Bytes;

use crate::connection::ConnInner;
use crate::constants::OraType;
use crate::error::{Error, Result};
use crate::messages::LobCall;
use crate::types::{decode_lob_payload, LobChunk, LobLocator};

/// A server-side LOB bound to its connection.
pub struct Lob {
    conn: Weak<ConnInner>,
    locator: LobLocator,
}

impl Lob {
    pub(crate) fn new(conn: Weak<ConnInner>, locator: LobLocator) -> Self {
        Self { conn, locator }
    }

    fn conn(&self) -> Result<std::sync::Arc<ConnInner>> {
        self.conn.upgrade().ok_or(Error::ConnectionClosed)
    }

    /// The underlying locator.
    pub fn locator(&self) -> &LobLocator {
        &self.locator
    }

    /// The LOB's column type.
    pub fn ora_type(&self) -> OraType {
        self.locator.ora_type()
    }

    /// True for temporary LOBs.
    pub fn is_temporary(&self) -> bool {
        self.locator.is_temporary()
    }

    async fn run(&mut self, mut call: LobCall) -> Result<LobCall> {
        let conn = self.conn()?;
        conn.call(&mut call).await?;
        if let Some(updated) = call.outcome.updated_locator.take() {
            self.locator.update_bytes(updated);
        }
        Ok(call)
    }

    /// The LOB length in characters (CLOB) or bytes (BLOB). Served from
    /// the fetch-time cache when still valid.
    pub async fn length(&mut self) -> Result<u64> {
        if let Some(cached) = self.locator.cached_length() {
            return Ok(cached);
        }
        let conn = self.conn()?;
        let seq = conn.next_sequence().await;
        let call = LobCall::length(self.locator.as_bytes().to_vec(), seq);
        let call = self.run(call).await?;
        Ok(call.outcome.amount)
    }

    /// The server's preferred IO chunk size.
    pub async fn chunk_size(&mut self) -> Result<u32> {
        if self.locator.chunk_size() != 0 {
            return Ok(self.locator.chunk_size());
        }
        let conn = self.conn()?;
        let seq = conn.next_sequence().await;
        let call = LobCall::chunk_size(self.locator.as_bytes().to_vec(), seq);
        let call = self.run(call).await?;
        Ok(call.outcome.amount as u32)
    }

    /// Read `amount` units from the 1-based `offset`. Returns the chunk
    /// and whether more content remains past it.
    pub async fn read(&mut self, offset: u64, amount: u64) -> Result<(LobChunk, bool)> {
        let conn = self.conn()?;
        let seq = conn.next_sequence().await;
        let call = LobCall::read(self.locator.as_bytes().to_vec(), offset.max(1), amount, seq);
        let call = self.run(call).await?;
        let raw = Bytes::from(call.outcome.data);
        let chunk = decode_lob_payload(&self.locator, raw)?;
        let read_units = chunk.len() as u64;
        let total = self.length().await?;
        let more = offset.max(1) - 1 + read_units < total;
        Ok((chunk, more))
    }

    /// Read the entire content.
    pub async fn read_all(&mut self) -> Result<LobChunk> {
        let total = self.length().await?;
        let (chunk, _) = self.read(1, total.max(1)).await?;
        Ok(chunk)
    }

    /// Write bytes (BLOB) or UTF-8 text (CLOB) at the 1-based `offset`.
    pub async fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let conn = self.conn()?;
        let seq = conn.next_sequence().await;
        let call = LobCall::write(
            self.locator.as_bytes().to_vec(),
            offset.max(1),
            data.to_vec(),
            seq,
        );
        self.run(call).await?;
        self.locator.invalidate_length();
        Ok(())
    }

    /// Truncate to `new_length` units.
    pub async fn trim(&mut self, new_length: u64) -> Result<()> {
        let conn = self.conn()?;
        let seq = conn.next_sequence().await;
        let call = LobCall::trim(self.locator.as_bytes().to_vec(), new_length, seq);
        self.run(call).await?;
        self.locator.invalidate_length();
        Ok(())
    }

    /// Open the LOB for a batch of operations.
    pub async fn open(&mut self) -> Result<()> {
        let conn = self.conn()?;
        let seq = conn.next_sequence().await;
        let call = LobCall::open(self.locator.as_bytes().to_vec(), seq);
        self.run(call).await?;
        Ok(())
    }

    /// Close an opened LOB.
    pub async fn close(&mut self) -> Result<()> {
        let conn = self.conn()?;
        let seq = conn.next_sequence().await;
        let call = LobCall::close(self.locator.as_bytes().to_vec(), seq);
        self.run(call).await?;
        Ok(())
    }

    /// Free a temporary LOB. Required before the session ends; dropping
    /// the handle does not free server resources.
    pub async fn free_temporary(&mut self) -> Result<()> {
        if !self.is_temporary() {
            return Err(Error::Interface("LOB is not temporary".into()));
        }
        let conn = self.conn()?;
        let seq = conn.next_sequence().await;
        let call = LobCall::free_temp(self.locator.as_bytes().to_vec(), seq);
        self.run(call).await?;
        Ok(())
    }

    /// Does the BFILE exist on the server filesystem?
    pub async fn file_exists(&mut self) -> Result<bool> {
        if self.ora_type() != OraType::Bfile {
            return Err(Error::Interface("not a BFILE locator".into()));
        }
        let conn = self.conn()?;
        let seq = conn.next_sequence().await;
        let call = LobCall::file_exists(self.locator.as_bytes().to_vec(), seq);
        let call = self.run(call).await?;
        Ok(call.outcome.amount != 0)
    }
}

impl std::fmt::Debug for Lob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lob")
            .field("ora_type", &self.locator.ora_type())
            .field("temporary", &self.locator.is_temporary())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orphan_lob(ora_type: OraType) -> Lob {
        let locator = LobLocator::new(Bytes::from(vec![0u8; 40]), ora_type, 1);
        Lob::new(Weak::new(), locator)
    }

    #[tokio::test]
    async fn dead_connection_fails_fast() {
        let mut lob = orphan_lob(OraType::Clob);
        assert!(matches!(
            lob.length().await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn cached_length_short_circuits() {
        let locator = LobLocator::new(Bytes::from(vec![0u8; 40]), OraType::Clob, 1)
            .with_cached_length(99);
        let mut lob = Lob::new(Weak::new(), locator);
        // No connection needed: the cache answers.
        assert_eq!(lob.length().await.unwrap(), 99);
    }

    #[tokio::test]
    async fn free_requires_temporary() {
        let mut lob = orphan_lob(OraType::Clob);
        assert!(matches!(
            lob.free_temporary().await,
            Err(Error::Interface(_))
        ));
    }

    #[tokio::test]
    async fn file_exists_requires_bfile() {
        let mut lob = orphan_lob(OraType::Blob);
        assert!(matches!(
            lob.file_exists().await,
            Err(Error::Interface(_))
        ));
    }
}
