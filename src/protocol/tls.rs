//! Extracts the SNI hostname from a TLS ClientHello (TLS 1.0–1.3 share the
//! same ClientHello wire shape; this only walks the handshake structure
//! far enough to find the `server_name` extension, it never touches key
//! material).
//!
//! Wire shapes below follow RFC 8446 §4.1.2 / §4.2.11 (ClientHello and the
//! server_name extension); no TLS crate is reached for because the core
//! needs a partial-data-aware cursor (`Incomplete` on truncation), which a
//! full TLS stack's parser does not expose as a standalone primitive.

use super::ParseOutcome;

const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const HANDSHAKE_TYPE_CLIENT_HELLO: u8 = 0x01;
const EXTENSION_SERVER_NAME: u16 = 0x0000;
const SERVER_NAME_TYPE_HOST_NAME: u8 = 0x00;

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

enum ReadErr {
    Incomplete,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ReadErr> {
        if self.pos + n > self.buf.len() {
            return Err(ReadErr::Incomplete);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ReadErr> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ReadErr> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u24(&mut self) -> Result<u32, ReadErr> {
        let b = self.take(3)?;
        Ok(u32::from_be_bytes([0, b[0], b[1], b[2]]))
    }

    fn skip(&mut self, n: usize) -> Result<(), ReadErr> {
        self.take(n).map(|_| ())
    }
}

pub fn parse_client_hello(bytes: &[u8]) -> ParseOutcome {
    match try_parse(bytes) {
        Ok(Some(name)) => ParseOutcome::Hostname(name),
        Ok(None) => ParseOutcome::NoHostname,
        Err(Verdict::Incomplete) => ParseOutcome::Incomplete,
        Err(Verdict::Malformed) => ParseOutcome::Malformed,
    }
}

enum Verdict {
    Incomplete,
    Malformed,
}

impl From<ReadErr> for Verdict {
    fn from(_: ReadErr) -> Self {
        Verdict::Incomplete
    }
}

fn try_parse(bytes: &[u8]) -> Result<Option<String>, Verdict> {
    let mut record = Cursor::new(bytes);

    let content_type = record.u8()?;
    if content_type != CONTENT_TYPE_HANDSHAKE {
        return Err(Verdict::Malformed);
    }
    record.skip(2)?; // legacy_record_version
    let record_len = record.u16()? as usize;
    let handshake_bytes = record.take(record_len)?;

    let mut hs = Cursor::new(handshake_bytes);
    let handshake_type = hs.u8()?;
    if handshake_type != HANDSHAKE_TYPE_CLIENT_HELLO {
        return Err(Verdict::Malformed);
    }
    let hs_len = hs.u24()? as usize;
    let body = hs.take(hs_len)?;

    let mut c = Cursor::new(body);
    c.skip(2)?; // client_version
    c.skip(32)?; // random

    let session_id_len = c.u8()? as usize;
    c.skip(session_id_len)?;

    let cipher_suites_len = c.u16()? as usize;
    c.skip(cipher_suites_len)?;

    let compression_methods_len = c.u8()? as usize;
    c.skip(compression_methods_len)?;

    if c.pos >= c.buf.len() {
        // Extensions are optional; no SNI without them.
        return Ok(None);
    }

    let extensions_len = c.u16()? as usize;
    let extensions = c.take(extensions_len)?;
    let mut ext = Cursor::new(extensions);

    while ext.pos < ext.buf.len() {
        let ext_type = ext.u16()?;
        let ext_len = ext.u16()? as usize;
        let ext_data = ext.take(ext_len)?;

        if ext_type == EXTENSION_SERVER_NAME {
            return Ok(parse_server_name_extension(ext_data));
        }
    }

    Ok(None)
}

fn parse_server_name_extension(data: &[u8]) -> Option<String> {
    let mut c = Cursor::new(data);
    let list_len = c.u16().ok()? as usize;
    let list = c.take(list_len).ok()?;
    let mut l = Cursor::new(list);

    while l.pos < l.buf.len() {
        let name_type = l.u8().ok()?;
        let name_len = l.u16().ok()? as usize;
        let name = l.take(name_len).ok()?;
        if name_type == SERVER_NAME_TYPE_HOST_NAME {
            return std::str::from_utf8(name).ok().map(|s| s.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a minimal ClientHello record carrying a single SNI hostname.
    fn client_hello_with_sni(hostname: &str) -> Vec<u8> {
        let mut server_name_entry = vec![SERVER_NAME_TYPE_HOST_NAME];
        server_name_entry.extend_from_slice(&(hostname.len() as u16).to_be_bytes());
        server_name_entry.extend_from_slice(hostname.as_bytes());

        let mut server_name_list = (server_name_entry.len() as u16).to_be_bytes().to_vec();
        server_name_list.extend_from_slice(&server_name_entry);

        let mut sni_ext = EXTENSION_SERVER_NAME.to_be_bytes().to_vec();
        sni_ext.extend_from_slice(&(server_name_list.len() as u16).to_be_bytes());
        sni_ext.extend_from_slice(&server_name_list);

        build_hello(&sni_ext)
    }

    fn client_hello_without_extensions() -> Vec<u8> {
        build_hello(&[])
    }

    fn build_hello(extensions: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&[0x03, 0x03]); // client_version
        body.extend_from_slice(&[0u8; 32]); // random
        body.push(0); // session_id_len
        body.extend_from_slice(&2u16.to_be_bytes()); // cipher_suites_len
        body.extend_from_slice(&[0x13, 0x01]); // one cipher suite
        body.push(1); // compression_methods_len
        body.push(0);
        body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
        body.extend_from_slice(extensions);

        let mut handshake = vec![HANDSHAKE_TYPE_CLIENT_HELLO];
        handshake.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
        handshake.extend_from_slice(&body);

        let mut record = vec![CONTENT_TYPE_HANDSHAKE, 0x03, 0x01];
        record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
        record.extend_from_slice(&handshake);
        record
    }

    #[test]
    fn extracts_sni_hostname() {
        let bytes = client_hello_with_sni("example.com");
        assert_eq!(
            parse_client_hello(&bytes),
            ParseOutcome::Hostname("example.com".to_string())
        );
    }

    #[test]
    fn no_extensions_means_no_hostname() {
        let bytes = client_hello_without_extensions();
        assert_eq!(parse_client_hello(&bytes), ParseOutcome::NoHostname);
    }

    #[test]
    fn truncated_record_is_incomplete() {
        let bytes = client_hello_with_sni("example.com");
        let truncated = &bytes[..bytes.len() - 5];
        assert_eq!(parse_client_hello(truncated), ParseOutcome::Incomplete);
    }

    #[test]
    fn wrong_content_type_is_malformed() {
        let mut bytes = client_hello_with_sni("example.com");
        bytes[0] = 0x17; // application_data, not handshake
        assert_eq!(parse_client_hello(&bytes), ParseOutcome::Malformed);
    }

    #[test]
    fn parser_is_deterministic() {
        let bytes = client_hello_with_sni("a.test");
        assert_eq!(parse_client_hello(&bytes), parse_client_hello(&bytes));
    }
}
